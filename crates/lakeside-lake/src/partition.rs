//! Partition grouper: orders staging keys into per-partition batches.
//!
//! This is a pure function over key names. It cannot fail: keys outside the
//! staging namespace, and keys with empty or malformed partition segments,
//! are silently dropped — they are not part of the lake's staging contract
//! and must not be touched by compaction.

use std::collections::HashMap;

use lakeside_core::LakePaths;

/// One partition's share of a snapshot, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionGroup {
    /// The Hive `field=value` partition segment.
    pub partition: String,
    /// Staging keys belonging to this partition, preserving input order.
    pub keys: Vec<String>,
}

/// Groups staging keys by partition.
///
/// Group order follows the first occurrence of each partition; key order
/// within a group preserves input order.
#[must_use]
pub fn group_by_partition<I, S>(keys: I) -> Vec<PartitionGroup>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut groups: Vec<PartitionGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for key in keys {
        let key = key.as_ref();
        let Some(partition) = LakePaths::partition_of(key) else {
            continue;
        };

        match index.get(partition) {
            Some(&i) => groups[i].keys.push(key.to_string()),
            None => {
                index.insert(partition.to_string(), groups.len());
                groups.push(PartitionGroup {
                    partition: partition.to_string(),
                    keys: vec![key.to_string()],
                });
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn groups_by_partition_preserving_order() {
        let keys = [
            "data/p=A/1.json",
            "data/p=B/2.json",
            "data/p=A/3.ndjson",
            "data/p=B/4.json",
        ];
        let groups = group_by_partition(keys);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].partition, "p=A");
        assert_eq!(groups[0].keys, vec!["data/p=A/1.json", "data/p=A/3.ndjson"]);
        assert_eq!(groups[1].partition, "p=B");
        assert_eq!(groups[1].keys, vec!["data/p=B/2.json", "data/p=B/4.json"]);
    }

    #[test]
    fn drops_keys_outside_staging_namespace() {
        let keys = [
            "parquet/p=A/part-x.parquet",
            "_log/00000000.json",
            "schema/schema.json",
            "data/p=A/keep.json",
        ];
        let groups = group_by_partition(keys);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].keys, vec!["data/p=A/keep.json"]);
    }

    #[test]
    fn drops_malformed_partition_segments() {
        let keys = [
            "data//empty.json",
            "data/noequals/x.json",
            "data/=nofield/x.json",
            "data/novalue=/x.json",
            "data/ok=yes/x.json",
        ];
        let groups = group_by_partition(keys);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].partition, "ok=yes");
    }

    #[test]
    fn empty_input_is_empty_output() {
        let groups = group_by_partition(Vec::<String>::new());
        assert!(groups.is_empty());
    }

    proptest! {
        #[test]
        fn output_keys_are_a_subset_in_order(
            keys in prop::collection::vec("(data/[a-c]=[a-c]/[a-z]{1,4}\\.json|[a-z]{1,8})", 0..30)
        ) {
            let groups = group_by_partition(&keys);

            for group in &groups {
                // Every grouped key parses back to its group's partition.
                for key in &group.keys {
                    prop_assert_eq!(
                        LakePaths::partition_of(key),
                        Some(group.partition.as_str())
                    );
                }

                // Within a group, input order is preserved.
                let expected: Vec<&String> = keys
                    .iter()
                    .filter(|k| LakePaths::partition_of(k) == Some(group.partition.as_str()))
                    .collect();
                let actual: Vec<&String> = group.keys.iter().collect();
                prop_assert_eq!(actual, expected);
            }
        }

        #[test]
        fn grouping_never_invents_keys(
            keys in prop::collection::vec(".*", 0..20)
        ) {
            let groups = group_by_partition(&keys);
            let total: usize = groups.iter().map(|g| g.keys.len()).sum();
            prop_assert!(total <= keys.len());
            for group in &groups {
                for key in &group.keys {
                    prop_assert!(keys.contains(key));
                }
            }
        }
    }
}
