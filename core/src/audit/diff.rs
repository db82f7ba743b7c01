//! Row snapshot diffing.
//!
//! The capture engine snapshots a row as a JSON object before and after a
//! mutation and records which fields changed. The diff is a set difference
//! over keys: a field is "changed" when it is present in only one snapshot
//! or its value differs between the two.

use serde_json::Value;

/// Compute the fields that differ between two row snapshots.
///
/// Keys are returned sorted for deterministic storage. Non-object snapshots
/// (which the capture engine never produces) yield an empty list.
#[must_use]
pub fn changed_fields(old: &Value, new: &Value) -> Vec<String> {
    let (Value::Object(old_map), Value::Object(new_map)) = (old, new) else {
        return Vec::new();
    };

    let mut changed: Vec<String> = Vec::new();

    for (key, old_value) in old_map {
        match new_map.get(key) {
            Some(new_value) if new_value == old_value => {}
            _ => changed.push(key.clone()),
        }
    }
    for key in new_map.keys() {
        if !old_map.contains_key(key) {
            changed.push(key.clone());
        }
    }

    changed.sort_unstable();
    changed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn identical_snapshots_have_no_changes() {
        let row = json!({"name": "A", "city": "Paris"});
        assert!(changed_fields(&row, &row).is_empty());
    }

    #[test]
    fn value_change_is_reported() {
        let old = json!({"name": "A", "city": "Paris"});
        let new = json!({"name": "B", "city": "Paris"});
        assert_eq!(changed_fields(&old, &new), vec!["name"]);
    }

    #[test]
    fn added_and_removed_keys_are_reported() {
        let old = json!({"name": "A", "phone": "123"});
        let new = json!({"name": "A", "website": "https://example.org"});
        assert_eq!(changed_fields(&old, &new), vec!["phone", "website"]);
    }

    #[test]
    fn null_to_value_is_a_change() {
        let old = json!({"notes": null});
        let new = json!({"notes": "reviewed"});
        assert_eq!(changed_fields(&old, &new), vec!["notes"]);
    }

    #[test]
    fn non_object_snapshots_diff_to_empty() {
        assert!(changed_fields(&json!(1), &json!(2)).is_empty());
    }

    fn arb_row() -> impl Strategy<Value = serde_json::Value> {
        proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..6).prop_map(|map| {
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            )
        })
    }

    proptest! {
        #[test]
        fn diff_is_empty_iff_snapshots_equal(old in arb_row(), new in arb_row()) {
            let diff = changed_fields(&old, &new);
            prop_assert_eq!(diff.is_empty(), old == new);
        }

        #[test]
        fn diff_is_symmetric(old in arb_row(), new in arb_row()) {
            prop_assert_eq!(changed_fields(&old, &new), changed_fields(&new, &old));
        }
    }
}
