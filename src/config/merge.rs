//! Deep merge of configuration layers.

use serde_json::Value;

/// Merge `overlay` into `base`.
///
/// Maps merge key by key; any other value in `overlay`, including sequences
/// and `null`, replaces what `base` held.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_maps_merge_and_scalars_replace() {
        let mut base = json!({
            "services": {"bob": "bob:5050", "shamir": "shamir:5680"},
            "scenario": {"timeout_secs": 20},
        });
        merge_values(
            &mut base,
            json!({"services": {"bob": "localhost:5050"}, "scenario": {"concurrency": 4}}),
        );
        assert_eq!(
            base,
            json!({
                "services": {"bob": "localhost:5050", "shamir": "shamir:5680"},
                "scenario": {"timeout_secs": 20, "concurrency": 4},
            })
        );
    }

    #[test]
    fn sequences_are_replaced_not_appended() {
        let mut base = json!({"tags": ["a", "b"]});
        merge_values(&mut base, json!({"tags": ["c"]}));
        assert_eq!(base, json!({"tags": ["c"]}));
    }

    #[test]
    fn map_over_scalar_replaces_it() {
        let mut base = json!({"nats": "nats://old"});
        merge_values(&mut base, json!({"nats": {"url": "nats://new"}}));
        assert_eq!(base, json!({"nats": {"url": "nats://new"}}));
    }
}
