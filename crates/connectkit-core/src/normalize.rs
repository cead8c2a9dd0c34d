use serde_json::Value;

/// Removes every object property whose value is JSON `null`, recursively.
///
/// Array elements are kept even when null; only properties are stripped.
/// Returns the number of properties removed.
pub fn drop_nulls(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|_, field| !field.is_null());
            let mut removed = before - map.len();
            for field in map.values_mut() {
                removed += drop_nulls(field);
            }
            removed
        }
        Value::Array(items) => items.iter_mut().map(drop_nulls).sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strips_null_properties_at_every_depth() {
        let mut body = json!({
            "id": 1,
            "email": null,
            "address": {"line1": "1 Main St", "line2": null},
            "tags": [{"label": null, "color": "red"}, null]
        });

        let removed = drop_nulls(&mut body);

        assert_eq!(removed, 3);
        assert_eq!(
            body,
            json!({
                "id": 1,
                "address": {"line1": "1 Main St"},
                "tags": [{"color": "red"}, null]
            })
        );
    }

    #[test]
    fn leaves_scalars_and_clean_bodies_alone() {
        let mut scalar = Value::Null;
        assert_eq!(drop_nulls(&mut scalar), 0);
        assert!(scalar.is_null());

        let mut clean = json!({"a": false, "b": 0, "c": ""});
        assert_eq!(drop_nulls(&mut clean), 0);
        assert_eq!(clean, json!({"a": false, "b": 0, "c": ""}));
    }
}
