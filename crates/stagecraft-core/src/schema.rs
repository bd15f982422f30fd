use serde_json::Value;

/// Validates a JSON value against a minimal conforming subset of JSON-Schema:
/// `type`, `required`, `enum`, `pattern`, `items`, `properties`, and
/// `additionalProperties`. Sufficient to gate malformed skill input/output
/// before dispatch, without pulling in a full JSON-Schema implementation.
///
/// Returns the list of violations found; an empty list means the value
/// conforms. An empty or non-object schema is treated as "anything goes".
pub fn validate(schema: &Value, value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_at("$", schema, value, &mut errors);
    errors
}

fn validate_at(path: &str, schema: &Value, value: &Value, errors: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(ty) = schema.get("type").and_then(Value::as_str) {
        if !matches_type(ty, value) {
            errors.push(format!("{path}: expected type '{ty}', got {}", type_name(value)));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            errors.push(format!("{path}: value not in enum {allowed:?}"));
        }
    }

    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        if let Some(s) = value.as_str() {
            match regex::Regex::new(pattern) {
                Ok(re) if !re.is_match(s) => {
                    errors.push(format!("{path}: '{s}' does not match pattern '{pattern}'"));
                }
                Err(e) => errors.push(format!("{path}: invalid pattern '{pattern}': {e}")),
                _ => {}
            }
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for req in required {
                if let Some(name) = req.as_str() {
                    if !obj.contains_key(name) {
                        errors.push(format!("{path}: missing required property '{name}'"));
                    }
                }
            }
        }

        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (name, sub_schema) in props {
                if let Some(sub_value) = obj.get(name) {
                    validate_at(&format!("{path}.{name}"), sub_schema, sub_value, errors);
                }
            }

            if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                for name in obj.keys() {
                    if !props.contains_key(name) {
                        errors.push(format!("{path}: additional property '{name}' not allowed"));
                    }
                }
            }
        }
    }

    if let Some(item_schema) = schema.get("items") {
        if let Some(arr) = value.as_array() {
            for (i, item) in arr.iter().enumerate() {
                validate_at(&format!("{path}[{i}]"), item_schema, item, errors);
            }
        }
    }
}

fn matches_type(ty: &str, value: &Value) -> bool {
    match ty {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_schema_accepts_anything() {
        assert!(validate(&json!({}), &json!({"x": 1})).is_empty());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let schema = json!({"type": "string"});
        let errors = validate(&schema, &json!(42));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn required_property_missing() {
        let schema = json!({"type": "object", "required": ["name"]});
        let errors = validate(&schema, &json!({}));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("name"));
    }

    #[test]
    fn nested_properties_validated() {
        let schema = json!({
            "type": "object",
            "properties": {
                "result": {"type": "string", "pattern": "^[a-z]+$"}
            }
        });
        assert!(validate(&schema, &json!({"result": "ok"})).is_empty());
        assert_eq!(validate(&schema, &json!({"result": "NOPE1"})).len(), 1);
    }

    #[test]
    fn enum_constraint() {
        let schema = json!({"enum": ["a", "b"]});
        assert!(validate(&schema, &json!("a")).is_empty());
        assert_eq!(validate(&schema, &json!("c")).len(), 1);
    }

    #[test]
    fn additional_properties_false() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "number"}},
            "additionalProperties": false
        });
        assert!(validate(&schema, &json!({"a": 1})).is_empty());
        assert_eq!(validate(&schema, &json!({"a": 1, "b": 2})).len(), 1);
    }

    #[test]
    fn array_items_validated() {
        let schema = json!({"type": "array", "items": {"type": "integer"}});
        assert!(validate(&schema, &json!([1, 2, 3])).is_empty());
        assert_eq!(validate(&schema, &json!([1, "x"])).len(), 1);
    }
}
