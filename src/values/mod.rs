//! Values engine: deep-merge, scoped composition, and JSON Schema validation.
//!
//! Grounded on the original `template_values` module this spec was distilled
//! from: `serde_json::Value` stands in for the "tagged variant over
//! {null, bool, int, float, string, array, object}" called for in the
//! design notes, and the same merge/validate shape is reimplemented here in
//! terms of it.

use jsonschema::Validator;
use serde_json::{Map, Value};

#[derive(thiserror::Error, Debug, Clone)]
pub enum ValuesError {
    #[error("{0} must be a JSON object")]
    NotAnObject(&'static str),

    #[error("user_values_json is invalid: {0}")]
    UserValuesInvalid(String),

    #[error("merged values are invalid: {0}")]
    MergedValuesInvalid(String),

    #[error("template does not define values_schema_json.properties.user")]
    NoUserSchema,

    #[error("invalid JSON Schema: {0}")]
    InvalidSchema(String),
}

/// Deep-merge `override_` into `base`. Objects merge key-by-key; any other
/// pairing (scalar/array on either side) replaces `base` wholesale —
/// arrays are replaced, never concatenated.
pub fn deep_merge(base: &Value, override_: &Value) -> Value {
    match (base, override_) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (key, override_value) in override_map {
                let next = match merged.get(key) {
                    Some(base_value) => deep_merge(base_value, override_value),
                    None => override_value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        _ => override_.clone(),
    }
}

fn as_object(value: &Value, field: &'static str) -> Result<&Map<String, Value>, ValuesError> {
    value.as_object().ok_or(ValuesError::NotAnObject(field))
}

/// `properties.user` of a values schema, if the schema defines one.
fn extract_user_subschema(schema: Option<&Value>) -> Result<Option<Value>, ValuesError> {
    let Some(schema) = schema else { return Ok(None) };
    let schema_obj = as_object(schema, "values_schema_json")?;
    let Some(properties) = schema_obj.get("properties") else {
        return Ok(None);
    };
    let properties_obj = as_object(properties, "values_schema_json.properties")?;
    match properties_obj.get("user") {
        None => Ok(None),
        Some(user_schema) => {
            as_object(user_schema, "values_schema_json.properties.user")?;
            Ok(Some(user_schema.clone()))
        }
    }
}

fn compile_schema(schema: &Value) -> Result<Validator, ValuesError> {
    jsonschema::validator_for(schema).map_err(|e| ValuesError::InvalidSchema(e.to_string()))
}

/// Validate user-scoped values against the template's `properties.user`
/// subschema. Absent user values always pass. A non-empty user payload
/// against a schema with no `properties.user` is an integrity error.
pub fn validate_user_values(user_values: Option<&Value>, schema: Option<&Value>) -> Result<(), ValuesError> {
    let Some(user_values) = user_values else { return Ok(()) };
    let user_map = as_object(user_values, "user_values_json")?;

    match extract_user_subschema(schema)? {
        None => {
            if user_map.is_empty() {
                Ok(())
            } else {
                Err(ValuesError::NoUserSchema)
            }
        }
        Some(user_schema) => {
            let compiled = compile_schema(&user_schema)?;
            let errors = compiled.iter_errors(user_values);
            join_validation_errors(errors).map_or(Ok(()), |joined| Err(ValuesError::UserValuesInvalid(joined)))
        }
    }
}

/// Merge `defaults`, a user-scoped delta (placed under a top-level `user`
/// key), and system overrides, in that precedence order: system wins, user
/// wins over defaults within `user`, defaults supply everything else.
pub fn merge_values_scoped(defaults: Option<&Value>, user_delta: Option<&Value>, system_overrides: Option<&Value>) -> Result<Value, ValuesError> {
    if let Some(d) = defaults {
        as_object(d, "defaults")?;
    }
    if let Some(u) = user_delta {
        as_object(u, "user_scope_delta")?;
    }
    if let Some(s) = system_overrides {
        as_object(s, "system_overrides")?;
    }

    let mut merged = defaults.cloned().unwrap_or_else(|| Value::Object(Map::new()));
    if let Some(user_delta) = user_delta {
        let mut wrapper = Map::new();
        wrapper.insert("user".to_string(), user_delta.clone());
        merged = deep_merge(&merged, &Value::Object(wrapper));
    }
    if let Some(system_overrides) = system_overrides {
        merged = deep_merge(&merged, system_overrides);
    }
    Ok(merged)
}

/// Validate the fully merged document against the complete schema.
pub fn validate_merged_values(merged: &Value, schema: Option<&Value>) -> Result<(), ValuesError> {
    as_object(merged, "merged_values")?;
    let Some(schema) = schema else { return Ok(()) };
    as_object(schema, "values_schema_json")?;
    let compiled = compile_schema(schema)?;
    let errors = compiled.iter_errors(merged);
    join_validation_errors(errors).map_or(Ok(()), |joined| Err(ValuesError::MergedValuesInvalid(joined)))
}

/// Joins a schema validator's error iterator into a single message, or
/// `None` if the instance was valid (the iterator was empty).
fn join_validation_errors<'a>(errors: impl Iterator<Item = jsonschema::ValidationError<'a>>) -> Option<String> {
    let joined = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}
