//! JSON Schema checks for tool inputs and outputs.

use agentflux_core::error::ToolError;
use serde_json::Value;

/// Validate `value` against `schema`.
///
/// A null or empty-object schema accepts anything. Violations are joined
/// into one [`ToolError::InvalidArguments`] message.
pub fn validate(schema: &Value, value: &Value) -> Result<(), ToolError> {
    if schema.is_null() || schema.as_object().is_some_and(|o| o.is_empty()) {
        return Ok(());
    }

    let validator = jsonschema::Validator::new(schema)
        .map_err(|e| ToolError::InvalidSchema(e.to_string()))?;
    if validator.is_valid(value) {
        return Ok(());
    }

    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    Err(ToolError::InvalidArguments(errors.join("; ")))
}
