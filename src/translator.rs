// JSON-Schema to callable-tool translator.
//
// Turns a discovered JSON-Schema tool definition into a parameter descriptor
// set the dynamic registry can hand to the aggregator's own MCP surface,
// plus an executor closure that calls back into the owning mount's session.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::client_manager::ClientManager;
use crate::error::{AggregatorError, Result};
use crate::mcp::ToolDefinition;
use crate::mcp::session::DEFAULT_CALL_TIMEOUT;

/// Closed set of parameter types.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    Map,
    List,
    Unit,
    Optional(Box<ParamType>),
}

/// How a missing argument is resolved when assembling outgoing call arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDefault {
    /// Required: the caller must supply this, or `tools/call` is sent
    /// without it (the child decides how to react).
    Required,
    /// Optional with an explicit schema `default` value.
    Value(Value),
    /// Optional with no default; omitted from outgoing arguments entirely
    /// when the caller doesn't supply it (spec's "absent" sentinel).
    Absent,
}

#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    /// Sanitized name used on the aggregator-facing parameter surface.
    pub name: String,
    /// Original schema property name, used when marshalling outgoing
    /// `tools/call` arguments.
    pub original_name: String,
    pub description: Option<String>,
    pub param_type: ParamType,
    pub default: ParamDefault,
}

impl ParameterDescriptor {
    pub fn is_required(&self) -> bool {
        matches!(self.default, ParamDefault::Required)
    }
}

/// The full translation result for one tool.
pub struct TranslatedTool {
    pub original_tool_name: String,
    pub description: String,
    pub parameters: Vec<ParameterDescriptor>,
}

type ExecutorFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

/// Given kwargs matching the parameter surface, the executor assembles
/// outgoing arguments, resolves the session via the client manager, and
/// issues `tools/call`.
pub type Executor = Arc<dyn Fn(HashMap<String, Value>) -> ExecutorFuture + Send + Sync>;

fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn map_schema_type(schema: &Value, prop_name: &str) -> ParamType {
    match schema.get("type") {
        Some(Value::String(t)) => base_type(t),
        Some(Value::Array(variants)) => {
            let names: Vec<&str> = variants.iter().filter_map(|v| v.as_str()).collect();
            if names.len() == 2 && names.contains(&"null") {
                let inner = names.iter().find(|n| **n != "null").copied().unwrap_or("string");
                ParamType::Optional(Box::new(base_type(inner)))
            } else if let Some(first) = names.iter().find(|n| **n != "null") {
                warn!(
                    property = prop_name,
                    union = ?names,
                    "multi-member type union, using first non-null member"
                );
                base_type(first)
            } else {
                ParamType::Unit
            }
        }
        _ => ParamType::String,
    }
}

fn base_type(name: &str) -> ParamType {
    match name {
        "string" => ParamType::String,
        "integer" => ParamType::Integer,
        "number" => ParamType::Float,
        "boolean" => ParamType::Boolean,
        "object" => ParamType::Map,
        "array" => ParamType::List,
        "null" => ParamType::Unit,
        other => {
            warn!(schema_type = other, "unrecognized schema type, treating as string");
            ParamType::String
        }
    }
}

/// Validate and translate a discovered tool definition. Returns
/// a diagnostic string (not an error type) on a malformed schema so the
/// orchestrator can log and skip just this tool without failing the mount.
pub fn translate(tool: &ToolDefinition) -> std::result::Result<TranslatedTool, String> {
    let name = tool.name.as_str().ok_or_else(|| {
        format!("tool has a non-string name: {}", tool.name)
    })?;

    let schema = &tool.input_schema;
    if !schema.is_object() {
        return Err(format!("tool '{name}': inputSchema is not a JSON object"));
    }
    let schema_type = schema.get("type");
    if schema_type.is_none() {
        return Err(format!("tool '{name}': inputSchema is missing 'type'"));
    }

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let mut parameters = Vec::new();
    if let Some(props) = schema.get("properties").and_then(|v| v.as_object()) {
        for (prop_name, prop_schema) in props {
            let param_type = map_schema_type(prop_schema, prop_name);
            let description = prop_schema
                .get("description")
                .and_then(|v| v.as_str())
                .map(str::to_string);

            let default = if required.contains(&prop_name.as_str()) {
                ParamDefault::Required
            } else if let Some(default_value) = prop_schema.get("default") {
                ParamDefault::Value(default_value.clone())
            } else {
                ParamDefault::Absent
            };

            parameters.push(ParameterDescriptor {
                name: sanitize_identifier(prop_name),
                original_name: prop_name.clone(),
                description,
                param_type,
                default,
            });
        }
    }

    Ok(TranslatedTool {
        original_tool_name: name.to_string(),
        description: tool.description.clone().unwrap_or_default(),
        parameters,
    })
}

/// Build the executor closure that resolves the mount's session through the
/// client manager (by captured handle) on every call.
pub fn make_executor(
    client_manager: Arc<ClientManager>,
    handle: String,
    original_tool_name: String,
    parameters: Vec<ParameterDescriptor>,
) -> Executor {
    Arc::new(move |kwargs: HashMap<String, Value>| {
        let client_manager = client_manager.clone();
        let handle = handle.clone();
        let original_tool_name = original_tool_name.clone();
        let parameters = parameters.clone();
        Box::pin(async move {
            let mut outgoing = HashMap::new();
            for param in &parameters {
                if let Some(value) = kwargs.get(&param.name) {
                    outgoing.insert(param.original_name.clone(), value.clone());
                } else {
                    match &param.default {
                        ParamDefault::Value(default_value) => {
                            outgoing.insert(param.original_name.clone(), default_value.clone());
                        }
                        ParamDefault::Required | ParamDefault::Absent => {}
                    }
                }
            }

            let session = client_manager
                .get(&handle)
                .await
                .ok_or_else(|| AggregatorError::TransportClosed(handle.clone()))?;

            let result = session
                .call_tool(&original_tool_name, outgoing, DEFAULT_CALL_TIMEOUT)
                .await?;

            Ok(result
                .content
                .first()
                .and_then(|item| item.text.clone())
                .unwrap_or_else(|| serde_json::to_string(&result).unwrap_or_default()))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_def(schema: Value) -> ToolDefinition {
        ToolDefinition {
            name: Value::String("read_query".to_string()),
            description: Some("Run a read-only query".to_string()),
            input_schema: schema,
        }
    }

    #[test]
    fn empty_properties_yields_zero_parameter_invocable() {
        let translated = translate(&tool_def(serde_json::json!({"type": "object"}))).unwrap();
        assert!(translated.parameters.is_empty());
    }

    #[test]
    fn required_property_has_no_default() {
        let translated = translate(&tool_def(serde_json::json!({
            "type": "object",
            "properties": {"query": {"type": "string", "description": "SQL"}},
            "required": ["query"]
        })))
        .unwrap();
        assert_eq!(translated.parameters.len(), 1);
        let param = &translated.parameters[0];
        assert_eq!(param.name, "query");
        assert!(param.is_required());
        assert_eq!(param.description.as_deref(), Some("SQL"));
    }

    #[test]
    fn optional_nullable_integer_defaults_to_absent() {
        let translated = translate(&tool_def(serde_json::json!({
            "type": "object",
            "properties": {"limit": {"type": ["integer", "null"]}}
        })))
        .unwrap();
        let param = &translated.parameters[0];
        assert_eq!(param.param_type, ParamType::Optional(Box::new(ParamType::Integer)));
        assert_eq!(param.default, ParamDefault::Absent);
    }

    #[test]
    fn property_with_explicit_default_is_optional_with_value() {
        let translated = translate(&tool_def(serde_json::json!({
            "type": "object",
            "properties": {"page": {"type": "integer", "default": 1}}
        })))
        .unwrap();
        assert_eq!(translated.parameters[0].default, ParamDefault::Value(serde_json::json!(1)));
    }

    #[test]
    fn non_identifier_property_name_is_sanitized_but_original_kept_for_wire() {
        let translated = translate(&tool_def(serde_json::json!({
            "type": "object",
            "properties": {"user-id": {"type": "string"}},
            "required": ["user-id"]
        })))
        .unwrap();
        let param = &translated.parameters[0];
        assert_eq!(param.name, "user_id");
        assert_eq!(param.original_name, "user-id");
    }

    #[test]
    fn missing_type_is_rejected() {
        let result = translate(&tool_def(serde_json::json!({"properties": {}})));
        assert!(result.is_err());
    }

    #[test]
    fn non_string_name_is_rejected_without_panicking() {
        let tool = ToolDefinition {
            name: Value::Number(7.into()),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        };
        assert!(translate(&tool).is_err());
    }

    #[test]
    fn unknown_union_member_falls_back_to_first_non_null() {
        let translated = translate(&tool_def(serde_json::json!({
            "type": "object",
            "properties": {"value": {"type": ["string", "integer", "null"]}}
        })))
        .unwrap();
        // three-member union isn't the 2-element null-union special case
        assert_eq!(translated.parameters[0].param_type, ParamType::String);
    }
}
