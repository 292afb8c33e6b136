// rmcp-backed adapter for the aggregator's own MCP surface. The dynamic
// tool registry owns the name->tool table; this module only makes that
// table servable over stdio via `rmcp::ServerHandler`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{Peer, RequestContext, RoleServer};
use rmcp::ErrorData;
use rmcp::ServerHandler;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::error::{AggregatorError, Result};
use crate::registry::ToolSurface;
use crate::translator::{Executor, ParamType, ParameterDescriptor};

struct ToolEntry {
    description: String,
    parameters: Vec<ParameterDescriptor>,
    executor: Executor,
}

fn json_type_name(param_type: &ParamType) -> &'static str {
    match param_type {
        ParamType::String => "string",
        ParamType::Integer => "integer",
        ParamType::Float => "number",
        ParamType::Boolean => "boolean",
        ParamType::Map => "object",
        ParamType::List => "array",
        ParamType::Unit => "null",
        ParamType::Optional(inner) => json_type_name(inner),
    }
}

fn build_input_schema(parameters: &[ParameterDescriptor]) -> serde_json::Map<String, Value> {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in parameters {
        let mut prop = serde_json::Map::new();
        prop.insert(
            "type".to_string(),
            Value::String(json_type_name(&param.param_type).to_string()),
        );
        if let Some(description) = &param.description {
            prop.insert("description".to_string(), Value::String(description.clone()));
        }
        properties.insert(param.name.clone(), Value::Object(prop));
        if param.is_required() {
            required.push(Value::String(param.name.clone()));
        }
    }
    let mut schema = serde_json::Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    schema
}

/// The aggregator's own MCP server: a dynamic name→tool table, mutated by
/// `register`/`unregister` and served to whatever client is connected.
#[derive(Clone)]
pub struct AggregatorSurface {
    tools: Arc<RwLock<HashMap<String, ToolEntry>>>,
    peer: Arc<Mutex<Option<Peer<RoleServer>>>>,
}

impl AggregatorSurface {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
            peer: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for AggregatorSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolSurface for AggregatorSurface {
    async fn add_tool(
        &self,
        full_name: String,
        description: String,
        parameters: Vec<ParameterDescriptor>,
        executor: Executor,
    ) -> Result<()> {
        let mut tools = self.tools.write().await;
        if tools.contains_key(&full_name) {
            return Err(AggregatorError::RegistrationFailed(format!(
                "tool name already registered: {full_name}"
            )));
        }
        tools.insert(
            full_name,
            ToolEntry {
                description,
                parameters,
                executor,
            },
        );
        Ok(())
    }

    async fn remove_tool(&self, full_name: &str) -> Result<()> {
        self.tools.write().await.remove(full_name);
        Ok(())
    }

    async fn send_tool_list_changed(&self) {
        let peer = self.peer.lock().await;
        if let Some(peer) = peer.as_ref() {
            let _ = peer.notify_tool_list_changed().await;
        }
    }
}

impl ServerHandler for AggregatorSurface {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mcp-aggregator".into(),
                title: Some("MCP Aggregator".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Mounts other MCP servers at runtime and re-exposes their tools under a namespaced prefix."
                    .into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<ListToolsResult, ErrorData>> + Send + '_ {
        async move {
            {
                let mut peer = self.peer.lock().await;
                if peer.is_none() {
                    *peer = Some(context.peer.clone());
                }
            }
            let tools = self.tools.read().await;
            let listed = tools
                .iter()
                .map(|(name, entry)| Tool {
                    name: name.clone().into(),
                    description: Some(entry.description.clone().into()),
                    input_schema: Arc::new(build_input_schema(&entry.parameters)),
                    annotations: None,
                    title: None,
                    icons: None,
                    output_schema: None,
                })
                .collect();
            Ok(ListToolsResult {
                tools: listed,
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let executor = {
                let tools = self.tools.read().await;
                let entry = tools.get(request.name.as_ref()).ok_or_else(|| {
                    ErrorData::invalid_params(format!("unknown tool: {}", request.name), None)
                })?;
                entry.executor.clone()
            };
            let arguments: HashMap<String, Value> = request
                .arguments
                .map(|map| map.into_iter().collect())
                .unwrap_or_default();

            match executor(arguments).await {
                Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
                Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
            }
        }
    }
}
