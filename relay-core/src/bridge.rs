//! Tool-discovery bridge.
//!
//! A remote tool server is reached through a [`BridgeConnector`] that opens one
//! [`ToolBridgeClient`] connection at a time. Discovery lists the server's tools
//! and wraps each one as a [`BridgedTool`]; every invocation opens a fresh
//! connection, asks the [`PermissionService`] first, and closes the connection
//! exactly once whatever happens. The wire protocol lives behind the traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{CoreResult, RelayError};
use crate::model::{ToolCall, ToolDefinition, ToolResult};

/// Upper bound on the initialize handshake.
pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(10);
pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const PERMISSION_DENIED: &str = "permission denied";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// A tool as the remote server describes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema object with `properties` and optional `required`.
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// One open connection to a tool server.
#[async_trait]
pub trait ToolBridgeClient: Send {
    async fn initialize(
        &mut self,
        protocol_version: &str,
        client: &ClientInfo,
    ) -> CoreResult<ServerInfo>;
    async fn list_tools(&mut self) -> CoreResult<Vec<RemoteTool>>;
    /// Text parts of the tool's output.
    async fn call_tool(&mut self, name: &str, arguments: Map<String, Value>) -> CoreResult<Vec<String>>;
    /// Release the connection. Called exactly once per opened connection.
    async fn close(&mut self);
}

#[async_trait]
pub trait BridgeConnector: Send + Sync {
    async fn connect(&self) -> CoreResult<Box<dyn ToolBridgeClient>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub action: String,
    pub description: String,
    pub params: String,
}

#[async_trait]
pub trait PermissionService: Send + Sync {
    /// `true` when the user allows the call.
    async fn request(&self, request: &PermissionRequest) -> bool;
}

async fn handshake(client: &mut dyn ToolBridgeClient, info: &ClientInfo) -> CoreResult<ServerInfo> {
    match tokio::time::timeout(INITIALIZE_TIMEOUT, client.initialize(PROTOCOL_VERSION, info)).await
    {
        Ok(result) => result,
        Err(_) => Err(RelayError::Other(anyhow::anyhow!(
            "tool server initialize timed out after {}s",
            INITIALIZE_TIMEOUT.as_secs()
        ))),
    }
}

async fn list_remote(client: &mut dyn ToolBridgeClient, info: &ClientInfo) -> CoreResult<Vec<RemoteTool>> {
    let server = handshake(client, info).await?;
    debug!(server.name = %server.name, server.version = %server.version, "tool server initialized");
    client.list_tools().await
}

/// Connect to `source`, list its tools and wrap them. Any failure is logged and
/// yields an empty list.
pub async fn discover_tools(
    source: &str,
    connector: Arc<dyn BridgeConnector>,
    permissions: Arc<dyn PermissionService>,
) -> Vec<BridgedTool> {
    let client_info = ClientInfo::default();
    let mut client = match connector.connect().await {
        Ok(c) => c,
        Err(e) => {
            warn!(bridge.source = source, error = %e, "tool server connect failed");
            return Vec::new();
        }
    };
    let listed = list_remote(client.as_mut(), &client_info).await;
    client.close().await;

    match listed {
        Ok(tools) => {
            debug!(bridge.source = source, count = tools.len(), "discovered tools");
            tools
                .into_iter()
                .map(|tool| BridgedTool {
                    source: source.to_string(),
                    tool,
                    connector: connector.clone(),
                    permissions: permissions.clone(),
                    client_info: client_info.clone(),
                })
                .collect()
        }
        Err(e) => {
            warn!(bridge.source = source, error = %e, "tool discovery failed");
            Vec::new()
        }
    }
}

/// A remote tool exposed to the model as `<source>_<tool>`.
#[derive(Clone)]
pub struct BridgedTool {
    source: String,
    tool: RemoteTool,
    connector: Arc<dyn BridgeConnector>,
    permissions: Arc<dyn PermissionService>,
    client_info: ClientInfo,
}

impl std::fmt::Debug for BridgedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgedTool")
            .field("source", &self.source)
            .field("tool", &self.tool.name)
            .finish()
    }
}

impl BridgedTool {
    pub fn name(&self) -> String {
        format!("{}_{}", self.source, self.tool.name)
    }

    pub fn definition(&self) -> ToolDefinition {
        let schema = &self.tool.input_schema;
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| {
                r.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        ToolDefinition {
            name: self.name(),
            description: self.tool.description.clone(),
            parameters: schema
                .get("properties")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
            required,
        }
    }

    /// Execute `call`. Never fails: denial and remote errors come back as text.
    pub async fn run(&self, call: &ToolCall) -> ToolResult {
        let name = self.name();
        let request = PermissionRequest {
            tool_name: name.clone(),
            action: "execute".into(),
            description: format!(
                "execute {name} with the following parameters: {}",
                call.input
            ),
            params: call.input.clone(),
        };
        if !self.permissions.request(&request).await {
            return error_result(call, PERMISSION_DENIED.to_string());
        }

        let arguments = match parse_arguments(&call.input) {
            Ok(a) => a,
            Err(e) => return error_result(call, format!("error parsing parameters: {e}")),
        };

        let mut client = match self.connector.connect().await {
            Ok(c) => c,
            Err(e) => return error_result(call, e.to_string()),
        };
        let outcome = self.invoke(client.as_mut(), arguments).await;
        client.close().await;

        match outcome {
            Ok(parts) => ToolResult {
                tool_call_id: call.id.clone(),
                content: parts.join("\n"),
                is_error: false,
            },
            Err(e) => {
                debug!(tool = %name, error = %e, "bridged tool call failed");
                error_result(call, e.to_string())
            }
        }
    }

    async fn invoke(
        &self,
        client: &mut dyn ToolBridgeClient,
        arguments: Map<String, Value>,
    ) -> CoreResult<Vec<String>> {
        handshake(client, &self.client_info).await?;
        client.call_tool(&self.tool.name, arguments).await
    }
}

fn parse_arguments(input: &str) -> serde_json::Result<Map<String, Value>> {
    if input.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(input)
}

fn error_result(call: &ToolCall, content: String) -> ToolResult {
    ToolResult {
        tool_call_id: call.id.clone(),
        content,
        is_error: true,
    }
}
