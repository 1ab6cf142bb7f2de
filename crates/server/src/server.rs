//! rmcp server handler exposing the explorer tools.

use crate::explorer::Explorer;
use crate::tools::{self, ToolError};
use anyhow::Context as _;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData, ServerHandler, ServiceExt as _};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

const INSTRUCTIONS: &str = "Explore large OpenAPI documents incrementally. Register a document \
with add_api (or pass its URL as `api`), then use get_api_info, list_endpoints, \
search_endpoints and list_models to page through it, and get_endpoint_details / \
get_model_schema for single items.";

/// MCP server speaking the `tools` capability.
#[derive(Clone)]
pub struct McpServer {
    explorer: Arc<Explorer>,
    name: String,
}

impl McpServer {
    #[must_use]
    pub fn new(explorer: Arc<Explorer>, name: impl Into<String>) -> Self {
        Self {
            explorer,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn explorer(&self) -> &Explorer {
        &self.explorer
    }

    /// Serve one MCP session over stdin/stdout until the client disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if the initialize handshake fails or the session task panics.
    pub async fn serve_stdio(self) -> anyhow::Result<()> {
        let (stdin, stdout) = rmcp::transport::stdio();
        self.serve_io(stdin, stdout).await
    }

    /// Serve one MCP session over a newline-delimited JSON-RPC byte stream.
    ///
    /// # Errors
    ///
    /// See [`McpServer::serve_stdio`].
    pub async fn serve_io<R, W>(self, reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let running = self
            .serve((reader, writer))
            .await
            .context("MCP initialize handshake")?;
        let reason = running.waiting().await.context("MCP session task")?;
        tracing::info!(reason = ?reason, "MCP session ended");
        Ok(())
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Implementation::from_build_env()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: tools::tool_definitions(),
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        tracing::debug!(tool = %request.name, "tools/call");
        tools::call_tool(&self.explorer, &request.name, request.arguments)
            .await
            .map_err(|e| match e {
                ToolError::UnknownTool(_) => ErrorData::invalid_params(e.to_string(), None),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DocumentFetcher;
    use crate::registry::RegistrationStore;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use openapi_explorer_index::{FetchError, FetchedDocument};
    use openapi_explorer_test_support::USERS_YAML;
    use serde_json::{Value, json};
    use tokio::io::{
        AsyncBufReadExt as _, AsyncWriteExt as _, BufReader, DuplexStream, Lines, ReadHalf,
        WriteHalf,
    };

    struct StaticFetcher;

    #[async_trait]
    impl DocumentFetcher for StaticFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _headers: &IndexMap<String, String>,
        ) -> Result<FetchedDocument, FetchError> {
            Ok(FetchedDocument::new(USERS_YAML, Some("application/yaml".to_string())))
        }
    }

    struct Session {
        writer: WriteHalf<DuplexStream>,
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        next_id: u64,
    }

    impl Session {
        async fn send(&mut self, msg: Value) {
            let mut line = msg.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.flush().await.unwrap();
        }

        async fn request(&mut self, method: &str, params: Value) -> Value {
            self.next_id += 1;
            let id = self.next_id;
            self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
                .await;
            let line = self.lines.next_line().await.unwrap().unwrap();
            let resp: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(resp["id"], json!(id), "{resp}");
            resp
        }
    }

    fn server(dir: &tempfile::TempDir) -> McpServer {
        let registry = RegistrationStore::open(dir.path().join("apis.json")).unwrap();
        let explorer = Explorer::new(registry, Arc::new(StaticFetcher), 100);
        McpServer::new(Arc::new(explorer), "test-server")
    }

    async fn start(server: McpServer) -> (Session, tokio::task::JoinHandle<anyhow::Result<()>>) {
        let (client, transport) = tokio::io::duplex(256 * 1024);
        let (server_read, server_write) = tokio::io::split(transport);
        let handle = tokio::spawn(server.serve_io(server_read, server_write));
        let (client_read, client_write) = tokio::io::split(client);
        let mut session = Session {
            writer: client_write,
            lines: BufReader::new(client_read).lines(),
            next_id: 0,
        };
        let init = session
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test", "version": "0"}
                }),
            )
            .await;
        assert_eq!(init["result"]["serverInfo"]["name"], "test-server");
        assert!(init["result"]["capabilities"]["tools"].is_object());
        assert!(init["result"]["instructions"].is_string());
        session
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        (session, handle)
    }

    #[test]
    fn info_advertises_tools_under_the_configured_name() {
        let dir = tempfile::tempdir().unwrap();
        let info = server(&dir).get_info();
        assert_eq!(info.server_info.name, "test-server");
        assert!(info.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn session_lists_and_calls_tools() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, handle) = start(server(&dir)).await;

        let tools = session.request("tools/list", json!({})).await;
        assert_eq!(tools["result"]["tools"].as_array().unwrap().len(), 9);

        let resp = session
            .request(
                "tools/call",
                json!({
                    "name": "list_endpoints",
                    "arguments": {"api": "https://users.test/openapi.yaml", "page_size": 2}
                }),
            )
            .await;
        let result = &resp["result"];
        assert_eq!(result["isError"], false);
        assert_eq!(result["structuredContent"]["totalItems"], 5);
        assert_eq!(result["structuredContent"]["totalPages"], 3);
        assert_eq!(result["structuredContent"]["items"][0]["operationId"], "listUsers");
        let text = result["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed, result["structuredContent"]);

        let resp = session
            .request(
                "tools/call",
                json!({
                    "name": "get_model_schema",
                    "arguments": {"api": "https://users.test/openapi.yaml", "model_name": "Ghost"}
                }),
            )
            .await;
        assert_eq!(resp["result"]["isError"], true);
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Ghost"), "{text}");

        drop(session);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_tool_is_an_invalid_params_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, handle) = start(server(&dir)).await;

        let resp = session
            .request("tools/call", json!({"name": "nope", "arguments": {}}))
            .await;
        assert_eq!(resp["error"]["code"], -32602);
        assert!(resp["error"]["message"].as_str().unwrap().contains("nope"));

        drop(session);
        handle.await.unwrap().unwrap();
    }
}
