use anyhow::Context as _;
use openapi_explorer_test_support::{DocumentServer, KillOnDrop, USERS_YAML};
use serde_json::{Value, json};
use std::io::{BufRead as _, BufReader, Write as _};
use std::process::{ChildStdin, ChildStdout, Command, Stdio};

struct StdioClient {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl StdioClient {
    fn notify(&mut self, method: &str) -> anyhow::Result<()> {
        let msg = json!({"jsonrpc": "2.0", "method": method});
        writeln!(self.stdin, "{msg}").context("write notification")?;
        Ok(())
    }

    fn request(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let msg = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        writeln!(self.stdin, "{msg}").context("write request")?;
        self.stdin.flush().context("flush request")?;

        let mut line = String::new();
        let n = self.stdout.read_line(&mut line).context("read response")?;
        anyhow::ensure!(n > 0, "server closed stdout before answering {method}");
        let resp: Value = serde_json::from_str(&line).context("parse response")?;
        anyhow::ensure!(resp["id"] == json!(id), "unexpected response id: {resp}");
        Ok(resp)
    }

    fn call(&mut self, tool: &str, arguments: Value) -> anyhow::Result<Value> {
        let resp = self.request("tools/call", json!({"name": tool, "arguments": arguments}))?;
        resp.get("result")
            .cloned()
            .with_context(|| format!("tools/call {tool} returned no result: {resp}"))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stdio_session_registers_and_explores_an_api() -> anyhow::Result<()> {
    let server = DocumentServer::start().await?;
    server.set_document("/openapi.yaml", USERS_YAML, "application/yaml");
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("api_configs.json");

    let mut child = Command::new(env!("CARGO_BIN_EXE_openapi-explorer-mcp"))
        .arg("--config-file")
        .arg(&config)
        .env("OPENAPI_MCP_LOG_LEVEL", "warn")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn openapi-explorer-mcp")?;
    let stdin = child.stdin.take().context("child stdin")?;
    let stdout = child.stdout.take().context("child stdout")?;
    let mut child = KillOnDrop(child);
    let mut client = StdioClient {
        stdin,
        stdout: BufReader::new(stdout),
        next_id: 0,
    };

    let init = client.request(
        "initialize",
        json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "0"}
        }),
    )?;
    assert!(init["result"]["protocolVersion"].is_string(), "{init}");
    assert!(init["result"]["capabilities"]["tools"].is_object());
    assert_eq!(init["result"]["serverInfo"]["name"], "openapi-mcp-proxy");
    client.notify("notifications/initialized")?;

    let tools = client.request("tools/list", json!({}))?;
    let names: Vec<&str> = tools["result"]["tools"]
        .as_array()
        .context("tools array")?
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"search_endpoints"));
    assert!(names.contains(&"get_model_schema"));

    let added = client.call(
        "add_api",
        json!({"name": "users", "url": server.url("/openapi.yaml"), "description": "Users"}),
    )?;
    assert_eq!(added["isError"], false);

    let details = client.call(
        "get_endpoint_details",
        json!({"api": "users", "path": "/users/{id}", "method": "get"}),
    )?;
    assert_eq!(details["structuredContent"]["operationId"], "getUser");
    assert_eq!(details["structuredContent"]["method"], "GET");

    let search = client.call(
        "search_endpoints",
        json!({"api": "users", "query": "orders", "page_size": 10}),
    )?;
    assert_eq!(search["structuredContent"]["totalItems"], 1);
    assert_eq!(search["structuredContent"]["items"][0]["operationId"], "listOrders");

    let models = client.call(
        "list_models",
        json!({"api": "users", "filters": {"types": ["enum"]}, "include_details": true}),
    )?;
    assert_eq!(models["structuredContent"]["items"][0]["name"], "OrderStatus");

    let bad = client.call("list_endpoints", json!({"api": "users", "page": 0}))?;
    assert_eq!(bad["isError"], true);

    let missing = client.call("get_api_info", json!({"api": "ghost"}))?;
    assert_eq!(missing["isError"], true);
    assert_eq!(missing["content"][0]["text"], "Error: API 'ghost' not found");

    let saved: Value = serde_json::from_slice(&std::fs::read(&config)?)?;
    assert_eq!(saved["apis"]["users"]["url"], server.url("/openapi.yaml"));

    drop(client);
    let status = child.0.wait().context("wait for exit")?;
    assert!(status.success(), "server exited with {status}");
    assert_eq!(server.hits("/openapi.yaml"), 1);
    Ok(())
}
