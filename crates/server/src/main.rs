use anyhow::Context as _;
use clap::Parser as _;
use openapi_explorer_mcp::logging::init_tracing;
use openapi_explorer_mcp::{Explorer, HttpFetcher, McpServer, RegistrationStore, Settings};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();
    init_tracing(&settings)?;

    let registry = RegistrationStore::open(&settings.config_file).with_context(|| {
        format!(
            "load API registrations from {}",
            settings.config_file.display()
        )
    })?;
    let fetcher = HttpFetcher::new(settings.http_timeout(), settings.max_document_bytes)
        .context("build HTTP client")?;
    let explorer = Explorer::new(registry, Arc::new(fetcher), settings.max_page_size);
    let server = McpServer::new(Arc::new(explorer), settings.server_name.clone());

    tracing::info!(
        server = %settings.server_name,
        config = %settings.config_file.display(),
        max_page_size = settings.max_page_size,
        "Serving MCP over stdio"
    );
    server.serve_stdio().await.context("stdio transport")?;
    tracing::info!("stdin closed, shutting down");
    Ok(())
}
