//! Process settings: CLI flags with `OPENAPI_MCP_*` environment fallbacks.

use clap::Parser;
use openapi_explorer_index::MAX_PAGE_SIZE;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "openapi-explorer-mcp",
    version,
    about = "MCP server for paginated, filterable exploration of large OpenAPI documents"
)]
pub struct Settings {
    /// Registration store (JSON, `{"apis": {...}}`).
    #[arg(
        long = "config-file",
        env = "OPENAPI_MCP_CONFIG_FILE_PATH",
        default_value = "api_configs.json"
    )]
    pub config_file: PathBuf,

    /// Timeout for fetching a document, in seconds.
    #[arg(long, env = "OPENAPI_MCP_HTTP_TIMEOUT", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Reject documents larger than this many bytes.
    #[arg(
        long,
        env = "OPENAPI_MCP_MAX_DOCUMENT_BYTES",
        default_value_t = DEFAULT_MAX_DOCUMENT_BYTES
    )]
    pub max_document_bytes: usize,

    /// Upper bound for `page_size` arguments.
    #[arg(long, env = "OPENAPI_MCP_MAX_PAGE_SIZE", default_value_t = MAX_PAGE_SIZE)]
    pub max_page_size: usize,

    /// Default tracing directive; `RUST_LOG` takes precedence when set.
    #[arg(long, env = "OPENAPI_MCP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Append logs to this file instead of stderr.
    #[arg(long, env = "OPENAPI_MCP_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Name reported in the `initialize` response.
    #[arg(long, env = "OPENAPI_MCP_SERVER_NAME", default_value = "openapi-mcp-proxy")]
    pub server_name: String,
}

impl Settings {
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flags_override_defaults() {
        let s = Settings::try_parse_from([
            "openapi-explorer-mcp",
            "--config-file",
            "/tmp/apis.json",
            "--http-timeout-secs",
            "5",
            "--max-page-size",
            "20",
            "--log-json",
            "--server-name",
            "explorer",
        ])
        .unwrap();
        assert_eq!(s.config_file, PathBuf::from("/tmp/apis.json"));
        assert_eq!(s.http_timeout(), Duration::from_secs(5));
        assert_eq!(s.max_page_size, 20);
        assert!(s.log_json);
        assert_eq!(s.server_name, "explorer");
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        assert!(
            Settings::try_parse_from(["openapi-explorer-mcp", "--http-timeout-secs", "soon"])
                .is_err()
        );
    }
}
