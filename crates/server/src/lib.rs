//! MCP stdio server exposing the OpenAPI schema index as tools.

pub mod config;
pub mod error;
pub mod explorer;
pub mod fetch;
pub mod logging;
pub mod registry;
pub mod server;
pub mod tools;

pub use config::Settings;
pub use error::{ExplorerError, RegistryError, Result};
pub use explorer::Explorer;
pub use fetch::{DocumentFetcher, HttpFetcher};
pub use registry::{ApiRegistration, RegistrationStore};
pub use server::McpServer;
