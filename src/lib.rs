pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod graph;
pub mod protocol;
pub mod server;

pub use cli::{CliError, ShellCommand, execute, prompt};
pub use client::{Client, QueryResult, RemoteModel};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, ErrorCode, Locator, Result};
pub use graph::{BindingSet, LiteralValue, Node, Statement};
pub use protocol::{BackendFeatures, Endpoint, QueryLanguage, QueryResultType};
pub use server::GraphServer;
