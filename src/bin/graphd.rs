use std::{error::Error, process};

use clap::Parser;
use graphlink::{
    Endpoint, GraphServer, ServerConfig, backend::MemoryBackend, config::DEFAULT_MAX_SESSIONS,
};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about = "Serve in-memory graph models", long_about = None)]
struct Cli {
    /// Listen at `host:port`, `tcp:host:port`, `unix:/path` or an absolute path
    #[arg(default_value_t = Endpoint::default_local())]
    endpoint: Endpoint,
    /// Clients connecting while this many sessions are open are turned away
    #[arg(short, long, default_value_t = DEFAULT_MAX_SESSIONS)]
    max_sessions: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ServerConfig::new(cli.endpoint).with_max_sessions(cli.max_sessions);
    let server = GraphServer::bind(config, MemoryBackend::new())?;

    let endpoint = server.endpoint().clone();
    ctrlc::set_handler(move || {
        info!("shutting down {endpoint}");
        remove_socket(&endpoint);
        process::exit(0);
    })?;

    server.serve()?;
    Ok(())
}

#[cfg(unix)]
fn remove_socket(endpoint: &Endpoint) {
    if let Endpoint::Unix(path) = endpoint {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(not(unix))]
fn remove_socket(_: &Endpoint) {}
