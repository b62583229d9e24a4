//! memc-redundant: a redundant multi-server client for the memcached
//! binary protocol.
//!
//! Opens R replica connections drawn from a configured backend ring,
//! mirrors writes across all of them, and serves reads from the first
//! replica that responds SUCCESS. Configuration is layered the same way
//! as the rest of this crate: CLI flags over an optional TOML file over
//! built-in defaults.

mod client;
mod config;
mod error;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use client::{BackendParams, Client};
use config::{CliArgs, Config};
use error::MemcError;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match Config::load(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    info!(
        backends = config.backends.len(),
        replicas = config.replicas,
        "starting memc-redundant"
    );

    match run(config) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn run(config: Config) -> Result<(), MemcError> {
    let bind_addr: Option<SocketAddr> = config.bind_addr;
    let backends: Vec<BackendParams> = config.backends;

    let client = Arc::new(Client::allocate(backends, config.replicas, bind_addr)?);
    client.init()?;
    let key = config.key.clone().unwrap_or_default();
    client.connect(Some(key.as_bytes()))?;

    if config.get {
        let result = client.get(key.as_bytes())?;
        println!("{}", String::from_utf8_lossy(&result.value));
    }

    if config.set {
        let value = config.value.clone().unwrap_or_default();
        client.set(key.as_bytes(), value.as_bytes(), 0, 0)?;
    }

    if config.delete {
        client.delete(key.as_bytes())?;
    }

    if config.quit {
        client.quit()?;
    }

    client.wait_all();
    Ok(())
}

/// Exit code equals the final operation's error code (§6), collapsed here
/// to a small set of process-level codes since the CLI doesn't expose the
/// full wire taxonomy to a shell.
fn exit_code_for(err: &MemcError) -> u8 {
    match err {
        MemcError::SendKeyErr => 2,
        MemcError::RecvKeyNotFound => 3,
        MemcError::Connect | MemcError::AddressMissing | MemcError::Socket(_) => 4,
        MemcError::Allocation | MemcError::Uninitialized => 5,
        _ => 1,
    }
}
