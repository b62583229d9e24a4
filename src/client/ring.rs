//! Ring indexer (component H) plus the reconnect/init orchestrator
//! (component E): deterministic backend selection from a key, and the
//! machinery that builds, rebuilds, and tears down the replica sockets.

use std::net::ToSocketAddrs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, warn};

use crate::client::socket;
use crate::client::Client;
use crate::error::MemcError;

/// `last_byte(key) mod backend_count` — the key-derived ring offset.
pub fn starting_index(key: &[u8], backend_count: usize) -> usize {
    if backend_count == 0 {
        return 0;
    }
    let last_byte = *key.last().unwrap_or(&0) as usize;
    last_byte % backend_count
}

/// Spawns the init worker, which allocates a socket for each replica.
/// Tolerates per-replica socket failures as long as at least one succeeds.
pub fn init(client: &Arc<Client>) -> Result<(), MemcError> {
    client.reinit_in_process.store(true, Ordering::SeqCst);
    let worker_client = Arc::clone(client);
    let spawn_result = thread::Builder::new()
        .name("memc-init".into())
        .spawn(move || init_worker(worker_client));

    match spawn_result {
        Ok(handle) => {
            *client.reinit_worker.lock().unwrap() = Some(handle);
            Ok(())
        }
        Err(e) => {
            client.reinit_in_process.store(false, Ordering::SeqCst);
            Err(MemcError::Thread(e.to_string()))
        }
    }
}

fn init_worker(client: Arc<Client>) {
    let _init_guard = client.init_mtx.lock().unwrap();
    debug!("init worker running");

    let mut succeeded = 0usize;
    for i in 0..client.replication_factor {
        match socket::create_socket(None) {
            Ok(sock) => {
                client.replicas[i].install_socket(Some(sock), None);
                succeeded += 1;
            }
            Err(e) => {
                warn!(replica = i, error = %e, "socket factory failed during init");
                client.replicas[i].set_last_error(e);
            }
        }
    }
    if succeeded == 0 {
        error!("init: socket factory failed for every replica");
    }
    client.reinit_in_process.store(false, Ordering::SeqCst);
}

/// Builds or rebuilds replica `i`'s connection against
/// `backends[(starting_index + i + 1) mod N]`, confirmed by the original
/// `memc_reconnect`'s off-by-one ring arithmetic (see SPEC_FULL.md §2).
pub fn reconnect(client: &Arc<Client>, i: usize) -> Result<(), MemcError> {
    let conn = &client.replicas[i];
    let _guard = conn.mutex_connect.lock().unwrap();

    if client.backends.is_empty() {
        return Err(MemcError::AddressMissing);
    }

    let starting = client.starting_index.load(Ordering::SeqCst);
    let backend_index = (starting + i + 1) % client.backends.len();
    let backend = &client.backends[backend_index];

    if conn.is_connected() && conn.bound_backend_index() != Some(backend_index) {
        conn.shutdown();
    }
    if !conn.has_socket() {
        let sock = socket::create_socket(None)?;
        socket::bind_to(&sock, client.bind_addr().as_ref())?;
        conn.install_socket(Some(sock), None);
    }

    let addrs: Vec<_> = format!("{}:{}", backend.host, backend.port)
        .to_socket_addrs()
        .map_err(|_| MemcError::AddressMissing)?
        .collect();
    if addrs.is_empty() {
        return Err(MemcError::AddressMissing);
    }

    let mut last_err = MemcError::Connect;
    for addr in addrs {
        let attempt = conn.with_socket(|sock| {
            sock.connect(&addr.into())
                .map_err(|e| MemcError::Socket(e.to_string()))
        });
        match attempt {
            Ok(()) => {
                conn.mark_connected(backend_index);
                debug!(replica = i, backend = backend_index, %addr, "connected");
                return Ok(());
            }
            Err(e) => {
                warn!(replica = i, %addr, error = %e, "connect attempt failed");
                conn.set_last_error(e.clone());
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// Updates `starting_index` from `key` (if supplied), then reconnects every
/// replica. Succeeds if any replica connected; otherwise returns the
/// smallest of their errors.
pub fn connect(client: &Arc<Client>, key: Option<&[u8]>) -> Result<(), MemcError> {
    if let Some(k) = key {
        if !k.is_empty() {
            let idx = starting_index(k, client.backends.len());
            client.starting_index.store(idx, Ordering::SeqCst);
        }
    }

    let mut smallest: Option<MemcError> = None;
    let mut any_succeeded = false;
    for i in 0..client.replication_factor {
        match reconnect(client, i) {
            Ok(()) => any_succeeded = true,
            Err(e) => {
                smallest = Some(match smallest {
                    Some(prev) => prev.smallest(e),
                    None => e,
                });
            }
        }
    }

    if any_succeeded {
        Ok(())
    } else {
        Err(smallest.unwrap_or(MemcError::Connect))
    }
}

/// Closes every replica socket, then calls `init` again.
pub fn reinit(client: &Arc<Client>) -> Result<(), MemcError> {
    client.reinit_in_process.store(true, Ordering::SeqCst);
    for conn in client.replicas.iter() {
        conn.shutdown();
    }
    init(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_index_matches_ring_selection_scenario() {
        // Scenario 4: backends [B0,B1,B2,B3], key "abcD", last byte 'D'=0x44.
        assert_eq!(starting_index(b"abcD", 4), 0x44 % 4);
        assert_eq!(starting_index(b"abcD", 4), 0);
    }

    #[test]
    fn starting_index_is_zero_with_no_backends() {
        assert_eq!(starting_index(b"key", 0), 0);
    }

    #[test]
    fn starting_index_uses_only_the_last_byte() {
        assert_eq!(starting_index(b"z", 10), starting_index(b"aaaaaaaaz", 10));
    }
}
