//! The redundant multi-server memcached client: a fixed-size array of
//! replica connections drawn from a configured backend ring, fanned out
//! for writes and walked for first-wins reads.

pub mod barrier;
pub mod codec;
pub mod connection;
pub mod ops;
pub mod ring;
pub mod socket;
pub mod wire;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::info;

use crate::error::MemcError;
use connection::Connection;

/// Hard cap on replicas, matching the wire protocol's own small-scale
/// deployment assumptions.
pub const R_MAX: usize = 10;
/// Hard cap on configured backends.
pub const N_B_MAX: usize = 100;

/// One configured backend: host and port. The original's opaque
/// module-name/encoding/credential fields are out of scope (§3, external
/// collaborators) and carry no behavior here.
#[derive(Debug, Clone)]
pub struct BackendParams {
    pub host: String,
    pub port: u16,
}

/// The client. Every public operation is reached through an `Arc<Client>`
/// so that fan-out workers can outlive the call that spawned them — the
/// "spawn and forget, joined lazily by the next op" contract (§4.G) needs
/// the worker thread to hold a handle to shared state past the return of
/// the function that started it.
impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("backends", &self.backends)
            .field("replication_factor", &self.replication_factor)
            .finish_non_exhaustive()
    }
}

pub struct Client {
    backends: Vec<BackendParams>,
    replicas: Vec<Connection>,
    replication_factor: usize,
    starting_index: AtomicUsize,

    send_mtx: Mutex<()>,
    recv_mtx: Mutex<()>,
    set_mtx: Mutex<()>,
    delete_mtx: Mutex<()>,
    quit_mtx: Mutex<()>,
    init_mtx: Mutex<()>,

    reinit_worker: Mutex<Option<JoinHandle<()>>>,
    reinit_in_process: AtomicBool,

    /// Client-side source address from `-i`/`-p`, applied to each replica's
    /// socket in `ring::reconnect` before `connect()`.
    bind_addr: Option<SocketAddr>,
}

impl Client {
    /// Allocates the backend and replica arrays. `replication_factor` is
    /// normalized down to `min(R_MAX, backends.len())`, per the invariant
    /// that `R <= N` always holds after normalization.
    pub fn allocate(
        backends: Vec<BackendParams>,
        replication_factor: usize,
        bind_addr: Option<SocketAddr>,
    ) -> Result<Client, MemcError> {
        if backends.is_empty() || backends.len() > N_B_MAX {
            return Err(MemcError::Allocation);
        }
        let r = replication_factor.clamp(1, R_MAX).min(backends.len());
        let replicas = (0..r).map(|_| Connection::new()).collect();

        info!(backends = backends.len(), replicas = r, "allocated client");
        Ok(Client {
            backends,
            replicas,
            replication_factor: r,
            starting_index: AtomicUsize::new(0),
            send_mtx: Mutex::new(()),
            recv_mtx: Mutex::new(()),
            set_mtx: Mutex::new(()),
            delete_mtx: Mutex::new(()),
            quit_mtx: Mutex::new(()),
            init_mtx: Mutex::new(()),
            reinit_worker: Mutex::new(None),
            reinit_in_process: AtomicBool::new(false),
            bind_addr,
        })
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn starting_index(&self) -> usize {
        self.starting_index.load(Ordering::SeqCst)
    }

    pub fn bind_addr(&self) -> Option<SocketAddr> {
        self.bind_addr
    }

    /// Builds the initial sockets for every replica, asynchronously.
    pub fn init(self: &Arc<Self>) -> Result<(), MemcError> {
        barrier::join_barrier(self);
        ring::init(self)
    }

    /// Updates the ring offset from `key` (if given) and connects every
    /// replica, starting from that offset.
    pub fn connect(self: &Arc<Self>, key: Option<&[u8]>) -> Result<(), MemcError> {
        barrier::join_barrier(self);
        ring::connect(self, key)
    }

    /// Tears every replica down and calls `init` again.
    pub fn reinit(self: &Arc<Self>) -> Result<(), MemcError> {
        barrier::join_barrier(self);
        ring::reinit(self)
    }

    pub fn get(self: &Arc<Self>, key: &[u8]) -> Result<ops::GetResult, MemcError> {
        barrier::join_barrier(self);
        ops::get(self, key)
    }

    pub fn set(self: &Arc<Self>, key: &[u8], value: &[u8], flags: u32, expiration: u32) -> Result<(), MemcError> {
        barrier::join_barrier(self);
        ops::store(self, codec::opcode::SET, key, value, flags, expiration, 0)
    }

    pub fn replace(
        self: &Arc<Self>,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expiration: u32,
        cas: u64,
    ) -> Result<(), MemcError> {
        barrier::join_barrier(self);
        ops::store(self, codec::opcode::REPLACE, key, value, flags, expiration, cas)
    }

    pub fn delete(self: &Arc<Self>, key: &[u8]) -> Result<(), MemcError> {
        barrier::join_barrier(self);
        ops::delete(self, key)
    }

    pub fn quit(self: &Arc<Self>) -> Result<(), MemcError> {
        barrier::join_barrier(self);
        ops::quit(self)
    }

    /// Drain barrier: joins every outstanding worker without dispatching
    /// new work. Useful before process shutdown.
    pub fn wait_all(self: &Arc<Self>) {
        barrier::join_barrier(self);
    }

    /// Tears every replica's socket down. The arrays themselves are freed
    /// when the last `Arc<Client>` is dropped.
    pub fn free(self: &Arc<Self>) {
        barrier::join_barrier(self);
        for conn in &self.replicas {
            conn.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_normalizes_replication_factor_to_backend_count() {
        let client = Client::allocate(
            vec![
                BackendParams { host: "h0".into(), port: 1 },
                BackendParams { host: "h1".into(), port: 2 },
            ],
            5,
            None,
        )
        .unwrap();
        assert_eq!(client.replication_factor(), 2);
    }

    #[test]
    fn allocate_normalizes_replication_factor_to_r_max() {
        let backends = (0..20)
            .map(|i| BackendParams {
                host: format!("h{i}"),
                port: i as u16,
            })
            .collect();
        let client = Client::allocate(backends, 50, None).unwrap();
        assert_eq!(client.replication_factor(), R_MAX);
    }

    #[test]
    fn allocate_rejects_empty_backend_list() {
        let err = Client::allocate(vec![], 1, None).unwrap_err();
        assert_eq!(err, MemcError::Allocation);
    }

    #[test]
    fn allocate_rejects_too_many_backends() {
        let backends = (0..(N_B_MAX + 1))
            .map(|i| BackendParams {
                host: format!("h{i}"),
                port: 0,
            })
            .collect();
        let err = Client::allocate(backends, 1, None).unwrap_err();
        assert_eq!(err, MemcError::Allocation);
    }
}
