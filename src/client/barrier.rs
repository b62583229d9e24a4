//! The join-barrier (§5): the sole synchronization point every public
//! operation passes through before dispatching new work, guaranteeing that
//! all prior state transitions on every replica have been observed.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::client::Client;

pub fn join_barrier(client: &Arc<Client>) {
    if client.reinit_in_process.load(std::sync::atomic::Ordering::SeqCst) {
        let handle = client.reinit_worker.lock().unwrap().take();
        if let Some(h) = handle {
            debug!("joining reinit worker");
            if let Err(e) = h.join() {
                warn!(?e, "reinit worker panicked");
            }
        }
    }

    for (i, conn) in client.replicas.iter().enumerate() {
        if conn.in_flight() != 0 && conn.worker_created() {
            debug!(replica = i, "joining replica worker");
            if let Err(e) = conn.join_worker() {
                warn!(replica = i, ?e, "replica worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BackendParams;

    #[test]
    fn barrier_is_a_no_op_with_nothing_in_flight() {
        let client = Arc::new(
            Client::allocate(
                vec![BackendParams {
                    host: "127.0.0.1".into(),
                    port: 11211,
                }],
                1,
                None,
            )
            .unwrap(),
        );
        join_barrier(&client);
    }
}
