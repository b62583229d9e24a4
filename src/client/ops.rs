//! Operation layer (component G): GET's single-winner read, and the
//! fan-out write shape shared by SET/REPLACE/DELETE/QUIT.

use std::sync::Arc;
use std::thread;

use tracing::warn;

use crate::client::barrier;
use crate::client::codec::{opcode, Header, StoreExtras, OPAQUE};
use crate::client::ring;
use crate::client::wire::{self, RecvWants};
use crate::client::Client;
use crate::error::MemcError;

/// The outcome of a successful GET: the value, its flags, and the cas the
/// server reported.
#[derive(Debug, Clone)]
pub struct GetResult {
    pub value: Vec<u8>,
    pub flags: u32,
    pub cas: u64,
}

/// GET: synchronous single-winner read, walking the ring from a starting
/// replica until one responds SUCCESS or every replica has been tried.
pub fn get(client: &Arc<Client>, key: &[u8]) -> Result<GetResult, MemcError> {
    if key.is_empty() {
        return Err(MemcError::SendKeyErr);
    }

    let c0 = select_starting_connection(client)?;
    let r = client.replication_factor;

    let mut smallest: Option<MemcError> = None;
    for step in 0..r {
        let i = (c0 + step) % r;
        match get_one(client, i, key) {
            Ok(result) => return Ok(result),
            Err(e) => {
                smallest = Some(match smallest {
                    Some(prev) => prev.smallest(e),
                    None => e,
                });
            }
        }
    }
    Err(smallest.unwrap_or(MemcError::Connect))
}

/// Three-pass scan for a usable starting replica (SPEC_FULL.md §2): an idle
/// connected replica; failing that, a replica whose worker can be joined,
/// rechecked after joining; failing that, whatever pass one missed because
/// a join in pass two freed up a replica after the scan already passed it.
fn select_starting_connection(client: &Arc<Client>) -> Result<usize, MemcError> {
    let r = client.replication_factor;

    for i in 0..r {
        let conn = &client.replicas[i];
        if conn.is_connected() && conn.in_flight() == 0 {
            return Ok(i);
        }
    }

    for i in 0..r {
        let conn = &client.replicas[i];
        if conn.in_flight() != 0 && conn.worker_created() {
            if let Err(e) = conn.join_worker() {
                warn!(replica = i, ?e, "replica worker panicked during get scan");
            }
            if conn.is_connected() && conn.in_flight() == 0 {
                return Ok(i);
            }
        }
    }

    for i in 0..r {
        let conn = &client.replicas[i];
        if conn.is_connected() && conn.in_flight() == 0 {
            return Ok(i);
        }
    }

    Err(MemcError::Connect)
}

fn get_one(client: &Arc<Client>, i: usize, key: &[u8]) -> Result<GetResult, MemcError> {
    let conn = &client.replicas[i];
    conn.mark_in_flight_start();
    let outcome = (|| {
        let hdr = Header::request(opcode::GET, key.len() as u16, 0, key.len() as u32, 0);
        {
            let _send_guard = client.send_mtx.lock().unwrap();
            conn.with_socket(|sock| wire::send(sock, &hdr, None, Some(key), None))?;
        }

        let wants = RecvWants {
            extras: true,
            value: true,
            expected_opaque: Some(OPAQUE),
            ..RecvWants::default()
        };
        let received = {
            let _recv_guard = client.recv_mtx.lock().unwrap();
            conn.with_socket(|sock| wire::recv(sock, &wants))
        };

        let received = received?;

        conn.set_last_status(received.header.status());
        if received.header.status() == crate::error::Status::KeyNotFound {
            return Err(MemcError::RecvKeyNotFound);
        }
        if !received.header.status().is_success() {
            return Err(MemcError::Status(received.header.status()));
        }

        let flags = received
            .extras
            .as_deref()
            .filter(|b| b.len() == 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0);

        Ok(GetResult {
            value: received.value.unwrap_or_default(),
            flags,
            cas: received.header.cas,
        })
    })();
    conn.mark_in_flight_end();
    outcome
}

type WorkFn = Arc<dyn Fn(&Arc<Client>, usize) -> Result<(), MemcError> + Send + Sync>;

/// Fans `work` out to every connected replica in its own thread, escalating
/// when an entire round spawns zero workers (§4.D step 4): join previous,
/// retry; full reinit, retry; abandon after four total rounds.
fn fan_out_with_escalation(client: &Arc<Client>, work: WorkFn) -> Result<(), MemcError> {
    for attempt in 1..=4 {
        if attempt == 2 {
            barrier::join_barrier(client);
        } else if attempt == 3 {
            if let Err(e) = ring::reinit(client) {
                warn!(error = %e, "reinit escalation failed");
            }
            barrier::join_barrier(client);
        }

        let spawned = fan_out_once(client, Arc::clone(&work));
        if spawned > 0 {
            return Ok(());
        }
        warn!(attempt, "fan-out round spawned zero workers");
    }
    Err(MemcError::Connect)
}

fn fan_out_once(client: &Arc<Client>, work: WorkFn) -> usize {
    let mut spawned = 0;
    for i in 0..client.replication_factor {
        let conn = &client.replicas[i];
        if !conn.is_connected() {
            continue;
        }

        conn.mark_in_flight_start();
        let client_clone = Arc::clone(client);
        let work_clone = Arc::clone(&work);
        let spawn_result = thread::Builder::new()
            .name(format!("memc-worker-{i}"))
            .spawn(move || {
                if let Err(e) = work_clone(&client_clone, i) {
                    client_clone.replicas[i].set_last_error(e);
                }
                client_clone.replicas[i].mark_in_flight_end();
            });

        match spawn_result {
            Ok(handle) => {
                conn.set_worker(handle);
                spawned += 1;
            }
            Err(e) => {
                conn.mark_in_flight_end();
                conn.set_last_error(MemcError::Thread(e.to_string()));
            }
        }
    }
    spawned
}

/// SET/REPLACE: fan-out write, returning as soon as workers are spawned.
/// Completion is observed only at the next public op's join-barrier.
pub fn store(
    client: &Arc<Client>,
    op: u8,
    key: &[u8],
    value: &[u8],
    flags: u32,
    expiration: u32,
    cas: u64,
) -> Result<(), MemcError> {
    if key.is_empty() {
        return Err(MemcError::SendKeyErr);
    }
    let key = key.to_vec();
    let value = value.to_vec();
    let work: WorkFn = Arc::new(move |client, i| {
        store_one(client, i, op, &key, &value, flags, expiration, cas)
    });
    fan_out_with_escalation(client, work)
}

fn store_one(
    client: &Arc<Client>,
    i: usize,
    op: u8,
    key: &[u8],
    value: &[u8],
    flags: u32,
    expiration: u32,
    cas: u64,
) -> Result<(), MemcError> {
    let conn = &client.replicas[i];
    let _class_guard = client.set_mtx.lock().unwrap();

    let extras = StoreExtras { flags, expiration };
    let body_length = StoreExtras::LEN as u32 + key.len() as u32 + value.len() as u32;
    let hdr = Header::request(op, key.len() as u16, StoreExtras::LEN, body_length, cas);

    {
        let _send_guard = client.send_mtx.lock().unwrap();
        conn.with_socket(|sock| {
            wire::send(sock, &hdr, Some(&extras.encode_for_wire()), Some(key), Some(value))
        })?;
    }

    let received = {
        let _recv_guard = client.recv_mtx.lock().unwrap();
        conn.with_socket(|sock| wire::recv(sock, &RecvWants::default()))
    }?;

    conn.set_last_status(received.header.status());
    if !received.header.status().is_success() {
        return Err(MemcError::Status(received.header.status()));
    }
    Ok(())
}

/// DELETE: same fan-out shape as SET/REPLACE, no value segment.
pub fn delete(client: &Arc<Client>, key: &[u8]) -> Result<(), MemcError> {
    if key.is_empty() {
        return Err(MemcError::SendKeyErr);
    }
    let key = key.to_vec();
    let work: WorkFn = Arc::new(move |client, i| delete_one(client, i, &key));
    fan_out_with_escalation(client, work)
}

fn delete_one(client: &Arc<Client>, i: usize, key: &[u8]) -> Result<(), MemcError> {
    let conn = &client.replicas[i];
    // §9's open item: the original locks its SET-class mutex inside
    // memc_delete_thr. This client follows spec.md's explicit hierarchy
    // instead and uses a dedicated delete_mtx (see DESIGN.md).
    let _class_guard = client.delete_mtx.lock().unwrap();

    let hdr = Header::request(opcode::DELETE, key.len() as u16, 0, key.len() as u32, 0);
    {
        let _send_guard = client.send_mtx.lock().unwrap();
        conn.with_socket(|sock| wire::send(sock, &hdr, None, Some(key), None))?;
    }

    let received = {
        let _recv_guard = client.recv_mtx.lock().unwrap();
        conn.with_socket(|sock| wire::recv(sock, &RecvWants::default()))
    }?;

    conn.set_last_status(received.header.status());
    if !received.header.status().is_success() {
        return Err(MemcError::Status(received.header.status()));
    }
    Ok(())
}

/// QUIT: fan-out shutdown. Replicas already shut down are skipped, which
/// is what makes a second QUIT call idempotent (scenario 6).
pub fn quit(client: &Arc<Client>) -> Result<(), MemcError> {
    let mut spawned = 0;
    for i in 0..client.replication_factor {
        let conn = &client.replicas[i];
        if !(conn.is_connected() && conn.has_socket()) {
            continue;
        }

        conn.mark_in_flight_start();
        let client_clone = Arc::clone(client);
        let spawn_result = thread::Builder::new()
            .name(format!("memc-quit-{i}"))
            .spawn(move || {
                let _ = quit_one(&client_clone, i);
                client_clone.replicas[i].mark_in_flight_end();
            });

        match spawn_result {
            Ok(handle) => {
                conn.set_worker(handle);
                spawned += 1;
            }
            Err(e) => {
                conn.mark_in_flight_end();
                conn.set_last_error(MemcError::Thread(e.to_string()));
            }
        }
    }
    let _ = spawned;
    Ok(())
}

fn quit_one(client: &Arc<Client>, i: usize) -> Result<(), MemcError> {
    let conn = &client.replicas[i];
    let _class_guard = client.quit_mtx.lock().unwrap();

    let hdr = Header::request(opcode::QUIT, 0, 0, 0, 0);
    let send_result = {
        let _send_guard = client.send_mtx.lock().unwrap();
        conn.with_socket(|sock| wire::send(sock, &hdr, None, None, None))
    };

    if send_result.is_ok() {
        let _recv_guard = client.recv_mtx.lock().unwrap();
        let _ = conn.with_socket(|sock| wire::recv(sock, &RecvWants::default()));
    }

    conn.shutdown();
    send_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_rejects_empty_key() {
        let client = Arc::new(
            Client::allocate(
                vec![crate::client::BackendParams {
                    host: "127.0.0.1".into(),
                    port: 11211,
                }],
                1,
                None,
            )
            .unwrap(),
        );
        let err = get(&client, b"").unwrap_err();
        assert_eq!(err, MemcError::SendKeyErr);
    }

    #[test]
    fn store_rejects_empty_key() {
        let client = Arc::new(
            Client::allocate(
                vec![crate::client::BackendParams {
                    host: "127.0.0.1".into(),
                    port: 11211,
                }],
                1,
                None,
            )
            .unwrap(),
        );
        let err = store(&client, opcode::SET, b"", b"v", 0, 0, 0).unwrap_err();
        assert_eq!(err, MemcError::SendKeyErr);
    }

    #[test]
    fn get_with_no_connected_replicas_fails_connect() {
        let client = Arc::new(
            Client::allocate(
                vec![crate::client::BackendParams {
                    host: "127.0.0.1".into(),
                    port: 11211,
                }],
                1,
                None,
            )
            .unwrap(),
        );
        let err = get(&client, b"key").unwrap_err();
        assert_eq!(err, MemcError::Connect);
    }
}
