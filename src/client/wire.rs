//! Request/response engine (component F): `send` followed by `recv` on one
//! connection's socket, each under its own shared mutex so that one
//! replica's outbound phase can overlap another replica's inbound phase.

use std::io::{Read, Write};

use socket2::Socket;
use tracing::trace;

use crate::client::codec::{Header, HEADER_LEN, OPAQUE};
use crate::error::MemcError;

/// The two-gigabyte bound §4.C imposes on a received value.
const MAX_VALUE_LEN: u32 = 2 * 1024 * 1024 * 1024;

/// Writes `hdr` followed by whichever of `extras`/`key`/`value` are
/// supplied, each exactly the length the header declares.
pub fn send(
    stream: &mut Socket,
    hdr: &Header,
    extras: Option<&[u8]>,
    key: Option<&[u8]>,
    value: Option<&[u8]>,
) -> Result<(), MemcError> {
    let wire_hdr = hdr.encode_for_wire();
    trace!(opcode = hdr.opcode, body_length = hdr.body_length, "sending header");
    stream
        .write_all(&wire_hdr)
        .map_err(|_| MemcError::SendInvalidHdr)?;

    if let Some(e) = extras {
        if hdr.extras_length == 0 {
            return Err(MemcError::SendHdr);
        }
        stream
            .write_all(e)
            .map_err(|_| MemcError::SendInvalidExt)?;
    }

    if let Some(k) = key {
        if hdr.key_length > 0 {
            stream
                .write_all(k)
                .map_err(|_| MemcError::SendInvalidKey)?;
        }
    }

    if let Some(v) = value {
        if !v.is_empty() {
            stream
                .write_all(v)
                .map_err(|_| MemcError::SendInvalidMsg)?;
        }
    }

    Ok(())
}

/// What `recv` hands back: the decoded header plus whichever segments the
/// caller asked to receive.
#[derive(Debug, Default)]
pub struct Received {
    pub header: Header,
    pub extras: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}

pub struct RecvWants {
    pub extras: bool,
    pub key: bool,
    pub key_buflen: usize,
    pub value: bool,
    pub value_buflen: usize,
    /// Checked against the response header's `opaque`; `None` skips the check.
    pub expected_opaque: Option<u32>,
}

impl Default for RecvWants {
    fn default() -> Self {
        RecvWants {
            extras: false,
            key: false,
            key_buflen: 0,
            value: false,
            value_buflen: usize::MAX,
            expected_opaque: Some(OPAQUE),
        }
    }
}

/// Reads a header and whichever segments `wants` asks for, validating each
/// segment's length against what the header declared.
pub fn recv(stream: &mut Socket, wants: &RecvWants) -> Result<Received, MemcError> {
    let mut hdr_buf = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut hdr_buf)
        .map_err(|e| MemcError::Io(e.to_string()))?;
    let header = Header::decode_from_wire(&hdr_buf);
    trace!(status = header.vbucket_or_status, body_length = header.body_length, "received header");

    if let Some(expected) = wants.expected_opaque {
        if header.opaque != expected {
            return Err(MemcError::RecvOpaqueMismatch);
        }
    }

    let mut extras = None;
    if wants.extras && header.extras_length > 0 {
        let mut buf = vec![0u8; header.extras_length as usize];
        stream
            .read_exact(&mut buf)
            .map_err(|_| MemcError::RecvInvalidExt)?;
        extras = Some(buf);
    }

    let mut key = None;
    if wants.key && header.key_length > 0 && (header.key_length as usize) < wants.key_buflen {
        let mut buf = vec![0u8; header.key_length as usize];
        stream
            .read_exact(&mut buf)
            .map_err(|_| MemcError::RecvInvalidKey)?;
        key = Some(buf);
    }

    let mut value = None;
    if wants.value {
        let extras_len = header.extras_length as u32;
        let key_len = header.key_length as u32;
        if header.body_length < extras_len + key_len {
            return Err(MemcError::RecvInvalidMsg);
        }
        let value_len = header.body_length - extras_len - key_len;
        if value_len > MAX_VALUE_LEN || value_len as usize > wants.value_buflen {
            return Err(MemcError::RecvInvalidMsg);
        }
        let mut buf = vec![0u8; value_len as usize];
        stream
            .read_exact(&mut buf)
            .map_err(|_| MemcError::RecvInvalidMsg)?;
        value = Some(buf);
    }

    Ok(Received {
        header,
        extras,
        key,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn loopback_pair() -> (Socket, Socket) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Socket::from(client), Socket::from(server))
    }

    #[test]
    fn send_writes_header_and_key() {
        let (mut client, mut server) = loopback_pair();
        let hdr = Header::request(crate::client::codec::opcode::GET, 3, 0, 3, 0);
        let handle = thread::spawn(move || {
            let mut buf = [0u8; HEADER_LEN + 3];
            server.read_exact(&mut buf).unwrap();
            buf
        });
        send(&mut client, &hdr, None, Some(b"foo"), None).unwrap();
        let received = handle.join().unwrap();
        assert_eq!(&received[..HEADER_LEN], &hdr.encode_for_wire());
        assert_eq!(&received[HEADER_LEN..], b"foo");
    }

    #[test]
    fn send_rejects_zero_length_extras_with_nonempty_slice() {
        let (mut client, _server) = loopback_pair();
        let hdr = Header::request(crate::client::codec::opcode::DELETE, 3, 0, 3, 0);
        let err = send(&mut client, &hdr, Some(&[]), None, None).unwrap_err();
        assert_eq!(err, MemcError::SendHdr);
    }

    #[test]
    fn recv_rejects_opaque_mismatch() {
        let (client, mut server) = loopback_pair();
        let mut hdr = Header::request(crate::client::codec::opcode::GET, 0, 0, 0, 0);
        hdr.magic = crate::client::codec::magic::RESPONSE;
        hdr.opaque = 0xDEAD;
        let handle = thread::spawn(move || {
            server.write_all(&hdr.encode_for_wire()).unwrap();
        });
        let mut client = client;
        let result = recv(&mut client, &RecvWants::default());
        handle.join().unwrap();
        assert_eq!(result.unwrap_err(), MemcError::RecvOpaqueMismatch);
    }

    #[test]
    fn recv_rejects_body_shorter_than_header_lengths() {
        let (client, mut server) = loopback_pair();
        let mut hdr = Header::request(crate::client::codec::opcode::GET, 0, 0, 0, 0);
        hdr.magic = crate::client::codec::magic::RESPONSE;
        hdr.key_length = 5;
        hdr.body_length = 2; // less than key_length alone
        let handle = thread::spawn(move || {
            server.write_all(&hdr.encode_for_wire()).unwrap();
        });
        let mut client = client;
        let wants = RecvWants {
            value: true,
            ..RecvWants::default()
        };
        let result = recv(&mut client, &wants);
        handle.join().unwrap();
        assert_eq!(result.unwrap_err(), MemcError::RecvInvalidMsg);
    }
}
