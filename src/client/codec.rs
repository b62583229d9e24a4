//! Wire-exact binary protocol framing: the 24-byte header and the two
//! extras shapes the client sends (SET/REPLACE's flags+expiration, GET's
//! flags-only response extras).
//!
//! Endianness is collapsed to the platform's own big-endian intrinsics
//! (`to_be_bytes`/`from_be_bytes`), which are a no-op on a big-endian host
//! and their own inverse on a little-endian one — there is no manual
//! bit-reversal left to write.

pub const HEADER_LEN: usize = 24;

pub mod magic {
    pub const REQUEST: u8 = 0x80;
    pub const RESPONSE: u8 = 0x81;
}

pub mod opcode {
    pub const GET: u8 = 0x00;
    pub const SET: u8 = 0x01;
    pub const REPLACE: u8 = 0x03;
    pub const DELETE: u8 = 0x04;
    pub const QUIT: u8 = 0x07;
}

pub const DATA_TYPE: u8 = 0x00;

/// Every outbound request uses this opaque value; a response carrying a
/// different one is surfaced as `MemcError::RecvOpaqueMismatch`.
pub const OPAQUE: u32 = 0x02;

/// The 24-byte header shared by every request and response.
///
/// `vbucket_or_status` carries the vbucket id on a request and the status
/// code on a response; the field means one or the other purely by
/// direction, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    pub vbucket_or_status: u16,
    pub body_length: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    pub fn request(opcode: u8, key_length: u16, extras_length: u8, body_length: u32, cas: u64) -> Self {
        Header {
            magic: magic::REQUEST,
            opcode,
            key_length,
            extras_length,
            data_type: DATA_TYPE,
            vbucket_or_status: 0,
            body_length,
            opaque: OPAQUE,
            cas,
        }
    }

    pub fn status(&self) -> crate::error::Status {
        crate::error::Status::from_wire(self.vbucket_or_status)
    }

    /// Converts a host-order header into its 24-byte wire representation.
    pub fn encode_for_wire(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.magic;
        buf[1] = self.opcode;
        buf[2..4].copy_from_slice(&self.key_length.to_be_bytes());
        buf[4] = self.extras_length;
        buf[5] = self.data_type;
        buf[6..8].copy_from_slice(&self.vbucket_or_status.to_be_bytes());
        buf[8..12].copy_from_slice(&self.body_length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.opaque.to_be_bytes());
        buf[16..24].copy_from_slice(&self.cas.to_be_bytes());
        buf
    }

    /// Recovers a host-order header from its 24-byte wire representation.
    /// The inverse of `encode_for_wire`: `decode_from_wire(encode_for_wire(h)) == h`.
    pub fn decode_from_wire(buf: &[u8; HEADER_LEN]) -> Self {
        Header {
            magic: buf[0],
            opcode: buf[1],
            key_length: u16::from_be_bytes([buf[2], buf[3]]),
            extras_length: buf[4],
            data_type: buf[5],
            vbucket_or_status: u16::from_be_bytes([buf[6], buf[7]]),
            body_length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            opaque: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            cas: u64::from_be_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
        }
    }
}

/// SET/REPLACE extras: `flags` then `expiration`, 8 bytes total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreExtras {
    pub flags: u32,
    pub expiration: u32,
}

impl StoreExtras {
    pub const LEN: u8 = 8;

    pub fn encode_for_wire(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.flags.to_be_bytes());
        buf[4..8].copy_from_slice(&self.expiration.to_be_bytes());
        buf
    }

    pub fn decode_from_wire(buf: &[u8; 8]) -> Self {
        StoreExtras {
            flags: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            expiration: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// GET response extras: `flags` only, 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetExtras {
    pub flags: u32,
}

impl GetExtras {
    pub const LEN: u8 = 4;

    pub fn decode_from_wire(buf: &[u8; 4]) -> Self {
        GetExtras {
            flags: u32::from_be_bytes(*buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            magic: magic::REQUEST,
            opcode: opcode::GET,
            key_length: 3,
            extras_length: 0,
            data_type: DATA_TYPE,
            vbucket_or_status: 0,
            body_length: 3,
            opaque: OPAQUE,
            cas: 0,
        }
    }

    #[test]
    fn header_round_trips_through_wire_bytes() {
        let hdr = sample_header();
        let bytes = hdr.encode_for_wire();
        assert_eq!(Header::decode_from_wire(&bytes), hdr);
    }

    #[test]
    fn wire_bytes_round_trip_through_header() {
        // Scenario 1 from the acceptance set: GET "foo" request header.
        let bytes: [u8; HEADER_LEN] = [
            0x80, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00,
            0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let hdr = Header::decode_from_wire(&bytes);
        assert_eq!(hdr.opcode, opcode::GET);
        assert_eq!(hdr.key_length, 3);
        assert_eq!(hdr.body_length, 3);
        assert_eq!(hdr.opaque, OPAQUE);
        assert_eq!(hdr.encode_for_wire(), bytes);
    }

    #[test]
    fn store_extras_round_trip() {
        let ext = StoreExtras {
            flags: 0,
            expiration: 120,
        };
        let bytes = ext.encode_for_wire();
        assert_eq!(StoreExtras::decode_from_wire(&bytes), ext);
    }

    #[test]
    fn request_builder_fills_common_fields() {
        let hdr = Header::request(opcode::DELETE, 3, 0, 3, 0);
        assert_eq!(hdr.magic, magic::REQUEST);
        assert_eq!(hdr.data_type, DATA_TYPE);
        assert_eq!(hdr.opaque, OPAQUE);
    }
}
