//! Error taxonomy for the redundant memcached client.
//!
//! Mirrors the shape of the memcached binary protocol's own status codes
//! plus the client's own failure modes (allocation, framing, threading).
//! Hand-rolled rather than derived so the `Display` text can match the
//! wire vocabulary exactly.

use std::fmt;

/// A status code carried in a response header's `vbucket_or_status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumericValue,
    AuthError,
    UnknownCommand,
    OutOfMemory,
    NotSupported,
    InternalError,
    Busy,
    TemporaryFailure,
    Other(u16),
}

impl Status {
    pub fn from_wire(code: u16) -> Self {
        match code {
            0x0000 => Status::Success,
            0x0001 => Status::KeyNotFound,
            0x0002 => Status::KeyExists,
            0x0003 => Status::ValueTooLarge,
            0x0004 => Status::InvalidArguments,
            0x0005 => Status::ItemNotStored,
            0x0006 => Status::NonNumericValue,
            0x0008 => Status::AuthError,
            0x0081 => Status::UnknownCommand,
            0x0082 => Status::OutOfMemory,
            0x0083 => Status::NotSupported,
            0x0084 => Status::InternalError,
            0x0085 => Status::Busy,
            0x0086 => Status::TemporaryFailure,
            other => Status::Other(other),
        }
    }

    pub fn to_wire(self) -> u16 {
        match self {
            Status::Success => 0x0000,
            Status::KeyNotFound => 0x0001,
            Status::KeyExists => 0x0002,
            Status::ValueTooLarge => 0x0003,
            Status::InvalidArguments => 0x0004,
            Status::ItemNotStored => 0x0005,
            Status::NonNumericValue => 0x0006,
            Status::AuthError => 0x0008,
            Status::UnknownCommand => 0x0081,
            Status::OutOfMemory => 0x0082,
            Status::NotSupported => 0x0083,
            Status::InternalError => 0x0084,
            Status::Busy => 0x0085,
            Status::TemporaryFailure => 0x0086,
            Status::Other(v) => v,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Success => "success",
            Status::KeyNotFound => "key not found",
            Status::KeyExists => "key exists",
            Status::ValueTooLarge => "value too large",
            Status::InvalidArguments => "invalid arguments",
            Status::ItemNotStored => "item not stored",
            Status::NonNumericValue => "non-numeric value",
            Status::AuthError => "authentication error",
            Status::UnknownCommand => "unknown command",
            Status::OutOfMemory => "out of memory",
            Status::NotSupported => "not supported",
            Status::InternalError => "internal error",
            Status::Busy => "busy",
            Status::TemporaryFailure => "temporary failure",
            Status::Other(_) => "unrecognized status",
        };
        write!(f, "{} (0x{:04x})", text, self.to_wire())
    }
}

/// Every failure mode the client can report, grouped the way `spec`'s
/// error-handling taxonomy groups them (allocation, framing, connect, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemcError {
    /// Failed to allocate the client's backend or replica arrays.
    Allocation,
    /// A public op was called before `init` produced a usable connection set.
    Uninitialized,
    /// No address could be resolved for a backend.
    AddressMissing,
    /// Socket creation or option application failed.
    Socket(String),
    /// `connect()` failed on every replica attempted.
    Connect,
    /// Header write was short.
    SendInvalidHdr,
    /// Extras were supplied with a zero declared length (caller bug).
    SendHdr,
    /// Extras write was short or mismatched the declared length.
    SendInvalidExt,
    /// Key write was short.
    SendInvalidKey,
    /// Value write was short.
    SendInvalidMsg,
    /// No key was supplied to an operation that requires one.
    SendKeyErr,
    /// Extras read was short or mismatched the declared length.
    RecvInvalidExt,
    /// Key read was short or mismatched the declared length.
    RecvInvalidKey,
    /// Value read was short, or body accounting didn't add up.
    RecvInvalidMsg,
    /// Translated from a miss-shaped response (see `ops::get`).
    RecvKeyNotFound,
    /// Response `opaque` did not echo the request's `opaque`.
    RecvOpaqueMismatch,
    /// Worker thread could not be spawned.
    Thread(String),
    /// A length exceeded the wire format's bounds.
    Overflow,
    /// The server returned a non-success status the caller asked to see.
    Status(Status),
    /// Any other I/O failure not covered by a framing-specific variant.
    Io(String),
}

impl MemcError {
    /// A crude total ordering used to pick the "smallest (most specific)"
    /// error across replicas when every replica in an operation failed.
    fn rank(&self) -> u32 {
        match self {
            MemcError::RecvOpaqueMismatch => 0,
            MemcError::RecvKeyNotFound => 1,
            MemcError::Status(_) => 2,
            MemcError::RecvInvalidKey => 3,
            MemcError::RecvInvalidExt => 4,
            MemcError::RecvInvalidMsg => 5,
            MemcError::SendInvalidKey => 6,
            MemcError::SendInvalidExt => 7,
            MemcError::SendInvalidMsg => 8,
            MemcError::SendInvalidHdr => 9,
            MemcError::SendHdr => 10,
            MemcError::SendKeyErr => 11,
            MemcError::Overflow => 12,
            MemcError::Io(_) => 13,
            MemcError::Connect => 14,
            MemcError::Socket(_) => 15,
            MemcError::Thread(_) => 16,
            MemcError::AddressMissing => 17,
            MemcError::Uninitialized => 18,
            MemcError::Allocation => 19,
        }
    }

    /// Picks the more specific of two errors, per §7's "smallest error" rule.
    pub fn smallest(self, other: MemcError) -> MemcError {
        if self.rank() <= other.rank() {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for MemcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemcError::Allocation => write!(f, "failed to allocate client state"),
            MemcError::Uninitialized => write!(f, "client is not initialized"),
            MemcError::AddressMissing => write!(f, "no address could be resolved"),
            MemcError::Socket(msg) => write!(f, "socket error: {msg}"),
            MemcError::Connect => write!(f, "connect() failed on every replica"),
            MemcError::SendInvalidHdr => write!(f, "short write while sending header"),
            MemcError::SendHdr => write!(f, "zero-length extras supplied with a non-zero header"),
            MemcError::SendInvalidExt => write!(f, "short or mismatched write while sending extras"),
            MemcError::SendInvalidKey => write!(f, "short write while sending key"),
            MemcError::SendInvalidMsg => write!(f, "short write while sending value"),
            MemcError::SendKeyErr => write!(f, "operation requires a non-empty key"),
            MemcError::RecvInvalidExt => write!(f, "short or mismatched read while receiving extras"),
            MemcError::RecvInvalidKey => write!(f, "short or mismatched read while receiving key"),
            MemcError::RecvInvalidMsg => write!(f, "short read or inconsistent body length while receiving value"),
            MemcError::RecvKeyNotFound => write!(f, "key not found"),
            MemcError::RecvOpaqueMismatch => write!(f, "response opaque did not match the request"),
            MemcError::Thread(msg) => write!(f, "worker thread error: {msg}"),
            MemcError::Overflow => write!(f, "length exceeds wire format bounds"),
            MemcError::Status(status) => write!(f, "server returned {status}"),
            MemcError::Io(msg) => write!(f, "i/o error: {msg}"),
        }
    }
}

impl std::error::Error for MemcError {}

impl From<std::io::Error> for MemcError {
    fn from(e: std::io::Error) -> Self {
        MemcError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_known_codes() {
        for code in [
            0x0000, 0x0001, 0x0002, 0x0003, 0x0004, 0x0005, 0x0006, 0x0008, 0x0081, 0x0082,
            0x0083, 0x0084, 0x0085, 0x0086,
        ] {
            assert_eq!(Status::from_wire(code).to_wire(), code);
        }
    }

    #[test]
    fn status_preserves_unknown_codes() {
        let s = Status::from_wire(0x1234);
        assert_eq!(s, Status::Other(0x1234));
        assert_eq!(s.to_wire(), 0x1234);
    }

    #[test]
    fn smallest_prefers_more_specific_error() {
        let a = MemcError::Connect;
        let b = MemcError::RecvKeyNotFound;
        assert_eq!(a.smallest(b.clone()), b);
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(
            MemcError::SendKeyErr.to_string(),
            "operation requires a non-empty key"
        );
    }
}
