use std::fmt;
use std::io;

/// Why a decoded message or command batch was rejected.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum MalformedReason {
    /// The buffer was smaller than the fixed message header.
    ShortHeader,
    /// A length header or its address-length field described a batch that didn't fit what was
    /// actually available.
    BadLengthHeader,
    /// An opcode outside the known descriptor table appeared in a command batch.
    UnknownOpcode(u8),
    /// A fixed-size item ran past the end of the declared command length.
    Truncated,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::ShortHeader => write!(f, "message shorter than fixed header"),
            MalformedReason::BadLengthHeader => write!(f, "invalid command batch length header"),
            MalformedReason::UnknownOpcode(op) => write!(f, "unknown opcode {}", op),
            MalformedReason::Truncated => write!(f, "command batch truncated"),
        }
    }
}

/// Error taxonomy for the session message plane.
#[derive(Debug, Eq, PartialEq)]
pub enum CoreError {
    /// Decoded message failed header or length validation. Fatal: terminates the session.
    Malformed(MalformedReason),
    /// The transport reported a read/write error. Fatal.
    TransportLost(io::ErrorKind),
    /// Inactivity timer exceeded the session timeout. Fatal.
    Timeout,
    /// A push would exceed the queue's configured `max_size`. Recoverable: returned synchronously
    /// to the caller, the session stays alive.
    QueueFull,
    /// Authentication failed. Fatal.
    AuthFailed,
    /// A connect was attempted to a host:service already bound to a live session. Recoverable.
    DuplicateConnect,
}

impl CoreError {
    /// Whether this error kind terminates the owning session (§7).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::Malformed(_)
                | CoreError::TransportLost(_)
                | CoreError::Timeout
                | CoreError::AuthFailed
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Malformed(reason) => write!(f, "malformed message: {}", reason),
            CoreError::TransportLost(kind) => write!(f, "transport lost: {:?}", kind),
            CoreError::Timeout => write!(f, "session inactivity timeout"),
            CoreError::QueueFull => write!(f, "queue full"),
            CoreError::AuthFailed => write!(f, "authentication failed"),
            CoreError::DuplicateConnect => write!(f, "duplicate connect"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        CoreError::TransportLost(err.kind())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
