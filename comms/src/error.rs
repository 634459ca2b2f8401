use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used across the comms crate.
pub type Result<T> = std::result::Result<T, FrameErr>;

/// Every way a frame can fail to be read or decoded.
///
/// All variants except `Io` mean the peer sent bytes that do not form a valid frame.
#[derive(Debug)]
pub enum FrameErr {
    Io(io::Error),
    Truncated {
        needed: usize,
        available: usize,
    },
    LengthMismatch {
        declared: usize,
        available: usize,
    },
    TooLarge {
        declared: u64,
        max: usize,
    },
    ShapePayloadMismatch {
        shape: Vec<usize>,
        elements: usize,
        available_bytes: usize,
    },
    ShapeOverflow {
        shape: Vec<u64>,
    },
    TrailingBytes {
        extra: usize,
    },
    InvalidTag {
        what: &'static str,
        byte: u8,
    },
}

impl FrameErr {
    /// Whether this error comes from malformed peer data rather than the transport.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

impl Display for FrameErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Truncated { needed, available } => write!(
                f,
                "malformed frame: truncated, needed {needed} bytes but only {available} arrived"
            ),
            Self::LengthMismatch {
                declared,
                available,
            } => write!(
                f,
                "malformed frame: length prefix declares {declared} bytes, buffer holds {available}"
            ),
            Self::TooLarge { declared, max } => write!(
                f,
                "malformed frame: declared length {declared} exceeds the maximum of {max} bytes"
            ),
            Self::ShapePayloadMismatch {
                shape,
                elements,
                available_bytes,
            } => write!(
                f,
                "malformed frame: shape {shape:?} needs {elements} elements, only {available_bytes} bytes remain"
            ),
            Self::ShapeOverflow { shape } => {
                write!(f, "malformed frame: shape {shape:?} overflows the address space")
            }
            Self::TrailingBytes { extra } => {
                write!(f, "malformed frame: {extra} unread bytes after the payload")
            }
            Self::InvalidTag { what, byte } => {
                write!(f, "malformed frame: invalid {what} byte {byte:#04x}")
            }
        }
    }
}

impl Error for FrameErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<FrameErr> for io::Error {
    fn from(value: FrameErr) -> Self {
        match value {
            FrameErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
