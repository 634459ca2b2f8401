use std::{error::Error, fmt, io, net::SocketAddr};

use comms::{FrameErr, Signature};

use crate::listener::{Submission, SubmissionFailure};

/// The result type of a single round.
pub type Result<T> = std::result::Result<T, RoundErr>;

/// The listening socket for subordinates couldn't be bound, the node can't act as a parent.
#[derive(Debug)]
pub struct BindErr {
    pub addr: String,
    pub source: io::Error,
}

impl fmt::Display for BindErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { addr, source } = self;
        write!(f, "failed to bind the subordinate listener at {addr}: {source}")
    }
}

impl Error for BindErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Less than the expected amount of subordinates submitted before the deadline.
#[derive(Debug)]
pub struct IncompleteErr {
    pub expected: usize,
    pub received: Vec<Submission>,
    pub failures: Vec<SubmissionFailure>,
}

impl IncompleteErr {
    /// How many submissions are missing.
    pub fn missing(&self) -> usize {
        self.expected.saturating_sub(self.received.len())
    }
}

impl fmt::Display for IncompleteErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "incomplete collection: received {} of {} submissions ({} failed)",
            self.received.len(),
            self.expected,
            self.failures.len()
        )
    }
}

impl Error for IncompleteErr {}

/// Failures of the averaging step.
#[derive(Debug)]
pub enum AggregateErr {
    Empty,
    ShapeMismatch {
        index: usize,
        expected: Signature,
        got: Signature,
    },
    InvalidWeight {
        index: usize,
        weight: u64,
    },
    WeightCount {
        sets: usize,
        weights: usize,
    },
}

impl fmt::Display for AggregateErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "there are no parameter sets to aggregate"),
            Self::ShapeMismatch {
                index,
                expected,
                got,
            } => write!(
                f,
                "shape mismatch at set {index}: expected {expected}, got {got}"
            ),
            Self::InvalidWeight { index, weight } => {
                write!(f, "invalid weight {weight} for set {index}, must be positive")
            }
            Self::WeightCount { sets, weights } => {
                write!(f, "got {weights} weights for {sets} parameter sets")
            }
        }
    }
}

impl Error for AggregateErr {}

/// Everything that can abort a single round.
#[derive(Debug)]
pub enum RoundErr {
    ParameterShape {
        expected: Signature,
        got: Signature,
    },
    InvalidRoundConfig {
        key: &'static str,
        reason: String,
    },
    Incomplete(IncompleteErr),
    Aggregate(AggregateErr),
}

impl fmt::Display for RoundErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterShape { expected, got } => write!(
                f,
                "parameters don't fit the model: expected {expected}, got {got}"
            ),
            Self::InvalidRoundConfig { key, reason } => {
                write!(f, "invalid round config entry {key}: {reason}")
            }
            Self::Incomplete(e) => write!(f, "round aborted: {e}"),
            Self::Aggregate(e) => write!(f, "aggregation failed: {e}"),
        }
    }
}

impl Error for RoundErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Incomplete(e) => Some(e),
            Self::Aggregate(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IncompleteErr> for RoundErr {
    fn from(value: IncompleteErr) -> Self {
        Self::Incomplete(value)
    }
}

impl From<AggregateErr> for RoundErr {
    fn from(value: AggregateErr) -> Self {
        Self::Aggregate(value)
    }
}

/// Failures while handing this node's result to its parent.
#[derive(Debug)]
pub enum SubmitErr {
    Io(io::Error),
    Frame(FrameErr),
    Rejected { parent: SocketAddr },
    NoAck { parent: SocketAddr },
    Timeout,
}

impl fmt::Display for SubmitErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Frame(e) => write!(f, "invalid answer from parent: {e}"),
            Self::Rejected { parent } => write!(f, "parent {parent} rejected the submission"),
            Self::NoAck { parent } => {
                write!(f, "parent {parent} closed the connection without acknowledging")
            }
            Self::Timeout => write!(f, "timed out submitting to the parent"),
        }
    }
}

impl Error for SubmitErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Frame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SubmitErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<FrameErr> for SubmitErr {
    fn from(value: FrameErr) -> Self {
        match value {
            FrameErr::Io(e) => Self::Io(e),
            other => Self::Frame(other),
        }
    }
}

/// Invalid or unreadable process configuration.
#[derive(Debug)]
pub enum ConfigErr {
    Missing(&'static str),
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "missing required setting {key}"),
            Self::Invalid { key, value, reason } => {
                write!(f, "invalid value {value:?} for {key}: {reason}")
            }
            Self::Io(e) => write!(f, "failed to read the config file: {e}"),
            Self::Json(e) => write!(f, "failed to parse the config file: {e}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Boundary conversions for binaries / I/O APIs.
impl From<BindErr> for io::Error {
    fn from(value: BindErr) -> Self {
        io::Error::new(value.source.kind(), value)
    }
}

impl From<ConfigErr> for io::Error {
    fn from(value: ConfigErr) -> Self {
        match value {
            ConfigErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}

impl From<RoundErr> for io::Error {
    fn from(value: RoundErr) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}
