use std::{collections::BTreeMap, num::NonZeroUsize};

use comms::ParameterSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, RoundErr};

const EPOCHS_KEY: &str = "epochs";

/// A metric value reported back to the outer protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

pub type Metrics = BTreeMap<String, Scalar>;

/// The configuration the outer protocol attaches to a round.
///
/// Opaque to the node except for `epochs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundConfig(Map<String, Value>);

impl RoundConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_epochs(epochs: usize) -> Self {
        let mut config = Self::new();
        config.insert(EPOCHS_KEY, epochs);
        config
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The amount of local epochs to train for, one if absent.
    ///
    /// # Errors
    /// `RoundErr::InvalidRoundConfig` if the entry isn't a positive integer.
    pub fn epochs(&self) -> Result<NonZeroUsize> {
        let Some(value) = self.0.get(EPOCHS_KEY) else {
            return Ok(NonZeroUsize::MIN);
        };

        value
            .as_u64()
            .and_then(|epochs| usize::try_from(epochs).ok())
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| RoundErr::InvalidRoundConfig {
                key: EPOCHS_KEY,
                reason: format!("expected a positive integer, got {value}"),
            })
    }
}

/// What a node reports upward after a training round.
#[derive(Debug, Clone, PartialEq)]
pub struct FitRes {
    pub parameters: ParameterSet,
    pub num_examples: u64,
    pub metrics: Metrics,
}

/// What a node reports upward after evaluating a parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluateRes {
    pub loss: f64,
    pub num_examples: u64,
    pub metrics: Metrics,
}
