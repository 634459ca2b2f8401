mod linear;

use std::num::NonZeroUsize;

use comms::{ParameterSet, Signature};

pub use linear::LinearTrainer;

/// The result of evaluating a parameter set on local test data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

/// The boundary between the node and its trainable model.
///
/// The trainer holds the data and the architecture but never the parameters, those are
/// owned by the node and lent to every call.
pub trait Trainer: Send {
    /// The shapes every parameter set for this model must have.
    fn signature(&self) -> Signature;

    /// The parameters the model starts with before the first round.
    fn initial_parameters(&self) -> ParameterSet;

    /// Trains on the local partition starting from `params`.
    ///
    /// # Arguments
    /// * `params` - The starting parameters, they match `signature`.
    /// * `epochs` - The amount of passes over the training data.
    ///
    /// # Returns
    /// The updated parameters.
    fn train(&mut self, params: &ParameterSet, epochs: NonZeroUsize) -> ParameterSet;

    /// Evaluates `params` on the local test split.
    fn evaluate(&mut self, params: &ParameterSet) -> Evaluation;

    /// The amount of local training samples.
    fn train_samples(&self) -> u64;

    /// The amount of local test samples.
    fn test_samples(&self) -> u64;
}
