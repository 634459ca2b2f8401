pub mod aggregator;
pub mod client;
pub mod config;
pub mod error;
pub mod listener;
pub mod orchestrator;
pub mod round;
pub mod trainer;
pub mod upstream;

pub use aggregator::{AggregationMode, aggregate};
pub use client::FederatedClient;
pub use config::NodeConfig;
pub use error::{AggregateErr, BindErr, ConfigErr, IncompleteErr, Result, RoundErr, SubmitErr};
pub use listener::{Collection, Submission, SubmissionFailure, SubordinateListener};
pub use orchestrator::{AggregationNode, PartialPolicy, RoundState};
pub use round::{EvaluateRes, FitRes, Metrics, RoundConfig, Scalar};
pub use trainer::{Evaluation, LinearTrainer, Trainer};
pub use upstream::submit;
