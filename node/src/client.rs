use comms::ParameterSet;

use crate::{
    error::Result,
    orchestrator::AggregationNode,
    round::{EvaluateRes, FitRes, RoundConfig},
    trainer::Trainer,
};

/// The calls the outer federation protocol drives a node with.
///
/// Rounds are never run concurrently on the same client.
#[async_trait::async_trait]
pub trait FederatedClient {
    /// The client's current parameters.
    fn get_parameters(&self) -> ParameterSet;

    /// Overwrites the client's current parameters.
    fn set_parameters(&mut self, params: ParameterSet) -> Result<()>;

    /// Runs a training round starting from `params`.
    async fn fit(&mut self, params: ParameterSet, config: &RoundConfig) -> Result<FitRes>;

    /// Evaluates `params` on the client's local test data.
    async fn evaluate(&mut self, params: ParameterSet, config: &RoundConfig)
    -> Result<EvaluateRes>;
}

#[async_trait::async_trait]
impl<T: Trainer> FederatedClient for AggregationNode<T> {
    fn get_parameters(&self) -> ParameterSet {
        AggregationNode::get_parameters(self).clone()
    }

    fn set_parameters(&mut self, params: ParameterSet) -> Result<()> {
        AggregationNode::set_parameters(self, params)
    }

    async fn fit(&mut self, params: ParameterSet, config: &RoundConfig) -> Result<FitRes> {
        AggregationNode::fit(self, params, config).await
    }

    async fn evaluate(
        &mut self,
        params: ParameterSet,
        config: &RoundConfig,
    ) -> Result<EvaluateRes> {
        AggregationNode::evaluate(self, params, config)
    }
}
