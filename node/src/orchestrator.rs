use std::{fmt, mem, net::SocketAddr, str::FromStr, time::Duration};

use comms::ParameterSet;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::{
    aggregator::{self, AggregationMode},
    config::NodeConfig,
    error::{AggregateErr, BindErr, Result, RoundErr},
    listener::{Submission, SubordinateListener},
    round::{EvaluateRes, FitRes, Metrics, RoundConfig, Scalar},
    trainer::Trainer,
};

/// The phase a node is in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoundState {
    #[default]
    Idle,
    Training,
    Collecting,
    Aggregating,
    Done,
    Evaluating,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Training => "training",
            Self::Collecting => "collecting",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
            Self::Evaluating => "evaluating",
        };

        f.write_str(name)
    }
}

/// What to do when fewer subordinates than expected submitted in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialPolicy {
    /// Aggregate whatever arrived.
    #[default]
    Proceed,
    /// Wait once more for the missing subordinates, then proceed.
    RetryOnce,
    /// Fail the round.
    Abort,
}

impl FromStr for PartialPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "proceed" => Ok(Self::Proceed),
            "retry_once" => Ok(Self::RetryOnce),
            "abort" => Ok(Self::Abort),
            other => Err(format!(
                "unknown partial policy {other}, expected proceed, retry_once or abort"
            )),
        }
    }
}

/// A node of the aggregation tree.
///
/// Trains on its own partition, merges the results of its subordinates (if it has any)
/// with its own and reports the combined parameters to whoever drives it.
pub struct AggregationNode<T: Trainer> {
    node_id: usize,
    trainer: T,
    params: ParameterSet,
    listener: Option<SubordinateListener>,
    num_children: usize,
    collect_timeout: Duration,
    retry_timeout: Duration,
    policy: PartialPolicy,
    mode: AggregationMode,
    state: RoundState,
}

impl<T: Trainer> AggregationNode<T> {
    /// Creates a new `AggregationNode`, binding the subordinate listener if the node
    /// has children.
    ///
    /// # Arguments
    /// * `config` - The node's configuration.
    /// * `trainer` - The local model and data.
    ///
    /// # Returns
    /// A new idle node holding the trainer's initial parameters.
    ///
    /// # Errors
    /// `BindErr` if the listener's address can't be bound.
    pub async fn bind(config: &NodeConfig, trainer: T) -> std::result::Result<Self, BindErr> {
        let listener = if config.num_children > 0 {
            let listener = SubordinateListener::bind(config.listen_addr())
                .await?
                .with_read_timeout(config.read_timeout())
                .with_max_frame_len(config.max_frame_len);

            Some(listener)
        } else {
            None
        };

        Ok(Self {
            node_id: config.node_id,
            params: trainer.initial_parameters(),
            trainer,
            listener,
            num_children: config.num_children,
            collect_timeout: config.collect_timeout(),
            retry_timeout: config.retry_timeout(),
            policy: config.partial_policy,
            mode: config.aggregation,
            state: RoundState::Idle,
        })
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    /// The address subordinates should submit to, if this node has any.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(SubordinateListener::local_addr)
    }

    pub fn get_parameters(&self) -> &ParameterSet {
        &self.params
    }

    /// Replaces the current parameters.
    ///
    /// # Errors
    /// `RoundErr::ParameterShape` if `params` doesn't fit the model.
    pub fn set_parameters(&mut self, params: ParameterSet) -> Result<()> {
        self.load(params)
    }

    /// Runs a whole training round starting from `params`.
    ///
    /// Trains locally, collects the subordinates' parameters and combines everything
    /// into the new current parameters. Leaves the node idle whatever the outcome.
    ///
    /// # Arguments
    /// * `params` - The round's starting parameters.
    /// * `config` - The round's configuration.
    ///
    /// # Returns
    /// The combined parameters and the amount of samples behind them.
    ///
    /// # Errors
    /// A `RoundErr` if the inputs are invalid, the collection is incomplete under
    /// `PartialPolicy::Abort` or the submissions can't be aggregated.
    pub async fn fit(&mut self, params: ParameterSet, config: &RoundConfig) -> Result<FitRes> {
        let res = self.round(params, config).await;
        self.transition(RoundState::Idle);
        res
    }

    /// Evaluates `params` on the local test split, they become the current parameters.
    ///
    /// # Errors
    /// `RoundErr::ParameterShape` if `params` doesn't fit the model.
    pub fn evaluate(&mut self, params: ParameterSet, _config: &RoundConfig) -> Result<EvaluateRes> {
        self.load(params)?;
        self.transition(RoundState::Evaluating);

        let evaluation = self.trainer.evaluate(&self.params);
        debug!(node_id = self.node_id, loss = evaluation.loss; "evaluated parameters");

        let mut metrics = Metrics::new();
        metrics.insert("accuracy".to_string(), Scalar::Float(evaluation.accuracy));

        self.transition(RoundState::Idle);

        Ok(EvaluateRes {
            loss: evaluation.loss,
            num_examples: self.trainer.test_samples(),
            metrics,
        })
    }

    async fn round(&mut self, params: ParameterSet, config: &RoundConfig) -> Result<FitRes> {
        let epochs = config.epochs()?;
        self.load(params)?;

        self.transition(RoundState::Training);
        self.params = self.trainer.train(&self.params, epochs);
        let local = self.trainer.train_samples();
        debug!(node_id = self.node_id, samples = local; "finished local training");

        let received = self.collect().await?;

        let num_examples = received
            .iter()
            .map(|submission| submission.weight)
            .try_fold(local, |total, weight| weight.map(|w| total.saturating_add(w)))
            .unwrap_or(local);

        if !received.is_empty() {
            self.transition(RoundState::Aggregating);
            self.combine(received, local)?;
        }

        self.transition(RoundState::Done);
        info!(node_id = self.node_id, samples = num_examples; "round complete");

        Ok(FitRes {
            parameters: self.params.clone(),
            num_examples,
            metrics: Metrics::new(),
        })
    }

    /// Gathers the subordinates' submissions applying the partial policy.
    async fn collect(&mut self) -> Result<Vec<Submission>> {
        let Some(listener) = self.listener.as_mut() else {
            return Ok(Vec::new());
        };

        let node_id = self.node_id;
        self.state = transition(node_id, self.state, RoundState::Collecting);

        let expected = self.num_children;
        let incomplete = match listener.collect(expected, self.collect_timeout).await {
            Ok(collection) => return Ok(collection.received),
            Err(e) => e,
        };

        let missing = incomplete.missing();
        warn!(node_id = node_id, missing = missing; "{missing} of {expected} subordinates didn't submit in time");
        for failure in &incomplete.failures {
            warn!(node_id = node_id; "submission from {} failed: {}", failure.addr, failure.reason);
        }

        match self.policy {
            PartialPolicy::Proceed => Ok(incomplete.received),
            PartialPolicy::Abort => Err(RoundErr::Incomplete(incomplete)),
            PartialPolicy::RetryOnce => {
                let mut received = incomplete.received;

                match listener.collect(missing, self.retry_timeout).await {
                    Ok(collection) => received.extend(collection.received),
                    Err(retry) => {
                        warn!(node_id = node_id, missing = retry.missing(); "proceeding without some subordinates after retrying");
                        received.extend(retry.received);
                    }
                }

                Ok(received)
            }
        }
    }

    /// Aggregates the current parameters with `received`, in that order.
    ///
    /// The current parameters are left untouched on failure.
    fn combine(&mut self, received: Vec<Submission>, local: u64) -> Result<()> {
        let weights = match self.mode {
            AggregationMode::Unweighted => None,
            AggregationMode::Weighted => {
                let declared = std::iter::once(Some(local))
                    .chain(received.iter().map(|submission| submission.weight))
                    .collect::<Option<Vec<u64>>>();

                if declared.is_none() {
                    warn!(node_id = self.node_id; "some subordinates didn't declare a sample count, falling back to the plain mean");
                }

                declared
            }
        };

        let mut addrs = Vec::with_capacity(received.len());
        let mut sets = Vec::with_capacity(received.len() + 1);
        sets.push(mem::take(&mut self.params));

        for Submission { addr, params, .. } in received {
            addrs.push(addr);
            sets.push(params);
        }

        match aggregator::aggregate(&sets, weights.as_deref()) {
            Ok(aggregated) => {
                self.params = aggregated;
                Ok(())
            }
            Err(e) => {
                let culprit = match &e {
                    AggregateErr::ShapeMismatch { index, .. } => {
                        index.checked_sub(1).and_then(|i| addrs.get(i))
                    }
                    _ => None,
                };

                if let Some(addr) = culprit {
                    warn!(node_id = self.node_id; "subordinate {addr} submitted parameters of the wrong shape");
                }

                self.params = sets.swap_remove(0);
                Err(e.into())
            }
        }
    }

    /// Validates `params` against the model and makes them the current parameters.
    fn load(&mut self, params: ParameterSet) -> Result<()> {
        let expected = self.trainer.signature();
        if !params.matches(&expected) {
            return Err(RoundErr::ParameterShape {
                expected,
                got: params.signature(),
            });
        }

        self.params = params;
        Ok(())
    }

    fn transition(&mut self, next: RoundState) {
        self.state = transition(self.node_id, self.state, next);
    }
}

fn transition(node_id: usize, from: RoundState, to: RoundState) -> RoundState {
    debug!(node_id = node_id; "{from} -> {to}");
    to
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!("proceed".parse::<PartialPolicy>(), Ok(PartialPolicy::Proceed));
        assert_eq!("retry_once".parse::<PartialPolicy>(), Ok(PartialPolicy::RetryOnce));
        assert_eq!("abort".parse::<PartialPolicy>(), Ok(PartialPolicy::Abort));
        assert!("retry".parse::<PartialPolicy>().is_err());
    }

    #[test]
    fn test_policy_defaults_to_proceed() {
        assert_eq!(PartialPolicy::default(), PartialPolicy::Proceed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RoundState::Collecting.to_string(), "collecting");
        assert_eq!(RoundState::default(), RoundState::Idle);
    }
}
