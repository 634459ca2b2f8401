use std::process::ExitCode;

use comms::msg::Submit;
use log::{error, info, warn};
use tokio::signal;

use node::{AggregationNode, LinearTrainer, NodeConfig, RoundConfig, upstream};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        code = run(config) => code,
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
            ExitCode::SUCCESS
        }
    }
}

async fn run(config: NodeConfig) -> ExitCode {
    let trainer = LinearTrainer::synthetic(config.node_id, config.samples, config.features);

    let mut node = match AggregationNode::bind(&config, trainer).await {
        Ok(node) => node,
        Err(e) => {
            error!(node_id = config.node_id; "{e}");
            return ExitCode::FAILURE;
        }
    };

    let round_config = RoundConfig::with_epochs(config.epochs);

    for round in 1..=config.rounds {
        info!(node_id = config.node_id, round = round; "starting round");

        let params = node.get_parameters().clone();
        let fit = match node.fit(params, &round_config).await {
            Ok(fit) => fit,
            Err(e) => {
                warn!(node_id = config.node_id, round = round; "round failed: {e}");
                continue;
            }
        };

        if let Some(parent) = &config.parent_addr {
            let msg = Submit {
                weight: Some(fit.num_examples),
                params: fit.parameters.clone(),
            };

            match upstream::submit(parent.as_str(), &msg, config.submit_timeout()).await {
                Ok(()) => info!(node_id = config.node_id, round = round; "submitted to {parent}"),
                Err(e) => warn!(node_id = config.node_id, round = round; "failed to submit to {parent}: {e}"),
            }
        }

        match node.evaluate(fit.parameters, &round_config) {
            Ok(eval) => info!(
                node_id = config.node_id,
                round = round,
                samples = fit.num_examples,
                loss = eval.loss;
                "round evaluated, metrics {:?}", eval.metrics
            ),
            Err(e) => warn!(node_id = config.node_id, round = round; "evaluation failed: {e}"),
        }
    }

    info!(node_id = config.node_id; "wrapping up");
    ExitCode::SUCCESS
}
