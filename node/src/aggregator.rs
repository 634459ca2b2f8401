use std::str::FromStr;

use comms::{ParameterSet, Tensor};
use ndarray::ArrayD;
use serde::Deserialize;

use crate::error::AggregateErr;

/// How the parameter sets of a round are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Plain arithmetic mean, every set counts the same.
    #[default]
    Unweighted,
    /// Mean weighted by the amount of samples behind each set.
    Weighted,
}

impl FromStr for AggregationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unweighted" => Ok(Self::Unweighted),
            "weighted" => Ok(Self::Weighted),
            other => Err(format!(
                "unknown aggregation mode {other}, expected unweighted or weighted"
            )),
        }
    }
}

/// Averages `sets` position by position.
///
/// Without `weights` every set contributes `1 / len(sets)`, otherwise set `i`
/// contributes `weights[i] / sum(weights)`. Sums are accumulated in `f64` and rounded
/// once, so the result doesn't depend on the order of `sets`.
///
/// # Arguments
/// * `sets` - The parameter sets to combine, all of them with the same signature.
/// * `weights` - Optional positive sample counts, one per set.
///
/// # Returns
/// A new parameter set, the inputs are left untouched.
///
/// # Errors
/// * `AggregateErr::Empty` if `sets` is empty.
/// * `AggregateErr::ShapeMismatch` if any set has a different signature than the first.
/// * `AggregateErr::WeightCount` if there isn't exactly one weight per set.
/// * `AggregateErr::InvalidWeight` if any weight is zero.
pub fn aggregate(
    sets: &[ParameterSet],
    weights: Option<&[u64]>,
) -> Result<ParameterSet, AggregateErr> {
    let first = sets.first().ok_or(AggregateErr::Empty)?;
    let signature = first.signature();

    if let Some((index, set)) = sets
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, set)| !set.matches(&signature))
    {
        return Err(AggregateErr::ShapeMismatch {
            index,
            expected: signature,
            got: set.signature(),
        });
    }

    let factors = factors(sets.len(), weights)?;
    let total: f64 = factors.iter().sum();

    let params = first
        .tensors()
        .iter()
        .enumerate()
        .map(|(i, tensor)| {
            let mut acc = ArrayD::<f64>::zeros(tensor.raw_dim());

            for (set, &factor) in sets.iter().zip(&factors) {
                acc.zip_mut_with(&set.tensors()[i], |a, &x| *a += factor * x as f64);
            }

            acc.mapv(|a| (a / total) as f32)
        })
        .collect::<Vec<Tensor>>();

    Ok(ParameterSet::new(params))
}

/// Validates `weights` and turns them into per set multipliers.
fn factors(sets: usize, weights: Option<&[u64]>) -> Result<Vec<f64>, AggregateErr> {
    let Some(weights) = weights else {
        return Ok(vec![1.0; sets]);
    };

    if weights.len() != sets {
        return Err(AggregateErr::WeightCount {
            sets,
            weights: weights.len(),
        });
    }

    if let Some(index) = weights.iter().position(|&w| w == 0) {
        return Err(AggregateErr::InvalidWeight { index, weight: 0 });
    }

    Ok(weights.iter().map(|&w| w as f64).collect())
}
