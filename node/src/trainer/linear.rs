use std::num::NonZeroUsize;

use comms::{ParameterSet, Signature};
use ndarray::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use rand_distr::Normal;

use super::{Evaluation, Trainer};

// Every partition samples the same underlying function.
const TRUTH_SEED: u64 = 0x5eed;
const TEST_SHARE: f64 = 0.2;

#[derive(Debug, Clone)]
struct Split {
    x: Array2<f32>,
    y: Array1<f32>,
}

/// A linear regression model trained with mini-batch SGD with momentum on a synthetic
/// partition of data.
///
/// Partitions are deterministic in their id and shifted from each other so the nodes
/// don't see identically distributed data.
#[derive(Debug)]
pub struct LinearTrainer {
    features: usize,
    train: Split,
    test: Split,
    lr: f32,
    momentum: f32,
    batch_size: usize,
    tolerance: f32,
    rng: StdRng,
}

impl LinearTrainer {
    /// Creates a new `LinearTrainer` over a synthetic partition.
    ///
    /// # Arguments
    /// * `partition_id` - Seeds the partition's samples.
    /// * `samples` - The amount of samples, 20% of them are held out for testing.
    /// * `features` - The input dimension.
    ///
    /// # Returns
    /// A new `LinearTrainer` instance.
    pub fn synthetic(partition_id: usize, samples: usize, features: usize) -> Self {
        let mut truth = StdRng::seed_from_u64(TRUTH_SEED);
        let w = Array1::from_shape_fn(features, |_| truth.random_range(-1.0f32..1.0));
        let b = truth.random_range(-1.0f32..1.0);

        let mut rng = StdRng::seed_from_u64(partition_id as u64);
        let shift = partition_id as f32 * 0.5;

        // SAFETY: Both standard deviations are positive constants.
        let inputs = Normal::new(shift, 1.0).unwrap();
        let noise = Normal::new(0.0, 0.05).unwrap();

        let x = Array2::from_shape_fn((samples, features), |_| rng.sample(inputs));
        let y = x.dot(&w) + b + Array1::from_shape_fn(samples, |_| rng.sample(noise));

        let test_len = (samples as f64 * TEST_SHARE).round() as usize;
        let train_len = samples - test_len;

        let train = Split {
            x: x.slice(s![..train_len, ..]).to_owned(),
            y: y.slice(s![..train_len]).to_owned(),
        };
        let test = Split {
            x: x.slice(s![train_len.., ..]).to_owned(),
            y: y.slice(s![train_len..]).to_owned(),
        };

        Self {
            features,
            train,
            test,
            lr: 0.001,
            momentum: 0.9,
            batch_size: 32,
            tolerance: 0.25,
            rng,
        }
    }

    /// Splits `params` into weights and bias.
    ///
    /// # Panics
    /// If `params` doesn't match this model's signature.
    fn unpack(&self, params: &ParameterSet) -> (Array1<f32>, f32) {
        let tensors = params.tensors();
        let w = tensors[0].iter().copied().collect::<Array1<f32>>();
        assert_eq!(w.len(), self.features, "weights don't match the model");
        let b = *tensors[1].first().expect("missing bias");
        (w, b)
    }

    fn pack(w: Array1<f32>, b: f32) -> ParameterSet {
        ParameterSet::new(vec![w.into_dyn(), arr1(&[b]).into_dyn()])
    }
}

impl Trainer for LinearTrainer {
    fn signature(&self) -> Signature {
        Signature::new(vec![vec![self.features], vec![1]])
    }

    fn initial_parameters(&self) -> ParameterSet {
        ParameterSet::filled(&self.signature(), 0.0)
    }

    fn train(&mut self, params: &ParameterSet, epochs: NonZeroUsize) -> ParameterSet {
        let (mut w, mut b) = self.unpack(params);
        let mut vw = Array1::<f32>::zeros(self.features);
        let mut vb = 0.0;

        let mut indices: Vec<usize> = (0..self.train.y.len()).collect();

        for _ in 0..epochs.get() {
            indices.shuffle(&mut self.rng);

            for batch in indices.chunks(self.batch_size) {
                let x = self.train.x.select(Axis(0), batch);
                let y = self.train.y.select(Axis(0), batch);

                let err = x.dot(&w) + b - &y;
                let scale = 2.0 / batch.len() as f32;
                let dw = x.t().dot(&err) * scale;
                let db = err.sum() * scale;

                vw = &vw * self.momentum + &dw;
                vb = vb * self.momentum + db;
                w.scaled_add(-self.lr, &vw);
                b -= self.lr * vb;
            }
        }

        Self::pack(w, b)
    }

    fn evaluate(&mut self, params: &ParameterSet) -> Evaluation {
        let (w, b) = self.unpack(params);
        let Split { x, y } = &self.test;

        if y.is_empty() {
            return Evaluation {
                loss: 0.0,
                accuracy: 0.0,
            };
        }

        let err = x.dot(&w) + b - y;
        let loss = err.mapv(|e| (e as f64).powi(2)).mean().unwrap_or_default();
        let hits = err.iter().filter(|e| e.abs() <= self.tolerance).count();

        Evaluation {
            loss,
            accuracy: hits as f64 / y.len() as f64,
        }
    }

    fn train_samples(&self) -> u64 {
        self.train.y.len() as u64
    }

    fn test_samples(&self) -> u64 {
        self.test.y.len() as u64
    }
}
