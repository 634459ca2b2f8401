use std::fmt;

use ndarray::ArrayD;

/// A single n-dimensional block of model parameters.
pub type Tensor = ArrayD<f32>;

/// The ordered tensor shapes of a `ParameterSet`.
///
/// Two parameter sets can only be combined if their signatures are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature(Vec<Vec<usize>>);

impl Signature {
    /// Creates a new `Signature`.
    ///
    /// # Arguments
    /// * `shapes` - The shape of every tensor, in order.
    ///
    /// # Returns
    /// A new `Signature` instance.
    pub fn new(shapes: Vec<Vec<usize>>) -> Self {
        Self(shapes)
    }

    pub fn shapes(&self) -> &[Vec<usize>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the total amount of scalar parameters described by this signature.
    pub fn num_params(&self) -> usize {
        self.0.iter().map(|shape| shape.iter().product::<usize>()).sum()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// The full numeric state of a trainable model as an ordered sequence of tensors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    tensors: Vec<Tensor>,
}

impl ParameterSet {
    /// Creates a new `ParameterSet`.
    ///
    /// # Arguments
    /// * `tensors` - The model tensors, in the model's canonical order.
    ///
    /// # Returns
    /// A new `ParameterSet` instance.
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self { tensors }
    }

    /// Builds a parameter set filled with `value` matching `signature`.
    pub fn filled(signature: &Signature, value: f32) -> Self {
        signature
            .shapes()
            .iter()
            .map(|shape| Tensor::from_elem(shape.as_slice(), value))
            .collect()
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn into_tensors(self) -> Vec<Tensor> {
        self.tensors
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Computes the shape signature of this set.
    pub fn signature(&self) -> Signature {
        Signature::new(self.tensors.iter().map(|t| t.shape().to_vec()).collect())
    }

    /// Whether this set has exactly the shapes described by `signature`.
    ///
    /// Avoids allocating a full `Signature` for the comparison.
    pub fn matches(&self, signature: &Signature) -> bool {
        self.tensors.len() == signature.len()
            && self
                .tensors
                .iter()
                .zip(signature.shapes())
                .all(|(t, shape)| t.shape() == shape.as_slice())
    }

    /// Returns the total amount of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.tensors.iter().map(Tensor::len).sum()
    }

    /// Returns the largest absolute element-wise difference against `other`.
    ///
    /// # Returns
    /// `None` if both sets don't share the same signature.
    pub fn max_abs_diff(&self, other: &ParameterSet) -> Option<f32> {
        if !self.matches(&other.signature()) {
            return None;
        }

        let diff = self
            .tensors
            .iter()
            .zip(&other.tensors)
            .flat_map(|(a, b)| a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()))
            .fold(0.0, f32::max);

        Some(diff)
    }
}

impl From<Vec<Tensor>> for ParameterSet {
    fn from(tensors: Vec<Tensor>) -> Self {
        Self::new(tensors)
    }
}

impl FromIterator<Tensor> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = Tensor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn tensor(shape: &[usize], values: Vec<f32>) -> Tensor {
        ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
    }

    #[test]
    fn test_signature_follows_tensor_order() {
        let params = ParameterSet::new(vec![
            tensor(&[2, 3], vec![0.0; 6]),
            tensor(&[3], vec![0.0; 3]),
        ]);

        let signature = params.signature();
        assert_eq!(signature.shapes(), &[vec![2, 3], vec![3]]);
        assert_eq!(signature.num_params(), 9);
        assert!(params.matches(&signature));
        assert!(!params.matches(&Signature::new(vec![vec![3], vec![2, 3]])));
    }

    #[test]
    fn test_filled_matches_signature() {
        let signature = Signature::new(vec![vec![4], vec![1, 2]]);
        let params = ParameterSet::filled(&signature, 0.5);

        assert_eq!(params.signature(), signature);
        assert!(params.tensors().iter().flatten().all(|&v| v == 0.5));
    }

    #[test]
    fn test_max_abs_diff() {
        let a = ParameterSet::new(vec![tensor(&[2], vec![1.0, 2.0])]);
        let b = ParameterSet::new(vec![tensor(&[2], vec![1.5, 1.0])]);
        let c = ParameterSet::new(vec![tensor(&[1, 2], vec![1.5, 1.0])]);

        assert_eq!(a.max_abs_diff(&b), Some(1.0));
        assert_eq!(a.max_abs_diff(&c), None);
    }
}
