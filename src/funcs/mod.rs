//! Differentiable operations recorded on the [`Graph`](crate::graph::Graph) tape.
//!
//! Every operation is a small struct implementing [`Function`]. Integer inputs
//! such as token ids or sequence masks are captured by the struct itself, so
//! all tensor inputs are `f32`.

use crate::tensor::{Tensor, TensorError};

mod add;
mod attention;
mod cat;
mod dropout;
mod embedding;
mod mask;
mod matmul;
mod mul;
mod nll;
mod repeat;
mod reshape;
mod sigmoid;
mod slice;
mod softmax;
mod stack;
mod sub;
mod tanh;
mod transpose;

pub use add::Add;
pub use attention::{AttentionContext, DotScore};
pub use cat::Cat;
pub use dropout::Dropout;
pub use embedding::Embedding;
pub use mask::{MaskRows, SelectRows};
pub use matmul::MatMul;
pub use mul::Mul;
pub use nll::MaskedNll;
pub use repeat::Repeat;
pub use reshape::Reshape;
pub use sigmoid::Sigmoid;
pub use slice::SliceColumns;
pub use softmax::Softmax;
pub use stack::Stack;
pub use sub::Sub;
pub use tanh::Tanh;
pub use transpose::Transpose;

/// A node operation: forward computation plus its vector-Jacobian product.
pub trait Function: std::fmt::Debug {
    /// Computes the output from `inps`.
    fn run(&mut self, inps: &[&Tensor<f32>], training: bool) -> Result<Tensor<f32>, TensorError>;

    /// Returns one gradient per input, given the inputs, the forward output and
    /// the gradient flowing into that output.
    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError>;
}

pub(crate) fn expect_inputs(
    inps: &[&Tensor<f32>],
    expected: usize,
    func_name: &str,
) -> Result<(), TensorError> {
    if inps.len() != expected {
        return Err(TensorError::UnexpectedInputCount {
            expected,
            got: inps.len(),
            func_name: func_name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod gradcheck {
    use super::Function;
    use crate::tensor::Tensor;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPS: f32 = 1e-3;
    const TOLERANCE: f32 = 1e-2;

    fn weighted_sum(out: &Tensor<f32>, weights: &Tensor<f32>) -> f32 {
        out.blob().iter().zip(weights.blob()).map(|(a, b)| a * b).sum()
    }

    /// Compares analytic gradients of `func` against central differences of
    /// `sum(out * w)` for a fixed random `w`.
    pub fn check(mut func: Box<dyn Function>, inputs: Vec<Tensor<f32>>) {
        let mut rng = StdRng::seed_from_u64(7);
        let refs: Vec<&Tensor<f32>> = inputs.iter().collect();
        let out = func.run(&refs, true).unwrap();
        let weights = out.map_values(|_| rng.gen_range(-1.0f32..1.0));
        let grads = func.grad(&refs, &out, &weights).unwrap();
        assert_eq!(grads.len(), inputs.len());

        for (which, analytic) in grads.iter().enumerate() {
            assert_eq!(analytic.shape(), inputs[which].shape());
            for i in 0..inputs[which].size() {
                let mut plus = inputs.clone();
                plus[which].blob_mut()[i] += EPS;
                let mut minus = inputs.clone();
                minus[which].blob_mut()[i] -= EPS;

                let p: Vec<&Tensor<f32>> = plus.iter().collect();
                let m: Vec<&Tensor<f32>> = minus.iter().collect();
                let f_plus = weighted_sum(&func.run(&p, true).unwrap(), &weights);
                let f_minus = weighted_sum(&func.run(&m, true).unwrap(), &weights);
                let numeric = (f_plus - f_minus) / (2.0 * EPS);
                let got = analytic.blob()[i];
                assert!(
                    (numeric - got).abs() <= TOLERANCE * (1.0 + numeric.abs()),
                    "input {which} element {i}: numeric {numeric} vs analytic {got}"
                );
            }
        }
    }

    pub fn random(shape: &[usize], seed: u64) -> Tensor<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Tensor::uniform(&mut rng, shape, 1.0)
    }
}
