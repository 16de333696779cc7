use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Hyperbolic tangent.
#[derive(Debug, Clone, Default)]
pub struct Tanh;

impl Tanh {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Tanh {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Tanh")?;
        Ok(inps[0].map_values(|x| x.tanh()))
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Tanh::grad")?;
        let local = out.map_values(|&y| 1.0 - y * y);
        Ok(vec![(&local * out_grad)?])
    }
}
