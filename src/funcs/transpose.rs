use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Swaps the two axes of a 2D tensor.
#[derive(Debug, Clone, Default)]
pub struct Transpose;

impl Transpose {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Transpose {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Transpose")?;
        inps[0].transpose()
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Transpose::grad")?;
        Ok(vec![out_grad.transpose()?])
    }
}
