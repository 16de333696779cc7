use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Reinterprets the input under a new shape with the same element count.
#[derive(Debug, Clone)]
pub struct Reshape {
    shape: Vec<usize>,
}

impl Reshape {
    /// Boxed reshape to `shape`.
    pub fn new(shape: &[usize]) -> Box<dyn Function> {
        Box::new(Self {
            shape: shape.to_vec(),
        })
    }
}

impl Function for Reshape {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Reshape")?;
        inps[0].clone().reshape(&self.shape)
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Reshape::grad")?;
        Ok(vec![out_grad.clone().reshape(inps[0].shape())?])
    }
}
