use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Element-wise subtraction of two same-shaped tensors.
#[derive(Debug, Clone, Default)]
pub struct Sub;

impl Sub {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Sub {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "Sub")?;
        inps[0] - inps[1]
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "Sub::grad")?;
        Ok(vec![out_grad.clone(), out_grad.map_values(|g| -g)])
    }
}
