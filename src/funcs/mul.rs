use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Element-wise (Hadamard) product of two same-shaped tensors.
#[derive(Debug, Clone, Default)]
pub struct Mul;

impl Mul {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Mul {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "Mul")?;
        inps[0] * inps[1]
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "Mul::grad")?;
        Ok(vec![(out_grad * inps[1])?, (out_grad * inps[0])?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::gradcheck;

    #[test]
    fn gradients_match_numeric() {
        gradcheck::check(Mul::new(), vec![gradcheck::random(&[3, 3], 5), gradcheck::random(&[3, 3], 6)]);
    }
}
