use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Logistic sigmoid, `1 / (1 + e^-x)`.
#[derive(Debug, Clone, Default)]
pub struct Sigmoid;

impl Sigmoid {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for Sigmoid {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Sigmoid")?;
        Ok(inps[0].map_values(|&x| 1.0 / (1.0 + (-x).exp())))
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Sigmoid::grad")?;
        let local = out.map_values(|&y| y * (1.0 - y));
        Ok(vec![(&local * out_grad)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::gradcheck;

    #[test]
    fn gradients_match_numeric() {
        gradcheck::check(Sigmoid::new(), vec![gradcheck::random(&[4, 3], 11)]);
    }
}
