use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Matrix product `[m, k] x [k, n] -> [m, n]`.
#[derive(Debug, Clone, Default)]
pub struct MatMul;

impl MatMul {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for MatMul {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "MatMul")?;
        inps[0].matmul(inps[1])
    }

    /// `dA = G·Bᵀ`, `dB = Aᵀ·G`
    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "MatMul::grad")?;
        let lhs_grad = out_grad.matmul(&inps[1].transpose()?)?;
        let rhs_grad = inps[0].transpose()?.matmul(out_grad)?;
        Ok(vec![lhs_grad, rhs_grad])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::gradcheck;

    #[test]
    fn gradients_match_numeric() {
        gradcheck::check(MatMul::new(), vec![gradcheck::random(&[3, 4], 1), gradcheck::random(&[4, 2], 2)]);
    }
}
