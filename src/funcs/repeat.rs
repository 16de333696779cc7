use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Tiles the whole input `times` times along the row axis: `[b, h] -> [times * b, h]`.
#[derive(Debug, Clone)]
pub struct Repeat {
    times: usize,
}

impl Repeat {
    /// Boxed node.
    pub fn new(times: usize) -> Box<dyn Function> {
        Box::new(Self { times })
    }
}

impl Function for Repeat {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Repeat")?;
        let (rows, cols) = inps[0].dims2()?;
        let mut out = Vec::with_capacity(self.times * rows * cols);
        for _ in 0..self.times {
            out.extend_from_slice(inps[0].blob());
        }
        Tensor::raw(&[self.times * rows, cols], out)
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Repeat::grad")?;
        let mut grad = Tensor::<f32>::zeros(inps[0].shape());
        let block = grad.size();
        if block > 0 {
            for chunk in out_grad.blob().chunks(block) {
                for (g, o) in grad.blob_mut().iter_mut().zip(chunk) {
                    *g += o;
                }
            }
        }
        Ok(vec![grad])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::gradcheck;

    #[test]
    fn gradients_match_numeric() {
        gradcheck::check(Repeat::new(3), vec![gradcheck::random(&[2, 3], 4)]);
    }
}
