use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Softmax over the last axis.
#[derive(Debug, Clone, Default)]
pub struct Softmax;

impl Softmax {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

fn last_dim(t: &Tensor<f32>) -> Result<usize, TensorError> {
    match t.shape().last() {
        Some(&d) if d > 0 => Ok(d),
        _ => Err(TensorError::UnexpectedDims {
            expected: 1,
            got: t.shape().to_vec(),
        }),
    }
}

impl Function for Softmax {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Softmax")?;
        let width = last_dim(inps[0])?;
        let mut out = inps[0].clone();
        for row in out.blob_mut().chunks_mut(width) {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for v in row.iter_mut() {
                *v = (*v - max).exp();
                sum += *v;
            }
            for v in row.iter_mut() {
                *v /= sum;
            }
        }
        Ok(out)
    }

    /// `dx = y * (g - sum(g * y))` per row.
    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Softmax::grad")?;
        let width = last_dim(out)?;
        let mut grad = Tensor::<f32>::zeros(out.shape());
        for ((g_row, y_row), o_row) in grad
            .blob_mut()
            .chunks_mut(width)
            .zip(out.blob().chunks(width))
            .zip(out_grad.blob().chunks(width))
        {
            let dot: f32 = y_row.iter().zip(o_row).map(|(y, g)| y * g).sum();
            for ((d, y), g) in g_row.iter_mut().zip(y_row).zip(o_row) {
                *d = y * (g - dot);
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
    fn rows_sum_to_one() {
        let x = Tensor::raw(&[2, 3], vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
        let y = Softmax::new().run(&[&x], false).unwrap();
        for r in 0..2 {
            let s: f32 = y.row(r).unwrap().iter().sum();
            assert!((s - 1.0).abs() < 1e-6);
        }
        assert!((y.blob()[3] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn gradients_match_numeric() {
        gradcheck::check(Softmax::new(), vec![gradcheck::random(&[3, 5], 13)]);
    }
}
