use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Masked negative log-likelihood over probabilities `[batch, vocab]`.
///
/// Output is a single-element tensor: the mean of `-ln p[b, target[b]]` over
/// rows with `mask[b]` set, or `0` when no row is set.
#[derive(Debug, Clone)]
pub struct MaskedNll {
    target: Vec<usize>,
    mask: Vec<bool>,
}

impl MaskedNll {
    /// Boxed loss over `target` and `mask`, one entry per row.
    pub fn new(target: &[usize], mask: &[bool]) -> Box<dyn Function> {
        Box::new(Self {
            target: target.to_vec(),
            mask: mask.to_vec(),
        })
    }

    /// Number of rows that contribute to the loss.
    pub fn count(mask: &[bool]) -> usize {
        mask.iter().filter(|&&m| m).count()
    }

    fn check(&self, probs: &Tensor<f32>) -> Result<usize, TensorError> {
        let (batch, vocab) = probs.dims2()?;
        if self.target.len() != batch || self.mask.len() != batch {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.target.len(), vocab],
                got: probs.shape().to_vec(),
            });
        }
        // Every row is gathered, masked or not.
        if let Some(&bad) = self.target.iter().find(|&&t| t >= vocab) {
            return Err(TensorError::IndexOutOfBounds {
                index: bad,
                bound: vocab,
            });
        }
        Ok(vocab)
    }
}

impl Function for MaskedNll {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "MaskedNll")?;
        let probs = inps[0];
        let vocab = self.check(probs)?;
        let count = Self::count(&self.mask);
        let mut total = 0.0f32;
        for (b, (&t, &m)) in self.target.iter().zip(&self.mask).enumerate() {
            if m {
                total -= probs.blob()[b * vocab + t].ln();
            }
        }
        let loss = if count == 0 { 0.0 } else { total / count as f32 };
        Tensor::raw(&[1], vec![loss])
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "MaskedNll::grad")?;
        let probs = inps[0];
        let vocab = self.check(probs)?;
        let mut grad = Tensor::<f32>::zeros(probs.shape());
        let count = Self::count(&self.mask);
        if count == 0 {
            return Ok(vec![grad]);
        }
        let upstream = out_grad.blob().first().copied().unwrap_or(0.0);
        let blob = grad.blob_mut();
        for (b, (&t, &m)) in self.target.iter().zip(&self.mask).enumerate() {
            if m {
                let idx = b * vocab + t;
                blob[idx] = -upstream / (count as f32 * probs.blob()[idx]);
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
    fn averages_over_masked_rows_only() {
        let probs = Tensor::raw(&[3, 2], vec![0.5, 0.5, 0.25, 0.75, 0.9, 0.1]).unwrap();
        let out = MaskedNll::new(&[0, 1, 1], &[true, true, false])
            .run(&[&probs], false)
            .unwrap();
        let expected = (-(0.5f32).ln() - (0.75f32).ln()) / 2.0;
        assert!((out.blob()[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn empty_mask_is_zero() {
        let probs = Tensor::<f32>::constant(&[2, 2], 0.5);
        let out = MaskedNll::new(&[0, 1], &[false, false]).run(&[&probs], false).unwrap();
        assert_eq!(out.blob(), &[0.0]);
    }

    #[test]
    fn target_outside_vocabulary_fails() {
        let probs = Tensor::<f32>::constant(&[1, 3], 0.3);
        let err = MaskedNll::new(&[3], &[true]).run(&[&probs], false).unwrap_err();
        assert!(matches!(err, TensorError::IndexOutOfBounds { index: 3, bound: 3 }));
    }

    #[test]
    fn gradients_match_numeric() {
        let probs = gradcheck::random(&[3, 4], 21).map_values(|v| 0.6 + 0.3 * v);
        gradcheck::check(MaskedNll::new(&[1, 3, 0], &[true, false, true]), vec![probs]);
    }
}
