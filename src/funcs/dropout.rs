use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Inverted dropout. Each element is zeroed with probability `rate` and the
/// survivors are scaled by `1 / (1 - rate)`. The keep-mask is derived from
/// `seed`, so re-running the node reproduces it. Identity outside training.
#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f32,
    seed: u64,
    mask: Option<Vec<f32>>,
}

impl Dropout {
    /// Boxed dropout with drop probability `rate`.
    pub fn new(rate: f32, seed: u64) -> Box<dyn Function> {
        Box::new(Self {
            rate,
            seed,
            mask: None,
        })
    }
}

impl Function for Dropout {
    fn run(&mut self, inps: &[&Tensor<f32>], training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Dropout")?;
        if !training || self.rate <= 0.0 {
            self.mask = None;
            return Ok(inps[0].clone());
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let scale = 1.0 / (1.0 - self.rate);
        let mask: Vec<f32> = (0..inps[0].size())
            .map(|_| if rng.gen::<f32>() < self.rate { 0.0 } else { scale })
            .collect();
        let mut out = inps[0].clone();
        for (o, m) in out.blob_mut().iter_mut().zip(&mask) {
            *o *= m;
        }
        self.mask = Some(mask);
        Ok(out)
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Dropout::grad")?;
        let mut grad = out_grad.clone();
        if let Some(mask) = &self.mask {
            for (g, m) in grad.blob_mut().iter_mut().zip(mask) {
                *g *= m;
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
    fn identity_when_not_training() {
        let x = gradcheck::random(&[3, 3], 1);
        let out = Dropout::new(0.5, 3).run(&[&x], false).unwrap();
        assert_eq!(out, x);
    }

    #[test]
    fn same_seed_same_mask() {
        let x = Tensor::<f32>::constant(&[8, 8], 1.0);
        let a = Dropout::new(0.5, 42).run(&[&x], true).unwrap();
        let b = Dropout::new(0.5, 42).run(&[&x], true).unwrap();
        assert_eq!(a, b);
        assert!(a.blob().iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn gradients_match_numeric() {
        gradcheck::check(Dropout::new(0.3, 5), vec![gradcheck::random(&[4, 4], 15)]);
    }
}
