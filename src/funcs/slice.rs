use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Columns `start..end` of a 2D tensor. Used to split fused GRU gates.
#[derive(Debug, Clone)]
pub struct SliceColumns {
    start: usize,
    end: usize,
}

impl SliceColumns {
    /// Boxed slice of columns `start..end`.
    pub fn new(start: usize, end: usize) -> Box<dyn Function> {
        Box::new(Self { start, end })
    }

    fn check(&self, cols: usize) -> Result<(), TensorError> {
        if self.start > self.end || self.end > cols {
            return Err(TensorError::IndexOutOfBounds {
                index: self.end,
                bound: cols + 1,
            });
        }
        Ok(())
    }
}

impl Function for SliceColumns {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "SliceColumns")?;
        let (rows, cols) = inps[0].dims2()?;
        self.check(cols)?;
        let mut out = Vec::with_capacity(rows * (self.end - self.start));
        for r in 0..rows {
            out.extend_from_slice(&inps[0].row(r)?[self.start..self.end]);
        }
        Tensor::raw(&[rows, self.end - self.start], out)
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "SliceColumns::grad")?;
        let (rows, cols) = inps[0].dims2()?;
        self.check(cols)?;
        let mut grad = Tensor::<f32>::zeros(&[rows, cols]);
        let blob = grad.blob_mut();
        for r in 0..rows {
            blob[r * cols + self.start..r * cols + self.end].copy_from_slice(out_grad.row(r)?);
        }
        Ok(vec![grad])
    }
}
