use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

fn check_rows(t: &Tensor<f32>, keep: &[bool]) -> Result<usize, TensorError> {
    let (rows, cols) = t.dims2()?;
    if rows != keep.len() {
        return Err(TensorError::ShapeMismatch {
            expected: vec![keep.len(), cols],
            got: t.shape().to_vec(),
        });
    }
    Ok(cols)
}

/// Row-wise choice between two `[batch, hidden]` tensors: row `b` comes from the
/// first input when `keep[b]`, otherwise from the second. Lets finished
/// sequences carry their last hidden state through padded time steps.
#[derive(Debug, Clone)]
pub struct SelectRows {
    keep: Vec<bool>,
}

impl SelectRows {
    /// Boxed node; `keep` has one entry per row.
    pub fn new(keep: &[bool]) -> Box<dyn Function> {
        Box::new(Self {
            keep: keep.to_vec(),
        })
    }
}

impl Function for SelectRows {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "SelectRows")?;
        let cols = check_rows(inps[0], &self.keep)?;
        check_rows(inps[1], &self.keep)?;
        let mut out = Vec::with_capacity(self.keep.len() * cols);
        for (r, &k) in self.keep.iter().enumerate() {
            let src = if k { inps[0] } else { inps[1] };
            out.extend_from_slice(src.row(r)?);
        }
        Tensor::raw(&[self.keep.len(), cols], out)
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "SelectRows::grad")?;
        let cols = check_rows(inps[0], &self.keep)?;
        let mut first = Tensor::<f32>::zeros(inps[0].shape());
        let mut second = Tensor::<f32>::zeros(inps[1].shape());
        for (r, &k) in self.keep.iter().enumerate() {
            let target = if k { &mut first } else { &mut second };
            target.blob_mut()[r * cols..(r + 1) * cols].copy_from_slice(out_grad.row(r)?);
        }
        Ok(vec![first, second])
    }
}

/// Zeroes every row `b` of a `[batch, hidden]` tensor where `keep[b]` is false.
#[derive(Debug, Clone)]
pub struct MaskRows {
    keep: Vec<bool>,
}

impl MaskRows {
    /// Boxed node; `keep` has one entry per row.
    pub fn new(keep: &[bool]) -> Box<dyn Function> {
        Box::new(Self {
            keep: keep.to_vec(),
        })
    }

    fn apply(&self, t: &Tensor<f32>) -> Result<Tensor<f32>, TensorError> {
        let cols = check_rows(t, &self.keep)?;
        let mut out = t.clone();
        for (r, &k) in self.keep.iter().enumerate() {
            if !k {
                out.blob_mut()[r * cols..(r + 1) * cols].fill(0.0);
            }
        }
        Ok(out)
    }
}

impl Function for MaskRows {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "MaskRows")?;
        self.apply(inps[0])
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "MaskRows::grad")?;
        Ok(vec![self.apply(out_grad)?])
    }
}
