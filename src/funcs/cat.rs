use super::Function;
use crate::tensor::{Tensor, TensorError};

/// Concatenates 2D tensors with the same number of rows along the column axis.
#[derive(Debug, Clone, Default)]
pub struct Cat;

impl Cat {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

fn column_counts(inps: &[&Tensor<f32>]) -> Result<(usize, Vec<usize>), TensorError> {
    let Some(first) = inps.first() else {
        return Err(TensorError::UnexpectedInputCount {
            expected: 1,
            got: 0,
            func_name: "Cat".to_string(),
        });
    };
    let (rows, _) = first.dims2()?;
    let mut cols = Vec::with_capacity(inps.len());
    for t in inps {
        let (r, c) = t.dims2()?;
        if r != rows {
            return Err(TensorError::ShapeMismatch {
                expected: vec![rows, c],
                got: t.shape().to_vec(),
            });
        }
        cols.push(c);
    }
    Ok((rows, cols))
}

impl Function for Cat {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        let (rows, cols) = column_counts(inps)?;
        let total: usize = cols.iter().sum();
        let mut out = Vec::with_capacity(rows * total);
        for r in 0..rows {
            for t in inps {
                out.extend_from_slice(t.row(r)?);
            }
        }
        Tensor::raw(&[rows, total], out)
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        let (rows, cols) = column_counts(inps)?;
        let mut grads: Vec<Vec<f32>> = cols.iter().map(|c| Vec::with_capacity(rows * c)).collect();
        for r in 0..rows {
            let mut row = out_grad.row(r)?;
            for (g, &c) in grads.iter_mut().zip(&cols) {
                let (head, tail) = row.split_at(c);
                g.extend_from_slice(head);
                row = tail;
            }
        }
        grads
            .into_iter()
            .zip(&cols)
            .map(|(g, &c)| Tensor::raw(&[rows, c], g))
            .collect()
    }
}
