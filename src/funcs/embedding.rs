use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Looks up rows of an embedding table `[vocab, hidden]` for a list of token ids.
/// Output is `[ids.len(), hidden]`.
#[derive(Debug, Clone)]
pub struct Embedding {
    ids: Vec<usize>,
}

impl Embedding {
    /// Boxed lookup of `ids`.
    pub fn new(ids: &[usize]) -> Box<dyn Function> {
        Box::new(Self { ids: ids.to_vec() })
    }
}

impl Function for Embedding {
    /// # Errors
    /// `IndexOutOfBounds` when a token id is not a row of the table.
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 1, "Embedding")?;
        let table = inps[0];
        let (vocab, hidden) = table.dims2()?;
        let mut out = Vec::with_capacity(self.ids.len() * hidden);
        for &id in &self.ids {
            if id >= vocab {
                return Err(TensorError::IndexOutOfBounds {
                    index: id,
                    bound: vocab,
                });
            }
            out.extend_from_slice(table.row(id)?);
        }
        Tensor::raw(&[self.ids.len(), hidden], out)
    }

    /// Scatter-adds the output rows back into the looked-up table rows.
    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 1, "Embedding::grad")?;
        let (vocab, hidden) = inps[0].dims2()?;
        let mut grad = Tensor::<f32>::zeros(&[vocab, hidden]);
        let blob = grad.blob_mut();
        for (r, &id) in self.ids.iter().enumerate() {
            let src = out_grad.row(r)?;
            for (g, s) in blob[id * hidden..(id + 1) * hidden].iter_mut().zip(src) {
                *g += s;
            }
        }
        Ok(vec![grad])
    }
}
