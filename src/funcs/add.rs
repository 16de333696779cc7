use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

/// Element-wise addition: `Output = Input1 + Input2`.
///
/// The second input may have fewer dimensions than the first as long as its
/// shape matches the trailing dimensions of the first (a bias added to every
/// row, for example). It is then broadcast over the leading dimensions.
#[derive(Debug, Clone, Default)]
pub struct Add;

impl Add {
    /// Boxed node for [`Graph::call`](crate::graph::Graph::call).
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

fn broadcast_block(lhs: &Tensor<f32>, rhs: &Tensor<f32>) -> Result<usize, TensorError> {
    let (l, r) = (lhs.shape(), rhs.shape());
    if r.len() > l.len() || l[l.len() - r.len()..] != *r {
        return Err(TensorError::ShapeMismatch {
            expected: l.to_vec(),
            got: r.to_vec(),
        });
    }
    Ok(rhs.size())
}

impl Function for Add {
    /// # Errors
    /// Fails when the inputs are not exactly two or the second shape is not a
    /// suffix of the first.
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "Add")?;
        let (lhs, rhs) = (inps[0], inps[1]);
        if lhs.shape() == rhs.shape() {
            return lhs + rhs;
        }
        let block = broadcast_block(lhs, rhs)?;
        let mut out = lhs.clone();
        if block > 0 {
            for chunk in out.blob_mut().chunks_mut(block) {
                for (o, b) in chunk.iter_mut().zip(rhs.blob()) {
                    *o += b;
                }
            }
        }
        Ok(out)
    }

    /// Both inputs receive the output gradient; a broadcast input receives
    /// it summed over the broadcast dimensions.
    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "Add::grad")?;
        let rhs = inps[1];
        if inps[0].shape() == rhs.shape() {
            return Ok(vec![out_grad.clone(), out_grad.clone()]);
        }
        let block = broadcast_block(inps[0], rhs)?;
        let mut rhs_grad = Tensor::<f32>::zeros(rhs.shape());
        if block > 0 {
            for chunk in out_grad.blob().chunks(block) {
                for (g, o) in rhs_grad.blob_mut().iter_mut().zip(chunk) {
                    *g += o;
                }
            }
        }
        Ok(vec![out_grad.clone(), rhs_grad])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::gradcheck;

    #[test]
    fn broadcasts_bias_over_rows() {
        let x = Tensor::raw(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Tensor::raw(&[2], vec![10.0, 20.0]).unwrap();
        let out = Add::new().run(&[&x, &b], false).unwrap();
        assert_eq!(out.blob(), &[11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn rejects_non_suffix_shape() {
        let x = Tensor::<f32>::zeros(&[2, 3]);
        let b = Tensor::<f32>::zeros(&[2]);
        assert!(Add::new().run(&[&x, &b], false).is_err());
    }

    #[test]
    fn gradients_match_numeric() {
        gradcheck::check(Add::new(), vec![gradcheck::random(&[3, 4], 1), gradcheck::random(&[3, 4], 2)]);
        gradcheck::check(Add::new(), vec![gradcheck::random(&[3, 4], 3), gradcheck::random(&[4], 4)]);
    }
}
