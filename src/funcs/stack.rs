use super::Function;
use crate::tensor::{Tensor, TensorError};

/// Stacks `n` same-shaped tensors into a new leading axis: `n x S -> [n, S..]`.
#[derive(Debug, Clone, Default)]
pub struct Stack;

impl Stack {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

fn common_shape(inps: &[&Tensor<f32>]) -> Result<Vec<usize>, TensorError> {
    let Some(first) = inps.first() else {
        return Err(TensorError::UnexpectedInputCount {
            expected: 1,
            got: 0,
            func_name: "Stack".to_string(),
        });
    };
    for t in inps {
        if t.shape() != first.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: first.shape().to_vec(),
                got: t.shape().to_vec(),
            });
        }
    }
    Ok(first.shape().to_vec())
}

impl Function for Stack {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        let inner = common_shape(inps)?;
        let mut shape = vec![inps.len()];
        shape.extend_from_slice(&inner);
        let mut out = Vec::with_capacity(shape.iter().product());
        for t in inps {
            out.extend_from_slice(t.blob());
        }
        Tensor::raw(&shape, out)
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        let inner = common_shape(inps)?;
        let block: usize = inner.iter().product();
        if block == 0 {
            return Ok(inps.iter().map(|_| Tensor::zeros(&inner)).collect());
        }
        out_grad
            .blob()
            .chunks(block)
            .map(|chunk| Tensor::raw(&inner, chunk.to_vec()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::gradcheck;

    #[test]
    fn adds_leading_axis() {
        let a = Tensor::<f32>::constant(&[2, 3], 1.0);
        let b = Tensor::<f32>::constant(&[2, 3], 2.0);
        let out = Stack::new().run(&[&a, &b, &a], false).unwrap();
        assert_eq!(out.shape(), &[3, 2, 3]);
        assert_eq!(out.blob()[6], 2.0);
    }

    #[test]
    fn gradients_match_numeric() {
        gradcheck::check(Stack::new(), vec![gradcheck::random(&[2, 2], 1), gradcheck::random(&[2, 2], 2)]);
    }
}
