//! Define-by-run computation graph.
//!
//! A [`Graph`] is a tape: every [`Graph::call`] runs its [`Function`] right
//! away and records the node. [`Graph::backward`] then walks the tape in
//! reverse and accumulates gradients into every node that requires them.
//! A fresh graph is built for each forward pass, so gradients never leak
//! from one training step into the next.

use crate::funcs::{Dropout, Function};
use crate::tensor::{Tensor, TensorError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Handle of a node on the tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(usize);

/// Graph bookkeeping failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Id from another graph.
    #[error("tensor {0:?} is not on this graph")]
    NotFound(TensorId),
    /// Loss passed to [`Graph::backward`] is not a single element.
    #[error("backward needs a single-element loss, got shape {0:?}")]
    NonScalarLoss(Vec<usize>),
    /// A function failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
}

#[derive(Debug)]
struct Node {
    value: Tensor<f32>,
    grad: Option<Tensor<f32>>,
    requires_grad: bool,
    inputs: Vec<TensorId>,
    func: Option<Box<dyn Function>>,
}

/// Tape of nodes in creation order.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    training: bool,
    rng: Option<StdRng>,
}

impl Graph {
    /// Inference graph: dropout is the identity.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            training: false,
            rng: None,
        }
    }

    /// Training graph whose dropout masks are drawn from a generator seeded with `seed`.
    pub fn training(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            training: true,
            rng: Some(StdRng::seed_from_u64(seed)),
        }
    }

    /// Whether dropout is active.
    pub fn is_training(&self) -> bool {
        self.training
    }

    fn push(&mut self, node: Node) -> TensorId {
        self.nodes.push(node);
        TensorId(self.nodes.len() - 1)
    }

    /// Allocates a constant leaf.
    pub fn alloc(&mut self, value: Tensor<f32>) -> TensorId {
        self.push(Node {
            value,
            grad: None,
            requires_grad: false,
            inputs: Vec::new(),
            func: None,
        })
    }

    /// Allocates a leaf whose gradient is collected by [`Graph::backward`].
    pub fn alloc_param(&mut self, value: Tensor<f32>) -> TensorId {
        self.push(Node {
            value,
            grad: None,
            requires_grad: true,
            inputs: Vec::new(),
            func: None,
        })
    }

    fn node(&self, id: TensorId) -> Result<&Node, GraphError> {
        self.nodes.get(id.0).ok_or(GraphError::NotFound(id))
    }

    /// Runs `func` on `inps` and records the result.
    pub fn call(
        &mut self,
        mut func: Box<dyn Function>,
        inps: &[TensorId],
    ) -> Result<TensorId, GraphError> {
        let mut values = Vec::with_capacity(inps.len());
        let mut requires_grad = false;
        for &id in inps {
            let node = self.node(id)?;
            requires_grad |= node.requires_grad;
            values.push(&node.value);
        }
        let value = func.run(&values, self.training)?;
        Ok(self.push(Node {
            value,
            grad: None,
            requires_grad,
            inputs: inps.to_vec(),
            func: Some(func),
        }))
    }

    /// Dropout with a mask seeded from this graph's generator. Identity on
    /// inference graphs or when `rate` is zero.
    pub fn dropout(&mut self, input: TensorId, rate: f32) -> Result<TensorId, GraphError> {
        if !self.training || rate <= 0.0 {
            return Ok(input);
        }
        let Some(rng) = self.rng.as_mut() else {
            return Ok(input);
        };
        let seed: u64 = rng.gen();
        self.call(Dropout::new(rate, seed), &[input])
    }

    /// Forward value of `id`.
    pub fn get(&self, id: TensorId) -> Result<&Tensor<f32>, GraphError> {
        Ok(&self.node(id)?.value)
    }

    /// Gradient of the last backward pass, if `id` took part in it.
    pub fn grad(&self, id: TensorId) -> Result<Option<&Tensor<f32>>, GraphError> {
        Ok(self.node(id)?.grad.as_ref())
    }

    /// Reverse-mode differentiation from `loss`. Returns the loss value.
    pub fn backward(&mut self, loss: TensorId) -> Result<f32, GraphError> {
        let loss_value = {
            let node = self.node(loss)?;
            if node.value.size() != 1 {
                return Err(GraphError::NonScalarLoss(node.value.shape().to_vec()));
            }
            node.value.blob()[0]
        };
        for node in &mut self.nodes {
            node.grad = None;
        }
        self.nodes[loss.0].grad = Some(Tensor::constant(self.nodes[loss.0].value.shape(), 1.0));

        for idx in (0..=loss.0).rev() {
            let node = &self.nodes[idx];
            let (Some(func), Some(out_grad)) = (&node.func, &node.grad) else {
                continue;
            };
            if !node.requires_grad {
                continue;
            }
            let inps: Vec<&Tensor<f32>> = node
                .inputs
                .iter()
                .map(|i| &self.nodes[i.0].value)
                .collect();
            let grads = func.grad(&inps, &node.value, out_grad)?;
            let inputs = node.inputs.clone();

            for (id, grad) in inputs.into_iter().zip(grads) {
                let target = &mut self.nodes[id.0];
                if !target.requires_grad {
                    continue;
                }
                match target.grad.as_mut() {
                    Some(existing) => existing.add_assign(&grad)?,
                    None => target.grad = Some(grad),
                }
            }
        }
        Ok(loss_value)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::{Add, MatMul, Mul};

    #[test]
    fn backward_accumulates_shared_inputs() {
        // y = x * x + x, dy/dx = 2x + 1
        let mut g = Graph::new();
        let x = g.alloc_param(Tensor::raw(&[1], vec![3.0]).unwrap());
        let sq = g.call(Mul::new(), &[x, x]).unwrap();
        let y = g.call(Add::new(), &[sq, x]).unwrap();
        let value = g.backward(y).unwrap();
        assert_eq!(value, 12.0);
        assert_eq!(g.grad(x).unwrap().unwrap().blob(), &[7.0]);
    }

    #[test]
    fn constants_receive_no_gradient() {
        let mut g = Graph::new();
        let w = g.alloc_param(Tensor::raw(&[1, 1], vec![2.0]).unwrap());
        let c = g.alloc(Tensor::raw(&[1, 1], vec![5.0]).unwrap());
        let y = g.call(MatMul::new(), &[c, w]).unwrap();
        g.backward(y).unwrap();
        assert_eq!(g.grad(w).unwrap().unwrap().blob(), &[5.0]);
        assert!(g.grad(c).unwrap().is_none());
    }

    #[test]
    fn non_scalar_loss_is_rejected() {
        let mut g = Graph::new();
        let x = g.alloc_param(Tensor::<f32>::zeros(&[2]));
        assert!(matches!(g.backward(x), Err(GraphError::NonScalarLoss(_))));
    }

    #[test]
    fn inference_graph_skips_dropout() {
        let mut g = Graph::new();
        let x = g.alloc(Tensor::<f32>::constant(&[4], 1.0));
        assert_eq!(g.dropout(x, 0.5).unwrap(), x);
    }
}
