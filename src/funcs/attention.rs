use super::{expect_inputs, Function};
use crate::tensor::{Tensor, TensorError};

fn check_batch(query: &Tensor<f32>, keys: &Tensor<f32>) -> Result<(usize, usize, usize), TensorError> {
    let (batch, hidden) = query.dims2()?;
    let (steps, kb, kh) = keys.dims3()?;
    if kb != batch || kh != hidden {
        return Err(TensorError::ShapeMismatch {
            expected: vec![steps, batch, hidden],
            got: keys.shape().to_vec(),
        });
    }
    Ok((steps, batch, hidden))
}

/// Luong dot-product energies: query `[B, H]`, keys `[T, B, H]` -> `[B, T]`
/// with `s[b, t] = <query[b], keys[t, b]>`.
#[derive(Debug, Clone, Default)]
pub struct DotScore;

impl DotScore {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

impl Function for DotScore {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "DotScore")?;
        let (query, keys) = (inps[0], inps[1]);
        let (steps, batch, hidden) = check_batch(query, keys)?;
        let (q, k) = (query.blob(), keys.blob());
        let mut out = vec![0.0f32; batch * steps];
        for b in 0..batch {
            let qb = &q[b * hidden..(b + 1) * hidden];
            for t in 0..steps {
                let kt = &k[(t * batch + b) * hidden..(t * batch + b + 1) * hidden];
                out[b * steps + t] = qb.iter().zip(kt).map(|(x, y)| x * y).sum();
            }
        }
        Tensor::raw(&[batch, steps], out)
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "DotScore::grad")?;
        let (query, keys) = (inps[0], inps[1]);
        let (steps, batch, hidden) = check_batch(query, keys)?;
        let (q, k, g) = (query.blob(), keys.blob(), out_grad.blob());
        let mut dq = vec![0.0f32; q.len()];
        let mut dk = vec![0.0f32; k.len()];
        for b in 0..batch {
            for t in 0..steps {
                let gbt = g[b * steps + t];
                let base = (t * batch + b) * hidden;
                for h in 0..hidden {
                    dq[b * hidden + h] += gbt * k[base + h];
                    dk[base + h] += gbt * q[b * hidden + h];
                }
            }
        }
        Ok(vec![
            Tensor::raw(query.shape(), dq)?,
            Tensor::raw(keys.shape(), dk)?,
        ])
    }
}

/// Attention-weighted sum of encoder outputs: weights `[B, T]`, values
/// `[T, B, H]` -> context `[B, H]`.
#[derive(Debug, Clone, Default)]
pub struct AttentionContext;

impl AttentionContext {
    /// Boxed node.
    pub fn new() -> Box<dyn Function> {
        Box::new(Self)
    }
}

fn check_weights(weights: &Tensor<f32>, values: &Tensor<f32>) -> Result<(usize, usize, usize), TensorError> {
    let (batch, steps) = weights.dims2()?;
    let (vt, vb, hidden) = values.dims3()?;
    if vt != steps || vb != batch {
        return Err(TensorError::ShapeMismatch {
            expected: vec![steps, batch, hidden],
            got: values.shape().to_vec(),
        });
    }
    Ok((steps, batch, hidden))
}

impl Function for AttentionContext {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        expect_inputs(inps, 2, "AttentionContext")?;
        let (weights, values) = (inps[0], inps[1]);
        let (steps, batch, hidden) = check_weights(weights, values)?;
        let (w, v) = (weights.blob(), values.blob());
        let mut out = vec![0.0f32; batch * hidden];
        for b in 0..batch {
            for t in 0..steps {
                let wbt = w[b * steps + t];
                let base = (t * batch + b) * hidden;
                for h in 0..hidden {
                    out[b * hidden + h] += wbt * v[base + h];
                }
            }
        }
        Tensor::raw(&[batch, hidden], out)
    }

    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        _out: &Tensor<f32>,
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        expect_inputs(inps, 2, "AttentionContext::grad")?;
        let (weights, values) = (inps[0], inps[1]);
        let (steps, batch, hidden) = check_weights(weights, values)?;
        let (w, v, g) = (weights.blob(), values.blob(), out_grad.blob());
        let mut dw = vec![0.0f32; w.len()];
        let mut dv = vec![0.0f32; v.len()];
        for b in 0..batch {
            let gb = &g[b * hidden..(b + 1) * hidden];
            for t in 0..steps {
                let base = (t * batch + b) * hidden;
                let vt = &v[base..base + hidden];
                dw[b * steps + t] = gb.iter().zip(vt).map(|(x, y)| x * y).sum();
                let wbt = w[b * steps + t];
                for h in 0..hidden {
                    dv[base + h] += wbt * gb[h];
                }
            }
        }
        Ok(vec![
            Tensor::raw(weights.shape(), dw)?,
            Tensor::raw(values.shape(), dv)?,
        ])
    }
}
