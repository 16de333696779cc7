use crate::tensor::{Tensor, TensorError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Represents the persistent state of an optimizer across training steps.
///
/// Includes the current step count and any optimizer-specific tensors
/// (first and second moments for Adam), keyed by parameter name plus a suffix.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OptimizerState {
    /// The number of optimization steps taken so far.
    pub step: usize,
    /// Optimizer-specific state tensors.
    pub state: HashMap<String, Tensor<f32>>,
}

/// One trainable tensor handed to [`Optimizer::step`]: name, value, gradient.
pub type ParamUpdate<'a> = (&'a str, &'a mut Tensor<f32>, &'a Tensor<f32>);

/// Trait for optimization algorithms used to update model parameters.
///
/// Optimizers are stateful (momentum etc.); the state lives outside the
/// optimizer in an [`OptimizerState`] so it can be checkpointed.
pub trait Optimizer: Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + fmt::Debug {
    /// Performs a single optimization step over `params`.
    ///
    /// # Errors
    /// `TensorError` when a gradient or a stored moment does not match its
    /// parameter's shape.
    fn step(
        &self,
        params: Vec<ParamUpdate<'_>>,
        optimizer_state: &mut OptimizerState,
        learning_rate: f32,
    ) -> Result<(), TensorError>;
}

const DEFAULT_EPSILON: f32 = 1e-8;

/// Adam optimizer with optional L2 weight decay folded into the gradient.
/// Update rule follows `torch.optim.Adam`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    /// Decay rate of the first moment.
    pub beta1: f32,
    /// Decay rate of the second moment.
    pub beta2: f32,
    /// L2 penalty added to the gradient.
    pub weight_decay: f32,
    /// Added to the denominator.
    pub epsilon: f32,
}

impl Adam {
    /// Adam with explicit hyperparameters.
    pub fn new(beta1: f32, beta2: f32, weight_decay: f32, epsilon: f32) -> Self {
        Self {
            beta1,
            beta2,
            weight_decay,
            epsilon,
        }
    }
}

impl Default for Adam {
    /// beta1 0.9, beta2 0.999, no weight decay, epsilon 1e-8.
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            weight_decay: 0.0,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

fn moment_keys(name: &str) -> (String, String) {
    (format!("{name}.exp_avg"), format!("{name}.exp_avg_sq"))
}

impl Optimizer for Adam {
    fn step(
        &self,
        params: Vec<ParamUpdate<'_>>,
        optimizer_state: &mut OptimizerState,
        learning_rate: f32,
    ) -> Result<(), TensorError> {
        let current_step = optimizer_state.step + 1;
        let bias_correction1 = 1.0 - self.beta1.powi(current_step as i32);
        let bias_correction2_sqrt = (1.0 - self.beta2.powi(current_step as i32)).sqrt();
        let step_size = learning_rate / bias_correction1;

        // Moments are moved out of the map so every parameter can be updated in
        // parallel without sharing the map.
        let work: Vec<_> = params
            .into_iter()
            .map(|(name, param, grad)| {
                let (m_key, v_key) = moment_keys(name);
                let m = optimizer_state
                    .state
                    .remove(&m_key)
                    .unwrap_or_else(|| Tensor::zeros(param.shape()));
                let v = optimizer_state
                    .state
                    .remove(&v_key)
                    .unwrap_or_else(|| Tensor::zeros(param.shape()));
                (name, param, grad, m, v)
            })
            .collect();

        let updated: Vec<(String, Tensor<f32>, Tensor<f32>)> = work
            .into_par_iter()
            .map(|(name, param, grad, mut m, mut v)| {
                for other in [grad.shape(), m.shape(), v.shape()] {
                    if other != param.shape() {
                        return Err(TensorError::ShapeMismatch {
                            expected: param.shape().to_vec(),
                            got: other.to_vec(),
                        });
                    }
                }
                for (((p, &g), m), v) in param
                    .blob_mut()
                    .iter_mut()
                    .zip(grad.blob())
                    .zip(m.blob_mut())
                    .zip(v.blob_mut())
                {
                    let g = g + self.weight_decay * *p;
                    *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                    *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                    let denom = v.sqrt() / bias_correction2_sqrt + self.epsilon;
                    *p -= step_size * *m / denom;
                }
                Ok((name.to_string(), m, v))
            })
            .collect::<Result<Vec<_>, TensorError>>()?;

        for (name, m, v) in updated {
            let (m_key, v_key) = moment_keys(&name);
            optimizer_state.state.insert(m_key, m);
            optimizer_state.state.insert(v_key, v);
        }
        optimizer_state.step = current_step;
        Ok(())
    }
}

/// Rescales the gradients named by `names` so their joint L2 norm is at most
/// `max_norm`, in place. Names without a gradient are skipped. Returns the
/// norm measured before clipping.
pub fn clip_grad_norm<'a, I>(grads: &mut HashMap<String, Tensor<f32>>, names: I, max_norm: f32) -> f32
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    let total_norm = names
        .iter()
        .filter_map(|n| grads.get(*n))
        .map(|g| g.sum_squares())
        .sum::<f32>()
        .sqrt();
    let clip_coef = max_norm / (total_norm + 1e-6);
    if clip_coef < 1.0 {
        for name in names {
            if let Some(g) = grads.get_mut(name) {
                g.scale(clip_coef);
            }
        }
    }
    total_norm
}
