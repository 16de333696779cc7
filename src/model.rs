//! Encoder-decoder model: a shared word embedding, a bidirectional multi-layer
//! GRU encoder and a Luong attention decoder.
//!
//! Parameters live in a [`Seq2Seq`] as named tensors. Every forward pass binds
//! them onto a fresh [`Graph`] with [`Seq2Seq::bind`]; the returned
//! [`BoundModel`] hands out the encoder and decoder views and collects the
//! gradients after [`Graph::backward`].
//!
//! Weight matrices are stored `[in, out]` so a layer is `x · W + b`. GRU
//! weights pack the reset, update and new gates side by side (`[in, 3H]`).

use crate::config::{AttnModel, ModelConfig};
use crate::error::{ChatResult, ChatbotError};
use crate::funcs::{
    Add, AttentionContext, Cat, DotScore, Embedding, MaskRows, MatMul, Mul, Repeat, Reshape,
    SelectRows, Sigmoid, SliceColumns, Softmax, Stack, Sub, Tanh, Transpose,
};
use crate::graph::{Graph, TensorId};
use crate::optimizer::{Optimizer, OptimizerState};
use crate::tensor::Tensor;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};

/// Name of the embedding table shared by encoder and decoder.
pub const EMBEDDING_WEIGHT: &str = "embedding.weight";

/// Parameter name to tensor.
pub type StateDict = BTreeMap<String, Tensor<f32>>;

/// A subset of the model's parameters. The embedding belongs to all three
/// groups, so it is clipped and stepped by both optimizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamGroup {
    /// Only the shared embedding.
    Embedding,
    /// Embedding plus every `encoder.*` parameter.
    Encoder,
    /// Embedding plus every `decoder.*` parameter.
    Decoder,
}

impl ParamGroup {
    /// Whether the parameter called `name` belongs to this group.
    pub fn contains(self, name: &str) -> bool {
        name == EMBEDDING_WEIGHT
            || match self {
                Self::Embedding => false,
                Self::Encoder => name.starts_with("encoder."),
                Self::Decoder => name.starts_with("decoder."),
            }
    }
}

fn insert_gru<R: Rng>(params: &mut StateDict, rng: &mut R, prefix: &str, input: usize, hidden: usize) {
    let bound = 1.0 / (hidden as f32).sqrt();
    let shapes = [
        ("weight_ih", vec![input, 3 * hidden]),
        ("weight_hh", vec![hidden, 3 * hidden]),
        ("bias_ih", vec![3 * hidden]),
        ("bias_hh", vec![3 * hidden]),
    ];
    for (name, shape) in shapes {
        params.insert(format!("{prefix}.{name}"), Tensor::uniform(rng, &shape, bound));
    }
}

fn insert_linear<R: Rng>(params: &mut StateDict, rng: &mut R, prefix: &str, input: usize, output: usize) {
    let bound = 1.0 / (input as f32).sqrt();
    params.insert(format!("{prefix}.weight"), Tensor::uniform(rng, &[input, output], bound));
    params.insert(format!("{prefix}.bias"), Tensor::uniform(rng, &[output], bound));
}

/// Model parameters plus the configuration that shaped them.
#[derive(Debug, Clone, PartialEq)]
pub struct Seq2Seq {
    config: ModelConfig,
    vocab_size: usize,
    params: StateDict,
}

impl Seq2Seq {
    /// Randomly initialized model for a vocabulary of `vocab_size` words.
    ///
    /// The embedding is drawn from N(0, 1), GRU tensors from U(-1/sqrt(H), 1/sqrt(H))
    /// and linear layers from U(-1/sqrt(fan_in), 1/sqrt(fan_in)).
    pub fn new<R: Rng>(rng: &mut R, config: &ModelConfig, vocab_size: usize) -> ChatResult<Self> {
        config.validate()?;
        if vocab_size == 0 {
            return Err(ChatbotError::Config("vocabulary is empty".to_string()));
        }
        let hidden = config.hidden_size;
        let mut params = StateDict::new();
        params.insert(
            EMBEDDING_WEIGHT.to_string(),
            Tensor::normal(rng, &[vocab_size, hidden], 1.0),
        );

        for layer in 0..config.encoder_n_layers {
            let input = if layer == 0 { hidden } else { 2 * hidden };
            for direction in ["fwd", "bwd"] {
                insert_gru(&mut params, rng, &format!("encoder.gru.l{layer}.{direction}"), input, hidden);
            }
        }

        for layer in 0..config.decoder_n_layers {
            insert_gru(&mut params, rng, &format!("decoder.gru.l{layer}"), hidden, hidden);
        }
        match config.attn_model {
            AttnModel::Dot => {}
            AttnModel::General => insert_linear(&mut params, rng, "decoder.attn", hidden, hidden),
            AttnModel::Concat => {
                insert_linear(&mut params, rng, "decoder.attn", 2 * hidden, hidden);
                let bound = 1.0 / (hidden as f32).sqrt();
                params.insert("decoder.attn.v".to_string(), Tensor::uniform(rng, &[hidden, 1], bound));
            }
        }
        insert_linear(&mut params, rng, "decoder.concat", 2 * hidden, hidden);
        insert_linear(&mut params, rng, "decoder.out", hidden, vocab_size);

        Ok(Self {
            config: config.clone(),
            vocab_size,
            params,
        })
    }

    /// Architecture the parameters were built for.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of words the embedding and output layer cover.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Parameter by name.
    pub fn param(&self, name: &str) -> Option<&Tensor<f32>> {
        self.params.get(name)
    }

    /// Names of every parameter in `group`, sorted.
    pub fn param_names(&self, group: ParamGroup) -> Vec<&str> {
        self.params
            .keys()
            .map(String::as_str)
            .filter(|n| group.contains(n))
            .collect()
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.params.values().map(Tensor::size).sum()
    }

    /// Copies of every parameter in `group`.
    pub fn state_dict(&self, group: ParamGroup) -> StateDict {
        self.params
            .iter()
            .filter(|(name, _)| group.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Replaces the parameters of `group` with those in `state`.
    ///
    /// Loading is strict: every parameter of the group must be present with its
    /// exact shape, and `state` must not carry names outside of the group. On
    /// error the model is left untouched.
    pub fn load_state_dict(&mut self, group: ParamGroup, state: &StateDict) -> ChatResult<()> {
        if let Some(extra) = state
            .keys()
            .find(|name| !group.contains(name) || !self.params.contains_key(*name))
        {
            return Err(ChatbotError::UnexpectedParameter(extra.clone()));
        }
        for (name, param) in self.params.iter().filter(|(name, _)| group.contains(name)) {
            let src = state
                .get(name)
                .ok_or_else(|| ChatbotError::MissingParameter(name.clone()))?;
            if src.shape() != param.shape() {
                return Err(ChatbotError::ParameterShape {
                    name: name.clone(),
                    expected: param.shape().to_vec(),
                    got: src.shape().to_vec(),
                });
            }
        }
        for (name, param) in self.params.iter_mut().filter(|(name, _)| group.contains(name)) {
            if let Some(src) = state.get(name) {
                param.clone_from(src);
            }
        }
        Ok(())
    }

    /// One optimizer step over the parameters of `group` that have a gradient.
    pub fn step<O: Optimizer>(
        &mut self,
        optimizer: &O,
        grads: &HashMap<String, Tensor<f32>>,
        group: ParamGroup,
        state: &mut OptimizerState,
        learning_rate: f32,
    ) -> ChatResult<()> {
        let updates = self
            .params
            .iter_mut()
            .filter(|(name, _)| group.contains(name))
            .filter_map(|(name, param)| grads.get(name).map(|grad| (name.as_str(), param, grad)))
            .collect();
        optimizer.step(updates, state, learning_rate)?;
        Ok(())
    }

    /// Puts every parameter on `graph` as a gradient-tracked leaf.
    pub fn bind(&self, graph: &mut Graph) -> BoundModel<'_> {
        let ids = self
            .params
            .iter()
            .map(|(name, value)| (name.clone(), graph.alloc_param(value.clone())))
            .collect();
        BoundModel { model: self, ids }
    }
}

/// A [`Seq2Seq`] whose parameters have been placed on one graph.
#[derive(Debug)]
pub struct BoundModel<'a> {
    model: &'a Seq2Seq,
    ids: HashMap<String, TensorId>,
}

impl<'a> BoundModel<'a> {
    fn param(&self, name: &str) -> ChatResult<TensorId> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| ChatbotError::MissingParameter(name.to_string()))
    }

    /// Architecture of the bound model.
    pub fn config(&self) -> &'a ModelConfig {
        &self.model.config
    }

    /// Encoder reading from the bound parameters.
    pub fn encoder(&self) -> EncoderRnn<'_> {
        EncoderRnn { params: self }
    }

    /// Decoder reading from the bound parameters.
    pub fn decoder(&self) -> LuongAttnDecoderRnn<'_> {
        LuongAttnDecoderRnn { params: self }
    }

    /// Gradients left on `graph` by the last backward pass, by parameter name.
    /// Parameters the loss did not reach are absent.
    pub fn gradients(&self, graph: &Graph) -> ChatResult<HashMap<String, Tensor<f32>>> {
        let mut grads = HashMap::with_capacity(self.ids.len());
        for (name, &id) in &self.ids {
            if let Some(grad) = graph.grad(id)? {
                grads.insert(name.clone(), grad.clone());
            }
        }
        Ok(grads)
    }
}

/// `x · W + b`
fn linear(graph: &mut Graph, params: &BoundModel<'_>, x: TensorId, prefix: &str) -> ChatResult<TensorId> {
    let weight = params.param(&format!("{prefix}.weight"))?;
    let bias = params.param(&format!("{prefix}.bias"))?;
    let xw = graph.call(MatMul::new(), &[x, weight])?;
    Ok(graph.call(Add::new(), &[xw, bias])?)
}

/// One GRU step:
///
/// ```text
/// r  = σ(x Wir + bir + h Whr + bhr)
/// z  = σ(x Wiz + biz + h Whz + bhz)
/// n  = tanh(x Win + bin + r ⊙ (h Whn + bhn))
/// h' = n + z ⊙ (h - n)
/// ```
fn gru_cell(
    graph: &mut Graph,
    params: &BoundModel<'_>,
    x: TensorId,
    h: TensorId,
    prefix: &str,
    hidden: usize,
) -> ChatResult<TensorId> {
    let w_ih = params.param(&format!("{prefix}.weight_ih"))?;
    let w_hh = params.param(&format!("{prefix}.weight_hh"))?;
    let b_ih = params.param(&format!("{prefix}.bias_ih"))?;
    let b_hh = params.param(&format!("{prefix}.bias_hh"))?;

    let gi = graph.call(MatMul::new(), &[x, w_ih])?;
    let gi = graph.call(Add::new(), &[gi, b_ih])?;
    let gh = graph.call(MatMul::new(), &[h, w_hh])?;
    let gh = graph.call(Add::new(), &[gh, b_hh])?;

    let gate = |graph: &mut Graph, idx: usize| -> ChatResult<(TensorId, TensorId)> {
        let (start, end) = (idx * hidden, (idx + 1) * hidden);
        let i = graph.call(SliceColumns::new(start, end), &[gi])?;
        let h = graph.call(SliceColumns::new(start, end), &[gh])?;
        Ok((i, h))
    };
    let (i_r, h_r) = gate(graph, 0)?;
    let (i_z, h_z) = gate(graph, 1)?;
    let (i_n, h_n) = gate(graph, 2)?;

    let r = graph.call(Add::new(), &[i_r, h_r])?;
    let r = graph.call(Sigmoid::new(), &[r])?;
    let z = graph.call(Add::new(), &[i_z, h_z])?;
    let z = graph.call(Sigmoid::new(), &[z])?;
    let rh = graph.call(Mul::new(), &[r, h_n])?;
    let n = graph.call(Add::new(), &[i_n, rh])?;
    let n = graph.call(Tanh::new(), &[n])?;

    let diff = graph.call(Sub::new(), &[h, n])?;
    let zd = graph.call(Mul::new(), &[z, diff])?;
    Ok(graph.call(Add::new(), &[n, zd])?)
}

/// Encoder result for a `[T, B]` batch.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// `[T, B, H]`, forward and backward outputs summed; zero at padded steps.
    pub outputs: TensorId,
    /// Final hidden state of every layer and direction, `[B, H]` each, ordered
    /// `[l0 fwd, l0 bwd, l1 fwd, l1 bwd, ...]`.
    pub hidden: Vec<TensorId>,
}

/// Bidirectional multi-layer GRU over padded, length-major input.
#[derive(Debug)]
pub struct EncoderRnn<'a> {
    params: &'a BoundModel<'a>,
}

impl EncoderRnn<'_> {
    /// Encodes `input` (`[T, B]` token ids) where sequence `b` occupies the
    /// first `lengths[b]` steps. Padded steps neither update the hidden state
    /// nor produce output, so every sequence is encoded as if it were alone.
    pub fn forward(
        &self,
        graph: &mut Graph,
        input: &Tensor<usize>,
        lengths: &[usize],
    ) -> ChatResult<EncoderOutput> {
        let (steps, batch) = input.dims2()?;
        if lengths.len() != batch || lengths.iter().any(|&l| l == 0 || l > steps) {
            return Err(ChatbotError::Data(format!(
                "lengths {lengths:?} do not fit an input of {steps} steps and {batch} sequences"
            )));
        }
        let config = self.params.config();
        let embedding = self.params.param(EMBEDDING_WEIGHT)?;
        let masks: Vec<Vec<bool>> = (0..steps)
            .map(|t| lengths.iter().map(|&l| t < l).collect())
            .collect();

        let mut layer_input = Vec::with_capacity(steps);
        for t in 0..steps {
            layer_input.push(graph.call(Embedding::new(input.row(t)?), &[embedding])?);
        }

        let mut hidden = Vec::with_capacity(2 * config.encoder_n_layers);
        let mut outputs = Vec::with_capacity(steps);
        for layer in 0..config.encoder_n_layers {
            let prefix = format!("encoder.gru.l{layer}");
            let (fwd, fwd_last) = self.direction(graph, &layer_input, &masks, &format!("{prefix}.fwd"), false)?;
            let (bwd, bwd_last) = self.direction(graph, &layer_input, &masks, &format!("{prefix}.bwd"), true)?;
            hidden.push(fwd_last);
            hidden.push(bwd_last);

            if layer + 1 < config.encoder_n_layers {
                layer_input.clear();
                for (&f, &b) in fwd.iter().zip(&bwd) {
                    let joined = graph.call(Cat::new(), &[f, b])?;
                    layer_input.push(graph.dropout(joined, config.dropout)?);
                }
            } else {
                for (&f, &b) in fwd.iter().zip(&bwd) {
                    outputs.push(graph.call(Add::new(), &[f, b])?);
                }
            }
        }

        let outputs = graph.call(Stack::new(), &outputs)?;
        Ok(EncoderOutput { outputs, hidden })
    }

    /// Runs one direction of one layer. Returns per-step outputs in time order
    /// and the last hidden state.
    fn direction(
        &self,
        graph: &mut Graph,
        inputs: &[TensorId],
        masks: &[Vec<bool>],
        prefix: &str,
        reverse: bool,
    ) -> ChatResult<(Vec<TensorId>, TensorId)> {
        let hidden_size = self.params.config().hidden_size;
        let batch = masks.first().map_or(0, Vec::len);
        let mut h = graph.alloc(Tensor::zeros(&[batch, hidden_size]));
        let mut outputs = vec![h; inputs.len()];

        let order: Vec<usize> = if reverse {
            (0..inputs.len()).rev().collect()
        } else {
            (0..inputs.len()).collect()
        };
        for t in order {
            let candidate = gru_cell(graph, self.params, inputs[t], h, prefix, hidden_size)?;
            if masks[t].iter().all(|&m| m) {
                h = candidate;
                outputs[t] = candidate;
            } else {
                h = graph.call(SelectRows::new(&masks[t]), &[candidate, h])?;
                outputs[t] = graph.call(MaskRows::new(&masks[t]), &[h])?;
            }
        }
        Ok((outputs, h))
    }
}

/// Output of one decoder step.
#[derive(Debug, Clone)]
pub struct DecoderStep {
    /// `[B, V]` probabilities over the vocabulary.
    pub output: TensorId,
    /// New hidden state per decoder layer, `[B, H]` each.
    pub hidden: Vec<TensorId>,
}

/// Unidirectional GRU decoder with Luong global attention, run one step at a time.
#[derive(Debug)]
pub struct LuongAttnDecoderRnn<'a> {
    params: &'a BoundModel<'a>,
}

impl LuongAttnDecoderRnn<'_> {
    /// Number of GRU layers, i.e. the length of the hidden state it expects.
    pub fn n_layers(&self) -> usize {
        self.params.config().decoder_n_layers
    }

    /// Decodes one token per sequence.
    ///
    /// `input_step` holds the previous token of each of the `B` sequences,
    /// `last_hidden` one `[B, H]` state per decoder layer and
    /// `encoder_outputs` the `[T, B, H]` encoder outputs to attend over.
    pub fn forward(
        &self,
        graph: &mut Graph,
        input_step: &[usize],
        last_hidden: &[TensorId],
        encoder_outputs: TensorId,
    ) -> ChatResult<DecoderStep> {
        let config = self.params.config();
        if last_hidden.len() != config.decoder_n_layers {
            return Err(ChatbotError::Data(format!(
                "decoder has {} layers but got {} hidden states",
                config.decoder_n_layers,
                last_hidden.len()
            )));
        }
        let embedding = self.params.param(EMBEDDING_WEIGHT)?;
        let embedded = graph.call(Embedding::new(input_step), &[embedding])?;
        let mut x = graph.dropout(embedded, config.dropout)?;

        let mut hidden = Vec::with_capacity(last_hidden.len());
        for (layer, &h) in last_hidden.iter().enumerate() {
            let prefix = format!("decoder.gru.l{layer}");
            let h_new = gru_cell(graph, self.params, x, h, &prefix, config.hidden_size)?;
            hidden.push(h_new);
            x = if layer + 1 < last_hidden.len() {
                graph.dropout(h_new, config.dropout)?
            } else {
                h_new
            };
        }
        let rnn_output = x;

        let energies = self.attention_scores(graph, rnn_output, encoder_outputs)?;
        let weights = graph.call(Softmax::new(), &[energies])?;
        let context = graph.call(AttentionContext::new(), &[weights, encoder_outputs])?;

        let concat_input = graph.call(Cat::new(), &[rnn_output, context])?;
        let concat_output = linear(graph, self.params, concat_input, "decoder.concat")?;
        let concat_output = graph.call(Tanh::new(), &[concat_output])?;
        let logits = linear(graph, self.params, concat_output, "decoder.out")?;
        let output = graph.call(Softmax::new(), &[logits])?;

        Ok(DecoderStep { output, hidden })
    }

    /// `[B, T]` attention energies of `rnn_output` (`[B, H]`) against every
    /// encoder output.
    fn attention_scores(
        &self,
        graph: &mut Graph,
        rnn_output: TensorId,
        encoder_outputs: TensorId,
    ) -> ChatResult<TensorId> {
        let (steps, batch, hidden) = graph.get(encoder_outputs)?.dims3()?;
        let flat_shape = [steps * batch, hidden];
        match self.params.config().attn_model {
            AttnModel::Dot => Ok(graph.call(DotScore::new(), &[rnn_output, encoder_outputs])?),
            AttnModel::General => {
                let flat = graph.call(Reshape::new(&flat_shape), &[encoder_outputs])?;
                let energy = linear(graph, self.params, flat, "decoder.attn")?;
                let energy = graph.call(Reshape::new(&[steps, batch, hidden]), &[energy])?;
                Ok(graph.call(DotScore::new(), &[rnn_output, energy])?)
            }
            AttnModel::Concat => {
                let flat = graph.call(Reshape::new(&flat_shape), &[encoder_outputs])?;
                let expanded = graph.call(Repeat::new(steps), &[rnn_output])?;
                let joined = graph.call(Cat::new(), &[expanded, flat])?;
                let energy = linear(graph, self.params, joined, "decoder.attn")?;
                let energy = graph.call(Tanh::new(), &[energy])?;
                let v = self.params.param("decoder.attn.v")?;
                let scores = graph.call(MatMul::new(), &[energy, v])?;
                let scores = graph.call(Reshape::new(&[steps, batch]), &[scores])?;
                Ok(graph.call(Transpose::new(), &[scores])?)
            }
        }
    }
}
