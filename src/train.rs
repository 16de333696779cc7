//! Masked loss, the single training step and the training loop.

use crate::checkpoint::{checkpoint_path, Checkpoint};
use crate::config::{CorpusConfig, TrainConfig};
use crate::data::{sample_batch, Batch, SentencePair};
use crate::error::{ChatResult, ChatbotError};
use crate::funcs::{Add, MaskedNll};
use crate::graph::{Graph, TensorId};
use crate::model::{ParamGroup, Seq2Seq};
use crate::optimizer::{clip_grad_norm, Optimizer, OptimizerState};
use crate::vocab::{Vocabulary, SOS_TOKEN};
use rand::Rng;
use std::path::PathBuf;
use tracing::{debug, info};

/// Mean negative log-likelihood of `target` under `probs` (`[B, V]`) over the
/// rows selected by `mask`, plus the number of selected rows.
///
/// # Errors
/// `IndexOutOfBounds` when a target lies outside of the vocabulary.
pub fn mask_nll_loss(
    graph: &mut Graph,
    probs: TensorId,
    target: &[usize],
    mask: &[bool],
) -> ChatResult<(TensorId, usize)> {
    let loss = graph.call(MaskedNll::new(target, mask), &[probs])?;
    Ok((loss, MaskedNll::count(mask)))
}

/// What a call to [`Trainer::train_iters`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    /// Iteration the run started at.
    pub first_iteration: usize,
    /// Last iteration trained, `None` when there was nothing left to do.
    pub last_iteration: Option<usize>,
    /// Loss of that iteration.
    pub last_loss: Option<f32>,
    /// Checkpoints written, in order.
    pub checkpoints: Vec<PathBuf>,
}

/// Owns the model and the state of its two optimizers: one over the encoder
/// group and one over the decoder group. Both groups include the shared
/// embedding.
#[derive(Debug, Clone)]
pub struct Trainer<O: Optimizer> {
    /// The model being trained.
    pub model: Seq2Seq,
    /// Adam moments of the encoder group.
    pub encoder_optimizer: OptimizerState,
    /// Adam moments of the decoder group.
    pub decoder_optimizer: OptimizerState,
    optimizer: O,
    config: TrainConfig,
}

impl<O: Optimizer> Trainer<O> {
    /// Fresh optimizer states.
    ///
    /// # Errors
    /// [`ChatbotError::Config`] when `config` does not validate.
    pub fn new(model: Seq2Seq, optimizer: O, config: TrainConfig) -> ChatResult<Self> {
        config.validate()?;
        Ok(Self {
            model,
            encoder_optimizer: OptimizerState::default(),
            decoder_optimizer: OptimizerState::default(),
            optimizer,
            config,
        })
    }

    /// Training settings.
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Takes over the optimizer states stored in `checkpoint`.
    pub fn restore_optimizers(&mut self, checkpoint: &Checkpoint) {
        self.encoder_optimizer = checkpoint.en_opt.clone();
        self.decoder_optimizer = checkpoint.de_opt.clone();
    }

    /// Snapshot of the current state.
    pub fn checkpoint(&self, iteration: usize, loss: f32, voc: &Vocabulary) -> Checkpoint {
        Checkpoint::capture(
            iteration,
            &self.model,
            &self.encoder_optimizer,
            &self.decoder_optimizer,
            loss,
            voc,
        )
    }

    /// One gradient update on `batch`. Returns the loss per non-padding target
    /// token.
    ///
    /// Teacher forcing is decided once for the whole batch: with probability
    /// `teacher_forcing_ratio` every decode step is fed the ground truth,
    /// otherwise the model's own arg-max prediction.
    pub fn train_step<R: Rng>(&mut self, batch: &Batch, rng: &mut R) -> ChatResult<f32> {
        let mut graph = Graph::training(rng.gen());
        let use_teacher_forcing = rng.gen::<f32>() < self.config.teacher_forcing_ratio;

        let bound = self.model.bind(&mut graph);
        let encoded = bound.encoder().forward(&mut graph, &batch.input, &batch.lengths)?;
        let decoder = bound.decoder();
        let mut hidden = encoded.hidden[..decoder.n_layers()].to_vec();
        let mut decoder_input = vec![SOS_TOKEN; batch.batch_size()];

        let mut loss: Option<TensorId> = None;
        let mut print_loss = 0.0f32;
        let mut n_totals = 0usize;
        for t in 0..batch.max_target_len {
            let step = decoder.forward(&mut graph, &decoder_input, &hidden, encoded.outputs)?;
            hidden = step.hidden;
            let target = batch.target.row(t)?;
            let mask = batch.mask.row(t)?;

            decoder_input = if use_teacher_forcing {
                target.to_vec()
            } else {
                graph
                    .get(step.output)?
                    .argmax_rows()?
                    .into_iter()
                    .map(|(idx, _)| idx)
                    .collect()
            };

            let (mask_loss, n_total) = mask_nll_loss(&mut graph, step.output, target, mask)?;
            print_loss += graph.get(mask_loss)?.blob()[0] * n_total as f32;
            n_totals += n_total;
            loss = Some(match loss {
                Some(acc) => graph.call(Add::new(), &[acc, mask_loss])?,
                None => mask_loss,
            });
        }
        let loss = loss.ok_or_else(|| ChatbotError::Data("batch has no target steps".to_string()))?;
        graph.backward(loss)?;
        let mut grads = bound.gradients(&graph)?;

        let clip = self.config.clip;
        let encoder_norm = clip_grad_norm(&mut grads, self.model.param_names(ParamGroup::Encoder), clip);
        let decoder_norm = clip_grad_norm(&mut grads, self.model.param_names(ParamGroup::Decoder), clip);
        debug!(encoder_norm, decoder_norm, "gradient norms before clipping");

        let lr = self.config.learning_rate;
        self.model.step(
            &self.optimizer,
            &grads,
            ParamGroup::Encoder,
            &mut self.encoder_optimizer,
            lr,
        )?;
        self.model.step(
            &self.optimizer,
            &grads,
            ParamGroup::Decoder,
            &mut self.decoder_optimizer,
            lr * self.config.decoder_learning_ratio,
        )?;

        if n_totals == 0 {
            return Ok(0.0);
        }
        Ok(print_loss / n_totals as f32)
    }

    /// Trains until iteration `n_iteration`.
    ///
    /// All batches are sampled up front. A run resumed from `checkpoint` starts
    /// at the iteration after the saved one; the model and optimizer states must
    /// already have been restored from it. The average loss is logged every
    /// `print_every` iterations and a checkpoint is written every `save_every`.
    pub fn train_iters<R: Rng>(
        &mut self,
        rng: &mut R,
        voc: &Vocabulary,
        pairs: &[SentencePair],
        corpus: &CorpusConfig,
        n_iteration: usize,
        checkpoint: Option<&Checkpoint>,
    ) -> ChatResult<TrainingReport> {
        info!("Initializing ...");
        let batch_size = self.config.batch_size;
        let batches = (0..n_iteration)
            .map(|_| sample_batch(rng, voc, pairs, batch_size))
            .collect::<ChatResult<Vec<_>>>()?;

        let start_iteration = checkpoint.map_or(1, |c| c.iteration + 1);
        let print_every = self.config.print_every;
        let save_every = self.config.save_interval(n_iteration);
        let mut report = TrainingReport {
            first_iteration: start_iteration,
            ..TrainingReport::default()
        };
        let mut print_loss = 0.0f32;

        info!("Training...");
        for (iteration, batch) in batches.iter().enumerate().skip(start_iteration - 1) {
            let iteration = iteration + 1;
            let loss = self.train_step(batch, rng)?;
            print_loss += loss;
            report.last_iteration = Some(iteration);
            report.last_loss = Some(loss);

            if iteration % print_every == 0 {
                info!(
                    "Iteration: {}; Percent complete: {:.1}%; Average loss: {:.4}",
                    iteration,
                    iteration as f32 / n_iteration as f32 * 100.0,
                    print_loss / print_every as f32
                );
                print_loss = 0.0;
            }

            if iteration % save_every == 0 {
                let path = checkpoint_path(
                    &corpus.save_dir,
                    self.model.config(),
                    &corpus.corpus_name,
                    iteration,
                );
                self.checkpoint(iteration, loss, voc).save(&path)?;
                report.checkpoints.push(path);
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttnModel;
    use crate::data::batch_to_train_data;
    use crate::model::tests::tiny_config;
    use crate::optimizer::Adam;
    use crate::tensor::{Tensor, TensorError};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn corpus() -> (Vocabulary, Vec<SentencePair>) {
        let pairs = vec![
            SentencePair::new("hi", "hello there"),
            SentencePair::new("how are you ?", "fine"),
            SentencePair::new("bye", "see you"),
        ];
        let mut voc = Vocabulary::new("test");
        for p in &pairs {
            voc.add_sentence(&p.input);
            voc.add_sentence(&p.output);
        }
        (voc, pairs)
    }

    fn trainer(voc: &Vocabulary, config: TrainConfig, dropout: f32) -> Trainer<Adam> {
        let model_config = crate::config::ModelConfig {
            hidden_size: 8,
            dropout,
            ..tiny_config(AttnModel::Dot)
        };
        let model = Seq2Seq::new(&mut StdRng::seed_from_u64(11), &model_config, voc.num_words()).unwrap();
        Trainer::new(model, Adam::default(), config).unwrap()
    }

    fn train_config() -> TrainConfig {
        TrainConfig {
            batch_size: 3,
            learning_rate: 0.01,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn masked_loss_averages_selected_rows() {
        let mut g = Graph::new();
        let probs = g.alloc(Tensor::raw(&[2, 2], vec![0.5, 0.5, 0.25, 0.75]).unwrap());
        let (loss, count) = mask_nll_loss(&mut g, probs, &[0, 1], &[true, false]).unwrap();
        assert_eq!(count, 1);
        assert!((g.get(loss).unwrap().blob()[0] - 0.5f32.ln().abs()).abs() < 1e-6);

        let (loss, count) = mask_nll_loss(&mut g, probs, &[0, 1], &[true, true]).unwrap();
        assert_eq!(count, 2);
        let expected = (-(0.5f32.ln()) - 0.75f32.ln()) / 2.0;
        assert!((g.get(loss).unwrap().blob()[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn masked_loss_with_empty_mask_is_zero() {
        let mut g = Graph::new();
        let probs = g.alloc(Tensor::constant(&[2, 3], 1.0 / 3.0));
        let (loss, count) = mask_nll_loss(&mut g, probs, &[0, 0], &[false, false]).unwrap();
        assert_eq!(count, 0);
        assert_eq!(g.get(loss).unwrap().blob(), &[0.0]);
    }

    #[test]
    fn masked_loss_rejects_out_of_vocabulary_target() {
        let mut g = Graph::new();
        let probs = g.alloc(Tensor::constant(&[1, 3], 1.0 / 3.0));
        let err = mask_nll_loss(&mut g, probs, &[3], &[true]).unwrap_err();
        assert!(matches!(
            err,
            ChatbotError::Graph(crate::graph::GraphError::Tensor(TensorError::IndexOutOfBounds { index: 3, bound: 3 }))
        ));
    }

    #[test]
    fn same_seed_same_loss() {
        let (voc, pairs) = corpus();
        let batch = batch_to_train_data(&voc, &pairs).unwrap();
        let base = trainer(&voc, train_config(), 0.1);

        let mut a = base.clone();
        let mut b = base;
        let loss_a = a.train_step(&batch, &mut StdRng::seed_from_u64(5)).unwrap();
        let loss_b = b.train_step(&batch, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(loss_a, loss_b);
        assert_eq!(a.model, b.model);
        assert!(loss_a.is_finite() && loss_a >= 0.0);
    }

    #[test]
    fn step_updates_both_groups_and_optimizers() {
        let (voc, pairs) = corpus();
        let batch = batch_to_train_data(&voc, &pairs).unwrap();
        let mut t = trainer(&voc, train_config(), 0.0);
        let before = t.model.clone();
        t.train_step(&batch, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(t.encoder_optimizer.step, 1);
        assert_eq!(t.decoder_optimizer.step, 1);
        assert!(t.encoder_optimizer.state.contains_key("embedding.weight.exp_avg"));
        assert!(t.decoder_optimizer.state.contains_key("embedding.weight.exp_avg"));
        for name in ["encoder.gru.l0.fwd.weight_ih", "decoder.out.weight"] {
            assert_ne!(before.param(name), t.model.param(name));
        }
    }

    #[test]
    fn overfitting_one_batch_lowers_the_loss() {
        let (voc, pairs) = corpus();
        let batch = batch_to_train_data(&voc, &pairs).unwrap();
        let mut t = trainer(&voc, train_config(), 0.0);
        let mut rng = StdRng::seed_from_u64(2);
        let first = t.train_step(&batch, &mut rng).unwrap();
        let mut last = first;
        for _ in 0..40 {
            last = t.train_step(&batch, &mut rng).unwrap();
        }
        assert!(last < first, "{last} >= {first}");
    }

    #[test]
    fn free_running_decoding_trains_too() {
        let (voc, pairs) = corpus();
        let batch = batch_to_train_data(&voc, &pairs).unwrap();
        let config = TrainConfig {
            teacher_forcing_ratio: 0.0,
            ..train_config()
        };
        let mut t = trainer(&voc, config, 0.1);
        let loss = t.train_step(&batch, &mut StdRng::seed_from_u64(3)).unwrap();
        assert!(loss.is_finite() && loss >= 0.0);
    }

    #[test]
    fn training_loop_saves_and_resumes() {
        let (voc, pairs) = corpus();
        let dir = tempfile::tempdir().unwrap();
        let corpus_config = CorpusConfig {
            corpus_name: "tiny".to_string(),
            save_dir: dir.path().to_path_buf(),
            ..CorpusConfig::default()
        };
        let config = TrainConfig {
            save_every: Some(2),
            ..train_config()
        };
        let mut t = trainer(&voc, config, 0.0);
        let mut rng = StdRng::seed_from_u64(4);
        let report = t.train_iters(&mut rng, &voc, &pairs, &corpus_config, 4, None).unwrap();
        assert_eq!(report.first_iteration, 1);
        assert_eq!(report.last_iteration, Some(4));
        assert_eq!(report.checkpoints.len(), 2);
        assert!(report.checkpoints[1].ends_with("test_model/tiny/2-2_8/4_checkpoint.bin"));
        assert_eq!(t.encoder_optimizer.step, 4);

        let saved = Checkpoint::load(&report.checkpoints[1]).unwrap();
        assert_eq!(saved.iteration, 4);
        assert_eq!(saved.voc_dict, voc);

        let mut resumed = trainer(&voc, t.config().clone(), 0.0);
        saved.restore_model(&mut resumed.model).unwrap();
        resumed.restore_optimizers(&saved);
        assert_eq!(resumed.model, t.model);
        let report = resumed
            .train_iters(&mut rng, &voc, &pairs, &corpus_config, 6, Some(&saved))
            .unwrap();
        assert_eq!(report.first_iteration, 5);
        assert_eq!(report.last_iteration, Some(6));
        assert_eq!(resumed.encoder_optimizer.step, 6);
    }
}
