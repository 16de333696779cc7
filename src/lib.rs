//! # seq2seq-chatbot
//!
//! A sequence-to-sequence chatbot: a bidirectional GRU encoder and a Luong
//! attention decoder sharing one word embedding, trained with teacher forcing on
//! paired utterances and answered with greedy decoding.
//!
//! Everything runs on the CPU on top of a small define-by-run autodiff engine.
//!
//! ## Key Components:
//!
//! *   [`Seq2Seq`]: model parameters; [`Seq2Seq::bind`] places them on a
//!     [`Graph`] and hands out the encoder and decoder.
//! *   [`Trainer`]: masked-loss training step with gradient clipping and two
//!     [`Adam`] optimizers, and the checkpointing training loop.
//! *   [`GreedySearchDecoder`] and [`Evaluator`]: inference, interactive or file based.
//! *   [`Vocabulary`] and the [`data`] module: normalization, corpus loading and batching.
//! *   [`Checkpoint`]: bincode snapshots of a training run.
//!
//! ## Example
//!
//! ```no_run
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use seq2seq_chatbot::{
//!     data, Adam, ChatResult, CorpusConfig, Evaluator, GreedySearchDecoder, ModelConfig,
//!     Seq2Seq, TrainConfig, Trainer,
//! };
//!
//! # fn main() -> ChatResult<()> {
//! let corpus = CorpusConfig::default();
//! let (mut voc, pairs) = data::load_prepare_data(&corpus.corpus_name, &corpus.datafile, corpus.max_length)?;
//! let pairs = data::trim_rare_words(&mut voc, pairs, corpus.min_count);
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let model = Seq2Seq::new(&mut rng, &ModelConfig::default(), voc.num_words())?;
//! let mut trainer = Trainer::new(model, Adam::default(), TrainConfig::default())?;
//! trainer.train_iters(&mut rng, &voc, &pairs, &corpus, 100, None)?;
//!
//! let evaluator = Evaluator::new(GreedySearchDecoder::new(&trainer.model), &voc, corpus.max_length);
//! println!("{}", evaluator.respond("Hello there!")?);
//! # Ok(())
//! # }
//! ```

/// Checkpoint record, its on-disk layout and bincode persistence.
pub mod checkpoint;
/// Command-line configuration groups.
pub mod config;
/// Sentence pairs, corpus preparation and padded batches.
pub mod data;
/// Crate-level error type.
pub mod error;
/// Reply generation for raw sentences.
pub mod evaluate;
/// Differentiable operations recorded on the graph.
pub mod funcs;
/// Define-by-run computation graph with reverse-mode autodiff.
pub mod graph;
/// Encoder, attention decoder and parameter storage.
pub mod model;
/// Optimizers, their persistent state and gradient clipping.
pub mod optimizer;
/// Greedy decoding.
pub mod search;
/// Dense tensors.
pub mod tensor;
/// Masked loss, training step and training loop.
pub mod train;
/// Word/index mapping and sentence normalization.
pub mod vocab;

pub use checkpoint::{checkpoint_path, Checkpoint};
pub use config::{AttnModel, CorpusConfig, ModelConfig, TrainConfig};
pub use error::{ChatResult, ChatbotError};
pub use evaluate::Evaluator;
pub use graph::{Graph, GraphError, TensorId};
pub use model::{ParamGroup, Seq2Seq, StateDict};
pub use optimizer::{Adam, Optimizer, OptimizerState};
pub use search::GreedySearchDecoder;
pub use tensor::{Tensor, TensorError};
pub use train::{mask_nll_loss, Trainer, TrainingReport};
pub use vocab::{normalize_string, VocabError, Vocabulary};
