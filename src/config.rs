//! Run configuration, parsed once from the command line and then passed by
//! reference to every component.

use crate::error::{ChatResult, ChatbotError};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Luong attention scoring function.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttnModel {
    /// `h · e`
    Dot,
    /// `h · (W e + b)`
    General,
    /// `v · tanh(W [h; e] + b)`
    Concat,
}

impl fmt::Display for AttnModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dot => "dot",
            Self::General => "general",
            Self::Concat => "concat",
        };
        f.write_str(name)
    }
}

/// Architecture of the encoder and decoder.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Model name used in checkpoint paths
    #[clap(long, default_value = "cb_model")]
    pub model_name: String,
    /// Attention scoring function
    #[clap(long, value_enum, default_value = "dot")]
    pub attn_model: AttnModel,
    /// Hidden size, also the embedding size
    #[clap(long, default_value = "500")]
    pub hidden_size: usize,
    /// Number of encoder GRU layers
    #[clap(long, default_value = "2")]
    pub encoder_n_layers: usize,
    /// Number of decoder GRU layers
    #[clap(long, default_value = "2")]
    pub decoder_n_layers: usize,
    /// Dropout rate (0.0 = no dropout)
    #[clap(long, default_value = "0.1")]
    pub dropout: f32,
}

impl ModelConfig {
    /// Checks the layer and rate bounds the model depends on.
    pub fn validate(&self) -> ChatResult<()> {
        if self.hidden_size == 0 {
            return Err(ChatbotError::Config("hidden size must be positive".to_string()));
        }
        if self.encoder_n_layers == 0 || self.decoder_n_layers == 0 {
            return Err(ChatbotError::Config("encoder and decoder need at least one layer".to_string()));
        }
        // Decoder hidden state is sliced out of the bidirectional encoder state.
        if self.decoder_n_layers > 2 * self.encoder_n_layers {
            return Err(ChatbotError::Config(format!(
                "decoder layers ({}) exceed the {} hidden states of a {}-layer bidirectional encoder",
                self.decoder_n_layers,
                2 * self.encoder_n_layers,
                self.encoder_n_layers
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ChatbotError::Config(format!("dropout {} must be in [0, 1)", self.dropout)));
        }
        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: "cb_model".to_string(),
            attn_model: AttnModel::Dot,
            hidden_size: 500,
            encoder_n_layers: 2,
            decoder_n_layers: 2,
            dropout: 0.1,
        }
    }
}

/// Optimization settings.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct TrainConfig {
    /// Sentence pairs per training batch
    #[clap(long, default_value = "128")]
    pub batch_size: usize,
    /// Gradient norm clipping threshold
    #[clap(long, default_value = "50.0")]
    pub clip: f32,
    /// Probability of feeding ground truth to the decoder
    #[clap(long, default_value = "1.0")]
    pub teacher_forcing_ratio: f32,
    /// Encoder learning rate
    #[clap(long, default_value = "0.0001")]
    pub learning_rate: f32,
    /// Decoder learning rate multiplier
    #[clap(long, default_value = "5.0")]
    pub decoder_learning_ratio: f32,
    /// Log the average loss every N iterations
    #[clap(long, default_value = "1")]
    pub print_every: usize,
    /// Save a checkpoint every N iterations (default: once, at the last iteration)
    #[clap(long)]
    pub save_every: Option<usize>,
}

impl TrainConfig {
    /// Rejects empty batches, zero intervals and non-positive rates.
    pub fn validate(&self) -> ChatResult<()> {
        if self.batch_size == 0 {
            return Err(ChatbotError::Config("batch size must be positive".to_string()));
        }
        if self.print_every == 0 || self.save_every == Some(0) {
            return Err(ChatbotError::Config("print and save intervals must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.teacher_forcing_ratio) {
            return Err(ChatbotError::Config(format!(
                "teacher forcing ratio {} must be in [0, 1]",
                self.teacher_forcing_ratio
            )));
        }
        if self.clip <= 0.0 || self.learning_rate <= 0.0 || self.decoder_learning_ratio <= 0.0 {
            return Err(ChatbotError::Config(
                "clip, learning rate and decoder learning ratio must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Checkpoint interval for a run of `n_iteration` iterations.
    pub fn save_interval(&self, n_iteration: usize) -> usize {
        self.save_every.unwrap_or(n_iteration).max(1)
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            clip: 50.0,
            teacher_forcing_ratio: 1.0,
            learning_rate: 0.0001,
            decoder_learning_ratio: 5.0,
            print_every: 1,
            save_every: None,
        }
    }
}

/// Where data and checkpoints live, and how the corpus is filtered.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct CorpusConfig {
    /// Corpus name used in checkpoint paths
    #[clap(long, default_value = "cornell movie-dialogs corpus")]
    pub corpus_name: String,
    /// Tab-separated sentence pair file
    #[clap(long, default_value = "data/formatted_movie_lines.txt")]
    pub datafile: PathBuf,
    /// Checkpoint root directory
    #[clap(long, default_value = "data/save")]
    pub save_dir: PathBuf,
    /// Sentences evaluated after training, one per line
    #[clap(long, default_value = "data/test.txt")]
    pub test_file: PathBuf,
    /// Sentences must have fewer words than this; also the decode length
    #[clap(long, default_value = "10")]
    pub max_length: usize,
    /// Drop words seen fewer times than this
    #[clap(long, default_value = "3")]
    pub min_count: usize,
}

impl CorpusConfig {
    /// Checks that decoding has room for at least one word and EOS.
    pub fn validate(&self) -> ChatResult<()> {
        if self.max_length < 2 {
            return Err(ChatbotError::Config("max length must be at least 2".to_string()));
        }
        Ok(())
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            corpus_name: "cornell movie-dialogs corpus".to_string(),
            datafile: PathBuf::from("data/formatted_movie_lines.txt"),
            save_dir: PathBuf::from("data/save"),
            test_file: PathBuf::from("data/test.txt"),
            max_length: 10,
            min_count: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ModelConfig::default().validate().unwrap();
        TrainConfig::default().validate().unwrap();
        CorpusConfig::default().validate().unwrap();
    }

    #[test]
    fn decoder_deeper_than_encoder_states_is_rejected() {
        let config = ModelConfig {
            encoder_n_layers: 1,
            decoder_n_layers: 3,
            ..ModelConfig::default()
        };
        assert!(matches!(config.validate(), Err(ChatbotError::Config(_))));
        let ok = ModelConfig {
            encoder_n_layers: 1,
            decoder_n_layers: 2,
            ..ModelConfig::default()
        };
        ok.validate().unwrap();
    }

    #[test]
    fn save_interval_defaults_to_run_length() {
        let config = TrainConfig::default();
        assert_eq!(config.save_interval(4000), 4000);
        let every = TrainConfig {
            save_every: Some(500),
            ..TrainConfig::default()
        };
        assert_eq!(every.save_interval(4000), 500);
    }

    #[test]
    fn attn_model_names() {
        assert_eq!(AttnModel::General.to_string(), "general");
        assert_eq!(AttnModel::from_str("concat", true).unwrap(), AttnModel::Concat);
    }
}
