use crate::config::ModelConfig;
use crate::error::ChatResult;
use crate::model::{ParamGroup, Seq2Seq, StateDict};
use crate::optimizer::OptimizerState;
use crate::vocab::Vocabulary;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Snapshot of a training run: enough to resume training or to evaluate.
///
/// `en` and `de` both carry the shared embedding, `embedding` carries it alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Iteration the checkpoint was taken at.
    pub iteration: usize,
    /// Encoder group state dict.
    pub en: StateDict,
    /// Decoder group state dict.
    pub de: StateDict,
    /// Encoder optimizer state.
    pub en_opt: OptimizerState,
    /// Decoder optimizer state.
    pub de_opt: OptimizerState,
    /// Loss of the last training step before the save.
    pub loss: f32,
    /// Vocabulary the model was trained with.
    pub voc_dict: Vocabulary,
    /// Embedding alone.
    pub embedding: StateDict,
}

impl Checkpoint {
    /// Snapshots `model` and both optimizer states at `iteration`.
    pub fn capture(
        iteration: usize,
        model: &Seq2Seq,
        en_opt: &OptimizerState,
        de_opt: &OptimizerState,
        loss: f32,
        voc: &Vocabulary,
    ) -> Self {
        Self {
            iteration,
            en: model.state_dict(ParamGroup::Encoder),
            de: model.state_dict(ParamGroup::Decoder),
            en_opt: en_opt.clone(),
            de_opt: de_opt.clone(),
            loss,
            voc_dict: voc.clone(),
            embedding: model.state_dict(ParamGroup::Embedding),
        }
    }

    /// Loads the embedding, encoder and decoder weights into `model`, strictly.
    pub fn restore_model(&self, model: &mut Seq2Seq) -> ChatResult<()> {
        model.load_state_dict(ParamGroup::Embedding, &self.embedding)?;
        model.load_state_dict(ParamGroup::Encoder, &self.en)?;
        model.load_state_dict(ParamGroup::Decoder, &self.de)?;
        Ok(())
    }

    /// Writes the checkpoint with bincode, creating parent directories. The
    /// bytes go to a sibling temp file first and are renamed into place.
    pub fn save(&self, path: &Path) -> ChatResult<()> {
        info!("Saving checkpoint to: {:?}", path);
        let start_time = Instant::now();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let bytes = bincode::serialize(self)?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &bytes)?;
        fs::rename(&temp_path, path)?;
        info!("Saved checkpoint in {:.2}s", start_time.elapsed().as_secs_f32());
        Ok(())
    }

    /// Reads a checkpoint written by [`Checkpoint::save`].
    pub fn load(path: &Path) -> ChatResult<Self> {
        info!("Loading checkpoint from: {:?}", path);
        let bytes = fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

/// `<save_dir>/<model_name>/<corpus_name>/<encoder_layers>-<decoder_layers>_<hidden_size>`
pub fn checkpoint_dir(save_dir: &Path, model: &ModelConfig, corpus_name: &str) -> PathBuf {
    save_dir.join(&model.model_name).join(corpus_name).join(format!(
        "{}-{}_{}",
        model.encoder_n_layers, model.decoder_n_layers, model.hidden_size
    ))
}

/// File of the checkpoint saved at `iteration`.
pub fn checkpoint_path(save_dir: &Path, model: &ModelConfig, corpus_name: &str, iteration: usize) -> PathBuf {
    checkpoint_dir(save_dir, model, corpus_name).join(format!("{iteration}_checkpoint.bin"))
}
