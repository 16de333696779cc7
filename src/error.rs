use crate::graph::GraphError;
use crate::tensor::TensorError;
use crate::vocab::VocabError;
use thiserror::Error;

/// Crate-level error.
#[derive(Error, Debug)]
pub enum ChatbotError {
    /// Graph bookkeeping failed.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    /// Tensor math failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
    /// Word or index lookup failed.
    #[error("vocabulary error: {0}")]
    Vocab(#[from] VocabError),
    /// Reading or writing a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Checkpoint (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    /// A named parameter is missing from the model or a state dict.
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    /// A state dict carries a name the model does not have.
    #[error("unexpected parameter: {0}")]
    UnexpectedParameter(String),
    /// A state dict entry does not match the model's parameter shape.
    #[error("parameter {name} has shape {got:?}, expected {expected:?}")]
    ParameterShape {
        /// Parameter name.
        name: String,
        /// Shape the model expects.
        expected: Vec<usize>,
        /// Shape found in the state dict.
        got: Vec<usize>,
    },
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
    /// Malformed corpus or batch input.
    #[error("data error: {0}")]
    Data(String),
}

impl ChatbotError {
    /// True for the word lookup failure raised while indexing a sentence.
    pub fn is_unknown_word(&self) -> bool {
        matches!(self, Self::Vocab(VocabError::UnknownWord(_)))
    }
}

/// Result with a [`ChatbotError`].
pub type ChatResult<T> = Result<T, ChatbotError>;
