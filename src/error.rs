use thiserror::Error;

/// Everything that can abort a training or sampling run.
///
/// None of these are retried: a run that hits one of them is over.
#[derive(Debug, Error)]
pub enum Error {
    #[error("character {0:?} does not appear in the corpus")]
    UnknownCharacter(char),
    #[error("token id {0} is outside the vocabulary")]
    UnknownId(i64),
    #[error("split of {len} tokens is too short for a context length of {context_length}")]
    InsufficientData { len: usize, context_length: usize },
    #[error("embedding width {embed_width} is not divisible by {num_heads} heads")]
    InvalidHeadConfiguration { embed_width: usize, num_heads: usize },
    #[error("sequence of {len} tokens exceeds the context length of {context_length}")]
    SequenceTooLong { len: usize, context_length: usize },
    #[error("loss diverged to {loss} at step {step}")]
    NonFiniteLoss { step: usize, loss: f64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("corpus is empty")]
    EmptyCorpus,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Torch(#[from] tch::TchError),
}

pub type Result<T> = std::result::Result<T, Error>;
