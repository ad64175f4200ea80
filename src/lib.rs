//! Character-level GPT.
//!
//! Builds a per-character vocabulary from a text corpus, trains either a bigram
//! model or a stack of causal self-attention blocks on it with libtorch (via
//! `tch`), and samples new text one character at a time.

pub mod attention;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod generate;
pub mod model;
pub mod tokenizer;
pub mod train;

pub use config::{Config, ModelConfig, ModelKind, TrainingConfig};
pub use dataset::{DataSet, Split};
pub use error::{Error, Result};
pub use generate::{Generation, generate, generate_text};
pub use model::{BigramModel, GptModel, LanguageModel};
pub use tokenizer::Tokenizer;
pub use train::{EvalReport, LossEstimate, Trainer};
