//! Run configuration: model shape, training schedule and sampling options.
//!
//! Every field has a default (see [`crate::constants`]), so a JSON config file
//! only needs to name the values it changes.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tch::Device;

use crate::constants;
use crate::error::{Error, Result};

/// Which language model to train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Next-token logits looked up from the current token alone.
    Bigram,
    /// Stacked causal self-attention blocks.
    Gpt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    /// The first CUDA device, falling back to the CPU when none is present.
    Cuda,
}

impl DeviceKind {
    pub fn device(self) -> Device {
        match self {
            DeviceKind::Cpu => Device::Cpu,
            DeviceKind::Cuda => Device::cuda_if_available(),
        }
    }
}

/// Model architecture hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub kind: ModelKind,
    /// Filled in from the corpus vocabulary; any value in a config file is overwritten.
    pub vocab_size: usize,
    pub context_length: usize,
    pub embed_width: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            kind: ModelKind::Gpt,
            vocab_size: 0,
            context_length: constants::CONTEXT_LENGTH,
            embed_width: constants::EMBEDDING_DIM,
            num_heads: constants::HEADS,
            num_layers: constants::LAYERS,
            dropout: constants::DROPOUT,
        }
    }
}

impl ModelConfig {
    pub fn head_size(&self) -> usize {
        self.embed_width / self.num_heads
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(Error::InvalidConfig("vocab_size must be positive".into()));
        }
        if self.context_length == 0 {
            return Err(Error::InvalidConfig("context_length must be positive".into()));
        }
        if self.embed_width == 0 || self.num_heads == 0 || self.num_layers == 0 {
            return Err(Error::InvalidConfig(
                "embed_width, num_heads and num_layers must be positive".into(),
            ));
        }
        if self.embed_width % self.num_heads != 0 {
            return Err(Error::InvalidHeadConfiguration {
                embed_width: self.embed_width,
                num_heads: self.num_heads,
            });
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Training loop hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub max_iters: usize,
    pub eval_interval: usize,
    pub eval_iters: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Seeds batch sampling, weight init, dropout and generation.
    pub random_seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            batch_size: constants::BATCH_SIZE,
            max_iters: constants::MAX_ITERS,
            eval_interval: constants::EVAL_INTERVAL,
            eval_iters: constants::EVAL_ITERS,
            learning_rate: constants::LEARNING_RATE,
            weight_decay: constants::WEIGHT_DECAY,
            random_seed: constants::SEED,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.eval_interval == 0 || self.eval_iters == 0 {
            return Err(Error::InvalidConfig(
                "batch_size, eval_interval and eval_iters must be positive".into(),
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.weight_decay < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub temperature: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            max_new_tokens: constants::MAX_NEW_TOKENS,
            temperature: constants::TEMPERATURE,
        }
    }
}

/// Complete run configuration, as loaded from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceKind,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub generation: GenerationConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.training.validate()?;
        if !(self.generation.temperature > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "temperature must be positive, got {}",
                self.generation.temperature
            )));
        }
        Ok(())
    }
}
