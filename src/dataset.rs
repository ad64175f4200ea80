use std::path::{Path, PathBuf};

use rand::Rng;
use tch::{Device, Tensor};

use crate::constants::TRAIN_VALIDATION_SPLIT;
use crate::error::{Error, Result};

/// Reads the corpus at `path` into memory.
///
/// A directory is treated as one corpus: every regular file beneath it is read in
/// sorted path order and the contents are concatenated.
pub fn load_corpus(path: &Path) -> Result<String> {
    let text = if path.is_dir() {
        let mut text = String::new();
        for file in enumerate_files(path) {
            text.push_str(&std::fs::read_to_string(file)?);
        }
        text
    } else {
        std::fs::read_to_string(path)?
    };
    if text.is_empty() {
        return Err(Error::EmptyCorpus);
    }
    Ok(text)
}

fn enumerate_files(data_dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(data_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Validation,
}

/// The encoded corpus, partitioned into a leading training slice and a trailing
/// validation slice.
#[derive(Debug, Clone)]
pub struct DataSet {
    training: Vec<i64>,
    validation: Vec<i64>,
}

impl DataSet {
    pub fn new(mut tokens: Vec<i64>) -> Self {
        let boundary = (TRAIN_VALIDATION_SPLIT * tokens.len() as f64) as usize;
        let validation = tokens.split_off(boundary);
        DataSet {
            training: tokens,
            validation,
        }
    }

    pub fn split(&self, split: Split) -> &[i64] {
        match split {
            Split::Train => &self.training,
            Split::Validation => &self.validation,
        }
    }

    /// Samples a batch from the given split onto `device`.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        split: Split,
        batch_size: usize,
        context_length: usize,
        device: Device,
        rng: &mut R,
    ) -> Result<(Tensor, Tensor)> {
        let (x, y) = sample_batch(self.split(split), batch_size, context_length, rng)?;
        Ok((x.to_device(device), y.to_device(device)))
    }
}

/// Draws `batch_size` windows of `context_length` tokens at uniformly random
/// offsets, paired with the same windows shifted one token forward.
pub fn sample_batch<R: Rng + ?Sized>(
    tokens: &[i64],
    batch_size: usize,
    context_length: usize,
    rng: &mut R,
) -> Result<(Tensor, Tensor)> {
    if tokens.len() <= context_length {
        return Err(Error::InsufficientData {
            len: tokens.len(),
            context_length,
        });
    }
    let offsets: Vec<usize> = (0..batch_size)
        .map(|_| rng.random_range(0..tokens.len() - context_length))
        .collect();
    batch_at(tokens, &offsets, context_length)
}

/// Builds the `(inputs, targets)` pair, each `[offsets.len(), context_length]`,
/// from explicit window offsets.
pub fn batch_at(
    tokens: &[i64],
    offsets: &[usize],
    context_length: usize,
) -> Result<(Tensor, Tensor)> {
    let mut inputs = Vec::with_capacity(offsets.len() * context_length);
    let mut targets = Vec::with_capacity(offsets.len() * context_length);
    for &offset in offsets {
        if offset + context_length >= tokens.len() {
            return Err(Error::InsufficientData {
                len: tokens.len(),
                context_length,
            });
        }
        inputs.extend_from_slice(&tokens[offset..offset + context_length]);
        targets.extend_from_slice(&tokens[offset + 1..offset + context_length + 1]);
    }
    let shape = [offsets.len() as i64, context_length as i64];
    Ok((
        Tensor::from_slice(&inputs).view(shape),
        Tensor::from_slice(&targets).view(shape),
    ))
}
