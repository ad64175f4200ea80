use tch::{Device, IndexOp, Kind::Float, NoGradGuard, Tensor};

use crate::error::{Error, Result};
use crate::model::LanguageModel;
use crate::tokenizer::Tokenizer;

/// Extends `idx` (`[batch, seq_len]`) by `max_new_tokens` sampled tokens and
/// returns the whole `[batch, seq_len + max_new_tokens]` sequence.
pub fn generate<M: LanguageModel>(model: &M, idx: &Tensor, max_new_tokens: usize) -> Result<Tensor> {
    let mut generation = Generation::new(model, idx, max_new_tokens);
    for step in generation.by_ref() {
        step?;
    }
    Ok(generation.into_sequence())
}

/// Samples `max_new_tokens` characters following `prompt` and streams each one
/// to `on_char` as it is drawn. Returns the full text, prompt included.
pub fn generate_text<M: LanguageModel>(
    model: &M,
    device: Device,
    tokenizer: &Tokenizer,
    prompt: &[i64],
    max_new_tokens: usize,
    temperature: f64,
    mut on_char: impl FnMut(&str),
) -> Result<String> {
    if prompt.is_empty() {
        return Err(Error::InvalidConfig("prompt must hold at least one token".into()));
    }
    let idx = Tensor::from_slice(prompt).to_device(device).unsqueeze(0);
    let mut generation = Generation::new(model, &idx, max_new_tokens).with_temperature(temperature);
    for column in generation.by_ref() {
        let id = i64::try_from(&column?.view([-1]).get(0))?;
        on_char(&tokenizer.decode(&[id])?);
    }
    let sequence = Vec::<i64>::try_from(&generation.into_sequence().view([-1]))?;
    tokenizer.decode(&sequence)
}

/// Autoregressive sampling, one token per row per call to `next`.
///
/// Each step feeds the last `context_length` tokens to the model, turns the
/// final position's logits into a distribution, and draws from it. Gradient
/// tracking stays off for the lifetime of the iterator.
pub struct Generation<'a, M: LanguageModel> {
    _no_grad_guard: NoGradGuard,
    model: &'a M,
    sequence: Tensor,
    remaining: usize,
    temperature: f64,
}

impl<'a, M: LanguageModel> Generation<'a, M> {
    pub fn new(model: &'a M, idx: &Tensor, max_new_tokens: usize) -> Self {
        Generation {
            _no_grad_guard: tch::no_grad_guard(),
            model,
            sequence: idx.shallow_clone(),
            remaining: max_new_tokens,
            temperature: 1.0,
        }
    }

    /// Divides the logits by `temperature` before sampling. Must be positive.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// The prompt followed by every token sampled so far.
    pub fn into_sequence(self) -> Tensor {
        self.sequence
    }

    fn step(&mut self) -> Result<Tensor> {
        if !(self.temperature > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        // Trim the window to the positional table's capacity
        let len = self.sequence.size()[1];
        let context_length = self.model.context_length() as i64;
        let window = if len > context_length {
            self.sequence.narrow(1, len - context_length, context_length)
        } else {
            self.sequence.shallow_clone()
        };
        let logits = self.model.logits_t(&window, false)?;
        // [batch, vocab_size] at the final position
        let last = logits.i((.., -1, ..)) / self.temperature;
        let next = last.softmax(-1, Float).multinomial(1, false);
        self.sequence = Tensor::cat(&[&self.sequence, &next], 1);
        Ok(next)
    }
}

impl<M: LanguageModel> Iterator for Generation<'_, M> {
    /// The sampled column, `[batch, 1]`.
    type Item = Result<Tensor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let step = self.step();
        if step.is_err() {
            self.remaining = 0;
        }
        Some(step)
    }
}
