use tch::{
    Kind::Int64,
    Tensor,
    nn::{self, Embedding, LayerNorm, Linear, ModuleT, Path, SequentialT, VarStore},
};

use crate::attention::{CausalMask, MultiHeadAttention, linear};
use crate::config::ModelConfig;
use crate::constants::{FFN_EXPANSION, INIT_STD};
use crate::error::{Error, Result};

/// An autoregressive model mapping token ids `[batch, seq_len]` to next-token
/// logits `[batch, seq_len, vocab_size]`. Dropout is active only when `train` is set.
pub trait LanguageModel: Sized {
    /// Creates the model's parameters under `vs`.
    fn build(vs: &Path, config: &ModelConfig) -> Result<Self>;

    /// The longest input the model accepts.
    fn context_length(&self) -> usize;

    fn logits_t(&self, idx: &Tensor, train: bool) -> Result<Tensor>;

    /// Returns the logits and, when `targets` is given, the mean cross-entropy
    /// loss over every position.
    fn forward_t(
        &self,
        idx: &Tensor,
        targets: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let logits = self.logits_t(idx, train)?;
        let loss = targets.map(|targets| cross_entropy(&logits, targets));
        Ok((logits, loss))
    }

    fn loss_t(&self, idx: &Tensor, targets: &Tensor, train: bool) -> Result<Tensor> {
        Ok(cross_entropy(&self.logits_t(idx, train)?, targets))
    }
}

/// Mean of `-log softmax(logits)[target]` over all `batch * seq_len` positions.
fn cross_entropy(logits: &Tensor, targets: &Tensor) -> Tensor {
    let vocab_size = logits.size()[2];
    logits
        .view([-1, vocab_size])
        .cross_entropy_for_logits(&targets.view([-1]))
}

fn embedding_config() -> nn::EmbeddingConfig {
    nn::EmbeddingConfig {
        ws_init: nn::Init::Randn {
            mean: 0.0,
            stdev: INIT_STD,
        },
        ..Default::default()
    }
}

/// Total number of trainable scalars in `vs`.
pub fn parameter_count(vs: &VarStore) -> usize {
    vs.trainable_variables().iter().map(Tensor::numel).sum()
}

#[derive(Debug)]
struct Embeddings {
    token: Embedding,
    position: Embedding,
}

impl Embeddings {
    fn new(vs: &Path, vocab_size: i64, context_length: i64, embed_width: i64) -> Self {
        Embeddings {
            token: nn::embedding(vs / "token", vocab_size, embed_width, embedding_config()),
            position: nn::embedding(vs / "position", context_length, embed_width, embedding_config()),
        }
    }

    /// Takes token ids `[batch, seq_len]` and returns `[batch, seq_len, embed_width]`:
    /// each id replaced by its token embedding plus the embedding of its position.
    fn forward(&self, idx: &Tensor) -> Tensor {
        let token_embeds = idx.apply(&self.token);
        let positions = Tensor::arange(idx.size()[1], (Int64, idx.device()));
        // [seq_len, embed_width] broadcasts over the batch
        token_embeds + positions.apply(&self.position)
    }
}

/// Position-wise expansion, ReLU, and contraction back to the embedding width.
#[derive(Debug)]
pub struct FeedForward {
    expand: Linear,
    contract: Linear,
    dropout: f64,
}

impl FeedForward {
    pub fn new(vs: &Path, embed_width: i64, dropout: f64) -> Self {
        let hidden = FFN_EXPANSION * embed_width;
        FeedForward {
            expand: linear(vs / "expand", embed_width, hidden, true),
            contract: linear(vs / "contract", hidden, embed_width, true),
            dropout,
        }
    }
}

impl ModuleT for FeedForward {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.apply(&self.expand)
            .relu()
            .apply(&self.contract)
            .dropout(self.dropout, train)
    }
}

/// Pre-norm transformer block: `x + attn(ln(x))`, then `x + ffn(ln(x))`.
#[derive(Debug)]
pub struct Block {
    attention_norm: LayerNorm,
    attention: MultiHeadAttention,
    feed_forward_norm: LayerNorm,
    feed_forward: FeedForward,
}

impl Block {
    pub fn new(vs: &Path, config: &ModelConfig, mask: &CausalMask) -> Result<Self> {
        let embed_width = config.embed_width as i64;
        Ok(Block {
            attention_norm: nn::layer_norm(vs / "attention_norm", vec![embed_width], Default::default()),
            attention: MultiHeadAttention::new(&(vs / "attention"), config, mask)?,
            feed_forward_norm: nn::layer_norm(vs / "feed_forward_norm", vec![embed_width], Default::default()),
            feed_forward: FeedForward::new(&(vs / "feed_forward"), embed_width, config.dropout),
        })
    }
}

impl ModuleT for Block {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = xs + xs
            .apply(&self.attention_norm)
            .apply_t(&self.attention, train);
        let ys = xs
            .apply(&self.feed_forward_norm)
            .apply_t(&self.feed_forward, train);
        xs + ys
    }
}

/// Decoder-only transformer: embeddings, stacked blocks, final norm, and a
/// projection to vocabulary logits.
#[derive(Debug)]
pub struct GptModel {
    embeddings: Embeddings,
    blocks: SequentialT,
    final_norm: LayerNorm,
    lm_head: Linear,
    context_length: usize,
}

impl LanguageModel for GptModel {
    fn build(vs: &Path, config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let vocab_size = config.vocab_size as i64;
        let context_length = config.context_length as i64;
        let embed_width = config.embed_width as i64;

        let mask = CausalMask::new(context_length, vs.device());
        let mut blocks = nn::seq_t();
        for i in 0..config.num_layers {
            blocks = blocks.add(Block::new(&(vs / "blocks" / i), config, &mask)?);
        }
        Ok(GptModel {
            embeddings: Embeddings::new(&(vs / "embeddings"), vocab_size, context_length, embed_width),
            blocks,
            final_norm: nn::layer_norm(vs / "final_norm", vec![embed_width], Default::default()),
            lm_head: linear(vs / "lm_head", embed_width, vocab_size, true),
            context_length: config.context_length,
        })
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn logits_t(&self, idx: &Tensor, train: bool) -> Result<Tensor> {
        let len = idx.size()[1] as usize;
        if len > self.context_length {
            return Err(Error::SequenceTooLong {
                len,
                context_length: self.context_length,
            });
        }
        Ok(self
            .embeddings
            .forward(idx)
            .apply_t(&self.blocks, train)
            .apply(&self.final_norm)
            .apply(&self.lm_head))
    }
}

/// Each token's row of a `[vocab_size, vocab_size]` table is read directly as the
/// logits for the next token.
#[derive(Debug)]
pub struct BigramModel {
    token_logits: Embedding,
    context_length: usize,
}

impl LanguageModel for BigramModel {
    fn build(vs: &Path, config: &ModelConfig) -> Result<Self> {
        if config.vocab_size == 0 || config.context_length == 0 {
            return Err(Error::InvalidConfig(
                "vocab_size and context_length must be positive".into(),
            ));
        }
        let vocab_size = config.vocab_size as i64;
        Ok(BigramModel {
            token_logits: nn::embedding(vs / "token_logits", vocab_size, vocab_size, Default::default()),
            context_length: config.context_length,
        })
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn logits_t(&self, idx: &Tensor, _train: bool) -> Result<Tensor> {
        Ok(idx.apply(&self.token_logits))
    }
}
