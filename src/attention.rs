//! Causal scaled dot-product self-attention, single and multi-head.

use tch::{
    Device,
    Kind::{Bool, Float},
    Tensor,
    nn::{self, Linear, ModuleT, Path},
};

use crate::config::ModelConfig;
use crate::constants::INIT_STD;
use crate::error::{Error, Result};

/// Linear layer with `N(0, INIT_STD)` weights and, when `bias` is set, zero biases.
pub(crate) fn linear(vs: Path, in_dim: i64, out_dim: i64, bias: bool) -> Linear {
    let config = nn::LinearConfig {
        ws_init: nn::Init::Randn {
            mean: 0.0,
            stdev: INIT_STD,
        },
        bs_init: Some(nn::Init::Const(0.0)),
        bias,
    };
    nn::linear(vs, in_dim, out_dim, config)
}

/// Lower-triangular `[context_length, context_length]` matrix of allowed
/// query/key pairs. Built once; clones share the same storage.
#[derive(Debug)]
pub struct CausalMask {
    allowed: Tensor,
}

impl CausalMask {
    pub fn new(context_length: i64, device: Device) -> Self {
        let allowed = Tensor::ones([context_length, context_length], (Bool, device)).tril(0);
        CausalMask { allowed }
    }

    /// Sets every score where the key comes after the query to `-inf`.
    /// `scores` is `[..., T, T]` with `T` at most the context length.
    fn apply(&self, scores: &Tensor) -> Tensor {
        let t = scores.size()[scores.dim() - 1];
        let future = self
            .allowed
            .narrow(0, 0, t)
            .narrow(1, 0, t)
            .logical_not();
        scores.masked_fill(&future, f64::NEG_INFINITY)
    }
}

impl Clone for CausalMask {
    fn clone(&self) -> Self {
        CausalMask {
            allowed: self.allowed.shallow_clone(),
        }
    }
}

/// Single-head attention mechanism.
/// Takes an input of shape `[batch, seq_len, embed_dim]` and produces
/// `[batch, seq_len, head_size]`, where each position's output is a weighted
/// combination of its own and earlier positions' values.
#[derive(Debug)]
pub struct AttentionHead {
    query: Linear,
    key: Linear,
    value: Linear,
    head_size: i64,
    mask: CausalMask,
    dropout: f64,
}

impl AttentionHead {
    pub fn new(vs: &Path, embed_width: i64, head_size: i64, mask: CausalMask, dropout: f64) -> Self {
        AttentionHead {
            query: linear(vs / "query", embed_width, head_size, false),
            key: linear(vs / "key", embed_width, head_size, false),
            value: linear(vs / "value", embed_width, head_size, false),
            head_size,
            mask,
            dropout,
        }
    }

    /// Post-softmax attention weights, `[batch, seq_len, seq_len]`. Row `i` sums to
    /// one over keys `0..=i` and is zero beyond; dropout is applied when `train`.
    pub fn attention_weights(&self, xs: &Tensor, train: bool) -> Tensor {
        let q = xs.apply(&self.query);
        let k = xs.apply(&self.key);
        let scores = q.matmul(&k.transpose(-2, -1)) / (self.head_size as f64).sqrt();
        self.mask
            .apply(&scores)
            .softmax(-1, Float)
            .dropout(self.dropout, train)
    }
}

impl ModuleT for AttentionHead {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let v = xs.apply(&self.value);
        self.attention_weights(xs, train).matmul(&v)
    }
}

/// Several attention heads run side by side, concatenated and projected back to
/// the embedding width.
#[derive(Debug)]
pub struct MultiHeadAttention {
    heads: Vec<AttentionHead>,
    projection: Linear,
    dropout: f64,
}

impl MultiHeadAttention {
    pub fn new(vs: &Path, config: &ModelConfig, mask: &CausalMask) -> Result<Self> {
        if config.num_heads == 0 || config.embed_width % config.num_heads != 0 {
            return Err(Error::InvalidHeadConfiguration {
                embed_width: config.embed_width,
                num_heads: config.num_heads,
            });
        }
        let embed_width = config.embed_width as i64;
        let head_size = config.head_size() as i64;
        let heads = (0..config.num_heads)
            .map(|i| {
                AttentionHead::new(
                    &(vs / "heads" / i),
                    embed_width,
                    head_size,
                    mask.clone(),
                    config.dropout,
                )
            })
            .collect();
        Ok(MultiHeadAttention {
            heads,
            projection: linear(vs / "projection", embed_width, embed_width, true),
            dropout: config.dropout,
        })
    }

    pub fn heads(&self) -> &[AttentionHead] {
        &self.heads
    }
}

impl ModuleT for MultiHeadAttention {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let outputs: Vec<Tensor> = self
            .heads
            .iter()
            .map(|head| head.forward_t(xs, train))
            .collect();
        Tensor::cat(&outputs, -1)
            .apply(&self.projection)
            .dropout(self.dropout, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use tch::{Device, Kind, Tensor, nn};

    const EMBED: i64 = 16;

    fn config(embed_width: usize, num_heads: usize) -> ModelConfig {
        ModelConfig {
            vocab_size: 10,
            context_length: 8,
            embed_width,
            num_heads,
            num_layers: 1,
            dropout: 0.0,
            ..Default::default()
        }
    }

    fn head(vs: &nn::VarStore, dropout: f64) -> AttentionHead {
        AttentionHead::new(
            &vs.root(),
            EMBED,
            4,
            CausalMask::new(8, Device::Cpu),
            dropout,
        )
    }

    fn random_embed_input(batch: i64, seq_len: i64) -> Tensor {
        Tensor::randn([batch, seq_len, EMBED], (Kind::Float, Device::Cpu))
    }

    #[test]
    fn test_single_head_output_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = head(&vs, 0.0);
        let output = head.forward_t(&random_embed_input(2, 8), false);
        assert_eq!(output.size(), &[2, 8, 4]);
        let output = head.forward_t(&random_embed_input(1, 1), false);
        assert_eq!(output.size(), &[1, 1, 4]);
    }

    #[test]
    fn test_weights_are_causal_and_normalised() {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = head(&vs, 0.0);
        let weights = head.attention_weights(&random_embed_input(3, 6), false);
        assert_eq!(weights.size(), &[3, 6, 6]);

        let row_sums = weights.sum_dim_intlist(-1, false, Kind::Float);
        let max_err = (row_sums - 1.0).abs().max();
        assert!(f64::try_from(&max_err).unwrap() < 1e-5);

        let future = Tensor::ones([6, 6], (Kind::Bool, Device::Cpu)).triu(1);
        let leaked = weights.masked_select(&future).abs().sum(Kind::Float);
        assert_eq!(f64::try_from(&leaked).unwrap(), 0.0);
    }

    #[test]
    fn test_single_head_causal_masking() {
        // Changing a future token must not affect earlier positions.
        let vs = nn::VarStore::new(Device::Cpu);
        let head = head(&vs, 0.0);

        let input_a = random_embed_input(1, 4);
        let output_a = head.forward_t(&input_a, false);
        let mut input_b = input_a.copy();
        input_b.narrow(1, 3, 1).copy_(&random_embed_input(1, 1));
        let output_b = head.forward_t(&input_b, false);

        for pos in 0..3 {
            let diff = (output_a.get(0).get(pos) - output_b.get(0).get(pos))
                .abs()
                .sum(Kind::Float);
            assert!(
                f64::try_from(&diff).unwrap() < 1e-5,
                "Position {} changed when only a future token was modified",
                pos
            );
        }
        let diff3 = (output_a.get(0).get(3) - output_b.get(0).get(3))
            .abs()
            .sum(Kind::Float);
        assert!(f64::try_from(&diff3).unwrap() > 1e-5);
    }

    #[test]
    fn test_dropout_only_in_training() {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = head(&vs, 0.5);
        let input = random_embed_input(2, 8);
        let eval_a = head.forward_t(&input, false);
        let eval_b = head.forward_t(&input, false);
        assert!(eval_a.allclose(&eval_b, 1e-6, 1e-6, false));

        // Dropout zeroes weights on or below the diagonal; future weights stay zero.
        let weights = head.attention_weights(&input, true);
        let future = Tensor::ones([8, 8], (Kind::Bool, Device::Cpu)).triu(1);
        let leaked = weights.masked_select(&future).abs().sum(Kind::Float);
        assert_eq!(f64::try_from(&leaked).unwrap(), 0.0);
        let zeros = weights.eq(0.0).sum(Kind::Int64);
        assert!(i64::try_from(&zeros).unwrap() > 2 * 28);
    }

    #[test]
    fn test_multi_head_output_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mask = CausalMask::new(8, Device::Cpu);
        let mha = MultiHeadAttention::new(&vs.root(), &config(16, 4), &mask).unwrap();
        assert_eq!(mha.heads().len(), 4);
        let output = mha.forward_t(&random_embed_input(2, 8), false);
        assert_eq!(output.size(), &[2, 8, EMBED]);
        let output = mha.forward_t(&random_embed_input(1, 1), false);
        assert_eq!(output.size(), &[1, 1, EMBED]);
    }

    #[test]
    fn test_multi_head_causal_masking() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mask = CausalMask::new(8, Device::Cpu);
        let mha = MultiHeadAttention::new(&vs.root(), &config(16, 2), &mask).unwrap();

        let input_a = random_embed_input(1, 5);
        let output_a = mha.forward_t(&input_a, false);
        let input_b = input_a.copy();
        input_b.narrow(1, 4, 1).copy_(&random_embed_input(1, 1));
        let output_b = mha.forward_t(&input_b, false);

        let earlier_a = output_a.narrow(1, 0, 4);
        let earlier_b = output_b.narrow(1, 0, 4);
        assert!(earlier_a.allclose(&earlier_b, 1e-5, 1e-5, false));
    }

    #[test]
    fn test_invalid_head_configuration() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mask = CausalMask::new(8, Device::Cpu);
        let result = MultiHeadAttention::new(&vs.root(), &config(8, 3), &mask);
        assert!(matches!(
            result,
            Err(Error::InvalidHeadConfiguration {
                embed_width: 8,
                num_heads: 3
            })
        ));
    }

    #[test]
    fn test_heads_own_their_weights() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mask = CausalMask::new(8, Device::Cpu);
        let _mha = MultiHeadAttention::new(&vs.root(), &config(16, 4), &mask).unwrap();
        let variables = vs.variables();
        // 4 heads × (query, key, value), plus the projection's weight and bias
        assert_eq!(variables.len(), 4 * 3 + 2);
        assert!(variables.contains_key("heads.0.query.weight"));
        assert!(variables.contains_key("heads.3.value.weight"));
        assert!(!variables.contains_key("heads.0.query.bias"));
        assert!(variables.contains_key("projection.bias"));
    }
}
