/// Rows per sampled batch.
pub const BATCH_SIZE: usize = 64;
/// The maximum context length the model attends over; also the size of the positional table.
pub const CONTEXT_LENGTH: usize = 256;
/// Total number of optimizer steps.
pub const MAX_ITERS: usize = 5000;
/// Evaluate and report train/validation loss every this many steps.
pub const EVAL_INTERVAL: usize = 500;
/// Number of batches averaged per loss estimate.
pub const EVAL_ITERS: usize = 200;
pub const LEARNING_RATE: f64 = 3e-4;
/// Decoupled weight decay for AdamW (the PyTorch default).
pub const WEIGHT_DECAY: f64 = 0.01;
/// The number of dimensions in the embedding space.
pub const EMBEDDING_DIM: usize = 384;
/// The number of "heads" (attention passes) per block.
pub const HEADS: usize = 6;
/// Number of stacked transformer blocks.
pub const LAYERS: usize = 6;
pub const DROPOUT: f64 = 0.2;
pub const SEED: u64 = 1337;

/// Width multiplier of the feed-forward hidden layer.
pub const FFN_EXPANSION: i64 = 4;
/// Standard deviation of the normal distribution used for weight init.
pub const INIT_STD: f64 = 0.02;

/// Characters sampled after training.
pub const MAX_NEW_TOKENS: usize = 500;
pub const TEMPERATURE: f64 = 1.0;

/// The fraction of the token stream used for training; the rest is used for validation.
pub const TRAIN_VALIDATION_SPLIT: f64 = 0.9;
