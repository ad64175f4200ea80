//! Two runs with the same seed must agree exactly.
//!
//! Kept alone in this binary: the libtorch generator is process-global, so
//! concurrent tests would interleave draws from it.

use charformer::{
    DataSet, GptModel, ModelConfig, Tokenizer, Trainer, TrainingConfig, generate_text,
};
use tch::Device;

const CORPUS: &str = "First Citizen:\nBefore we proceed any further, hear me speak.\n";

fn run(seed: u64) -> (Vec<f64>, String) {
    let text = CORPUS.repeat(10);
    let tokenizer = Tokenizer::from_corpus(&text);
    let dataset = DataSet::new(tokenizer.encode(&text).unwrap());
    let model_config = ModelConfig {
        vocab_size: tokenizer.vocab_size(),
        context_length: 8,
        embed_width: 16,
        num_heads: 2,
        num_layers: 1,
        dropout: 0.1,
        ..Default::default()
    };
    let config = TrainingConfig {
        batch_size: 4,
        max_iters: 5,
        eval_interval: 2,
        eval_iters: 2,
        random_seed: seed,
        ..Default::default()
    };
    let mut trainer = Trainer::<GptModel>::new(Device::Cpu, &model_config, config, dataset).unwrap();
    let mut losses = Vec::new();
    trainer
        .train(|report| {
            losses.push(report.loss.train);
            losses.push(report.loss.val);
        })
        .unwrap();
    let text = generate_text(trainer.model(), Device::Cpu, &tokenizer, &[0], 20, 1.0, |_| {}).unwrap();
    (losses, text)
}

#[test]
fn test_same_seed_same_run() {
    let (losses_a, text_a) = run(1337);
    let (losses_b, text_b) = run(1337);
    assert_eq!(losses_a.len(), 6);
    assert_eq!(losses_a, losses_b);
    assert_eq!(text_a, text_b);
    assert_eq!(text_a.chars().count(), 21);

    let (losses_c, _) = run(7);
    assert_ne!(losses_a, losses_c, "a different seed should change the run");
}
