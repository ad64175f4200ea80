use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use charformer::{
    BigramModel, Config, DataSet, GptModel, LanguageModel, ModelKind, Split, Tokenizer, Trainer,
    config::DeviceKind, dataset, generate_text,
};
use clap::Parser;
use log::info;

/// Train a character-level language model on a text corpus and sample from it.
#[derive(Parser, Debug)]
#[command(name = "charformer")]
#[command(about = "Train a character-level GPT and sample text from it", long_about = None)]
struct Args {
    /// Text file, or directory of text files, to train on
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// JSON configuration file; command-line options override its values
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write the generated text to this file
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    #[arg(long, value_enum)]
    model: Option<ModelKind>,

    #[arg(long, value_enum)]
    device: Option<DeviceKind>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Attention span and positional table size
    #[arg(long, alias = "block-size")]
    context_length: Option<usize>,

    #[arg(long)]
    max_iters: Option<usize>,

    #[arg(long)]
    eval_interval: Option<usize>,

    #[arg(long)]
    eval_iters: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    weight_decay: Option<f64>,

    #[arg(long, alias = "n-embd")]
    embed_width: Option<usize>,

    #[arg(long, alias = "n-head")]
    num_heads: Option<usize>,

    #[arg(long, alias = "n-layer")]
    num_layers: Option<usize>,

    #[arg(long)]
    dropout: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Characters to sample after training
    #[arg(long)]
    max_new_tokens: Option<usize>,

    #[arg(long)]
    temperature: Option<f64>,
}

impl Args {
    /// The config file (or defaults) with every command-line override applied.
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        let model = &mut config.model;
        model.kind = self.model.unwrap_or(model.kind);
        model.context_length = self.context_length.unwrap_or(model.context_length);
        model.embed_width = self.embed_width.unwrap_or(model.embed_width);
        model.num_heads = self.num_heads.unwrap_or(model.num_heads);
        model.num_layers = self.num_layers.unwrap_or(model.num_layers);
        model.dropout = self.dropout.unwrap_or(model.dropout);

        let training = &mut config.training;
        training.batch_size = self.batch_size.unwrap_or(training.batch_size);
        training.max_iters = self.max_iters.unwrap_or(training.max_iters);
        training.eval_interval = self.eval_interval.unwrap_or(training.eval_interval);
        training.eval_iters = self.eval_iters.unwrap_or(training.eval_iters);
        training.learning_rate = self.learning_rate.unwrap_or(training.learning_rate);
        training.weight_decay = self.weight_decay.unwrap_or(training.weight_decay);
        training.random_seed = self.seed.unwrap_or(training.random_seed);

        let generation = &mut config.generation;
        generation.max_new_tokens = self.max_new_tokens.unwrap_or(generation.max_new_tokens);
        generation.temperature = self.temperature.unwrap_or(generation.temperature);

        config.device = self.device.unwrap_or(config.device);
        Ok(config)
    }
}

fn run<M: LanguageModel>(
    config: &Config,
    tokenizer: &Tokenizer,
    dataset: DataSet,
    args: &Args,
) -> Result<()> {
    let device = config.device.device();
    info!("training {:?} model on {:?}", config.model.kind, device);
    let mut trainer = Trainer::<M>::new(device, &config.model, config.training.clone(), dataset)?;
    trainer
        .train(|report| {
            println!(
                "step {}: train loss {:.4}, val loss {:.4}",
                report.step, report.loss.train, report.loss.val
            )
        })
        .context("training failed")?;

    // Sampling starts from token 0, like a blank line in most corpora.
    tch::manual_seed(config.training.random_seed as i64);
    let stdout = std::io::stdout();
    let text = generate_text(
        trainer.model(),
        device,
        tokenizer,
        &[0],
        config.generation.max_new_tokens,
        config.generation.temperature,
        |s| {
            let mut out = stdout.lock();
            let _ = out.write_all(s.as_bytes());
            let _ = out.flush();
        },
    )
    .context("generation failed")?;
    println!();

    if let Some(path) = &args.output {
        std::fs::write(path, &text)
            .with_context(|| format!("Failed to write generated text: {:?}", path))?;
        info!("wrote {} characters to {:?}", text.chars().count(), path);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut config = args.resolve_config()?;

    let text = dataset::load_corpus(&args.input)
        .with_context(|| format!("Failed to load corpus: {:?}", args.input))?;
    let tokenizer = Tokenizer::from_corpus(&text);
    config.model.vocab_size = tokenizer.vocab_size();
    config.validate().context("invalid configuration")?;
    info!(
        "corpus: {} characters, vocabulary of {}: {:?}",
        text.chars().count(),
        tokenizer.vocab_size(),
        tokenizer.chars().iter().collect::<String>()
    );

    let dataset = DataSet::new(tokenizer.encode(&text)?);
    info!(
        "split: {} train / {} validation tokens",
        dataset.split(Split::Train).len(),
        dataset.split(Split::Validation).len()
    );

    match config.model.kind {
        ModelKind::Gpt => run::<GptModel>(&config, &tokenizer, dataset, &args),
        ModelKind::Bigram => run::<BigramModel>(&config, &tokenizer, dataset, &args),
    }
}
