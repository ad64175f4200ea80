use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng};
use tch::{
    Device, Tensor,
    nn::{AdamW, Optimizer, OptimizerConfig, VarStore},
};

use crate::config::{ModelConfig, TrainingConfig};
use crate::dataset::{DataSet, Split};
use crate::error::{Error, Result};
use crate::model::{LanguageModel, parameter_count};

/// Mean loss on each split, as measured by [`Trainer::estimate_loss`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossEstimate {
    pub train: f64,
    pub val: f64,
}

/// One evaluation during training, handed to the reporting callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    pub step: usize,
    pub loss: LossEstimate,
}

/// Owns the model's parameters and the optimizer that updates them.
pub struct Trainer<M: LanguageModel> {
    var_store: VarStore,
    model: M,
    optimizer: Optimizer,
    dataset: DataSet,
    config: TrainingConfig,
    context_length: usize,
    rng: StdRng,
}

impl<M: LanguageModel> Trainer<M> {
    /// Seeds every source of randomness from `config.random_seed`, then builds
    /// the model and its AdamW optimizer.
    pub fn new(
        device: Device,
        model_config: &ModelConfig,
        config: TrainingConfig,
        dataset: DataSet,
    ) -> Result<Self> {
        config.validate()?;
        tch::manual_seed(config.random_seed as i64);
        let var_store = VarStore::new(device);
        let model = M::build(&var_store.root(), model_config)?;
        let optimizer = AdamW {
            wd: config.weight_decay,
            ..Default::default()
        }
        .build(&var_store, config.learning_rate)?;
        info!(
            "{:.2}M parameters",
            parameter_count(&var_store) as f64 / 1e6
        );
        Ok(Trainer {
            var_store,
            model,
            optimizer,
            dataset,
            context_length: model_config.context_length,
            rng: StdRng::seed_from_u64(config.random_seed),
            config,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn var_store(&self) -> &VarStore {
        &self.var_store
    }

    fn sample(&mut self, split: Split) -> Result<(Tensor, Tensor)> {
        self.dataset.sample(
            split,
            self.config.batch_size,
            self.context_length,
            self.var_store.device(),
            &mut self.rng,
        )
    }

    /// Averages the loss over `eval_iters` fresh batches from each split, with
    /// dropout off and gradient tracking disabled.
    pub fn estimate_loss(&mut self) -> Result<LossEstimate> {
        // Restores gradient tracking on drop, including early returns.
        let _no_grad = tch::no_grad_guard();
        Ok(LossEstimate {
            train: self.mean_loss(Split::Train)?,
            val: self.mean_loss(Split::Validation)?,
        })
    }

    fn mean_loss(&mut self, split: Split) -> Result<f64> {
        let mut total = 0.0;
        for _ in 0..self.config.eval_iters {
            let (inputs, targets) = self.sample(split)?;
            let loss = self.model.loss_t(&inputs, &targets, false)?;
            total += f64::try_from(&loss)?;
        }
        Ok(total / self.config.eval_iters as f64)
    }

    /// One optimizer update on a fresh training batch. Returns the batch loss.
    pub fn train_step(&mut self, step: usize) -> Result<f64> {
        let (inputs, targets) = self.sample(Split::Train)?;
        let loss = self.model.loss_t(&inputs, &targets, true)?;
        let value = f64::try_from(&loss)?;
        if !value.is_finite() {
            return Err(Error::NonFiniteLoss { step, loss: value });
        }
        self.optimizer.zero_grad();
        loss.backward();
        self.optimizer.step();
        Ok(value)
    }

    /// Runs `max_iters` steps, estimating the loss every `eval_interval` steps and
    /// on the last one, and passing each estimate to `report`.
    pub fn train(&mut self, mut report: impl FnMut(EvalReport)) -> Result<()> {
        let max_iters = self.config.max_iters;
        for step in 0..max_iters {
            if step % self.config.eval_interval == 0 || step + 1 == max_iters {
                let loss = self.estimate_loss()?;
                info!(
                    "step {}: train loss {:.4}, val loss {:.4}",
                    step, loss.train, loss.val
                );
                report(EvalReport { step, loss });
            }
            let loss = self.train_step(step)?;
            debug!("step {}: batch loss {:.4}", step, loss);
        }
        Ok(())
    }
}
