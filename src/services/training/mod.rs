use crate::algorithms::initializer::seeded_rng;
use crate::algorithms::{Adam, Batch, DeepModel, SimpleModel};
use crate::config::Config;
use crate::error::RecError;
use crate::models::{EpochSummary, TrainingReport};
use crate::services::PreparedData;
use anyhow::{bail, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Both fitted models. Read-only once training has finished.
#[derive(Debug, Clone)]
pub struct TrainedModels {
    pub simple: SimpleModel,
    pub deep: DeepModel,
}

/// Callbacks invoked by the trainer between batches.
pub trait TrainingObserver: Send + Sync {
    fn on_batch(&self, _epoch: usize, _batch: usize, _simple_loss: f32, _deep_loss: f32) {}

    fn on_epoch(&self, _summary: &EpochSummary, _total_epochs: usize) {}

    /// Checked before every batch; returning true ends training with
    /// `RecError::Cancelled`.
    fn should_stop(&self) -> bool {
        false
    }
}

impl TrainingObserver for () {}

/// Live training state shared with readers: status line, per-batch
/// deep-model losses, the running flag and the cancel request.
#[derive(Debug, Default)]
pub struct Progress {
    status: RwLock<String>,
    loss_history: RwLock<Vec<f32>>,
    running: AtomicBool,
    cancel: AtomicBool,
}

impl Progress {
    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        info!("{}", status);
        *self.status.write() = status;
    }

    pub fn status(&self) -> String {
        self.status.read().clone()
    }

    pub fn loss_history(&self) -> Vec<f32> {
        self.loss_history.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

impl TrainingObserver for Progress {
    fn on_batch(&self, epoch: usize, batch: usize, simple_loss: f32, deep_loss: f32) {
        debug!(epoch, batch, simple_loss, deep_loss, "batch finished");
        self.loss_history.write().push(deep_loss);
    }

    fn on_epoch(&self, summary: &EpochSummary, total_epochs: usize) {
        self.set_status(format!(
            "Epoch {}/{}: simple loss {:.4}, deep loss {:.4}",
            summary.epoch + 1,
            total_epochs,
            summary.simple_loss,
            summary.deep_loss
        ));
    }

    fn should_stop(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Marks a training run as active. Only one guard can exist per `Progress`;
/// dropping it clears the flag on every exit path.
#[derive(Debug)]
pub struct TrainingGuard {
    progress: Arc<Progress>,
}

impl TrainingGuard {
    pub fn acquire(progress: &Arc<Progress>) -> Result<Self, RecError> {
        progress
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RecError::TrainingInProgress)?;

        progress.cancel.store(false, Ordering::SeqCst);
        progress.loss_history.write().clear();
        Ok(Self {
            progress: progress.clone(),
        })
    }
}

impl Drop for TrainingGuard {
    fn drop(&mut self) {
        self.progress.running.store(false, Ordering::SeqCst);
    }
}

/// Fits the simple and deep models side by side on the same sequential
/// mini-batches.
pub struct Trainer<'a> {
    data: &'a PreparedData,
    config: &'a Config,
}

impl<'a> Trainer<'a> {
    pub fn new(data: &'a PreparedData, config: &'a Config) -> Self {
        Self { data, config }
    }

    /// Fresh parameter sets for both models, seeded from the model config.
    pub fn init_models(&self) -> TrainedModels {
        let dataset = &self.data.dataset;
        let model_config = &self.config.model;

        let simple = SimpleModel::simple(
            dataset.num_users(),
            dataset.num_items(),
            model_config,
            &mut seeded_rng(model_config.seed, 0),
        );
        let deep = DeepModel::deep(
            dataset.num_users(),
            dataset.num_items(),
            self.data.encoder.user_width(),
            self.data.encoder.item_width(),
            model_config,
            &mut seeded_rng(model_config.seed, 1),
        );

        TrainedModels { simple, deep }
    }

    /// Runs all configured epochs. Batches are contiguous slices of the
    /// interaction sequence in file order, identical across epochs.
    pub fn train(&self, observer: &dyn TrainingObserver) -> Result<(TrainedModels, TrainingReport)> {
        let dataset = &self.data.dataset;
        if dataset.interactions.is_empty() {
            return Err(RecError::precondition("no interactions to train on").into());
        }

        let mut models = self.init_models();
        let mut simple_optimizer = Adam::from_config(&self.config.training);
        let mut deep_optimizer = Adam::from_config(&self.config.training);
        let mut report = TrainingReport::default();

        let epochs = self.config.training.epochs;
        info!(
            "Training on {} interactions, batch size {}, {} epochs",
            dataset.interactions.len(),
            self.config.training.batch_size,
            epochs
        );

        for epoch in 0..epochs {
            let summary = self.run_epoch(
                epoch,
                &mut models,
                &mut simple_optimizer,
                &mut deep_optimizer,
                observer,
                &mut report.loss_history,
            )?;
            info!(
                "Epoch {}/{}: simple loss {:.4}, deep loss {:.4}",
                epoch + 1,
                epochs,
                summary.simple_loss,
                summary.deep_loss
            );
            observer.on_epoch(&summary, epochs);
            report.epochs.push(summary);
        }

        Ok((models, report))
    }

    fn run_epoch(
        &self,
        epoch: usize,
        models: &mut TrainedModels,
        simple_optimizer: &mut Adam,
        deep_optimizer: &mut Adam,
        observer: &dyn TrainingObserver,
        loss_history: &mut Vec<f32>,
    ) -> Result<EpochSummary> {
        let dataset = &self.data.dataset;
        let features = &self.data.features;
        let batch_size = self.config.training.batch_size;

        let mut simple_total = 0.0f32;
        let mut deep_total = 0.0f32;
        let mut batches = 0usize;

        for (batch_no, (users, items)) in dataset
            .user_indices
            .chunks(batch_size)
            .zip(dataset.item_indices.chunks(batch_size))
            .enumerate()
        {
            if observer.should_stop() {
                return Err(RecError::Cancelled.into());
            }

            // Simple model fully updated before the deep model sees the batch.
            let simple_loss = models
                .simple
                .fit_batch(&Batch::new(users, items), simple_optimizer)?;

            let user_features = features.user_rows(users);
            let item_features = features.item_rows(items);
            let batch = Batch::new(users, items)
                .with_features(user_features.view(), item_features.view());
            let deep_loss = models.deep.fit_batch(&batch, deep_optimizer)?;

            if !(simple_loss.is_finite() && deep_loss.is_finite()) {
                bail!(
                    "non-finite loss at epoch {} batch {} (simple {}, deep {})",
                    epoch,
                    batch_no,
                    simple_loss,
                    deep_loss
                );
            }

            simple_total += simple_loss;
            deep_total += deep_loss;
            batches += 1;
            loss_history.push(deep_loss);
            observer.on_batch(epoch, batch_no, simple_loss, deep_loss);
        }

        Ok(EpochSummary {
            epoch,
            simple_loss: simple_total / batches.max(1) as f32,
            deep_loss: deep_total / batches.max(1) as f32,
            batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::Tower;
    use crate::services::dataset::Dataset;
    use crate::models::{Interaction, Item, User, NUM_GENRES};
    use std::collections::HashMap;

    /// Four users with disjoint taste: user u likes items 3u..3u+3.
    fn synthetic() -> PreparedData {
        let mut interactions = Vec::new();
        for round in 0..3u32 {
            for user in 0..4u32 {
                interactions.push(Interaction {
                    user_id: user + 1,
                    item_id: user * 3 + round + 1,
                    rating: 5.0,
                    timestamp: (round * 10 + user) as i64,
                });
            }
        }

        let items: HashMap<u32, Item> = (1..=12)
            .map(|id| {
                let mut genres = [0u8; NUM_GENRES];
                genres[((id - 1) / 3) as usize] = 1;
                (
                    id,
                    Item {
                        title: format!("Movie {}", id),
                        year: Some(1990),
                        genres,
                    },
                )
            })
            .collect();
        let users: HashMap<u32, User> = (1..=4)
            .map(|id| {
                (
                    id,
                    User {
                        age: 0.2 + id as f32 * 0.1,
                        gender: (id % 2) as u8,
                        occupation: ["artist", "doctor"][(id % 2) as usize].to_string(),
                    },
                )
            })
            .collect();

        PreparedData::new(Dataset::build(interactions, items, users, 3))
    }

    fn config(epochs: usize) -> Config {
        let mut config = Config::default();
        config.model.embedding_dim = 8;
        config.model.hidden_units = vec![16, 8];
        config.training.batch_size = 4;
        config.training.epochs = epochs;
        config.training.learning_rate = 0.05;
        config
    }

    #[test]
    fn test_loss_trends_downward() {
        let data = synthetic();
        let config = config(30);

        let (_, report) = Trainer::new(&data, &config).train(&()).unwrap();
        assert_eq!(report.epochs.len(), 30);
        assert_eq!(report.loss_history.len(), 30 * 3);

        let first = &report.epochs[0];
        let last = report.final_epoch().unwrap();
        assert!(report.loss_history.iter().all(|l| l.is_finite() && *l >= 0.0));
        assert!(last.simple_loss < first.simple_loss);
        assert!(last.deep_loss < first.deep_loss);
    }

    #[test]
    fn test_trailing_partial_batch_is_trained() {
        let data = synthetic();
        let mut config = config(1);
        config.training.batch_size = 5;

        let (_, report) = Trainer::new(&data, &config).train(&()).unwrap();
        assert_eq!(report.epochs[0].batches, 3);
    }

    #[test]
    fn test_same_seed_same_models() {
        let data = synthetic();
        let config = config(2);

        let (a, _) = Trainer::new(&data, &config).train(&()).unwrap();
        let (b, _) = Trainer::new(&data, &config).train(&()).unwrap();
        assert_eq!(
            a.deep.item_tower().embeddings(),
            b.deep.item_tower().embeddings()
        );
    }

    #[test]
    fn test_progress_records_every_batch() {
        let data = synthetic();
        let config = config(2);
        let progress = Arc::new(Progress::default());

        let _guard = TrainingGuard::acquire(&progress).unwrap();
        Trainer::new(&data, &config).train(progress.as_ref()).unwrap();

        assert_eq!(progress.loss_history().len(), 6);
        assert!(progress.status().starts_with("Epoch 2/2"));
    }

    #[test]
    fn test_cancel_stops_before_next_batch() {
        let data = synthetic();
        let config = config(5);
        let progress = Progress::default();
        progress.request_cancel();

        let err = Trainer::new(&data, &config).train(&progress).unwrap_err();
        assert!(matches!(err.downcast_ref::<RecError>(), Some(RecError::Cancelled)));
        assert!(progress.loss_history().is_empty());
    }

    #[test]
    fn test_guard_is_exclusive_and_released_on_drop() {
        let progress = Arc::new(Progress::default());

        let guard = TrainingGuard::acquire(&progress).unwrap();
        assert!(progress.is_running());
        assert!(matches!(
            TrainingGuard::acquire(&progress),
            Err(RecError::TrainingInProgress)
        ));

        drop(guard);
        assert!(!progress.is_running());
        assert!(TrainingGuard::acquire(&progress).is_ok());
    }

    #[test]
    fn test_empty_dataset_is_precondition_failure() {
        let data = PreparedData::new(Dataset::build(Vec::new(), HashMap::new(), HashMap::new(), 20));
        let err = Trainer::new(&data, &config(1)).train(&()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecError>(),
            Some(RecError::Precondition(_))
        ));
    }
}
