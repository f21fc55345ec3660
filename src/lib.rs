pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::RecError;
pub use models::*;

use anyhow::Result;
use parking_lot::RwLock;
use rand::Rng;
use services::dataset::{Dataset, RecordSource};
use services::recommendation::RecommendationService;
use services::training::{Progress, TrainedModels, Trainer, TrainingGuard};
use services::PreparedData;
use std::sync::Arc;
use tracing::{error, warn};

/// Everything one demo run works with: configuration, the loaded data,
/// the fitted models and live training progress. Passed explicitly to
/// callers; there is no global instance.
pub struct Session {
    config: Arc<Config>,
    data: RwLock<Option<Arc<PreparedData>>>,
    models: RwLock<Option<Arc<TrainedModels>>>,
    progress: Arc<Progress>,
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            data: RwLock::new(None),
            models: RwLock::new(None),
            progress: Arc::new(Progress::default()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> String {
        self.progress.status()
    }

    /// Deep-model loss of every batch of the current or last training run.
    pub fn loss_history(&self) -> Vec<f32> {
        self.progress.loss_history()
    }

    pub fn is_training(&self) -> bool {
        self.progress.is_running()
    }

    pub fn data(&self) -> Option<Arc<PreparedData>> {
        self.data.read().clone()
    }

    pub fn models(&self) -> Option<Arc<TrainedModels>> {
        self.models.read().clone()
    }

    /// Loads and indexes all three resources. On failure the previously
    /// loaded data and models are left as they were.
    /// Rejected with `RecError::TrainingInProgress` while a training run holds
    /// the guard.
    pub async fn load(&self, source: &dyn RecordSource) -> Result<()> {
        if self.progress.is_running() {
            return Err(RecError::TrainingInProgress.into());
        }
        self.progress.set_status("Loading data...");

        let data_config = self.config.data.clone();
        let loaded = async {
            let dataset = Dataset::load(source, &data_config).await?;
            let prepared = tokio::task::spawn_blocking(move || PreparedData::new(dataset)).await?;
            anyhow::Ok(prepared)
        }
        .await;

        match loaded {
            Ok(prepared) => {
                self.progress.set_status(format!(
                    "Loaded {} interactions for {} users and {} items",
                    prepared.dataset.interactions.len(),
                    prepared.dataset.num_users(),
                    prepared.dataset.num_items()
                ));
                *self.data.write() = Some(Arc::new(prepared));
                // Index spaces changed; old parameters no longer line up.
                *self.models.write() = None;
                Ok(())
            }
            Err(e) => {
                error!("Data load failed: {:#}", e);
                self.progress.set_status(format!("Error loading data: {}", e));
                Err(e)
            }
        }
    }

    /// Trains both models on a blocking worker and publishes them when all
    /// epochs finish. A second call while one is running fails with
    /// `RecError::TrainingInProgress`.
    pub async fn train(&self) -> Result<TrainingReport> {
        let guard = TrainingGuard::acquire(&self.progress)?;
        let data = self
            .data()
            .ok_or_else(|| RecError::precondition("data must be loaded before training"))?;

        self.progress.set_status("Training models...");
        let config = self.config.clone();
        let progress = self.progress.clone();

        let trained_on = data.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            Trainer::new(&data, &config).train(progress.as_ref())
        })
        .await?;

        match outcome {
            Ok((models, report)) => {
                {
                    let current = self.data.read();
                    // Parameters are indexed by the dataset they were fitted on.
                    if !current.as_ref().is_some_and(|d| Arc::ptr_eq(d, &trained_on)) {
                        drop(current);
                        self.progress
                            .set_status("Training discarded: data was reloaded during training");
                        return Err(RecError::precondition(
                            "data was reloaded during training; trained models were discarded",
                        )
                        .into());
                    }
                    *self.models.write() = Some(Arc::new(models));
                }
                self.progress.set_status("Training complete");
                Ok(report)
            }
            Err(e) => {
                warn!("Training stopped: {:#}", e);
                self.progress.set_status(format!("Training stopped: {}", e));
                Err(e)
            }
        }
    }

    /// Asks a running training job to stop before its next batch.
    pub fn cancel_training(&self) {
        if self.is_training() {
            self.progress.request_cancel();
        }
    }

    fn ready(&self) -> Result<(Arc<PreparedData>, Arc<TrainedModels>), RecError> {
        let data = self
            .data()
            .ok_or_else(|| RecError::precondition("data is not loaded"))?;
        let models = self
            .models()
            .ok_or_else(|| RecError::precondition("models are not trained yet"))?;
        Ok((data, models))
    }

    pub fn compare_for_user(&self, user_id: UserId) -> Result<ComparisonReport, RecError> {
        let (data, models) = self.ready()?;
        RecommendationService::new(&data, &models, self.config.recommendation.top_k).compare(user_id)
    }

    /// Compares both models for a randomly sampled qualified user.
    pub fn compare_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ComparisonReport, RecError> {
        let (data, models) = self.ready()?;
        let service = RecommendationService::new(&data, &models, self.config.recommendation.top_k);
        let user_id = service.sample_user(rng)?;
        service.compare(user_id)
    }

    /// 2D projection of item embeddings for plotting. Failures are reported
    /// in the status line and returned, never propagated further.
    pub fn project_item_embeddings(&self) -> Result<Vec<ProjectedPoint>, RecError> {
        let (data, models) = self.ready()?;
        let service = RecommendationService::new(&data, &models, self.config.recommendation.top_k);

        service
            .project_items(self.config.recommendation.projection_sample)
            .map_err(|e| {
                warn!("Embedding projection failed: {}", e);
                self.progress.set_status(format!("Visualization error: {}", e));
                match e {
                    RecError::Projection(_) => e,
                    other => RecError::Projection(other.to_string()),
                }
            })
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
