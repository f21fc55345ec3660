use crate::error::RecError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub recommendation: RecommendationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub interactions_file: String,
    pub items_file: String,
    pub users_file: String,
    /// Positional cap: the first `max_interactions` rows are kept, in file order.
    pub max_interactions: usize,
    pub min_user_interactions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub embedding_dim: usize,
    /// Dense layer widths of the deep towers. The last one is the output width.
    pub hidden_units: Vec<usize>,
    pub embedding_init_std: f32,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub top_k: usize,
    pub projection_sample: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/ml-100k"),
            interactions_file: "u.data".to_string(),
            items_file: "u.item".to_string(),
            users_file: "u.user".to_string(),
            max_interactions: 80_000,
            min_user_interactions: 20,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 32,
            hidden_units: vec![64, 32],
            embedding_init_std: 0.05,
            seed: 42,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            epochs: 15,
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            projection_sample: 300,
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("TWOTOWER")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Reads `path`, then applies `TWOTOWER__SECTION__KEY` overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        Self::layered(Some(path), environment())
    }

    /// Defaults with `TWOTOWER__SECTION__KEY` overrides, for runs without a
    /// config file.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::layered(None, environment())
    }

    fn layered(path: Option<&str>, env: config::Environment) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder.add_source(env).build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RecError> {
        let invalid = |msg: &str| Err(RecError::InvalidConfig(msg.to_string()));

        if self.model.embedding_dim == 0 {
            return invalid("model.embedding_dim must be greater than 0");
        }
        match self.model.hidden_units.last() {
            None => return invalid("model.hidden_units cannot be empty"),
            Some(&last) if last != self.model.embedding_dim => {
                return Err(RecError::InvalidConfig(format!(
                    "last hidden width {} must equal embedding_dim {}",
                    last, self.model.embedding_dim
                )));
            }
            _ => {}
        }
        if self.model.hidden_units.contains(&0) {
            return invalid("model.hidden_units cannot contain a zero width");
        }
        if !(self.model.embedding_init_std.is_finite() && self.model.embedding_init_std > 0.0) {
            return invalid("model.embedding_init_std must be positive");
        }
        if self.training.batch_size == 0 {
            return invalid("training.batch_size must be greater than 0");
        }
        if self.training.epochs == 0 {
            return invalid("training.epochs must be greater than 0");
        }
        if !(self.training.learning_rate.is_finite() && self.training.learning_rate > 0.0) {
            return invalid("training.learning_rate must be positive");
        }
        if self.data.max_interactions == 0 {
            return invalid("data.max_interactions must be greater than 0");
        }
        if self.recommendation.top_k == 0 {
            return invalid("recommendation.top_k must be greater than 0");
        }

        Ok(())
    }
}
