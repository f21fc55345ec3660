pub mod deep;
pub mod embedding;
pub mod initializer;
pub mod loss;
pub mod optimizer;
pub mod projection;
pub mod retriever;

pub use deep::{Dense, MlpTower};
pub use embedding::EmbeddingTower;
pub use loss::{in_batch_softmax, SoftmaxLoss};
pub use optimizer::{Adam, Optimizer};

use crate::config::ModelConfig;
use crate::error::RecError;
use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;

/// One side of a two-tower model: maps dense ids (plus optional side
/// features) to `[n, output_dim]` representations.
pub trait Tower: Send + Sync {
    /// Intermediate values of a training forward pass, consumed by
    /// `backward` and dropped with the step.
    type Cache: Send;

    /// Whether the forward pass needs a feature matrix.
    fn requires_features(&self) -> bool;

    fn output_dim(&self) -> usize;

    /// Rows in the id embedding table.
    fn num_ids(&self) -> usize;

    fn forward_cached(
        &self,
        ids: &[usize],
        features: Option<ArrayView2<'_, f32>>,
    ) -> Result<(Array2<f32>, Self::Cache), RecError>;

    fn forward(&self, ids: &[usize], features: Option<ArrayView2<'_, f32>>) -> Result<Array2<f32>, RecError> {
        self.forward_cached(ids, features).map(|(output, _)| output)
    }

    /// Backpropagates `grad_output` and applies one optimizer update to every
    /// parameter tensor, keyed under `prefix`.
    fn backward(
        &mut self,
        cache: Self::Cache,
        grad_output: ArrayView2<'_, f32>,
        optimizer: &mut dyn Optimizer,
        prefix: &str,
    ) -> Result<(), RecError>;

    /// The id embedding table, `[num_ids, embedding_dim]`.
    fn embeddings(&self) -> ArrayView2<'_, f32>;
}

/// Mini-batch of aligned (user, item) pairs. Feature matrices are only
/// filled in for models that require them.
#[derive(Debug, Clone)]
pub struct Batch<'a> {
    pub users: &'a [usize],
    pub items: &'a [usize],
    pub user_features: Option<ArrayView2<'a, f32>>,
    pub item_features: Option<ArrayView2<'a, f32>>,
}

impl<'a> Batch<'a> {
    pub fn new(users: &'a [usize], items: &'a [usize]) -> Self {
        Self {
            users,
            items,
            user_features: None,
            item_features: None,
        }
    }

    pub fn with_features(mut self, users: ArrayView2<'a, f32>, items: ArrayView2<'a, f32>) -> Self {
        self.user_features = Some(users);
        self.item_features = Some(items);
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// User tower and item tower with independent parameters, scored by dot
/// product.
#[derive(Debug, Clone)]
pub struct TwoTowerModel<T: Tower> {
    name: &'static str,
    user_tower: T,
    item_tower: T,
}

/// ID embeddings only; a forward pass is a row gather.
pub type SimpleModel = TwoTowerModel<EmbeddingTower>;

/// ID embedding fused with side features through an MLP, L2-normalized.
pub type DeepModel = TwoTowerModel<MlpTower>;

impl<T: Tower> TwoTowerModel<T> {
    pub fn from_towers(name: &'static str, user_tower: T, item_tower: T) -> Self {
        Self {
            name,
            user_tower,
            item_tower,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn requires_features(&self) -> bool {
        self.user_tower.requires_features() || self.item_tower.requires_features()
    }

    pub fn embedding_dim(&self) -> usize {
        self.user_tower.output_dim()
    }

    pub fn num_users(&self) -> usize {
        self.user_tower.num_ids()
    }

    pub fn num_items(&self) -> usize {
        self.item_tower.num_ids()
    }

    pub fn user_tower(&self) -> &T {
        &self.user_tower
    }

    pub fn item_tower(&self) -> &T {
        &self.item_tower
    }

    pub fn user_forward(&self, users: &[usize], features: Option<ArrayView2<'_, f32>>) -> Result<Array2<f32>, RecError> {
        self.user_tower.forward(users, features)
    }

    pub fn item_forward(&self, items: &[usize], features: Option<ArrayView2<'_, f32>>) -> Result<Array2<f32>, RecError> {
        self.item_tower.forward(items, features)
    }

    /// One contrastive step: forward both towers, in-batch softmax, backward,
    /// one optimizer update per parameter tensor. Every intermediate buffer
    /// is owned by this call and released when it returns.
    pub fn fit_batch(&mut self, batch: &Batch<'_>, optimizer: &mut dyn Optimizer) -> Result<f32, RecError> {
        if batch.users.len() != batch.items.len() {
            return Err(RecError::shape("batch", &[batch.users.len()], &[batch.items.len()]));
        }

        let (users, user_cache) = self.user_tower.forward_cached(batch.users, batch.user_features)?;
        let (items, item_cache) = self.item_tower.forward_cached(batch.items, batch.item_features)?;

        let step = in_batch_softmax(users.view(), items.view())?;

        self.user_tower
            .backward(user_cache, step.user_grad.view(), optimizer, "user")?;
        self.item_tower
            .backward(item_cache, step.item_grad.view(), optimizer, "item")?;

        Ok(step.loss)
    }
}

impl SimpleModel {
    pub fn simple<R: Rng + ?Sized>(num_users: usize, num_items: usize, config: &ModelConfig, rng: &mut R) -> Self {
        Self::from_towers(
            "simple",
            EmbeddingTower::new(num_users, config.embedding_dim, config.embedding_init_std, rng),
            EmbeddingTower::new(num_items, config.embedding_dim, config.embedding_init_std, rng),
        )
    }
}

impl DeepModel {
    pub fn deep<R: Rng + ?Sized>(
        num_users: usize,
        num_items: usize,
        user_feature_dim: usize,
        item_feature_dim: usize,
        config: &ModelConfig,
        rng: &mut R,
    ) -> Self {
        Self::from_towers(
            "deep",
            MlpTower::new(num_users, user_feature_dim, config, rng),
            MlpTower::new(num_items, item_feature_dim, config, rng),
        )
    }
}

/// Copies rows of `table` selected by `ids`, rejecting out-of-range ids.
pub(crate) fn gather_rows(table: ArrayView2<'_, f32>, ids: &[usize]) -> Result<Array2<f32>, RecError> {
    if let Some(&bad) = ids.iter().find(|&&id| id >= table.nrows()) {
        return Err(RecError::IndexOutOfRange {
            index: bad,
            len: table.nrows(),
        });
    }
    Ok(table.select(Axis(0), ids))
}

/// Dense `[rows, cols]` gradient of an embedding table, with the rows of
/// `grad` summed into the slots named by `ids`.
pub(crate) fn scatter_rows(rows: usize, ids: &[usize], grad: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut table = Array2::zeros((rows, grad.ncols()));
    for (&id, row) in ids.iter().zip(grad.axis_iter(Axis(0))) {
        let mut target = table.row_mut(id);
        target += &row;
    }
    table
}
