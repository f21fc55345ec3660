use super::{Tower, TwoTowerModel};
use crate::error::RecError;
use crate::models::{ItemId, ScoredItem};
use crate::services::dataset::IdIndex;
use crate::services::features::FeatureTables;
use ndarray::{Array1, Array2};
use std::collections::HashSet;

/// Brute-force dot-product retrieval over the whole item catalog.
#[derive(Debug, Clone, Copy)]
pub struct Retriever<'a> {
    item_index: &'a IdIndex,
    features: &'a FeatureTables,
    top_k: usize,
}

impl<'a> Retriever<'a> {
    pub fn new(item_index: &'a IdIndex, features: &'a FeatureTables, top_k: usize) -> Self {
        Self {
            item_index,
            features,
            top_k,
        }
    }

    /// Representations of every item in the dense index space.
    pub fn catalog<T: Tower>(&self, model: &TwoTowerModel<T>) -> Result<Array2<f32>, RecError> {
        let all: Vec<usize> = (0..self.item_index.len()).collect();
        let features = model.requires_features().then(|| self.features.all_items());
        model.item_forward(&all, features)
    }

    pub fn user_vector<T: Tower>(&self, model: &TwoTowerModel<T>, user_index: usize) -> Result<Array1<f32>, RecError> {
        let features = if model.requires_features() {
            if user_index >= self.features.users.nrows() {
                return Err(RecError::IndexOutOfRange {
                    index: user_index,
                    len: self.features.users.nrows(),
                });
            }
            Some(self.features.user_rows(&[user_index]))
        } else {
            None
        };

        let user = model.user_forward(&[user_index], features.as_ref().map(|f| f.view()))?;
        Ok(user.row(0).to_owned())
    }

    /// Top-k catalog items for one user by descending dot product, skipping
    /// `exclude`. Equal scores keep catalog order.
    pub fn recommend<T: Tower>(
        &self,
        model: &TwoTowerModel<T>,
        user_index: usize,
        exclude: &HashSet<ItemId>,
    ) -> Result<Vec<ScoredItem>, RecError> {
        let user = self.user_vector(model, user_index)?;
        let catalog = self.catalog(model)?;
        let scores = catalog.dot(&user);

        let mut candidates: Vec<ScoredItem> = self
            .item_index
            .ids()
            .iter()
            .zip(scores.iter())
            .filter(|(item_id, _)| !exclude.contains(*item_id))
            .map(|(&item_id, &score)| ScoredItem { item_id, score })
            .collect();

        // NaN scores rank last.
        candidates.sort_by(|a, b| {
            a.score
                .is_nan()
                .cmp(&b.score.is_nan())
                .then_with(|| b.score.total_cmp(&a.score))
        });
        candidates.truncate(self.top_k);

        Ok(candidates)
    }
}
