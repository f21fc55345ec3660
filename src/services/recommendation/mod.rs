use crate::algorithms::projection::project_2d;
use crate::algorithms::retriever::Retriever;
use crate::algorithms::{Tower, TwoTowerModel};
use crate::error::RecError;
use crate::models::*;
use crate::services::training::TrainedModels;
use crate::services::PreparedData;
use ndarray::{s, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::info;

/// Builds the display tables comparing both models for one user.
pub struct RecommendationService<'a> {
    data: &'a PreparedData,
    models: &'a TrainedModels,
    top_k: usize,
}

impl<'a> RecommendationService<'a> {
    pub fn new(data: &'a PreparedData, models: &'a TrainedModels, top_k: usize) -> Self {
        Self { data, models, top_k }
    }

    fn retriever(&self) -> Retriever<'_> {
        Retriever::new(&self.data.dataset.item_index, &self.data.features, self.top_k)
    }

    fn entry(&self, item_id: ItemId, score: f32) -> RankedEntry {
        RankedEntry {
            item_id,
            title: self.data.dataset.title(item_id),
            score,
            year: self.data.dataset.year(item_id),
        }
    }

    /// Picks a random qualified user.
    pub fn sample_user<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<UserId, RecError> {
        self.data
            .dataset
            .qualified_users
            .choose(rng)
            .copied()
            .ok_or_else(|| RecError::precondition("no users with enough interactions to evaluate"))
    }

    /// The user's top-rated items, rating as score.
    pub fn history_table(&self, user_id: UserId) -> Vec<RankedEntry> {
        self.data
            .dataset
            .history(user_id)
            .iter()
            .take(self.top_k)
            .map(|interaction| self.entry(interaction.item_id, interaction.rating))
            .collect()
    }

    pub fn recommend<T: Tower>(
        &self,
        model: &TwoTowerModel<T>,
        user_id: UserId,
    ) -> Result<Vec<ScoredItem>, RecError> {
        let user_index = self
            .data
            .dataset
            .user_index
            .index_of(user_id)
            .ok_or_else(|| RecError::precondition(format!("user {} has no interactions", user_id)))?;

        let rated: HashSet<ItemId> = self
            .data
            .dataset
            .history(user_id)
            .iter()
            .map(|interaction| interaction.item_id)
            .collect();

        self.retriever().recommend(model, user_index, &rated)
    }

    pub fn compare(&self, user_id: UserId) -> Result<ComparisonReport, RecError> {
        let simple = self.recommend(&self.models.simple, user_id)?;
        let deep = self.recommend(&self.models.deep, user_id)?;
        info!(
            "Compared recommendations for user {} ({} rated items)",
            user_id,
            self.data.dataset.history(user_id).len()
        );

        Ok(ComparisonReport {
            user_id,
            history: self.history_table(user_id),
            simple_recommendations: simple
                .into_iter()
                .map(|s| self.entry(s.item_id, s.score))
                .collect(),
            deep_recommendations: deep
                .into_iter()
                .map(|s| self.entry(s.item_id, s.score))
                .collect(),
        })
    }

    /// 2D PCA of the first `sample` rows of the deep model's item ID
    /// embedding table.
    pub fn project_items(&self, sample: usize) -> Result<Vec<ProjectedPoint>, RecError> {
        let table = self.models.deep.item_tower().embeddings();
        let rows = sample.min(table.len_of(Axis(0)));
        let points = project_2d(table.slice(s![..rows, ..]))?;

        Ok(self
            .data
            .dataset
            .item_index
            .ids()
            .iter()
            .zip(points)
            .map(|(&item_id, (x, y))| ProjectedPoint {
                item_id,
                title: self.data.dataset.title(item_id),
                x,
                y,
            })
            .collect())
    }
}
