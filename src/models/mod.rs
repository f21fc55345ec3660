use serde::{Deserialize, Serialize};

pub type UserId = u32;
pub type ItemId = u32;

/// "unknown" plus the 18 named MovieLens genres.
pub const NUM_GENRES: usize = 19;

pub const GENRE_NAMES: [&str; NUM_GENRES] = [
    "unknown",
    "Action",
    "Adventure",
    "Animation",
    "Children's",
    "Comedy",
    "Crime",
    "Documentary",
    "Drama",
    "Fantasy",
    "Film-Noir",
    "Horror",
    "Musical",
    "Mystery",
    "Romance",
    "Sci-Fi",
    "Thriller",
    "War",
    "Western",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub rating: f32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub year: Option<i32>,
    pub genres: [u8; NUM_GENRES],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Raw age divided by 100.
    pub age: f32,
    /// 1 for "M", 0 otherwise.
    pub gender: u8,
    pub occupation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f32,
}

/// One row of a table handed to the display layer. `score` is a rating for
/// history tables and a similarity for recommendation tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub item_id: ItemId,
    pub title: String,
    pub score: f32,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub user_id: UserId,
    pub history: Vec<RankedEntry>,
    pub simple_recommendations: Vec<RankedEntry>,
    pub deep_recommendations: Vec<RankedEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub simple_loss: f32,
    pub deep_loss: f32,
    pub batches: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochSummary>,
    /// Deep-model loss of every batch, in training order.
    pub loss_history: Vec<f32>,
}

impl TrainingReport {
    pub fn final_epoch(&self) -> Option<&EpochSummary> {
        self.epochs.last()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub item_id: ItemId,
    pub title: String,
    pub x: f32,
    pub y: f32,
}

impl Item {
    pub fn genre_names(&self) -> Vec<&'static str> {
        self.genres
            .iter()
            .zip(GENRE_NAMES.iter())
            .filter(|(flag, _)| **flag != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}
