use crate::models::*;
use crate::services::dataset::Dataset;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Occupation string to one-hot slot, slots assigned in lexicographic order.
#[derive(Debug, Clone, Default)]
pub struct OccupationVocab {
    index: HashMap<String, usize>,
    names: Vec<String>,
}

impl OccupationVocab {
    pub fn from_occupations<'a, I>(occupations: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<String> = occupations
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Self { index, names }
    }

    pub fn from_users(users: &HashMap<UserId, User>) -> Self {
        Self::from_occupations(users.values().map(|u| u.occupation.as_str()))
    }

    pub fn index_of(&self, occupation: &str) -> Option<usize> {
        self.index.get(occupation).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Turns user and item records into fixed-width numeric vectors.
/// Holds no mutable state, so it can be shared freely across threads.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    vocab: OccupationVocab,
}

impl FeatureEncoder {
    pub fn new(vocab: OccupationVocab) -> Self {
        Self { vocab }
    }

    pub fn for_dataset(dataset: &Dataset) -> Self {
        Self::new(OccupationVocab::from_users(&dataset.users))
    }

    pub fn vocab(&self) -> &OccupationVocab {
        &self.vocab
    }

    /// `[age, gender]` followed by the one-hot occupation.
    pub fn user_width(&self) -> usize {
        2 + self.vocab.len()
    }

    pub fn item_width(&self) -> usize {
        NUM_GENRES
    }

    pub fn encode_user(&self, user: &User) -> Vec<f32> {
        let mut features = vec![0.0; self.user_width()];
        features[0] = user.age;
        features[1] = f32::from(user.gender);
        if let Some(slot) = self.vocab.index_of(&user.occupation) {
            features[2 + slot] = 1.0;
        }
        features
    }

    pub fn encode_item(&self, item: &Item) -> Vec<f32> {
        item.genres.iter().map(|&flag| f32::from(flag)).collect()
    }

    /// Features of a raw user id; all zeros if the user has no record.
    pub fn user_features(&self, users: &HashMap<UserId, User>, user_id: UserId) -> Vec<f32> {
        users
            .get(&user_id)
            .map(|user| self.encode_user(user))
            .unwrap_or_else(|| vec![0.0; self.user_width()])
    }

    /// Genre flags of a raw item id; all zeros if the item has no record.
    pub fn item_features(&self, items: &HashMap<ItemId, Item>, item_id: ItemId) -> Vec<f32> {
        items
            .get(&item_id)
            .map(|item| self.encode_item(item))
            .unwrap_or_else(|| vec![0.0; self.item_width()])
    }
}

/// Feature vectors laid out by dense index, one row per embeddable id.
#[derive(Debug, Clone)]
pub struct FeatureTables {
    pub users: Array2<f32>,
    pub items: Array2<f32>,
}

impl FeatureTables {
    pub fn build(dataset: &Dataset, encoder: &FeatureEncoder) -> Self {
        let missing_users = dataset
            .user_index
            .ids()
            .iter()
            .filter(|id| !dataset.users.contains_key(*id))
            .count();
        let missing_items = dataset
            .item_index
            .ids()
            .iter()
            .filter(|id| !dataset.items.contains_key(*id))
            .count();
        if missing_users > 0 || missing_items > 0 {
            warn!(
                "{} users and {} items have no record; their features are zero",
                missing_users, missing_items
            );
        }

        let users = stack(
            dataset
                .user_index
                .ids()
                .par_iter()
                .map(|&id| encoder.user_features(&dataset.users, id))
                .collect(),
            encoder.user_width(),
        );
        let items = stack(
            dataset
                .item_index
                .ids()
                .par_iter()
                .map(|&id| encoder.item_features(&dataset.items, id))
                .collect(),
            encoder.item_width(),
        );

        Self { users, items }
    }

    pub fn user_rows(&self, indices: &[usize]) -> Array2<f32> {
        self.users.select(Axis(0), indices)
    }

    pub fn item_rows(&self, indices: &[usize]) -> Array2<f32> {
        self.items.select(Axis(0), indices)
    }

    pub fn all_items(&self) -> ArrayView2<'_, f32> {
        self.items.view()
    }
}

fn stack(rows: Vec<Vec<f32>>, width: usize) -> Array2<f32> {
    let mut table = Array2::zeros((rows.len(), width));
    for (mut dst, src) in table.axis_iter_mut(Axis(0)).zip(rows) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s;
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataConfig;

    fn user(occupation: &str) -> User {
        User {
            age: 0.3,
            gender: 1,
            occupation: occupation.to_string(),
        }
    }

    #[test]
    fn test_vocab_is_sorted_and_deduplicated() {
        let vocab = OccupationVocab::from_occupations(["engineer", "artist", "engineer"]);
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.index_of("artist"), Some(0));
        assert_eq!(vocab.index_of("engineer"), Some(1));
    }

    #[test]
    fn test_user_features_width_is_constant() {
        let encoder = FeatureEncoder::new(OccupationVocab::from_occupations([
            "artist", "engineer", "writer",
        ]));

        for occupation in ["artist", "writer", "astronaut"] {
            assert_eq!(encoder.encode_user(&user(occupation)).len(), 2 + 3);
        }

        let features = encoder.encode_user(&user("writer"));
        assert_eq!(features, vec![0.3, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unknown_occupation_is_all_zero() {
        let encoder = FeatureEncoder::new(OccupationVocab::from_occupations(["artist"]));
        let features = encoder.encode_user(&user("astronaut"));
        assert!(features[2..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_item_features_are_genre_flags() {
        let encoder = FeatureEncoder::new(OccupationVocab::default());
        let mut genres = [0u8; NUM_GENRES];
        genres[1] = 1;
        genres[18] = 1;
        let item = Item {
            title: "X".to_string(),
            year: None,
            genres,
        };

        let features = encoder.encode_item(&item);
        assert_eq!(features.len(), NUM_GENRES);
        assert_eq!(features[1], 1.0);
        assert_eq!(features[18], 1.0);
        assert_eq!(features.iter().sum::<f32>(), 2.0);
    }

    #[test]
    fn test_tables_follow_dense_order() {
        let dataset = Dataset::from_text(
            "2\t1\t5\t1\n1\t1\t4\t2\n",
            "",
            "1|20|F|artist|0\n2|40|M|engineer|0\n",
            &DataConfig::default(),
        )
        .unwrap();
        let encoder = FeatureEncoder::for_dataset(&dataset);
        let tables = FeatureTables::build(&dataset, &encoder);

        assert_eq!(tables.users.dim(), (2, 4));
        // Dense row 0 is raw user 2, the first one seen.
        assert_eq!(tables.users.row(0).to_vec(), vec![0.4, 1.0, 0.0, 1.0]);
        assert_eq!(tables.items.dim(), (1, NUM_GENRES));
        assert!(tables.items.iter().all(|&v| v == 0.0));
    }
}
