use crate::config::DataConfig;
use crate::error::RecError;
use crate::models::*;
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

mod index;
mod parser;

pub use index::IdIndex;
pub use parser::{parse_interactions, parse_items, parse_users};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Interactions,
    Items,
    Users,
}

impl Resource {
    pub fn name(&self) -> &'static str {
        match self {
            Resource::Interactions => "interactions",
            Resource::Items => "items",
            Resource::Users => "users",
        }
    }
}

/// Supplies the raw text of the three MovieLens resources.
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self, resource: Resource) -> Result<String>;
}

/// Reads the resources from files in a directory. Item titles in the
/// MovieLens dump are latin-1, so bytes are decoded lossily.
#[derive(Debug, Clone)]
pub struct FsRecordSource {
    dir: PathBuf,
    files: HashMap<Resource, String>,
}

impl FsRecordSource {
    pub fn new(config: &DataConfig) -> Self {
        let mut files = HashMap::new();
        files.insert(Resource::Interactions, config.interactions_file.clone());
        files.insert(Resource::Items, config.items_file.clone());
        files.insert(Resource::Users, config.users_file.clone());

        Self {
            dir: config.data_dir.clone(),
            files,
        }
    }
}

#[async_trait::async_trait]
impl RecordSource for FsRecordSource {
    async fn fetch(&self, resource: Resource) -> Result<String> {
        let file = self
            .files
            .get(&resource)
            .ok_or_else(|| anyhow::anyhow!("no file configured for {}", resource.name()))?;
        let path = self.dir.join(file);

        let bytes = tokio::fs::read(&path).await.map_err(|e| RecError::Load {
            resource: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Serves preloaded text, for embedding callers and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordSource {
    pub interactions: String,
    pub items: String,
    pub users: String,
}

#[async_trait::async_trait]
impl RecordSource for MemoryRecordSource {
    async fn fetch(&self, resource: Resource) -> Result<String> {
        Ok(match resource {
            Resource::Interactions => self.interactions.clone(),
            Resource::Items => self.items.clone(),
            Resource::Users => self.users.clone(),
        })
    }
}

/// Typed, indexed view of one load. Immutable after construction.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub interactions: Vec<Interaction>,
    pub items: HashMap<ItemId, Item>,
    pub users: HashMap<UserId, User>,
    pub user_index: IdIndex,
    pub item_index: IdIndex,
    /// Per-user interactions sorted by rating desc, then timestamp desc.
    pub histories: HashMap<UserId, Vec<Interaction>>,
    /// Ascending raw ids of users with at least `min_user_interactions` rows.
    pub qualified_users: Vec<UserId>,
    /// Dense user index of every interaction, aligned with `interactions`.
    pub user_indices: Vec<usize>,
    /// Dense item index of every interaction, aligned with `interactions`.
    pub item_indices: Vec<usize>,
}

impl Dataset {
    /// Fetches all three resources concurrently and parses them. Any failure
    /// aborts the whole load.
    pub async fn load(source: &dyn RecordSource, config: &DataConfig) -> Result<Self> {
        let (interactions, items, users) = futures::try_join!(
            source.fetch(Resource::Interactions),
            source.fetch(Resource::Items),
            source.fetch(Resource::Users),
        )?;

        Self::from_text(&interactions, &items, &users, config)
    }

    pub fn from_text(
        interactions: &str,
        items: &str,
        users: &str,
        config: &DataConfig,
    ) -> Result<Self> {
        let interactions = parse_interactions(interactions, config.max_interactions)?;
        let items = parse_items(items)?;
        let users = parse_users(users)?;

        let dataset = Self::build(interactions, items, users, config.min_user_interactions);
        info!(
            "Loaded {} interactions, {} users, {} items ({} qualified users)",
            dataset.interactions.len(),
            dataset.num_users(),
            dataset.num_items(),
            dataset.qualified_users.len()
        );

        Ok(dataset)
    }

    pub fn build(
        interactions: Vec<Interaction>,
        items: HashMap<ItemId, Item>,
        users: HashMap<UserId, User>,
        min_user_interactions: usize,
    ) -> Self {
        let user_index = IdIndex::from_ids(interactions.iter().map(|i| i.user_id));
        let item_index = IdIndex::from_ids(interactions.iter().map(|i| i.item_id));

        let mut histories: HashMap<UserId, Vec<Interaction>> = HashMap::new();
        for interaction in &interactions {
            histories
                .entry(interaction.user_id)
                .or_default()
                .push(*interaction);
        }
        for history in histories.values_mut() {
            history.sort_by(|a, b| {
                b.rating
                    .total_cmp(&a.rating)
                    .then_with(|| b.timestamp.cmp(&a.timestamp))
            });
        }

        let mut qualified_users: Vec<UserId> = histories
            .iter()
            .filter(|(_, history)| history.len() >= min_user_interactions)
            .map(|(&user_id, _)| user_id)
            .collect();
        qualified_users.sort_unstable();

        // Every id was inserted into the index above.
        let user_indices = interactions
            .iter()
            .filter_map(|i| user_index.index_of(i.user_id))
            .collect();
        let item_indices = interactions
            .iter()
            .filter_map(|i| item_index.index_of(i.item_id))
            .collect();

        Self {
            interactions,
            items,
            users,
            user_index,
            item_index,
            histories,
            qualified_users,
            user_indices,
            item_indices,
        }
    }

    pub fn num_users(&self) -> usize {
        self.user_index.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_index.len()
    }

    pub fn history(&self, user_id: UserId) -> &[Interaction] {
        self.histories
            .get(&user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_qualified(&self, user_id: UserId) -> bool {
        self.qualified_users.binary_search(&user_id).is_ok()
    }

    /// Display title for an item; falls back to the raw id for items
    /// missing from the item table.
    pub fn title(&self, item_id: ItemId) -> String {
        self.items
            .get(&item_id)
            .map(|item| item.title.clone())
            .unwrap_or_else(|| format!("Item {}", item_id))
    }

    pub fn year(&self, item_id: ItemId) -> Option<i32> {
        self.items.get(&item_id).and_then(|item| item.year)
    }
}
