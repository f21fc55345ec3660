use std::collections::HashMap;

/// Bijection between raw ids and contiguous row indices `[0, len)`,
/// assigned in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct IdIndex {
    forward: HashMap<u32, usize>,
    reverse: Vec<u32>,
}

impl IdIndex {
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut index = Self::default();
        for id in ids {
            index.insert(id);
        }
        index
    }

    fn insert(&mut self, id: u32) -> usize {
        let next = self.reverse.len();
        let reverse = &mut self.reverse;
        *self.forward.entry(id).or_insert_with(|| {
            reverse.push(id);
            next
        })
    }

    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.forward.get(&id).copied()
    }

    pub fn id_of(&self, index: usize) -> Option<u32> {
        self.reverse.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Raw ids in index order.
    pub fn ids(&self) -> &[u32] {
        &self.reverse
    }
}
