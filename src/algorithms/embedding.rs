use super::initializer::normal;
use super::{gather_rows, scatter_rows, Optimizer, Tower};
use crate::error::RecError;
use ndarray::{Array2, ArrayView2};
use rand::Rng;

/// Trainable lookup table with no activation or bias.
#[derive(Debug, Clone)]
pub struct EmbeddingTower {
    table: Array2<f32>,
}

impl EmbeddingTower {
    pub fn new<R: Rng + ?Sized>(num_ids: usize, dim: usize, init_std: f32, rng: &mut R) -> Self {
        Self {
            table: normal(rng, (num_ids, dim), 0.0, init_std),
        }
    }

    pub fn from_table(table: Array2<f32>) -> Self {
        Self { table }
    }
}

impl Tower for EmbeddingTower {
    /// Ids of the gathered rows.
    type Cache = Vec<usize>;

    fn requires_features(&self) -> bool {
        false
    }

    fn output_dim(&self) -> usize {
        self.table.ncols()
    }

    fn num_ids(&self) -> usize {
        self.table.nrows()
    }

    fn forward_cached(
        &self,
        ids: &[usize],
        _features: Option<ArrayView2<'_, f32>>,
    ) -> Result<(Array2<f32>, Self::Cache), RecError> {
        Ok((gather_rows(self.table.view(), ids)?, ids.to_vec()))
    }

    fn backward(
        &mut self,
        cache: Self::Cache,
        grad_output: ArrayView2<'_, f32>,
        optimizer: &mut dyn Optimizer,
        prefix: &str,
    ) -> Result<(), RecError> {
        let grad = scatter_rows(self.table.nrows(), &cache, grad_output);
        optimizer.update(
            &format!("{}.embedding", prefix),
            self.table.view_mut().into_dyn(),
            grad.view().into_dyn(),
        )
    }

    fn embeddings(&self) -> ArrayView2<'_, f32> {
        self.table.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::initializer::seeded_rng;
    use crate::algorithms::Adam;
    use ndarray::arr2;

    #[test]
    fn test_forward_is_row_gather() {
        let tower = EmbeddingTower::from_table(arr2(&[[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]]));
        let out = tower.forward(&[2, 0, 2], None).unwrap();
        assert_eq!(out, arr2(&[[5.0, 6.0], [1.0, 2.0], [5.0, 6.0]]));
    }

    #[test]
    fn test_backward_only_touches_batch_rows() {
        let mut tower = EmbeddingTower::new(4, 3, 0.05, &mut seeded_rng(9, 0));
        let before = tower.embeddings().to_owned();
        let mut adam = Adam::default();

        let (_, cache) = tower.forward_cached(&[1], None).unwrap();
        let grad = Array2::from_elem((1, 3), 1.0f32);
        tower.backward(cache, grad.view(), &mut adam, "user").unwrap();

        let after = tower.embeddings();
        assert_eq!(after.row(0), before.row(0));
        assert_eq!(after.row(2), before.row(2));
        assert!(after.row(1).iter().zip(before.row(1)).all(|(a, b)| a < b));
    }
}
