use crate::error::RecError;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Principal component analysis fitted on the rows of a matrix.
#[derive(Debug, Clone)]
pub struct Pca {
    n_components: usize,
    mean: Array1<f32>,
    /// `[n_components, n_features]`, ordered by decreasing variance.
    components: Array2<f32>,
    explained_variance_ratio: Vec<f32>,
}

impl Pca {
    pub fn fit(data: ArrayView2<'_, f32>, n_components: usize) -> Result<Self, RecError> {
        let (n_samples, n_features) = data.dim();
        if n_samples < 2 {
            return Err(RecError::Projection(format!(
                "need at least 2 samples, got {}",
                n_samples
            )));
        }
        if n_components == 0 || n_components > n_features {
            return Err(RecError::Projection(format!(
                "cannot extract {} components from {} features",
                n_components, n_features
            )));
        }
        if data.iter().any(|x| !x.is_finite()) {
            return Err(RecError::Projection("input contains non-finite values".to_string()));
        }

        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| RecError::Projection("empty input".to_string()))?;
        let centered = &data - &mean;
        let covariance = centered.t().dot(&centered) / (n_samples - 1) as f32;

        let cov = DMatrix::from_fn(n_features, n_features, |i, j| covariance[[i, j]]);
        let eigen = SymmetricEigen::new(cov);

        let mut order: Vec<usize> = (0..n_features).collect();
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .partial_cmp(&eigen.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut components = Array2::zeros((n_components, n_features));
        for (row, &idx) in order.iter().take(n_components).enumerate() {
            for col in 0..n_features {
                components[[row, col]] = eigen.eigenvectors[(col, idx)];
            }
        }

        let total: f32 = eigen.eigenvalues.iter().map(|v| v.max(0.0)).sum();
        let explained_variance_ratio = order
            .iter()
            .take(n_components)
            .map(|&idx| {
                if total > 0.0 {
                    eigen.eigenvalues[idx].max(0.0) / total
                } else {
                    0.0
                }
            })
            .collect();

        Ok(Self {
            n_components,
            mean,
            components,
            explained_variance_ratio,
        })
    }

    pub fn transform(&self, data: ArrayView2<'_, f32>) -> Result<Array2<f32>, RecError> {
        if data.ncols() != self.mean.len() {
            return Err(RecError::Projection(format!(
                "expected {} features, got {}",
                self.mean.len(),
                data.ncols()
            )));
        }
        Ok((&data - &self.mean).dot(&self.components.t()))
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn explained_variance_ratio(&self) -> &[f32] {
        &self.explained_variance_ratio
    }
}

/// Fits a 2-component PCA on `data` and returns each row's coordinates.
pub fn project_2d(data: ArrayView2<'_, f32>) -> Result<Vec<(f32, f32)>, RecError> {
    let pca = Pca::fit(data, 2)?;
    let points = pca.transform(data)?;
    Ok(points
        .axis_iter(Axis(0))
        .map(|row| (row[0], row[1]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_first_component_follows_dominant_axis() {
        // Spread along x, small noise on y and z.
        let data = Array2::from_shape_fn((50, 3), |(i, j)| match j {
            0 => i as f32,
            1 => ((i * 7) % 5) as f32 * 0.01,
            _ => ((i * 3) % 4) as f32 * 0.01,
        });

        let pca = Pca::fit(data.view(), 2).unwrap();
        assert!(pca.explained_variance_ratio()[0] > 0.99);
        assert!(pca.components[[0, 0]].abs() > 0.99);
    }

    #[test]
    fn test_projected_points_are_centered() {
        let data = Array2::from_shape_fn((20, 4), |(i, j)| ((i * (j + 1)) % 7) as f32);
        let points = project_2d(data.view()).unwrap();

        assert_eq!(points.len(), 20);
        let mean_x: f32 = points.iter().map(|p| p.0).sum::<f32>() / 20.0;
        let mean_y: f32 = points.iter().map(|p| p.1).sum::<f32>() / 20.0;
        assert!(mean_x.abs() < 1e-4);
        assert!(mean_y.abs() < 1e-4);
    }

    #[test]
    fn test_rejects_degenerate_input() {
        let single = Array2::<f32>::zeros((1, 4));
        assert!(matches!(Pca::fit(single.view(), 2), Err(RecError::Projection(_))));

        let narrow = Array2::<f32>::zeros((10, 1));
        assert!(Pca::fit(narrow.view(), 2).is_err());
    }
}
