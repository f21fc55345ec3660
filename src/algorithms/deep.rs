use super::initializer::{normal, xavier_uniform, zeros};
use super::{gather_rows, scatter_rows, Optimizer, Tower};
use crate::config::ModelConfig;
use crate::error::RecError;
use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis, Zip};
use rand::Rng;

/// Squared-norm floor of the output normalization.
const NORM_EPSILON: f32 = 1e-12;

/// Fully connected layer `x · W + b`, optionally followed by ReLU.
#[derive(Debug, Clone)]
pub struct Dense {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
    pub relu: bool,
}

#[derive(Debug)]
struct DenseCache {
    input: Array2<f32>,
    pre_activation: Array2<f32>,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, relu: bool, rng: &mut R) -> Self {
        Self {
            weights: xavier_uniform(rng, input_dim, output_dim),
            bias: zeros(output_dim),
            relu,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weights.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn forward(&self, input: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut out = input.dot(&self.weights) + &self.bias;
        if self.relu {
            out.mapv_inplace(|x| x.max(0.0));
        }
        out
    }

    fn forward_cached(&self, input: Array2<f32>) -> (Array2<f32>, DenseCache) {
        let pre_activation = input.dot(&self.weights) + &self.bias;
        let output = if self.relu {
            pre_activation.mapv(|x| x.max(0.0))
        } else {
            pre_activation.clone()
        };
        (output, DenseCache { input, pre_activation })
    }

    /// Returns the gradient with respect to the layer input and applies the
    /// weight and bias updates.
    fn backward(
        &mut self,
        cache: DenseCache,
        mut grad: Array2<f32>,
        optimizer: &mut dyn Optimizer,
        key: &str,
    ) -> Result<Array2<f32>, RecError> {
        if self.relu {
            Zip::from(&mut grad)
                .and(&cache.pre_activation)
                .for_each(|g, &z| {
                    if z <= 0.0 {
                        *g = 0.0;
                    }
                });
        }

        let grad_weights = cache.input.t().dot(&grad);
        let grad_bias = grad.sum_axis(Axis(0));
        let grad_input = grad.dot(&self.weights.t());

        optimizer.update(
            &format!("{}.weights", key),
            self.weights.view_mut().into_dyn(),
            grad_weights.view().into_dyn(),
        )?;
        optimizer.update(
            &format!("{}.bias", key),
            self.bias.view_mut().into_dyn(),
            grad_bias.view().into_dyn(),
        )?;

        Ok(grad_input)
    }
}

/// Training-pass intermediates of an `MlpTower`.
#[derive(Debug)]
pub struct MlpCache {
    ids: Vec<usize>,
    layers: Vec<DenseCache>,
    /// Normalized outputs.
    output: Array2<f32>,
    /// Row norms before normalization, floored at `sqrt(NORM_EPSILON)`.
    norms: Array1<f32>,
    clamped: Vec<bool>,
}

/// ID embedding concatenated with side features, fed through dense layers
/// (ReLU on all but the last), then L2-normalized per row.
#[derive(Debug, Clone)]
pub struct MlpTower {
    embedding: Array2<f32>,
    feature_dim: usize,
    layers: Vec<Dense>,
}

impl MlpTower {
    pub fn new<R: Rng + ?Sized>(num_ids: usize, feature_dim: usize, config: &ModelConfig, rng: &mut R) -> Self {
        let embedding = normal(rng, (num_ids, config.embedding_dim), 0.0, config.embedding_init_std);

        let mut layers = Vec::with_capacity(config.hidden_units.len());
        let mut input_dim = config.embedding_dim + feature_dim;
        for (i, &units) in config.hidden_units.iter().enumerate() {
            let relu = i + 1 < config.hidden_units.len();
            layers.push(Dense::new(input_dim, units, relu, rng));
            input_dim = units;
        }

        Self {
            embedding,
            feature_dim,
            layers,
        }
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    fn fused_input(&self, ids: &[usize], features: Option<ArrayView2<'_, f32>>) -> Result<Array2<f32>, RecError> {
        let features = features.ok_or_else(|| {
            RecError::precondition("feature-enriched tower requires a feature matrix")
        })?;
        if features.dim() != (ids.len(), self.feature_dim) {
            return Err(RecError::shape(
                "tower features",
                &[ids.len(), self.feature_dim],
                &[features.nrows(), features.ncols()],
            ));
        }

        let rows = gather_rows(self.embedding.view(), ids)?;
        let fused = concatenate(Axis(1), &[rows.view(), features.view()]).map_err(|_| {
            RecError::shape("tower input", &[ids.len()], &[rows.nrows(), features.nrows()])
        })?;
        Ok(fused)
    }
}

fn l2_normalize(raw: Array2<f32>) -> (Array2<f32>, Array1<f32>, Vec<bool>) {
    let mut output = raw;
    let mut norms = Array1::zeros(output.nrows());
    let mut clamped = vec![false; output.nrows()];

    for ((mut row, norm), clamp) in output
        .axis_iter_mut(Axis(0))
        .zip(norms.iter_mut())
        .zip(clamped.iter_mut())
    {
        let squared = row.dot(&row);
        *clamp = squared < NORM_EPSILON;
        *norm = squared.max(NORM_EPSILON).sqrt();
        let n = *norm;
        row.mapv_inplace(|x| x / n);
    }

    (output, norms, clamped)
}

impl Tower for MlpTower {
    type Cache = MlpCache;

    fn requires_features(&self) -> bool {
        true
    }

    fn output_dim(&self) -> usize {
        self.layers
            .last()
            .map(Dense::output_dim)
            .unwrap_or_else(|| self.embedding.ncols())
    }

    fn num_ids(&self) -> usize {
        self.embedding.nrows()
    }

    fn forward(&self, ids: &[usize], features: Option<ArrayView2<'_, f32>>) -> Result<Array2<f32>, RecError> {
        let mut hidden = self.fused_input(ids, features)?;
        for layer in &self.layers {
            hidden = layer.forward(hidden.view());
        }
        Ok(l2_normalize(hidden).0)
    }

    fn forward_cached(
        &self,
        ids: &[usize],
        features: Option<ArrayView2<'_, f32>>,
    ) -> Result<(Array2<f32>, Self::Cache), RecError> {
        let mut hidden = self.fused_input(ids, features)?;
        let mut caches = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (next, cache) = layer.forward_cached(hidden);
            caches.push(cache);
            hidden = next;
        }

        let (output, norms, clamped) = l2_normalize(hidden);
        let cache = MlpCache {
            ids: ids.to_vec(),
            layers: caches,
            output: output.clone(),
            norms,
            clamped,
        };
        Ok((output, cache))
    }

    fn backward(
        &mut self,
        cache: Self::Cache,
        grad_output: ArrayView2<'_, f32>,
        optimizer: &mut dyn Optimizer,
        prefix: &str,
    ) -> Result<(), RecError> {
        if grad_output.dim() != cache.output.dim() {
            return Err(RecError::shape(
                "tower gradient",
                &[cache.output.nrows(), cache.output.ncols()],
                &[grad_output.nrows(), grad_output.ncols()],
            ));
        }

        // d(x/|x|) = (g - y (y·g)) / |x|; below the floor the norm is constant.
        let mut grad = grad_output.to_owned();
        for (((mut g, y), &norm), &clamped) in grad
            .axis_iter_mut(Axis(0))
            .zip(cache.output.axis_iter(Axis(0)))
            .zip(cache.norms.iter())
            .zip(cache.clamped.iter())
        {
            if clamped {
                g.mapv_inplace(|v| v / norm);
            } else {
                let projection = y.dot(&g);
                Zip::from(&mut g).and(&y).for_each(|gv, &yv| {
                    *gv = (*gv - yv * projection) / norm;
                });
            }
        }

        for (i, (layer, layer_cache)) in self
            .layers
            .iter_mut()
            .zip(cache.layers)
            .enumerate()
            .rev()
        {
            grad = layer.backward(layer_cache, grad, optimizer, &format!("{}.dense{}", prefix, i))?;
        }

        let embedding_dim = self.embedding.ncols();
        let grad_embedding = scatter_rows(
            self.embedding.nrows(),
            &cache.ids,
            grad.slice(s![.., ..embedding_dim]),
        );
        optimizer.update(
            &format!("{}.embedding", prefix),
            self.embedding.view_mut().into_dyn(),
            grad_embedding.view().into_dyn(),
        )
    }

    fn embeddings(&self) -> ArrayView2<'_, f32> {
        self.embedding.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::initializer::seeded_rng;
    use crate::algorithms::{in_batch_softmax, Adam};
    use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Ix1, Ix2};
    use std::collections::HashMap;

    fn config() -> ModelConfig {
        ModelConfig {
            embedding_dim: 4,
            hidden_units: vec![6, 4],
            ..ModelConfig::default()
        }
    }

    fn features(rows: usize, cols: usize) -> Array2<f32> {
        Array2::from_shape_fn((rows, cols), |(i, j)| ((i + 2 * j) % 3) as f32)
    }

    #[test]
    fn test_output_rows_are_unit_length() {
        let tower = MlpTower::new(5, 3, &config(), &mut seeded_rng(2, 0));
        let feats = features(4, 3);
        let out = tower.forward(&[0, 1, 4, 1], Some(feats.view())).unwrap();

        assert_eq!(out.dim(), (4, 4));
        for row in out.axis_iter(Axis(0)) {
            assert!((row.dot(&row).sqrt() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_layer_shapes() {
        let tower = MlpTower::new(5, 3, &config(), &mut seeded_rng(2, 0));
        let layers = tower.layers();

        assert_eq!(layers.len(), 2);
        assert_eq!((layers[0].input_dim(), layers[0].output_dim()), (7, 6));
        assert!(layers[0].relu);
        assert_eq!((layers[1].input_dim(), layers[1].output_dim()), (6, 4));
        assert!(!layers[1].relu);
    }

    #[test]
    fn test_missing_features_is_error() {
        let tower = MlpTower::new(5, 3, &config(), &mut seeded_rng(2, 0));
        assert!(matches!(
            tower.forward(&[0], None),
            Err(RecError::Precondition(_))
        ));

        let wrong = features(1, 2);
        assert!(matches!(
            tower.forward(&[0], Some(wrong.view())),
            Err(RecError::Shape { .. })
        ));
    }

    #[test]
    fn test_cached_and_plain_forward_agree() {
        let tower = MlpTower::new(5, 3, &config(), &mut seeded_rng(4, 0));
        let feats = features(3, 3);

        let plain = tower.forward(&[2, 3, 0], Some(feats.view())).unwrap();
        let (cached, _) = tower.forward_cached(&[2, 3, 0], Some(feats.view())).unwrap();
        assert_eq!(plain, cached);
    }

    /// Records gradients instead of applying them.
    #[derive(Default)]
    struct Recorder {
        gradients: HashMap<String, ArrayD<f32>>,
    }

    impl Optimizer for Recorder {
        fn update(&mut self, key: &str, _params: ArrayViewMutD<'_, f32>, gradients: ArrayViewD<'_, f32>) -> Result<(), RecError> {
            self.gradients.insert(key.to_string(), gradients.to_owned());
            Ok(())
        }

        fn reset(&mut self) {
            self.gradients.clear();
        }
    }

    /// Weighted sum of the outputs, so that d(objective)/d(output) = `weights`.
    fn objective(tower: &MlpTower, ids: &[usize], feats: &Array2<f32>, weights: &Array2<f32>) -> f32 {
        let out = tower.forward(ids, Some(feats.view())).unwrap();
        (&out * weights).sum()
    }

    fn assert_close(numeric: f32, analytic: f32, what: &str) {
        assert!(
            (numeric - analytic).abs() < 2e-3 + 1e-2 * analytic.abs(),
            "{}: numeric {} vs analytic {}",
            what,
            numeric,
            analytic
        );
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let tower = MlpTower::new(4, 3, &config(), &mut seeded_rng(21, 0));
        let ids = [0usize, 2, 0];
        let feats = Array2::from_shape_fn((3, 3), |(i, j)| 0.5 - 0.3 * i as f32 + 0.2 * j as f32);
        let weights = Array2::from_shape_fn((3, 4), |(i, j)| ((i * 4 + j) as f32 * 0.7).sin());

        let mut recorder = Recorder::default();
        let (_, cache) = tower.forward_cached(&ids, Some(feats.view())).unwrap();
        tower
            .clone()
            .backward(cache, weights.view(), &mut recorder, "t")
            .unwrap();

        let h = 1e-3f32;
        let numeric = |perturb: &dyn Fn(&mut MlpTower, f32)| {
            let mut plus = tower.clone();
            perturb(&mut plus, h);
            let mut minus = tower.clone();
            perturb(&mut minus, -h);
            (objective(&plus, &ids, &feats, &weights) - objective(&minus, &ids, &feats, &weights)) / (2.0 * h)
        };

        let embedding = recorder.gradients["t.embedding"].clone().into_dimensionality::<Ix2>().unwrap();
        for (row, col) in [(0, 1), (2, 3), (1, 0), (0, 0)] {
            let n = numeric(&|t: &mut MlpTower, d: f32| t.embedding[[row, col]] += d);
            assert_close(n, embedding[[row, col]], "embedding");
        }
        assert!(embedding.row(1).iter().all(|&g| g == 0.0));

        let dense0 = recorder.gradients["t.dense0.weights"].clone().into_dimensionality::<Ix2>().unwrap();
        for row in 0..7 {
            for col in 0..6 {
                let n = numeric(&|t: &mut MlpTower, d: f32| t.layers[0].weights[[row, col]] += d);
                assert_close(n, dense0[[row, col]], "dense0.weights");
            }
        }

        let bias = recorder.gradients["t.dense1.bias"].clone().into_dimensionality::<Ix1>().unwrap();
        for col in 0..4 {
            let n = numeric(&|t: &mut MlpTower, d: f32| t.layers[1].bias[col] += d);
            assert_close(n, bias[col], "dense1.bias");
        }
    }

    #[test]
    fn test_repeated_steps_reduce_batch_loss() {
        let mut rng = seeded_rng(11, 0);
        let mut users = MlpTower::new(4, 3, &config(), &mut rng);
        let mut items = MlpTower::new(4, 2, &config(), &mut rng);
        let mut adam = Adam::new(0.01, 0.9, 0.999, 1e-7);

        let ids = [0usize, 1, 2, 3];
        let user_feats = features(4, 3);
        let item_feats = features(4, 2);

        let mut losses = Vec::new();
        for _ in 0..200 {
            let (u, uc) = users.forward_cached(&ids, Some(user_feats.view())).unwrap();
            let (v, vc) = items.forward_cached(&ids, Some(item_feats.view())).unwrap();
            let step = in_batch_softmax(u.view(), v.view()).unwrap();
            losses.push(step.loss);
            users.backward(uc, step.user_grad.view(), &mut adam, "user").unwrap();
            items.backward(vc, step.item_grad.view(), &mut adam, "item").unwrap();
        }

        assert!(losses.iter().all(|l| l.is_finite()));
        assert!(losses[losses.len() - 1] < losses[0]);
    }
}
