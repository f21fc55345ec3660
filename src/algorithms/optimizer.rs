use crate::config::TrainingConfig;
use crate::error::RecError;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};
use std::collections::HashMap;

pub trait Optimizer: Send + Sync {
    /// Applies one update to the tensor registered under `key`.
    fn update(&mut self, key: &str, params: ArrayViewMutD<'_, f32>, gradients: ArrayViewD<'_, f32>) -> Result<(), RecError>;
    fn reset(&mut self);
}

#[derive(Debug, Clone)]
struct Moments {
    m: ArrayD<f32>,
    v: ArrayD<f32>,
    t: i32,
}

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    state: HashMap<String, Moments>,
}

impl Adam {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            learning_rate: learning_rate as f32,
            beta1: beta1 as f32,
            beta2: beta2 as f32,
            epsilon: epsilon as f32,
            state: HashMap::new(),
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(config.learning_rate, config.beta1, config.beta2, config.epsilon)
    }

    /// Number of updates applied to `key` so far.
    pub fn steps(&self, key: &str) -> i32 {
        self.state.get(key).map(|s| s.t).unwrap_or(0)
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.001, 0.9, 0.999, 1e-7)
    }
}

impl Optimizer for Adam {
    fn update(&mut self, key: &str, mut params: ArrayViewMutD<'_, f32>, gradients: ArrayViewD<'_, f32>) -> Result<(), RecError> {
        if params.shape() != gradients.shape() {
            return Err(RecError::Shape {
                context: "optimizer update",
                expected: params.shape().to_vec(),
                actual: gradients.shape().to_vec(),
            });
        }

        let moments = self.state.entry(key.to_string()).or_insert_with(|| Moments {
            m: ArrayD::zeros(params.raw_dim()),
            v: ArrayD::zeros(params.raw_dim()),
            t: 0,
        });
        if moments.m.shape() != params.shape() {
            return Err(RecError::Shape {
                context: "optimizer state",
                expected: moments.m.shape().to_vec(),
                actual: params.shape().to_vec(),
            });
        }
        moments.t += 1;

        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let bias1 = 1.0 - beta1.powi(moments.t);
        let bias2 = 1.0 - beta2.powi(moments.t);
        let step = self.learning_rate;

        Zip::from(&mut params)
            .and(&gradients)
            .and(&mut moments.m)
            .and(&mut moments.v)
            .for_each(|p, &g, m, v| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= step * m_hat / (v_hat.sqrt() + epsilon);
            });

        Ok(())
    }

    fn reset(&mut self) {
        self.state.clear();
    }
}
