use crate::error::RecError;
use ndarray::{Array2, ArrayView2, Axis};

/// Result of the in-batch sampled softmax for one mini-batch.
#[derive(Debug, Clone)]
pub struct SoftmaxLoss {
    /// Mean cross-entropy of the diagonal (positive) class.
    pub loss: f32,
    /// `[B, B]` logits, kept for inspection.
    pub logits: Array2<f32>,
    /// Gradient of the loss with respect to the user representations.
    pub user_grad: Array2<f32>,
    /// Gradient of the loss with respect to the item representations.
    pub item_grad: Array2<f32>,
}

/// Scores every user in the batch against every item in the batch and
/// treats the diagonal as the only correct class per row. Off-diagonal
/// items act as sampled negatives, even when one is another positive for
/// the same user.
pub fn in_batch_softmax(users: ArrayView2<'_, f32>, items: ArrayView2<'_, f32>) -> Result<SoftmaxLoss, RecError> {
    if users.dim() != items.dim() {
        return Err(RecError::shape(
            "in-batch softmax",
            &[users.nrows(), users.ncols()],
            &[items.nrows(), items.ncols()],
        ));
    }
    let batch = users.nrows();
    if batch == 0 {
        return Err(RecError::shape("in-batch softmax", &[1, users.ncols()], &[0, users.ncols()]));
    }

    let logits = users.dot(&items.t());

    // Row-wise softmax with max subtraction; probabilities become dL/dlogits.
    let mut probs = logits.clone();
    let mut loss = 0.0f32;
    for (i, mut row) in probs.axis_iter_mut(Axis(0)).enumerate() {
        let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        loss += sum.ln() + max - logits[[i, i]];
        row.mapv_inplace(|x| x / sum);
    }
    let scale = 1.0 / batch as f32;
    loss *= scale;

    let mut grad_logits = probs;
    for i in 0..batch {
        grad_logits[[i, i]] -= 1.0;
    }
    grad_logits.mapv_inplace(|x| x * scale);

    let user_grad = grad_logits.dot(&items);
    let item_grad = grad_logits.t().dot(&users);

    Ok(SoftmaxLoss {
        loss,
        logits,
        user_grad,
        item_grad,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    #[test]
    fn test_batch_of_four_gives_square_logits() {
        let users = Array2::from_shape_fn((4, 3), |(i, j)| (i + j) as f32 * 0.1);
        let items = Array2::from_shape_fn((4, 3), |(i, j)| (i * j) as f32 * 0.1);

        let out = in_batch_softmax(users.view(), items.view()).unwrap();
        assert_eq!(out.logits.dim(), (4, 4));
        assert!(out.loss.is_finite());
        assert!(out.loss >= 0.0);
    }

    #[test]
    fn test_uniform_logits_give_log_batch() {
        let zeros = Array2::<f32>::zeros((5, 2));
        let out = in_batch_softmax(zeros.view(), zeros.view()).unwrap();
        assert!((out.loss - (5.0f32).ln()).abs() < 1e-6);
    }

    #[test]
    fn test_aligned_pairs_have_lower_loss() {
        let aligned = arr2(&[[5.0f32, 0.0], [0.0, 5.0]]);
        let crossed = arr2(&[[0.0f32, 5.0], [5.0, 0.0]]);

        let good = in_batch_softmax(aligned.view(), aligned.view()).unwrap();
        let bad = in_batch_softmax(aligned.view(), crossed.view()).unwrap();
        assert!(good.loss < bad.loss);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let users = arr2(&[[0.3f32, -0.2], [0.1, 0.4], [-0.5, 0.2]]);
        let items = arr2(&[[0.2f32, 0.1], [-0.3, 0.3], [0.4, -0.1]]);
        let out = in_batch_softmax(users.view(), items.view()).unwrap();

        let h = 1e-3f32;
        for i in 0..3 {
            for j in 0..2 {
                let mut plus = users.clone();
                plus[[i, j]] += h;
                let mut minus = users.clone();
                minus[[i, j]] -= h;
                let numeric = (in_batch_softmax(plus.view(), items.view()).unwrap().loss
                    - in_batch_softmax(minus.view(), items.view()).unwrap().loss)
                    / (2.0 * h);
                assert!((numeric - out.user_grad[[i, j]]).abs() < 1e-3);

                let mut plus = items.clone();
                plus[[i, j]] += h;
                let mut minus = items.clone();
                minus[[i, j]] -= h;
                let numeric = (in_batch_softmax(users.view(), plus.view()).unwrap().loss
                    - in_batch_softmax(users.view(), minus.view()).unwrap().loss)
                    / (2.0 * h);
                assert!((numeric - out.item_grad[[i, j]]).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_mismatched_batches_are_rejected() {
        let users = Array2::<f32>::zeros((3, 2));
        let items = Array2::<f32>::zeros((2, 2));
        assert!(in_batch_softmax(users.view(), items.view()).is_err());
    }
}
