use crate::error::{Error, Result};
use crate::tensor::{self, Scalar, Tensor};
use ndarray::{Array2, ArrayView1};
use num_traits::One;

// Average softmax cross-entropy over a batch of logits.
//
// `z` holds one row of logits per example and `y_one_hot` the matching one-hot labels. The result
// is a (1 x 1) tensor holding
//
//     mean_over_rows( log(sum_j exp(z_ij)) - sum_j z_ij * y_ij )
//
// computed directly, without subtracting the row maximum first. Logits large enough for `exp` to
// overflow give an infinite loss.
//
// Every step goes through Tensor operations, so with Var operands the loss can be backpropagated.
// Its gradient with respect to `z` is (softmax(z) - y_one_hot) / batch_size.
pub fn softmax_loss<T: Tensor>(z: &T, y_one_hot: &T) -> Result<T> {
    Error::check_shape("softmax_loss", z.shape(), y_one_hot.shape())?;
    let (batch_size, _) = z.shape();
    if batch_size == 0 {
        return Err(Error::EmptyDataset);
    }

    let log_sum_exp = z.exp().summation(Some(1)).log();
    let correct_logit = z.mul(y_one_hot).summation(Some(1));
    let per_example = log_sum_exp.sub(&correct_logit);

    let inverse_batch = T::Elem::one() / T::Elem::from_count(batch_size);
    Ok(per_example.summation(None).scale(inverse_batch))
}

// Row-wise softmax, exp(z) / sum_j exp(z), unstabilised like `softmax_loss`.
pub fn softmax<T: Tensor>(z: &T) -> T {
    let exp_z = z.exp();
    exp_z.div(&exp_z.summation(Some(1)))
}

// Returns the average softmax loss of the logits `h` against labels `y`, and the fraction of rows
// whose largest logit is not at the label's index.
pub fn loss_err<A: Scalar>(h: &Array2<A>, y: ArrayView1<'_, u8>) -> Result<(A, A)> {
    let (examples, num_classes) = h.dim();
    Error::check_shape("loss_err", (examples, 1), (y.len(), 1))?;
    check_labels(y, num_classes)?;

    let y_one_hot: Array2<A> = tensor::one_hot(num_classes, y);
    let loss = softmax_loss(h, &y_one_hot)?[[0, 0]];

    let wrong = h
        .rows()
        .into_iter()
        .zip(y.iter())
        .filter(|(row, label)| argmax(*row) != usize::from(**label))
        .count();
    let err = A::from_count(wrong) / A::from_count(examples);

    Ok((loss, err))
}

// Every label must index one of the num_classes outputs.
pub(crate) fn check_labels(y: ArrayView1<'_, u8>, num_classes: usize) -> Result<()> {
    match y
        .iter()
        .enumerate()
        .find(|(_, label)| usize::from(**label) >= num_classes)
    {
        Some((index, &label)) => Err(Error::LabelOutOfRange {
            index,
            label,
            num_classes,
        }),
        None => Ok(()),
    }
}

// Index of the first largest entry.
fn argmax<A: Scalar>(row: ArrayView1<'_, A>) -> usize {
    let mut best = 0;
    for (index, &value) in row.iter().enumerate() {
        if value > row[best] {
            best = index;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Var;
    use ndarray::array;

    fn scalar(t: &Array2<f64>) -> f64 {
        assert_eq!(t.dim(), (1, 1));
        t[[0, 0]]
    }

    #[test]
    fn uniform_logits_cost_log_of_the_class_count() {
        let z = array![[0.0, 0.0], [0.0, 0.0]];
        let y = array![[1.0, 0.0], [0.0, 1.0]];
        let loss = scalar(&softmax_loss(&z, &y).unwrap());
        assert!((loss - 2f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn loss_matches_the_direct_formula() {
        let z = array![[1.0, 2.0, 3.0], [0.5, -1.0, 0.0]];
        let y = array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]];
        let row0 = (1f64.exp() + 2f64.exp() + 3f64.exp()).ln() - 3.0;
        let row1 = (0.5f64.exp() + (-1f64).exp() + 1.0).ln() - 0.5;
        let loss = scalar(&softmax_loss(&z, &y).unwrap());
        assert!((loss - (row0 + row1) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn mismatched_label_shape_is_rejected() {
        let z = array![[0.0, 1.0, 2.0]];
        let y = array![[0.0, 1.0]];
        assert_eq!(
            softmax_loss(&z, &y),
            Err(Error::ShapeMismatch {
                op: "softmax_loss",
                expected: (1, 3),
                found: (1, 2),
            })
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        let z = Array2::<f64>::zeros((0, 3));
        assert_eq!(softmax_loss(&z, &z.clone()), Err(Error::EmptyDataset));
    }

    #[test]
    fn large_logits_overflow_instead_of_being_rescaled() {
        let z = array![[1000.0f32, 0.0]];
        let y = array![[1.0f32, 0.0]];
        let loss = softmax_loss(&z, &y).unwrap()[[0, 0]];
        assert!(!loss.is_finite());
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let z: Array2<f64> = array![[1.0, 2.0, 3.0], [-4.0, 0.0, 4.0]];
        let probs = softmax(&z);
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!(probs[[0, 2]] > probs[[0, 1]] && probs[[0, 1]] > probs[[0, 0]]);
    }

    #[test]
    fn graph_gradient_is_softmax_minus_labels_over_batch() {
        let z_value: Array2<f64> = array![[0.3, -1.2, 2.0], [1.5, 0.1, -0.4]];
        let y_value = array![[0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let z = Var::leaf(z_value.clone());
        let y = Var::constant(y_value.clone());

        let loss = softmax_loss(&z, &y).unwrap();
        loss.backward().unwrap();

        let expected = (softmax(&z_value) - &y_value) / 2.0;
        let grad = z.grad().unwrap();
        for (g, e) in grad.iter().zip(expected.iter()) {
            assert!((g - e).abs() < 1e-12);
        }
        let eager = scalar(&softmax_loss(&z_value, &y_value).unwrap());
        assert!((scalar(loss.value()) - eager).abs() < 1e-12);
    }

    #[test]
    fn loss_err_counts_wrong_predictions() {
        let h: Array2<f64> = array![[2.0, 1.0, 0.0], [0.0, 3.0, 1.0], [5.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let y = array![0u8, 1, 2, 2];
        let (loss, err) = loss_err(&h, y.view()).unwrap();
        assert!((err - 0.25).abs() < 1e-12);
        let y_one_hot: Array2<f64> = tensor::one_hot(3, y.view());
        assert!((loss - scalar(&softmax_loss(&h, &y_one_hot).unwrap())).abs() < 1e-12);
    }

    #[test]
    fn loss_err_picks_the_first_of_tied_logits() {
        let h: Array2<f64> = array![[1.0, 1.0], [1.0, 1.0]];
        let y = array![0u8, 1];
        let (_, err) = loss_err(&h, y.view()).unwrap();
        assert!((err - 0.5).abs() < 1e-12);
    }

    #[test]
    fn loss_err_rejects_out_of_range_labels() {
        let h = array![[0.0f32, 1.0], [1.0, 0.0]];
        let y = array![1u8, 2];
        assert_eq!(
            loss_err(&h, y.view()),
            Err(Error::LabelOutOfRange {
                index: 1,
                label: 2,
                num_classes: 2,
            })
        );
    }

    #[test]
    fn loss_err_rejects_label_count_mismatch() {
        let h = array![[0.0f32, 1.0]];
        let y = array![1u8, 0];
        assert!(matches!(
            loss_err(&h, y.view()),
            Err(Error::ShapeMismatch { op: "loss_err", .. })
        ));
    }
}
