use crate::config::TrainConfig;
use crate::error::{Error, Result};
use crate::loss::{check_labels, loss_err, softmax};
use crate::mnist::Dataset;
use crate::tensor::{Scalar, Tensor};
use log::{debug, info, trace, warn};
use ndarray::{Array, Array2, ArrayView1, ArrayView2, s};
use ndarray_rand::{
    RandomExt,
    rand::Rng,
    rand_distr::{Distribution, StandardNormal},
};
use num_traits::{Float, Zero};
use std::ops::Range;

// Splits `examples` into consecutive ranges of `batch` examples, in order. The last range is
// shorter when `batch` doesn't divide `examples`. A zero `batch` yields no ranges at all.
pub fn batch_ranges(examples: usize, batch: usize) -> impl Iterator<Item = Range<usize>> {
    let end = if batch == 0 { 0 } else { examples };
    (0..end)
        .step_by(batch.max(1))
        .map(move |start| start..usize::min(start + batch, examples))
}

// Runs one epoch of mini-batch gradient descent over a two-layer network whose logits are
// relu(X.W1).W2, with no bias terms. The examples are visited in order, `batch` at a time, and
// both weight matrices are updated in place after every batch, so each batch sees the weights
// the previous one left behind. Returns the number of updates made.
//
// The gradients are written out by hand rather than taken from the graph: for softmax
// cross-entropy the gradient with respect to the output logits is softmax(Z2) - Y, and the hidden
// layer's is that pushed back through W2 and masked by the relu derivative. Both are summed over
// the batch by the weight-gradient products and divided by the batch size in the update.
//
// Everything is checked before the first update: a failure leaves the weights untouched.
pub fn nn_epoch<T: Tensor>(
    x: ArrayView2<'_, T::Elem>,
    y: ArrayView1<'_, u8>,
    w1: &mut T,
    w2: &mut T,
    lr: T::Elem,
    batch: usize,
) -> Result<usize> {
    let (examples, input_dim) = x.dim();
    let (w1_rows, hidden_dim) = w1.shape();
    let num_classes = w2.shape().1;

    if examples == 0 {
        return Err(Error::EmptyDataset);
    }
    if batch == 0 {
        return Err(Error::invalid("batch", batch));
    }
    // Written this way round so a NaN learning rate is rejected too.
    if !(lr > T::Elem::zero() && lr.is_finite()) {
        return Err(Error::invalid("lr", lr));
    }
    Error::check_shape("nn_epoch labels", (examples, 1), (y.len(), 1))?;
    Error::check_shape("nn_epoch W1", (input_dim, hidden_dim), (w1_rows, hidden_dim))?;
    Error::check_shape("nn_epoch W2", (hidden_dim, num_classes), w2.shape())?;
    check_labels(y, num_classes)?;

    debug!(
        "epoch over {examples} examples in batches of {batch} ({} updates)",
        examples.div_ceil(batch)
    );

    let mut steps = 0;
    for range in batch_ranges(examples, batch) {
        let batch_size = range.len();
        trace!("batch {steps}: examples {range:?}");

        let x_batch = T::from_array(x.slice(s![range.clone(), ..]).to_owned());
        let y_batch = y.slice(s![range]);

        // Forward pass.
        let z1 = x_batch.matmul(w1);
        let a1 = z1.relu();
        let z2 = a1.matmul(w2);

        // Backward pass. G1 reads W2 before it is updated.
        let g2 = softmax(&z2).sub(&T::one_hot(num_classes, y_batch));
        let g1 = z1.positive_mask().mul(&g2.matmul(&w2.transpose()));

        let step = lr / T::Elem::from_count(batch_size);
        w2.sub_assign(&a1.transpose().matmul(&g2).scale(step));
        w1.sub_assign(&x_batch.transpose().matmul(&g1).scale(step));

        steps += 1;
    }

    Ok(steps)
}

// Loss and error rate on both sets after an epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats<A> {
    pub epoch: usize,
    pub train_loss: A,
    pub train_err: A,
    pub test_loss: A,
    pub test_err: A,
}

// The weights of a two-layer classifier: W1 maps D inputs to H hidden units, W2 maps those to C
// class logits.
#[derive(Debug, Clone, PartialEq)]
pub struct Network<A: Scalar> {
    w1: Array2<A>,
    w2: Array2<A>,
}

impl<A: Scalar> Network<A> {
    // Draws both matrices from a standard normal distribution, then scales W1 by 1/sqrt(H) and W2
    // by 1/sqrt(C) to keep the initial logits small.
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        hidden_dim: usize,
        num_classes: usize,
        rng: &mut R,
    ) -> Network<A>
    where
        StandardNormal: Distribution<A>,
    {
        let mut w1: Array2<A> =
            Array::random_using((input_dim, hidden_dim), StandardNormal, &mut *rng);
        let mut w2: Array2<A> =
            Array::random_using((hidden_dim, num_classes), StandardNormal, rng);

        let w1_scale = A::from_count(hidden_dim).sqrt();
        let w2_scale = A::from_count(num_classes).sqrt();
        w1.mapv_inplace(|w| w / w1_scale);
        w2.mapv_inplace(|w| w / w2_scale);

        Network { w1, w2 }
    }

    pub fn from_weights(w1: Array2<A>, w2: Array2<A>) -> Result<Network<A>> {
        Error::check_shape(
            "Network::from_weights",
            (w1.ncols(), w2.ncols()),
            w2.dim(),
        )?;
        Ok(Network { w1, w2 })
    }

    pub fn w1(&self) -> &Array2<A> {
        &self.w1
    }

    pub fn w2(&self) -> &Array2<A> {
        &self.w2
    }

    pub fn into_weights(self) -> (Array2<A>, Array2<A>) {
        (self.w1, self.w2)
    }

    pub fn input_dim(&self) -> usize {
        self.w1.nrows()
    }

    pub fn hidden_dim(&self) -> usize {
        self.w1.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.w2.ncols()
    }

    // The logits relu(X.W1).W2, one row per example.
    pub fn feedforward(&self, x: ArrayView2<'_, A>) -> Result<Array2<A>> {
        Error::check_shape(
            "Network::feedforward",
            (x.nrows(), self.input_dim()),
            x.dim(),
        )?;
        Ok(x.dot(&self.w1).relu().matmul(&self.w2))
    }

    pub fn epoch(
        &mut self,
        x: ArrayView2<'_, A>,
        y: ArrayView1<'_, u8>,
        lr: A,
        batch: usize,
    ) -> Result<usize> {
        nn_epoch(x, y, &mut self.w1, &mut self.w2, lr, batch)
    }

    // Average softmax loss and error rate of the network on the given examples.
    pub fn evaluate(&self, x: ArrayView2<'_, A>, y: ArrayView1<'_, u8>) -> Result<(A, A)> {
        loss_err(&self.feedforward(x)?, y)
    }

    // Trains for `config.epochs` epochs, always visiting the training examples in their stored
    // order, and measures both sets after every epoch.
    pub fn train(
        &mut self,
        train: &Dataset<A>,
        test: &Dataset<A>,
        config: &TrainConfig,
    ) -> Result<Vec<EpochStats<A>>> {
        config.validate()?;
        let lr = A::from_f64(config.lr).ok_or_else(|| Error::invalid("lr", config.lr))?;

        let mut history = Vec::with_capacity(config.epochs);
        for epoch in 0..config.epochs {
            self.epoch(train.x.view(), train.y.view(), lr, config.batch)?;

            let (train_loss, train_err) = self.evaluate(train.x.view(), train.y.view())?;
            let (test_loss, test_err) = self.evaluate(test.x.view(), test.y.view())?;
            if !train_loss.is_finite() {
                warn!("training loss is no longer finite after epoch {epoch}: {train_loss}");
            }
            info!(
                "epoch {epoch}: train loss {train_loss:.5}, train err {train_err:.5}, \
                 test loss {test_loss:.5}, test err {test_err:.5}"
            );

            history.push(EpochStats {
                epoch,
                train_loss,
                train_err,
                test_loss,
                test_err,
            });
        }

        Ok(history)
    }
}
