// A two-layer fully-connected classifier (relu hidden layer, softmax output) trained with
// mini-batch gradient descent on MNIST-style data.
//
// `network::nn_epoch` does one pass of gradient descent with gradients derived by hand, and
// `loss::softmax_loss` is the matching loss. Both are written against the `tensor::Tensor` trait.
// That trait is implemented for plain ndarray matrices and for `graph::Var`, a small reverse-mode
// autodiff graph that can check the hand-derived gradients.

pub mod config;
pub mod error;
pub mod graph;
pub mod loss;
pub mod mnist;
pub mod network;
pub mod tensor;

pub use config::TrainConfig;
pub use error::{Error, Result};
pub use graph::Var;
pub use loss::{loss_err, softmax, softmax_loss};
pub use mnist::{Dataset, MnistData, parse_mnist};
pub use network::{EpochStats, Network, batch_ranges, nn_epoch};
pub use tensor::{Scalar, Tensor, one_hot};
