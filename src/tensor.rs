use ndarray::{Array2, ArrayView1, Axis, NdFloat};
use num_traits::FromPrimitive;

// Element type of every tensor: a float ndarray can do linear algebra with, which can also be built
// from a count (batch sizes appear as divisors).
pub trait Scalar: NdFloat + FromPrimitive {
    fn from_count(n: usize) -> Self {
        Self::from_usize(n).unwrap_or_else(Self::infinity)
    }
}

impl<A: NdFloat + FromPrimitive> Scalar for A {}

// The rank-2 tensor operations the trainer and the loss are written against. Everything is a
// matrix: a per-example column is (n x 1) and a scalar is (1 x 1).
//
// Shapes are checked by the public entry points that accept user data. Once those checks pass,
// the operations themselves panic on mismatched operands, the same way ndarray's `dot` does.
pub trait Tensor: Clone + Sized {
    type Elem: Scalar;

    fn from_array(array: Array2<Self::Elem>) -> Self;

    fn to_array(&self) -> Array2<Self::Elem>;

    // (rows, columns)
    fn shape(&self) -> (usize, usize);

    fn matmul(&self, rhs: &Self) -> Self;

    fn transpose(&self) -> Self;

    fn add(&self, rhs: &Self) -> Self;

    fn sub(&self, rhs: &Self) -> Self;

    // Elementwise product.
    fn mul(&self, rhs: &Self) -> Self;

    // Elementwise quotient. A (n x 1) right operand is broadcast across the columns.
    fn div(&self, rhs: &Self) -> Self;

    fn scale(&self, factor: Self::Elem) -> Self;

    fn exp(&self) -> Self;

    // Natural logarithm.
    fn log(&self) -> Self;

    fn relu(&self) -> Self;

    // 1 where the entry is strictly positive, 0 elsewhere. This is the derivative of relu and
    // carries no gradient of its own.
    fn positive_mask(&self) -> Self;

    // Sum along an axis, keeping that axis with length 1, or over everything into a (1 x 1).
    fn summation(&self, axis: Option<usize>) -> Self;

    fn sub_assign(&mut self, rhs: &Self);

    // A (labels.len() x num_classes) indicator matrix with a single 1 per row at the label's
    // column. Panics if a label is not below num_classes.
    fn one_hot(num_classes: usize, labels: ArrayView1<'_, u8>) -> Self {
        Self::from_array(one_hot(num_classes, labels))
    }
}

pub fn one_hot<A: Scalar>(num_classes: usize, labels: ArrayView1<'_, u8>) -> Array2<A> {
    let mut indicator = Array2::zeros((labels.len(), num_classes));
    for (mut row, &label) in indicator.rows_mut().into_iter().zip(labels.iter()) {
        row[label as usize] = A::one();
    }
    indicator
}

impl<A: Scalar> Tensor for Array2<A> {
    type Elem = A;

    fn from_array(array: Array2<A>) -> Self {
        array
    }

    fn to_array(&self) -> Array2<A> {
        self.clone()
    }

    fn shape(&self) -> (usize, usize) {
        self.dim()
    }

    fn matmul(&self, rhs: &Self) -> Self {
        self.dot(rhs)
    }

    fn transpose(&self) -> Self {
        self.t().to_owned()
    }

    fn add(&self, rhs: &Self) -> Self {
        self + rhs
    }

    fn sub(&self, rhs: &Self) -> Self {
        self - rhs
    }

    fn mul(&self, rhs: &Self) -> Self {
        self * rhs
    }

    fn div(&self, rhs: &Self) -> Self {
        self / rhs
    }

    fn scale(&self, factor: A) -> Self {
        self.mapv(|v| v * factor)
    }

    fn exp(&self) -> Self {
        self.mapv(|v| v.exp())
    }

    fn log(&self) -> Self {
        self.mapv(|v| v.ln())
    }

    fn relu(&self) -> Self {
        self.mapv(|v| v.max(A::zero()))
    }

    fn positive_mask(&self) -> Self {
        self.mapv(|v| if v > A::zero() { A::one() } else { A::zero() })
    }

    fn summation(&self, axis: Option<usize>) -> Self {
        match axis {
            Some(axis) => self.sum_axis(Axis(axis)).insert_axis(Axis(axis)),
            None => Array2::from_elem((1, 1), self.sum()),
        }
    }

    fn sub_assign(&mut self, rhs: &Self) {
        *self -= rhs;
    }
}
