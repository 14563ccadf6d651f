use crate::error::{Error, Result};
use crate::tensor::{Scalar, Tensor};
use ndarray::{Array2, Axis};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

// The operation that produced a node. Parents are stored on the node in operand order.
#[derive(Clone, Copy, Debug)]
enum Op<A> {
    Leaf,
    Constant,
    MatMul,
    Transpose,
    Add,
    Sub,
    Mul,
    Div,
    Scale(A),
    Exp,
    Log,
    Relu,
    Summation,
}

struct Node<A: Scalar> {
    value: Array2<A>,
    op: Op<A>,
    parents: Vec<Var<A>>,
    requires_grad: bool,
    grad: RefCell<Option<Array2<A>>>,
}

// A node in a reverse-mode computation graph. Every operation produces a new node that remembers
// its operands, so calling `backward` on a (1 x 1) result fills in the gradient of that result with
// respect to every leaf it depends on. Cloning a Var is cheap and shares the node.
#[derive(Clone)]
pub struct Var<A: Scalar>(Rc<Node<A>>);

impl<A: Scalar> Var<A> {
    // A trainable value. Gradients are recorded for leaves.
    pub fn leaf(value: Array2<A>) -> Var<A> {
        Var::with_op(value, Op::Leaf, Vec::new())
    }

    // A value that never receives a gradient (inputs, labels, masks).
    pub fn constant(value: Array2<A>) -> Var<A> {
        Var::with_op(value, Op::Constant, Vec::new())
    }

    fn with_op(value: Array2<A>, op: Op<A>, parents: Vec<Var<A>>) -> Var<A> {
        let requires_grad = match op {
            Op::Leaf => true,
            Op::Constant => false,
            _ => parents.iter().any(|parent| parent.0.requires_grad),
        };
        Var(Rc::new(Node {
            value,
            op,
            parents,
            requires_grad,
            grad: RefCell::new(None),
        }))
    }

    pub fn value(&self) -> &Array2<A> {
        &self.0.value
    }

    pub fn requires_grad(&self) -> bool {
        self.0.requires_grad
    }

    // The gradient accumulated by the last `backward` call that reached this node.
    pub fn grad(&self) -> Option<Array2<A>> {
        self.0.grad.borrow().clone()
    }

    // Backpropagates from this node, which must hold a single value. Gradients left on the graph by
    // an earlier call are cleared first.
    pub fn backward(&self) -> Result<()> {
        Error::check_shape("backward", (1, 1), self.0.value.dim())?;

        let order = self.topological_order();
        for var in &order {
            *var.0.grad.borrow_mut() = None;
        }
        *self.0.grad.borrow_mut() = Some(Array2::ones((1, 1)));

        for var in order.iter().rev() {
            if !var.0.requires_grad {
                continue;
            }
            let Some(grad) = var.grad() else {
                continue;
            };
            for (parent, contribution) in var.0.parents.iter().zip(var.parent_grads(&grad)) {
                if parent.0.requires_grad {
                    parent.accumulate(contribution);
                }
            }
        }

        Ok(())
    }

    // Nodes ordered so that every node comes after all of its parents.
    fn topological_order(&self) -> Vec<Var<A>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        // (node, parents already pushed)
        let mut stack = vec![(self.clone(), false)];
        while let Some((var, expanded)) = stack.pop() {
            if expanded {
                order.push(var);
                continue;
            }
            if !visited.insert(Rc::as_ptr(&var.0)) {
                continue;
            }
            stack.push((var.clone(), true));
            for parent in &var.0.parents {
                if !visited.contains(&Rc::as_ptr(&parent.0)) {
                    stack.push((parent.clone(), false));
                }
            }
        }
        order
    }

    fn accumulate(&self, contribution: Array2<A>) {
        let mut slot = self.0.grad.borrow_mut();
        match slot.as_mut() {
            Some(total) => *total += &contribution,
            None => *slot = Some(contribution),
        }
    }

    // The gradient flowing into each parent, given the gradient of this node.
    fn parent_grads(&self, grad: &Array2<A>) -> Vec<Array2<A>> {
        let node = &self.0;
        let input = move |i: usize| &node.parents[i].0.value;
        match node.op {
            Op::Leaf | Op::Constant => Vec::new(),
            Op::MatMul => vec![grad.dot(&input(1).t()), input(0).t().dot(grad)],
            Op::Transpose => vec![grad.t().to_owned()],
            Op::Add => vec![
                reduce_to(grad.clone(), input(0).dim()),
                reduce_to(grad.clone(), input(1).dim()),
            ],
            Op::Sub => vec![
                reduce_to(grad.clone(), input(0).dim()),
                reduce_to(grad.mapv(|g| -g), input(1).dim()),
            ],
            Op::Mul => vec![
                reduce_to(grad * input(1), input(0).dim()),
                reduce_to(grad * input(0), input(1).dim()),
            ],
            Op::Div => {
                let (lhs, rhs) = (input(0), input(1));
                let rhs_grad = &(grad * lhs) / &rhs.mapv(|v| v * v);
                vec![
                    reduce_to(grad / rhs, lhs.dim()),
                    reduce_to(rhs_grad.mapv(|g| -g), rhs.dim()),
                ]
            }
            Op::Scale(factor) => vec![grad.mapv(|g| g * factor)],
            Op::Exp => vec![grad * &node.value],
            Op::Log => vec![grad / input(0)],
            Op::Relu => vec![grad * &input(0).positive_mask()],
            Op::Summation => vec![expand_to(grad, input(0).dim())],
        }
    }
}

// Sums a broadcast gradient back down to the shape of the operand it came from.
fn reduce_to<A: Scalar>(mut grad: Array2<A>, shape: (usize, usize)) -> Array2<A> {
    if shape.0 == 1 && grad.nrows() != 1 {
        grad = grad.sum_axis(Axis(0)).insert_axis(Axis(0));
    }
    if shape.1 == 1 && grad.ncols() != 1 {
        grad = grad.sum_axis(Axis(1)).insert_axis(Axis(1));
    }
    grad
}

// Repeats a reduced gradient along the axes a summation collapsed.
fn expand_to<A: Scalar>(grad: &Array2<A>, shape: (usize, usize)) -> Array2<A> {
    let (rows, cols) = grad.dim();
    Array2::from_shape_fn(shape, |(i, j)| grad[[i.min(rows - 1), j.min(cols - 1)]])
}

impl<A: Scalar> fmt::Debug for Var<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("op", &self.0.op)
            .field("value", &self.0.value)
            .field("requires_grad", &self.0.requires_grad)
            .finish()
    }
}

impl<A: Scalar> Tensor for Var<A> {
    type Elem = A;

    fn from_array(array: Array2<A>) -> Self {
        Var::constant(array)
    }

    fn to_array(&self) -> Array2<A> {
        self.0.value.clone()
    }

    fn shape(&self) -> (usize, usize) {
        self.0.value.dim()
    }

    fn matmul(&self, rhs: &Self) -> Self {
        let value = self.0.value.matmul(&rhs.0.value);
        Var::with_op(value, Op::MatMul, vec![self.clone(), rhs.clone()])
    }

    fn transpose(&self) -> Self {
        let value = Tensor::transpose(&self.0.value);
        Var::with_op(value, Op::Transpose, vec![self.clone()])
    }

    fn add(&self, rhs: &Self) -> Self {
        let value = &self.0.value + &rhs.0.value;
        Var::with_op(value, Op::Add, vec![self.clone(), rhs.clone()])
    }

    fn sub(&self, rhs: &Self) -> Self {
        let value = &self.0.value - &rhs.0.value;
        Var::with_op(value, Op::Sub, vec![self.clone(), rhs.clone()])
    }

    fn mul(&self, rhs: &Self) -> Self {
        let value = &self.0.value * &rhs.0.value;
        Var::with_op(value, Op::Mul, vec![self.clone(), rhs.clone()])
    }

    fn div(&self, rhs: &Self) -> Self {
        let value = &self.0.value / &rhs.0.value;
        Var::with_op(value, Op::Div, vec![self.clone(), rhs.clone()])
    }

    fn scale(&self, factor: A) -> Self {
        let value = self.0.value.scale(factor);
        Var::with_op(value, Op::Scale(factor), vec![self.clone()])
    }

    fn exp(&self) -> Self {
        let value = Tensor::exp(&self.0.value);
        Var::with_op(value, Op::Exp, vec![self.clone()])
    }

    fn log(&self) -> Self {
        let value = Tensor::log(&self.0.value);
        Var::with_op(value, Op::Log, vec![self.clone()])
    }

    fn relu(&self) -> Self {
        let value = self.0.value.relu();
        Var::with_op(value, Op::Relu, vec![self.clone()])
    }

    fn positive_mask(&self) -> Self {
        Var::constant(self.0.value.positive_mask())
    }

    fn summation(&self, axis: Option<usize>) -> Self {
        let value = self.0.value.summation(axis);
        Var::with_op(value, Op::Summation, vec![self.clone()])
    }

    // Rebinds to a fresh node holding the updated value, so the update itself is not recorded.
    fn sub_assign(&mut self, rhs: &Self) {
        let value = &self.0.value - &rhs.0.value;
        *self = if self.0.requires_grad {
            Var::leaf(value)
        } else {
            Var::constant(value)
        };
    }
}
