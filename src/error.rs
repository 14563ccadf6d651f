use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

// Every failure here is a broken caller contract. Nothing is retried, and an epoch that fails
// partway leaves the weights as the last completed batch wrote them.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    // Two operands whose dimensions don't line up. `expected` and `found` are (rows, columns).
    ShapeMismatch {
        op: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },
    // A hyper-parameter outside its valid range, e.g. a zero batch size or a negative learning
    // rate. The value is kept as text so integers and floats share one variant.
    InvalidParameter { name: &'static str, value: String },
    LabelOutOfRange {
        index: usize,
        label: u8,
        num_classes: usize,
    },
    EmptyDataset,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ShapeMismatch {
                op,
                expected,
                found,
            } => write!(
                f,
                "shape mismatch in {op}: expected {}x{}, found {}x{}",
                expected.0, expected.1, found.0, found.1
            ),
            Error::InvalidParameter { name, value } => {
                write!(f, "invalid value for {name}: {value}")
            }
            Error::LabelOutOfRange {
                index,
                label,
                num_classes,
            } => write!(
                f,
                "label {label} at example {index} is outside [0, {num_classes})"
            ),
            Error::EmptyDataset => write!(f, "dataset contains no examples"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub(crate) fn invalid(name: &'static str, value: impl fmt::Display) -> Error {
        Error::InvalidParameter {
            name,
            value: value.to_string(),
        }
    }

    // Returns a ShapeMismatch unless the two shapes are identical.
    pub(crate) fn check_shape(
        op: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    ) -> Result<()> {
        if expected == found {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                op,
                expected,
                found,
            })
        }
    }
}
