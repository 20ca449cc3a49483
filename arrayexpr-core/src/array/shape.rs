//! Array shapes.

use std::fmt;

use smallvec::SmallVec;

use super::ArrayError;

/// Logical dimensions of an array. A rank-0 shape denotes a single scalar.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    /// Constructs a shape from the provided dimensions.
    pub fn new<D: AsRef<[usize]>>(dims: D) -> Self {
        Self {
            dims: SmallVec::from_slice(dims.as_ref()),
        }
    }

    /// The rank-0 shape.
    pub fn scalar() -> Self {
        Self::default()
    }

    /// One-dimensional shape of `len` elements.
    pub fn vector(len: usize) -> Self {
        Self::new([len])
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Shape of an elementwise result: equal shapes, or one side rank 0.
    pub fn broadcast(&self, other: &Shape) -> Result<Shape, ArrayError> {
        if self == other || other.rank() == 0 {
            Ok(self.clone())
        } else if self.rank() == 0 {
            Ok(other.clone())
        } else {
            Err(ArrayError::ShapeMismatch {
                expected: self.dims.to_vec(),
                got: other.dims.to_vec(),
            })
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_shape_has_one_element() {
        assert_eq!(Shape::scalar().rank(), 0);
        assert_eq!(Shape::scalar().num_elements(), 1);
    }

    #[test]
    fn broadcast_rules() {
        let v = Shape::vector(3);
        assert_eq!(v.broadcast(&Shape::scalar()).unwrap(), v);
        assert_eq!(Shape::scalar().broadcast(&v).unwrap(), v);
        assert!(v.broadcast(&Shape::vector(4)).is_err());
        assert!(v.broadcast(&Shape::new([3, 1])).is_err());
    }
}
