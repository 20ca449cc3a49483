//! Host Arrays
//!
//! Dense, row-major arrays living in host memory. This is the concrete array
//! collaborator the deferred graph evaluates against: leaves hold one, and
//! every operator node is applied through the elementwise kernels below.
//!
//! # Elementwise Semantics
//!
//! Binary kernels accept equal shapes or a rank-0 operand on either side.
//! Results are promoted along `bool < int64 < float64`; integer arithmetic
//! wraps on overflow.
//!
//! # Sharing
//!
//! [`ArrayRef`] wraps a host array in an `Arc<RwLock<_>>`. Graph leaves hold
//! an `ArrayRef`, so an in-place index assignment is visible to every handle
//! that reaches the same buffer.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{ArrayError, DType, IndexKey, Scalar, Shape};

/// Typed element storage.
#[derive(Debug, Clone, PartialEq)]
enum Buffer {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl Buffer {
    fn dtype(&self) -> DType {
        match self {
            Buffer::Bool(_) => DType::Bool,
            Buffer::Int(_) => DType::Int64,
            Buffer::Float(_) => DType::Float64,
        }
    }

    fn len(&self) -> usize {
        match self {
            Buffer::Bool(v) => v.len(),
            Buffer::Int(v) => v.len(),
            Buffer::Float(v) => v.len(),
        }
    }

    fn get(&self, index: usize) -> Scalar {
        match self {
            Buffer::Bool(v) => Scalar::Bool(v[index]),
            Buffer::Int(v) => Scalar::Int(v[index]),
            Buffer::Float(v) => Scalar::Float(v[index]),
        }
    }

    fn to_f64(&self) -> Vec<f64> {
        match self {
            Buffer::Bool(v) => v.iter().map(|&b| f64::from(u8::from(b))).collect(),
            Buffer::Int(v) => v.iter().map(|&i| i as f64).collect(),
            Buffer::Float(v) => v.clone(),
        }
    }

    fn to_i64(&self) -> Vec<i64> {
        match self {
            Buffer::Bool(v) => v.iter().map(|&b| i64::from(b)).collect(),
            Buffer::Int(v) => v.clone(),
            Buffer::Float(v) => v.iter().map(|&x| x as i64).collect(),
        }
    }

    fn to_bool(&self) -> Vec<bool> {
        match self {
            Buffer::Bool(v) => v.clone(),
            Buffer::Int(v) => v.iter().map(|&i| i != 0).collect(),
            Buffer::Float(v) => v.iter().map(|&x| x != 0.0).collect(),
        }
    }

    /// Unchecked conversion, like numpy's `astype(..., casting="unsafe")`.
    fn cast(&self, dtype: DType) -> Buffer {
        match dtype {
            DType::Bool => Buffer::Bool(self.to_bool()),
            DType::Int64 => Buffer::Int(self.to_i64()),
            DType::Float64 => Buffer::Float(self.to_f64()),
        }
    }

    fn gather(&self, positions: &[usize]) -> Buffer {
        match self {
            Buffer::Bool(v) => Buffer::Bool(positions.iter().map(|&p| v[p]).collect()),
            Buffer::Int(v) => Buffer::Int(positions.iter().map(|&p| v[p]).collect()),
            Buffer::Float(v) => Buffer::Float(positions.iter().map(|&p| v[p]).collect()),
        }
    }

    /// Writes `values` (already cast to this buffer's dtype) into `positions`.
    /// A single value is broadcast to every position.
    fn scatter(&mut self, positions: &[usize], values: &Buffer) {
        fn write<T: Copy>(dst: &mut [T], positions: &[usize], src: &[T]) {
            for (n, &p) in positions.iter().enumerate() {
                dst[p] = if src.len() == 1 { src[0] } else { src[n] };
            }
        }
        match (self, values) {
            (Buffer::Bool(dst), Buffer::Bool(src)) => write(dst, positions, src),
            (Buffer::Int(dst), Buffer::Int(src)) => write(dst, positions, src),
            (Buffer::Float(dst), Buffer::Float(src)) => write(dst, positions, src),
            (dst, src) => {
                let src = src.cast(dst.dtype());
                dst.scatter(positions, &src);
            }
        }
    }
}

/// Element types that can seed a [`HostArray`].
pub trait Element: Copy {
    #[doc(hidden)]
    fn into_storage(values: Vec<Self>) -> HostArray;
}

impl Element for bool {
    fn into_storage(values: Vec<Self>) -> HostArray {
        HostArray::from_buffer(Buffer::Bool(values))
    }
}

impl Element for i64 {
    fn into_storage(values: Vec<Self>) -> HostArray {
        HostArray::from_buffer(Buffer::Int(values))
    }
}

impl Element for f64 {
    fn into_storage(values: Vec<Self>) -> HostArray {
        HostArray::from_buffer(Buffer::Float(values))
    }
}

/// Picks the source element for output slot `i`, broadcasting length-1 inputs.
fn at(len: usize, i: usize) -> usize {
    if len == 1 {
        0
    } else {
        i
    }
}

/// Dense host-memory array.
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    shape: Shape,
    data: Buffer,
}

impl HostArray {
    fn from_buffer(data: Buffer) -> Self {
        Self {
            shape: Shape::vector(data.len()),
            data,
        }
    }

    /// One-dimensional array owning `values`.
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        T::into_storage(values)
    }

    /// Array of the given shape, validating the element count.
    pub fn from_shape_vec<T: Element>(shape: Shape, values: Vec<T>) -> Result<Self, ArrayError> {
        if values.len() != shape.num_elements() {
            return Err(ArrayError::LengthMismatch {
                len: values.len(),
                shape: shape.dims().to_vec(),
            });
        }
        let mut array = T::into_storage(values);
        array.shape = shape;
        Ok(array)
    }

    /// Rank-0 array holding a single scalar.
    pub fn from_scalar(value: Scalar) -> Self {
        let data = match value {
            Scalar::Bool(b) => Buffer::Bool(vec![b]),
            Scalar::Int(i) => Buffer::Int(vec![i]),
            Scalar::Float(x) => Buffer::Float(vec![x]),
        };
        Self {
            shape: Shape::scalar(),
            data,
        }
    }

    /// `int64` values `start..stop`.
    pub fn arange(start: i64, stop: i64) -> Self {
        Self::from_vec((start..stop).collect::<Vec<_>>())
    }

    /// `float64` zeros of the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let data = Buffer::Float(vec![0.0; shape.num_elements()]);
        Self { shape, data }
    }

    /// Builds an array from `f64` results, casting them to `dtype`.
    pub fn from_f64_as(shape: Shape, values: Vec<f64>, dtype: DType) -> Result<Self, ArrayError> {
        let array = Self::from_shape_vec(shape, values)?;
        Ok(array.cast(dtype))
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single element of a rank-0 array.
    pub fn to_scalar(&self) -> Option<Scalar> {
        (self.shape.rank() == 0).then(|| self.data.get(0))
    }

    /// Element at a flat position, if in range.
    pub fn get_flat(&self, index: usize) -> Option<Scalar> {
        (index < self.len()).then(|| self.data.get(index))
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.data.to_f64()
    }

    pub fn to_i64_vec(&self) -> Vec<i64> {
        self.data.to_i64()
    }

    pub fn to_bool_vec(&self) -> Vec<bool> {
        self.data.to_bool()
    }

    pub fn cast(&self, dtype: DType) -> HostArray {
        Self {
            shape: self.shape.clone(),
            data: self.data.cast(dtype),
        }
    }

    fn arith(
        &self,
        other: &HostArray,
        int: impl Fn(i64, i64) -> Result<i64, ArrayError>,
        float: impl Fn(f64, f64) -> f64,
    ) -> Result<HostArray, ArrayError> {
        let shape = self.shape.broadcast(&other.shape)?;
        let n = shape.num_elements();
        let data = match self.dtype().arithmetic(other.dtype()) {
            DType::Float64 => {
                let (a, b) = (self.data.to_f64(), other.data.to_f64());
                Buffer::Float(
                    (0..n)
                        .map(|i| float(a[at(a.len(), i)], b[at(b.len(), i)]))
                        .collect(),
                )
            }
            _ => {
                let (a, b) = (self.data.to_i64(), other.data.to_i64());
                Buffer::Int(
                    (0..n)
                        .map(|i| int(a[at(a.len(), i)], b[at(b.len(), i)]))
                        .collect::<Result<_, _>>()?,
                )
            }
        };
        Ok(HostArray { shape, data })
    }

    pub fn add(&self, other: &HostArray) -> Result<HostArray, ArrayError> {
        self.arith(other, |a, b| Ok(a.wrapping_add(b)), |a, b| a + b)
    }

    pub fn sub(&self, other: &HostArray) -> Result<HostArray, ArrayError> {
        self.arith(other, |a, b| Ok(a.wrapping_sub(b)), |a, b| a - b)
    }

    pub fn mul(&self, other: &HostArray) -> Result<HostArray, ArrayError> {
        self.arith(other, |a, b| Ok(a.wrapping_mul(b)), |a, b| a * b)
    }

    /// True division; the result is always `float64`.
    pub fn div(&self, other: &HostArray) -> Result<HostArray, ArrayError> {
        self.cast(DType::Float64).arith(other, |_, _| Ok(0), |a, b| a / b)
    }

    pub fn pow(&self, other: &HostArray) -> Result<HostArray, ArrayError> {
        self.arith(
            other,
            |a, b| {
                if b < 0 {
                    return Err(ArrayError::NegativeIntegerPower);
                }
                Ok(a.wrapping_pow(u32::try_from(b).unwrap_or(u32::MAX)))
            },
            f64::powf,
        )
    }

    /// Elementwise `self <= other`.
    pub fn le(&self, other: &HostArray) -> Result<HostArray, ArrayError> {
        let shape = self.shape.broadcast(&other.shape)?;
        let n = shape.num_elements();
        let values: Vec<bool> = if self.dtype().promote(other.dtype()) == DType::Float64 {
            let (a, b) = (self.data.to_f64(), other.data.to_f64());
            (0..n).map(|i| a[at(a.len(), i)] <= b[at(b.len(), i)]).collect()
        } else {
            let (a, b) = (self.data.to_i64(), other.data.to_i64());
            (0..n).map(|i| a[at(a.len(), i)] <= b[at(b.len(), i)]).collect()
        };
        Ok(HostArray {
            shape,
            data: Buffer::Bool(values),
        })
    }

    pub fn abs(&self) -> HostArray {
        let data = match &self.data {
            Buffer::Bool(v) => Buffer::Bool(v.clone()),
            Buffer::Int(v) => Buffer::Int(v.iter().map(|i| i.wrapping_abs()).collect()),
            Buffer::Float(v) => Buffer::Float(v.iter().map(|x| x.abs()).collect()),
        };
        HostArray {
            shape: self.shape.clone(),
            data,
        }
    }

    /// Natural logarithm; the result is always `float64`.
    pub fn log(&self) -> HostArray {
        let data = Buffer::Float(self.data.to_f64().into_iter().map(f64::ln).collect());
        HostArray {
            shape: self.shape.clone(),
            data,
        }
    }

    pub fn neg(&self) -> Result<HostArray, ArrayError> {
        let data = match &self.data {
            Buffer::Bool(_) => {
                return Err(ArrayError::Unsupported {
                    op: "neg",
                    dtype: DType::Bool,
                })
            }
            Buffer::Int(v) => Buffer::Int(v.iter().map(|i| i.wrapping_neg()).collect()),
            Buffer::Float(v) => Buffer::Float(v.iter().map(|x| -x).collect()),
        };
        Ok(HostArray {
            shape: self.shape.clone(),
            data,
        })
    }

    /// Sum of all elements. Booleans and integers sum to `int64`.
    pub fn sum(&self) -> Scalar {
        match &self.data {
            Buffer::Float(v) => Scalar::Float(v.iter().sum()),
            other => Scalar::Int(other.to_i64().into_iter().fold(0, i64::wrapping_add)),
        }
    }

    /// Flat element positions selected by `key`.
    fn positions(&self, key: &IndexKey) -> Result<Vec<usize>, ArrayError> {
        let len = self.len();
        let normalize = |index: i64| -> Result<usize, ArrayError> {
            let resolved = if index < 0 { index + len as i64 } else { index };
            if resolved < 0 || resolved >= len as i64 {
                return Err(ArrayError::IndexOutOfBounds { index, len });
            }
            Ok(resolved as usize)
        };
        match key {
            IndexKey::Position(index) => Ok(vec![normalize(*index)?]),
            IndexKey::Mask(mask) => {
                if mask.len() != len {
                    return Err(ArrayError::ShapeMismatch {
                        expected: vec![len],
                        got: vec![mask.len()],
                    });
                }
                Ok(mask
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &selected)| selected.then_some(i))
                    .collect())
            }
            IndexKey::Take(indices) => indices.iter().map(|&i| normalize(i)).collect(),
        }
    }

    /// Reads the elements selected by `key`.
    ///
    /// A `Position` key yields a rank-0 array; masks and index lists yield a
    /// one-dimensional array of the selected elements.
    pub fn get(&self, key: &IndexKey) -> Result<HostArray, ArrayError> {
        let positions = self.positions(key)?;
        let shape = match key {
            IndexKey::Position(_) => Shape::scalar(),
            _ => Shape::vector(positions.len()),
        };
        Ok(HostArray {
            shape,
            data: self.data.gather(&positions),
        })
    }

    /// Writes `value` into the elements selected by `key`, in place.
    ///
    /// `value` is cast to this array's dtype. It must be a single element or
    /// hold exactly one element per selected position.
    pub fn set(&mut self, key: &IndexKey, value: &HostArray) -> Result<(), ArrayError> {
        let positions = self.positions(key)?;
        if value.len() != 1 && value.len() != positions.len() {
            return Err(ArrayError::ShapeMismatch {
                expected: vec![positions.len()],
                got: value.shape.dims().to_vec(),
            });
        }
        self.data.scatter(&positions, &value.data);
        Ok(())
    }

    fn fmt_axis(&self, f: &mut fmt::Formatter<'_>, axis: usize, offset: usize) -> fmt::Result {
        let dims = self.shape.dims();
        let stride: usize = dims[axis + 1..].iter().product();
        f.write_str("[")?;
        for i in 0..dims[axis] {
            if i > 0 {
                f.write_str(", ")?;
            }
            if axis + 1 == dims.len() {
                write!(f, "{}", self.data.get(offset + i))?;
            } else {
                self.fmt_axis(f, axis + 1, offset + i * stride)?;
            }
        }
        f.write_str("]")
    }
}

impl fmt::Display for HostArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_scalar() {
            Some(value) => write!(f, "{value}"),
            None => self.fmt_axis(f, 0, 0),
        }
    }
}

/// Shared, lockable reference to a host array.
///
/// Cloning an `ArrayRef` aliases the same buffer.
#[derive(Clone)]
pub struct ArrayRef(Arc<RwLock<HostArray>>);

impl ArrayRef {
    pub fn new(array: HostArray) -> Self {
        Self(Arc::new(RwLock::new(array)))
    }

    /// Shared read access. Recursive, so one evaluation may hold several
    /// read guards on the same buffer.
    pub fn read(&self) -> RwLockReadGuard<'_, HostArray> {
        self.0.read_recursive()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HostArray> {
        self.0.write()
    }

    /// Copies the current contents out of the shared buffer.
    pub fn snapshot(&self) -> HostArray {
        self.read().clone()
    }

    /// Whether both references point at the same buffer.
    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<HostArray> for ArrayRef {
    fn from(array: HostArray) -> Self {
        Self::new(array)
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ArrayRef").field(&*self.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> HostArray {
        HostArray::from_vec(values.to_vec())
    }

    #[test]
    fn integer_arithmetic_stays_integer() {
        let a = ints(&[1, 2, 3]);
        let b = ints(&[10, 20, 30]);
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.dtype(), DType::Int64);
        assert_eq!(sum.to_i64_vec(), vec![11, 22, 33]);
        assert_eq!(b.sub(&a).unwrap().to_i64_vec(), vec![9, 18, 27]);
    }

    #[test]
    fn scalar_broadcast_on_either_side() {
        let a = ints(&[1, 2, 3]);
        let two = HostArray::from_scalar(Scalar::Int(2));
        assert_eq!(a.mul(&two).unwrap().to_i64_vec(), vec![2, 4, 6]);
        assert_eq!(two.mul(&a).unwrap().to_i64_vec(), vec![2, 4, 6]);
        assert_eq!(a.mul(&two).unwrap().shape(), &Shape::vector(3));
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let err = ints(&[1, 2, 3]).add(&ints(&[1, 2])).unwrap_err();
        assert_eq!(
            err,
            ArrayError::ShapeMismatch {
                expected: vec![3],
                got: vec![2]
            }
        );
    }

    #[test]
    fn division_promotes_to_float() {
        let q = ints(&[1, 2, 3]).div(&ints(&[2, 2, 2])).unwrap();
        assert_eq!(q.dtype(), DType::Float64);
        assert_eq!(q.to_f64_vec(), vec![0.5, 1.0, 1.5]);
    }

    #[test]
    fn integer_power_rejects_negative_exponent() {
        let base = ints(&[2, 3]);
        assert_eq!(
            base.pow(&HostArray::from_scalar(Scalar::Int(2))).unwrap().to_i64_vec(),
            vec![4, 9]
        );
        assert_eq!(
            base.pow(&HostArray::from_scalar(Scalar::Int(-1))),
            Err(ArrayError::NegativeIntegerPower)
        );
        let float = base.pow(&HostArray::from_scalar(Scalar::Float(-1.0))).unwrap();
        assert_eq!(float.to_f64_vec(), vec![0.5, 1.0 / 3.0]);
    }

    #[test]
    fn comparison_yields_bool() {
        let le = ints(&[1, 5, 3]).le(&HostArray::from_scalar(Scalar::Float(3.0))).unwrap();
        assert_eq!(le.dtype(), DType::Bool);
        assert_eq!(le.to_bool_vec(), vec![true, false, true]);
    }

    #[test]
    fn unary_kernels() {
        let a = ints(&[-2, 0, 3]);
        assert_eq!(a.abs().to_i64_vec(), vec![2, 0, 3]);
        assert_eq!(a.neg().unwrap().to_i64_vec(), vec![2, 0, -3]);
        assert_eq!(HostArray::from_vec(vec![1.0_f64]).log().to_f64_vec(), vec![0.0]);
        assert!(HostArray::from_vec(vec![true]).neg().is_err());
    }

    #[test]
    fn sum_reduces_to_scalar() {
        assert_eq!(ints(&[1, 2, 3]).sum(), Scalar::Int(6));
        assert_eq!(HostArray::from_vec(vec![0.5, 0.25]).sum(), Scalar::Float(0.75));
        assert_eq!(HostArray::from_vec(vec![true, false, true]).sum(), Scalar::Int(2));
    }

    #[test]
    fn position_get_and_set() {
        let mut a = ints(&[1, 2, 3]);
        assert_eq!(a.get(&IndexKey::Position(-1)).unwrap().to_scalar(), Some(Scalar::Int(3)));
        a.set(&IndexKey::Position(0), &HostArray::from_scalar(Scalar::Float(9.7)))
            .unwrap();
        assert_eq!(a.to_i64_vec(), vec![9, 2, 3]);
        assert_eq!(
            a.get(&IndexKey::Position(3)),
            Err(ArrayError::IndexOutOfBounds { index: 3, len: 3 })
        );
    }

    #[test]
    fn mask_get_and_set() {
        let mut a = ints(&[1, 2, 3, 4]);
        let mask = IndexKey::Mask(vec![true, false, true, false]);
        assert_eq!(a.get(&mask).unwrap().to_i64_vec(), vec![1, 3]);
        a.set(&mask, &ints(&[10, 30])).unwrap();
        assert_eq!(a.to_i64_vec(), vec![10, 2, 30, 4]);
        a.set(&mask, &HostArray::from_scalar(Scalar::Int(0))).unwrap();
        assert_eq!(a.to_i64_vec(), vec![0, 2, 0, 4]);
        assert!(a.set(&mask, &ints(&[1, 2, 3])).is_err());
    }

    #[test]
    fn take_gathers_in_order() {
        let a = ints(&[5, 6, 7]);
        let taken = a.get(&IndexKey::Take(vec![2, 0, -1])).unwrap();
        assert_eq!(taken.to_i64_vec(), vec![7, 5, 7]);
    }

    #[test]
    fn display_nests_by_axis() {
        let a = HostArray::from_shape_vec(Shape::new([2, 2]), vec![1_i64, 2, 3, 4]).unwrap();
        assert_eq!(a.to_string(), "[[1, 2], [3, 4]]");
        assert_eq!(HostArray::from_scalar(Scalar::Float(0.5)).to_string(), "0.5");
    }

    #[test]
    fn array_ref_clones_alias() {
        let a = ArrayRef::new(ints(&[1, 2]));
        let b = a.clone();
        b.write().set(&IndexKey::Position(0), &HostArray::from_scalar(Scalar::Int(7))).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.read().to_i64_vec(), vec![7, 2]);
    }
}
