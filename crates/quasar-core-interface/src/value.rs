//! Dynamic values exchanged with workers

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::object::ObjectRef;
use crate::RemoteError;

/// Element type of an array block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int64,
    #[default]
    Float64,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Int64 => "int64",
            DType::Float64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int" | "int64" | "i64" => Ok(DType::Int64),
            "float" | "float64" | "f64" => Ok(DType::Float64),
            other => Err(RemoteError::Failed(format!("Invalid dtype: {}", other))),
        }
    }
}

/// One n-dimensional block of a chunked array
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Int64(ArrayD<i64>),
    Float64(ArrayD<f64>),
}

impl Block {
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        Self::full(dtype, shape, 0.0)
    }

    pub fn ones(dtype: DType, shape: &[usize]) -> Self {
        Self::full(dtype, shape, 1.0)
    }

    /// Block filled with `fill`; integer blocks truncate it, so callers check
    /// the fill first when truncation matters
    pub fn full(dtype: DType, shape: &[usize], fill: f64) -> Self {
        match dtype {
            DType::Int64 => Block::Int64(ArrayD::from_elem(IxDyn(shape), fill as i64)),
            DType::Float64 => Block::Float64(ArrayD::from_elem(IxDyn(shape), fill)),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Block::Int64(_) => DType::Int64,
            Block::Float64(_) => DType::Float64,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Block::Int64(a) => a.shape().to_vec(),
            Block::Float64(a) => a.shape().to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Block::Int64(a) => a.len(),
            Block::Float64(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all elements, keeping the integer/float distinction
    pub fn sum(&self) -> Result<Value, RemoteError> {
        match self {
            Block::Int64(a) => a
                .iter()
                .try_fold(0i64, |total, v| total.checked_add(*v))
                .map(Value::Int)
                .ok_or_else(|| RemoteError::Failed("integer overflow in block sum".to_string())),
            Block::Float64(a) => Ok(Value::Float(a.sum())),
        }
    }

    /// Elementwise product with a scalar value
    pub fn mul_scalar(&self, factor: &Value) -> Result<Block, RemoteError> {
        match (self, factor) {
            (Block::Int64(a), Value::Int(k)) => Ok(Block::Int64(a * *k)),
            (Block::Int64(a), Value::Float(k)) => Ok(Block::Float64(a.mapv(|v| v as f64 * k))),
            (Block::Float64(a), Value::Int(k)) => Ok(Block::Float64(a * (*k as f64))),
            (Block::Float64(a), Value::Float(k)) => Ok(Block::Float64(a * *k)),
            (_, other) => Err(RemoteError::type_mismatch("a number", other)),
        }
    }

    /// Stitch placed blocks into one array of `shape`.
    ///
    /// Each part carries the element offset of its first element.
    pub fn stitch(
        dtype: DType,
        shape: &[usize],
        parts: &[(Vec<usize>, Block)],
    ) -> Result<Block, RemoteError> {
        let mut out = Block::zeros(dtype, shape);
        for (offset, part) in parts {
            if part.dtype() != dtype {
                return Err(RemoteError::TypeMismatch {
                    expected: dtype.to_string(),
                    found: part.dtype().to_string(),
                });
            }
            match (&mut out, part) {
                (Block::Int64(dst), Block::Int64(src)) => copy_at(dst, src, offset)?,
                (Block::Float64(dst), Block::Float64(src)) => copy_at(dst, src, offset)?,
                _ => unreachable!("dtype checked above"),
            }
        }
        Ok(out)
    }
}

fn copy_at<T: Copy>(dst: &mut ArrayD<T>, src: &ArrayD<T>, offset: &[usize]) -> Result<(), RemoteError> {
    if offset.len() != dst.ndim() || src.ndim() != dst.ndim() {
        return Err(RemoteError::Failed(format!(
            "Block of rank {} cannot be placed at {:?} in an array of rank {}",
            src.ndim(),
            offset,
            dst.ndim()
        )));
    }
    let mut target = vec![0usize; dst.ndim()];
    for (idx, value) in src.indexed_iter() {
        for (axis, slot) in target.iter_mut().enumerate() {
            *slot = offset[axis] + idx[axis];
        }
        match dst.get_mut(IxDyn(&target)) {
            Some(cell) => *cell = *value,
            None => {
                return Err(RemoteError::Failed(format!(
                    "Block element {:?} falls outside the array",
                    target
                )))
            }
        }
    }
    Ok(())
}

/// A value held by a worker or passed to one
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Value>),
    Block(Block),
    Object(ObjectRef),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::Block(_) => "block",
            Value::Object(_) => "object",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Value::Block(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Read a tuple of non-negative integers, e.g. a shape or a coordinate
    pub fn to_usizes(&self) -> Result<Vec<usize>, RemoteError> {
        let items = self
            .as_tuple()
            .ok_or_else(|| RemoteError::type_mismatch("a tuple of integers", self))?;
        items
            .iter()
            .map(|item| match item {
                Value::Int(v) if *v >= 0 => Ok(*v as usize),
                other => Err(RemoteError::type_mismatch("a non-negative integer", other)),
            })
            .collect()
    }

    /// Read a tuple of booleans
    pub fn to_bools(&self) -> Result<Vec<bool>, RemoteError> {
        let items = self
            .as_tuple()
            .ok_or_else(|| RemoteError::type_mismatch("a tuple of booleans", self))?;
        items
            .iter()
            .map(|item| {
                item.as_bool()
                    .ok_or_else(|| RemoteError::type_mismatch("a boolean", item))
            })
            .collect()
    }

    pub fn from_usizes(values: &[usize]) -> Self {
        Value::Tuple(values.iter().map(|v| Value::Int(*v as i64)).collect())
    }

    pub fn from_bools(values: &[bool]) -> Self {
        Value::Tuple(values.iter().map(|v| Value::Bool(*v)).collect())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Block(a), Value::Block(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::Block(b) => write!(f, "<block {} {:?}>", b.dtype(), b.shape()),
            Value::Object(o) => write!(f, "<{} object>", o.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Tuple(v)
    }
}

impl From<Block> for Value {
    fn from(v: Block) -> Self {
        Value::Block(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_builders() {
        let ones = Block::ones(DType::Float64, &[4, 2]);
        assert_eq!(ones.shape(), vec![4, 2]);
        assert_eq!(ones.sum().unwrap(), Value::Float(8.0));

        let ints = Block::full(DType::Int64, &[2, 2], 3.0);
        assert_eq!(ints.dtype(), DType::Int64);
        assert_eq!(ints.sum().unwrap(), Value::Int(12));
    }

    #[test]
    fn test_integer_sum_overflow() {
        let big = Block::Int64(ArrayD::from_elem(IxDyn(&[2]), i64::MAX));
        assert!(big.sum().is_err());
    }

    #[test]
    fn test_stitch_places_blocks_at_offsets() {
        let parts = vec![
            (vec![0, 0], Block::full(DType::Int64, &[2, 2], 1.0)),
            (vec![2, 0], Block::full(DType::Int64, &[2, 2], 2.0)),
        ];
        let whole = Block::stitch(DType::Int64, &[4, 2], &parts).unwrap();
        match whole {
            Block::Int64(a) => {
                assert_eq!(a[IxDyn(&[0, 1])], 1);
                assert_eq!(a[IxDyn(&[3, 0])], 2);
            }
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[test]
    fn test_stitch_rejects_out_of_bounds() {
        let parts = vec![(vec![3, 0], Block::ones(DType::Float64, &[2, 2]))];
        assert!(Block::stitch(DType::Float64, &[4, 2], &parts).is_err());
    }

    #[test]
    fn test_mul_scalar_promotes_ints() {
        let block = Block::ones(DType::Int64, &[2]);
        let scaled = block.mul_scalar(&Value::Float(0.5)).unwrap();
        assert_eq!(scaled.dtype(), DType::Float64);
        assert_eq!(scaled.sum().unwrap(), Value::Float(1.0));
        assert!(block.mul_scalar(&Value::from("x")).is_err());
    }

    #[test]
    fn test_value_tuple_helpers() {
        let dims = Value::from_usizes(&[2, 1, 2]);
        assert_eq!(dims.to_usizes().unwrap(), vec![2, 1, 2]);
        assert!(Value::Tuple(vec![Value::Int(-1)]).to_usizes().is_err());
        assert_eq!(Value::from_bools(&[true]).to_bools().unwrap(), vec![true]);
        assert_eq!(Value::from_usizes(&[1]).to_string(), "(1,)");
    }

    #[test]
    fn test_numeric_equality_crosses_int_float() {
        assert_eq!(Value::Int(5), Value::Float(5.0));
        assert_ne!(Value::Int(5), Value::Int(6));
        assert_ne!(Value::Int(1), Value::Bool(true));
    }

    #[test]
    fn test_dtype_parse() {
        assert_eq!("int".parse::<DType>().unwrap(), DType::Int64);
        assert_eq!("float64".parse::<DType>().unwrap(), DType::Float64);
        assert!("complex".parse::<DType>().is_err());
    }
}
