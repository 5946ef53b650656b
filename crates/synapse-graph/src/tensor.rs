//! Constant tensor payloads.

use serde::{Deserialize, Serialize};

use synapse_vm::DType;

/// Typed element storage of a constant tensor.
///
/// The variant determines the tensor's dtype; there is no separate
/// dtype field that could disagree with the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

/// A constant tensor attached to a `Constant` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    dims: Vec<i64>,
    data: TensorData,
}

impl Tensor {
    /// Create a tensor from its shape and typed elements.
    ///
    /// An empty `dims` means a scalar; `data` should then hold exactly
    /// one element.
    pub fn new(dims: Vec<i64>, data: TensorData) -> Self {
        Self { dims, data }
    }

    /// Scalar convenience constructors used by importers and tests.
    pub fn scalar_f32(value: f32) -> Self {
        Self::new(vec![], TensorData::Float32(vec![value]))
    }

    pub fn scalar_i64(value: i64) -> Self {
        Self::new(vec![], TensorData::Int64(vec![value]))
    }

    /// Element type, derived from the storage variant.
    pub fn dtype(&self) -> DType {
        match self.data {
            TensorData::Bool(_) => DType::Bool,
            TensorData::Int8(_) => DType::Int8,
            TensorData::Int16(_) => DType::Int16,
            TensorData::Int32(_) => DType::Int32,
            TensorData::Int64(_) => DType::Int64,
            TensorData::Float32(_) => DType::Float32,
            TensorData::Float64(_) => DType::Float64,
        }
    }

    /// Declared shape; empty for scalars.
    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    /// Number of stored elements.
    pub fn num_elements(&self) -> usize {
        match &self.data {
            TensorData::Bool(v) => v.len(),
            TensorData::Int8(v) => v.len(),
            TensorData::Int16(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Float32(v) => v.len(),
            TensorData::Float64(v) => v.len(),
        }
    }

    /// Typed element storage.
    pub fn data(&self) -> &TensorData {
        &self.data
    }
}
