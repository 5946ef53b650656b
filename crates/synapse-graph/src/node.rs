//! Graph nodes and their attribute bags.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::graph::Graph;
use crate::op::OpKind;
use crate::tensor::Tensor;
use crate::value::ValueId;

/// Index of a node within its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attr {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Str(String),
    Strs(Vec<String>),
}

/// One operation over values.
///
/// `None` entries in the input and output lists stand for omitted
/// optional operands. Attributes arrive fully resolved from the
/// importer; accessors here are plain typed lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    op: OpKind,
    inputs: Vec<Option<ValueId>>,
    outputs: Vec<Option<ValueId>>,
    attrs: IndexMap<String, Attr>,
    tensor: Option<Tensor>,
    body: Option<Box<Graph>>,
}

impl Node {
    pub(crate) fn new(
        op: OpKind,
        inputs: Vec<Option<ValueId>>,
        outputs: Vec<Option<ValueId>>,
    ) -> Self {
        Self {
            op,
            inputs,
            outputs,
            attrs: IndexMap::new(),
            tensor: None,
            body: None,
        }
    }

    pub fn op(&self) -> OpKind {
        self.op
    }

    pub fn inputs(&self) -> &[Option<ValueId>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Option<ValueId>] {
        &self.outputs
    }

    /// Constant tensor payload (`Constant` nodes).
    pub fn tensor(&self) -> Option<&Tensor> {
        self.tensor.as_ref()
    }

    /// Nested body graph (`Loop` nodes).
    pub fn body(&self) -> Option<&Graph> {
        self.body.as_deref()
    }

    pub fn set_tensor(&mut self, tensor: Tensor) {
        self.tensor = Some(tensor);
    }

    pub fn set_body(&mut self, body: Graph) {
        self.body = Some(Box::new(body));
    }

    /// Set or replace an attribute.
    pub fn set_attr(&mut self, name: impl Into<String>, attr: Attr) {
        self.attrs.insert(name.into(), attr);
    }

    /// Integer attribute, if present with that type.
    pub fn int_attr(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(Attr::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Float attribute, if present with that type.
    pub fn float_attr(&self, name: &str) -> Option<f64> {
        match self.attrs.get(name) {
            Some(Attr::Float(value)) => Some(*value),
            _ => None,
        }
    }

    /// Integer-list attribute; absent means empty.
    pub fn ints_attr(&self, name: &str) -> &[i64] {
        match self.attrs.get(name) {
            Some(Attr::Ints(values)) => values,
            _ => &[],
        }
    }

    /// Float-list attribute; absent means empty.
    pub fn floats_attr(&self, name: &str) -> &[f64] {
        match self.attrs.get(name) {
            Some(Attr::Floats(values)) => values,
            _ => &[],
        }
    }

    /// String attribute; absent means empty.
    pub fn str_attr(&self, name: &str) -> &str {
        match self.attrs.get(name) {
            Some(Attr::Str(value)) => value,
            _ => "",
        }
    }

    /// String-list attribute; absent means empty.
    pub fn strs_attr(&self, name: &str) -> &[String] {
        match self.attrs.get(name) {
            Some(Attr::Strs(values)) => values,
            _ => &[],
        }
    }
}
