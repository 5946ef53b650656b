//! Graph and model containers, with scheduling queries.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::{Node, NodeId};
use crate::op::OpKind;
use crate::value::{Value, ValueId, ValueKind};

/// Error when the node dependencies are not acyclic.
///
/// A finalized graph is a DAG by contract; a cycle here means the
/// importer produced a malformed graph.
#[derive(Debug, Error)]
#[error("cycle detected in graph: nodes {nodes:?}")]
pub struct CycleError {
    /// Nodes left unscheduled when the traversal stalled.
    pub nodes: Vec<NodeId>,
}

/// A directed acyclic dataflow graph over typed values.
///
/// Values and nodes live in per-graph arenas addressed by [`ValueId`]
/// and [`NodeId`]. The `inputs` / `temps` / `outputs` lists keep the
/// declaration order the importer produced, which downstream id
/// assignment relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    name: String,
    values: Vec<Value>,
    nodes: Vec<Node>,
    inputs: Vec<ValueId>,
    temps: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            nodes: Vec::new(),
            inputs: Vec::new(),
            temps: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn add_value(&mut self, name: impl Into<String>, kind: ValueKind) -> ValueId {
        let id = ValueId::new(self.values.len() as u32);
        self.values.push(Value::new(name.into(), kind));
        match kind {
            ValueKind::Input => self.inputs.push(id),
            ValueKind::Temp => self.temps.push(id),
            ValueKind::Output => self.outputs.push(id),
        }
        id
    }

    /// Declare a graph input value.
    pub fn add_input(&mut self, name: impl Into<String>) -> ValueId {
        self.add_value(name, ValueKind::Input)
    }

    /// Declare an intermediate value.
    pub fn add_temp(&mut self, name: impl Into<String>) -> ValueId {
        self.add_value(name, ValueKind::Temp)
    }

    /// Declare a graph output value.
    pub fn add_output(&mut self, name: impl Into<String>) -> ValueId {
        self.add_value(name, ValueKind::Output)
    }

    /// Append a node, wiring use-def bookkeeping on its operand values.
    ///
    /// `None` entries stand for omitted optional operands.
    pub fn add_node(
        &mut self,
        op: OpKind,
        inputs: Vec<Option<ValueId>>,
        outputs: Vec<Option<ValueId>>,
    ) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        for input in inputs.iter().flatten() {
            self.values[input.index()].add_user(id);
        }
        for output in outputs.iter().flatten() {
            self.values[output.index()].set_producer(id);
        }
        self.nodes.push(Node::new(op, inputs, outputs));
        id
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.index()]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Input values in declaration order.
    pub fn input_values(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Intermediate values in declaration order.
    pub fn temp_values(&self) -> &[ValueId] {
        &self.temps
    }

    /// Output values in declaration order.
    pub fn output_values(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Nodes in a dependency-respecting execution order.
    ///
    /// Kahn's algorithm over producer edges, with ready nodes drained
    /// in arena order so the sequence is deterministic for a given
    /// graph.
    pub fn computation_sequence(&self) -> Result<Vec<NodeId>, CycleError> {
        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            for input in node.inputs().iter().flatten() {
                if self.value(*input).producer().is_some() {
                    in_degree[index] += 1;
                }
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut ready: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();

        while !ready.is_empty() {
            ready.sort_unstable();
            let mut next = Vec::new();
            for index in ready.drain(..) {
                let id = NodeId::new(index as u32);
                order.push(id);
                for output in self.nodes[index].outputs().iter().flatten() {
                    for user in self.value(*output).users() {
                        let user_index = user.index();
                        in_degree[user_index] -= 1;
                        if in_degree[user_index] == 0 {
                            next.push(user_index);
                        }
                    }
                }
            }
            ready = next;
        }

        if order.len() != self.nodes.len() {
            let scheduled: HashSet<NodeId> = order.iter().copied().collect();
            let nodes = (0..self.nodes.len())
                .map(|i| NodeId::new(i as u32))
                .filter(|id| !scheduled.contains(id))
                .collect();
            return Err(CycleError { nodes });
        }
        Ok(order)
    }

    /// Graph inputs backward-reachable from the outputs, in declaration
    /// order.
    pub fn necessary_inputs(&self) -> Vec<ValueId> {
        let mut live: HashSet<ValueId> = HashSet::new();
        let mut stack: Vec<ValueId> = self.outputs.clone();
        while let Some(value) = stack.pop() {
            if !live.insert(value) {
                continue;
            }
            if let Some(producer) = self.value(value).producer() {
                for input in self.node(producer).inputs().iter().flatten() {
                    stack.push(*input);
                }
            }
        }
        self.inputs
            .iter()
            .copied()
            .filter(|id| live.contains(id))
            .collect()
    }

    /// Printable form of a node, used for instruction debug info.
    ///
    /// Omitted optional operands render as `%none`.
    pub fn node_to_string(&self, id: NodeId) -> String {
        let node = self.node(id);
        let list = |slots: &[Option<ValueId>]| {
            slots
                .iter()
                .map(|slot| match slot {
                    Some(v) => format!("%{}", self.value(*v).name()),
                    None => "%none".to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "{}({}) -> ({})",
            node.op(),
            list(node.inputs()),
            list(node.outputs())
        )
    }
}

/// A model: the root graph plus whatever metadata the importer carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    graph: Graph,
}

impl Model {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}
