//! Typed dataflow graph model consumed by the Synapse emitter.
//!
//! A [`Model`] carries one root [`Graph`]: a DAG of [`Node`]s over typed
//! [`Value`]s, in the exchange dialect the importer produces. The graph
//! arriving here is finalized and type-inferred; this crate only stores
//! it, keeps use-def bookkeeping consistent, and answers scheduling
//! queries (topological order, necessary inputs).
//!
//! Loop bodies are nested [`Graph`]s attached to their `Loop` node; each
//! graph owns its own value and node arenas, addressed by the
//! [`ValueId`] / [`NodeId`] index newtypes.

pub mod graph;
pub mod node;
pub mod op;
pub mod tensor;
pub mod value;

pub use graph::{CycleError, Graph, Model};
pub use node::{Attr, Node, NodeId};
pub use op::OpKind;
pub use tensor::{Tensor, TensorData};
pub use value::{Value, ValueId, ValueKind};
