//! Value-to-register-id assignment.

use indexmap::IndexMap;

use synapse_graph::{Graph, Value};
use synapse_vm::Reg;

use crate::EmitError;

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    reg: Reg,
    nbytes: u64,
}

/// Bijection between graph values and register ids, plus an allocator
/// for the synthetic ids lowering introduces.
///
/// Keyed by value name (unique across the model, loop bodies included).
/// One flat monotonic counter starting at 1 serves the whole program;
/// nested body graphs extend the same id space, so no body value ever
/// shares an id with an outer value. Id 0 is never handed out.
#[derive(Debug, Default)]
pub struct ValueIdTable {
    entries: IndexMap<String, TableEntry>,
    next_id: i32,
}

impl ValueIdTable {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            next_id: 1,
        }
    }

    /// Allocate and record a fresh id for `value`.
    ///
    /// A value may only be assigned once; a second assignment means the
    /// importer produced duplicate names.
    pub fn assign(&mut self, value: &Value) -> Result<Reg, EmitError> {
        if self.entries.contains_key(value.name()) {
            return Err(EmitError::DuplicateValue(value.name().to_string()));
        }
        let reg = self.alloc();
        self.entries.insert(
            value.name().to_string(),
            TableEntry {
                reg,
                nbytes: value.nbytes(),
            },
        );
        Ok(reg)
    }

    /// Register every value of `graph`: inputs, then temps, then
    /// outputs, in declaration order.
    pub fn assign_graph(&mut self, graph: &Graph) -> Result<(), EmitError> {
        for id in graph.input_values() {
            self.assign(graph.value(*id))?;
        }
        for id in graph.temp_values() {
            self.assign(graph.value(*id))?;
        }
        for id in graph.output_values() {
            self.assign(graph.value(*id))?;
        }
        Ok(())
    }

    /// The id recorded for `value`.
    ///
    /// # Panics
    ///
    /// Panics when `value` was never assigned: lowering asked for a
    /// register the walker never registered, which is a bug in the
    /// emitter, not in the input graph.
    pub fn get(&self, value: &Value) -> Reg {
        match self.entries.get(value.name()) {
            Some(entry) => entry.reg,
            None => panic!("value has no register id: {}", value.name()),
        }
    }

    /// Allocate an id not bound to any value.
    pub fn fresh(&mut self) -> Reg {
        self.alloc()
    }

    fn alloc(&mut self) -> Reg {
        let reg = Reg::new(self.next_id);
        self.next_id += 1;
        reg
    }

    /// Registered values as `(name, id, nbytes)`, in assignment order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Reg, u64)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.reg, entry.nbytes))
    }
}
