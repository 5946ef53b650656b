//! Graph walking and lifetime insertion.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::debug;

use synapse_graph::{Graph, OpKind, ValueId, ValueKind};
use synapse_vm::{Instruction, Opcode, Operand, Program, Reg};

use crate::table::ValueIdTable;
use crate::EmitError;

/// Append one instruction and tag it with its origin.
pub(crate) fn push(
    prog: &mut Program,
    opcode: Opcode,
    outputs: Vec<Reg>,
    inputs: Vec<Operand>,
    debug_info: &str,
) {
    prog.add(Instruction::new(opcode, outputs, inputs))
        .set_debug_info(debug_info);
}

/// Owns one model-to-program translation.
///
/// Constructed per call; register ids, user counters, and the
/// once-per-emitter warning flags all die with it.
pub(crate) struct Emitter {
    pub(crate) table: ValueIdTable,
    pub(crate) dropout_mask_warned: bool,
}

impl Emitter {
    /// Create an emitter with the root graph's values registered.
    pub(crate) fn new(graph: &Graph) -> Result<Self, EmitError> {
        let mut table = ValueIdTable::new();
        table.assign_graph(graph)?;
        Ok(Self {
            table,
            dropout_mask_warned: false,
        })
    }

    /// Emit the whole root graph, then its output block.
    pub(crate) fn emit(
        &mut self,
        graph: &Graph,
        prog: &mut Program,
        dump_value_names: bool,
    ) -> Result<(), EmitError> {
        self.emit_graph(graph, prog, false)?;
        self.emit_outputs(graph, prog);
        debug!(
            graph = graph.name(),
            instructions = prog.len(),
            "emission finished"
        );
        if dump_value_names {
            self.dump_value_names();
        }
        Ok(())
    }

    /// Walk `graph` in topological order, lowering each node and
    /// interleaving lifetime instructions.
    ///
    /// With `in_loop` set the graph is a loop body: its inputs are
    /// initialized and freed by the loop lowering, so `In` staging and
    /// input user counting are suppressed.
    pub(crate) fn emit_graph(
        &mut self,
        graph: &Graph,
        prog: &mut Program,
        in_loop: bool,
    ) -> Result<(), EmitError> {
        let mut num_users: IndexMap<ValueId, usize> = IndexMap::new();
        if !in_loop {
            for id in graph.input_values() {
                num_users.insert(*id, graph.value(*id).users().len());
            }
        }
        for id in graph.temp_values() {
            num_users.insert(*id, graph.value(*id).users().len());
        }

        let mut staged_inputs: HashSet<ValueId> = HashSet::new();

        for node_id in graph.computation_sequence()? {
            let node = graph.node(node_id);
            let debug_info = graph.node_to_string(node_id);

            if !in_loop {
                for input in node.inputs().iter().flatten() {
                    let value = graph.value(*input);
                    if value.kind() != ValueKind::Input {
                        continue;
                    }
                    if !staged_inputs.insert(*input) {
                        continue;
                    }
                    prog.add(Instruction::in_op(self.table.get(value), value.name()))
                        .set_debug_info(value.name());
                }
            }

            self.emit_node(graph, node, &debug_info, prog)?;

            for output in node.outputs().iter().flatten() {
                let value = graph.value(*output);
                // The running-statistics outputs of BatchNormalization
                // may alias inputs; freeing them here is unsafe until
                // the VM's ownership story for them is settled.
                if value.kind() == ValueKind::Temp
                    && value.users().is_empty()
                    && node.op() != OpKind::BatchNormalization
                {
                    prog.add(Instruction::free(self.table.get(value)));
                }
            }

            for input in node.inputs().iter().flatten() {
                if let Some(remaining) = num_users.get_mut(input) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        prog.add(Instruction::free(self.table.get(graph.value(*input))));
                    }
                }
            }
        }
        Ok(())
    }

    /// Publish and release every graph output.
    fn emit_outputs(&mut self, graph: &Graph, prog: &mut Program) {
        for id in graph.output_values() {
            let value = graph.value(*id);
            let reg = self.table.get(value);
            prog.add(Instruction::out_op(value.name(), reg))
                .set_debug_info(value.name());
            prog.add(Instruction::free(reg));
        }
    }

    /// Write the register table to standard error: one row per value,
    /// then the grand total in megabytes.
    fn dump_value_names(&self) {
        let mut rows: Vec<(Reg, &str, u64)> = self
            .table
            .entries()
            .map(|(name, reg, nbytes)| (reg, name, nbytes))
            .collect();
        rows.sort_by_key(|(reg, _, _)| *reg);

        eprintln!("=== {} variables ===", rows.len());
        let mut total: u64 = 0;
        for (reg, name, nbytes) in rows {
            total += nbytes;
            eprintln!("{reg}: {name} {nbytes}");
        }
        eprintln!("Total size of all values: {}MB", total / 1000 / 1000);
    }
}
