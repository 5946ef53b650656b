//! `Loop` lowering.
//!
//! A `Loop` node becomes a register-level program:
//!
//! 1. initialize the body's `iter` and `cond` registers and copy the
//!    outer state into the body's state registers
//! 2. allocate one accumulator sequence per scan output
//! 3. when a termination condition is given, guard the whole loop with
//!    a `JmpFalse` whose target is backpatched after emission
//! 4. emit the body, then the latch: advance `iter`, release and
//!    re-seed the body inputs from the body outputs, append scan
//!    values, recompute `cond`, and jump back while it holds
//! 5. publish final states and stacked scan sequences into the loop's
//!    output registers
//!
//! Moves are `Identity dst, src` followed by `Free src`. The body's
//! registers are freed and rewritten once per iteration; all ids come
//! from the same flat counter as the enclosing graph.

use synapse_graph::{Graph, Node, OpKind};
use synapse_vm::{DType, Instruction, Opcode, Operand, Program, Reg};

use crate::emitter::{push, Emitter};
use crate::EmitError;

/// `Identity dst, src` then `Free src`.
fn mv(prog: &mut Program, dst: Reg, src: Reg, debug_info: &str) {
    push(
        prog,
        Opcode::Identity,
        vec![dst],
        vec![Operand::Reg(src)],
        debug_info,
    );
    prog.add(Instruction::free(src));
}

fn int_scalar(prog: &mut Program, dst: Reg, value: i64, dtype: DType, debug_info: &str) {
    push(
        prog,
        Opcode::IntScalarConstant,
        vec![dst],
        vec![
            Operand::Int(value),
            Operand::Int(dtype.code()),
            Operand::Int(0),
        ],
        debug_info,
    );
}

impl Emitter {
    pub(crate) fn emit_loop(
        &mut self,
        graph: &Graph,
        node: &Node,
        debug_info: &str,
        prog: &mut Program,
    ) -> Result<(), EmitError> {
        let body = node.body().ok_or_else(|| EmitError::InvalidAttribute {
            op: OpKind::Loop,
            message: "Loop node without a body graph".to_string(),
        })?;
        if node.inputs().len() < 2 {
            return Err(EmitError::InputArity {
                op: OpKind::Loop,
                expected: "2 or more".to_string(),
                found: node.inputs().len(),
            });
        }

        let num_states = node.inputs().len() - 2;
        if body.input_values().len() != num_states + 2 {
            return Err(EmitError::InvalidAttribute {
                op: OpKind::Loop,
                message: format!(
                    "body has {} inputs, expected {} (iter, cond, and one per state)",
                    body.input_values().len(),
                    num_states + 2
                ),
            });
        }
        if body.output_values().len() < num_states + 1 {
            return Err(EmitError::InvalidAttribute {
                op: OpKind::Loop,
                message: format!(
                    "body has {} outputs, expected at least {} (cond and one per state)",
                    body.output_values().len(),
                    num_states + 1
                ),
            });
        }
        let num_scans = body.output_values().len() - 1 - num_states;
        if node.outputs().len() != num_states + num_scans {
            return Err(EmitError::OutputArity {
                op: OpKind::Loop,
                expected: (num_states + num_scans).to_string(),
                found: node.outputs().len(),
            });
        }

        let max_trip_count = node.inputs()[0];
        let terminal_condition = node.inputs()[1];
        if max_trip_count.is_none() && terminal_condition.is_none() {
            return Err(EmitError::InfiniteLoop(debug_info.to_string()));
        }

        self.table.assign_graph(body)?;

        let body_inputs: Vec<Reg> = body
            .input_values()
            .iter()
            .map(|id| self.table.get(body.value(*id)))
            .collect();
        let body_outputs: Vec<Reg> = body
            .output_values()
            .iter()
            .map(|id| self.table.get(body.value(*id)))
            .collect();
        let iter_reg = body_inputs[0];
        let cond_reg = body_inputs[1];

        let init_info = format!("{debug_info} @loop-init");
        let latch_info = format!("{debug_info} @loop-latch");
        let exit_info = format!("{debug_info} @loop-exit");

        // Loop variable initialization.
        int_scalar(prog, iter_reg, 0, DType::Int64, &init_info);
        int_scalar(prog, cond_reg, 1, DType::Bool, &init_info);
        for i in 0..num_states {
            let state = node.inputs()[i + 2].ok_or(EmitError::MissingInput {
                op: OpKind::Loop,
                index: i + 2,
            })?;
            push(
                prog,
                Opcode::Identity,
                vec![body_inputs[i + 2]],
                vec![Operand::Reg(self.table.get(graph.value(state)))],
                &init_info,
            );
        }

        // One accumulator sequence per scan output.
        let mut scan_accumulators = Vec::with_capacity(num_scans);
        for _ in 0..num_scans {
            let acc = self.table.fresh();
            push(prog, Opcode::SequenceCreate, vec![acc], vec![], &init_info);
            scan_accumulators.push(acc);
        }

        // Guard jump over the whole loop, target backpatched below.
        let skip_jump = terminal_condition.map(|cond| {
            let at = prog.len();
            push(
                prog,
                Opcode::JmpFalse,
                vec![],
                vec![
                    Operand::Reg(self.table.get(graph.value(cond))),
                    Operand::Int(-1),
                ],
                &init_info,
            );
            at
        });

        let loop_begin = prog.len();
        self.emit_graph(body, prog, true)?;

        // iter += 1
        let one = self.table.fresh();
        int_scalar(prog, one, 1, DType::Int64, &latch_info);
        let next_iter = self.table.fresh();
        push(
            prog,
            Opcode::Add,
            vec![next_iter],
            vec![Operand::Reg(iter_reg), Operand::Reg(one)],
            &latch_info,
        );
        prog.add(Instruction::free(one));

        // Release every body input; they are re-seeded for the next
        // iteration below.
        for reg in &body_inputs {
            prog.add(Instruction::free(*reg));
        }
        mv(prog, iter_reg, next_iter, &latch_info);
        mv(prog, cond_reg, body_outputs[0], &latch_info);

        // Loop-carried state: next iteration's inputs come from this
        // iteration's outputs.
        for i in 0..num_states {
            mv(prog, body_inputs[i + 2], body_outputs[i + 1], &latch_info);
        }

        // Append scan outputs to their accumulators.
        for k in 0..num_scans {
            let scan = body_outputs[num_states + 1 + k];
            push(
                prog,
                Opcode::SequenceAppend,
                vec![],
                vec![Operand::Reg(scan_accumulators[k]), Operand::Reg(scan)],
                &latch_info,
            );
            prog.add(Instruction::free(scan));
        }

        // Termination test.
        let max_reg = max_trip_count.map(|id| self.table.get(graph.value(id)));
        match (max_reg, terminal_condition) {
            (Some(max), None) => {
                prog.add(Instruction::free(cond_reg));
                push(
                    prog,
                    Opcode::Greater,
                    vec![cond_reg],
                    vec![Operand::Reg(max), Operand::Reg(iter_reg)],
                    &latch_info,
                );
            }
            (Some(max), Some(_)) => {
                let trips_left = self.table.fresh();
                push(
                    prog,
                    Opcode::Greater,
                    vec![trips_left],
                    vec![Operand::Reg(max), Operand::Reg(iter_reg)],
                    &latch_info,
                );
                let combined = self.table.fresh();
                push(
                    prog,
                    Opcode::Mul,
                    vec![combined],
                    vec![Operand::Reg(cond_reg), Operand::Reg(trips_left)],
                    &latch_info,
                );
                prog.add(Instruction::free(trips_left));
                prog.add(Instruction::free(cond_reg));
                mv(prog, cond_reg, combined, &latch_info);
            }
            (None, Some(_)) => {
                // The body's condition output, moved into cond_reg
                // above, is the whole test.
            }
            (None, None) => unreachable!("rejected as an infinite loop"),
        }
        push(
            prog,
            Opcode::JmpTrue,
            vec![],
            vec![Operand::Reg(cond_reg), Operand::Int(loop_begin as i64)],
            &latch_info,
        );

        if let Some(at) = skip_jump {
            let target = prog.len() as i64;
            let jump = prog
                .instruction_mut(at)
                .expect("guard jump was recorded at a valid index");
            jump.inputs[1] = Operand::Int(target);
        }

        // Final states.
        for i in 0..num_states {
            let out = node.outputs()[i].ok_or(EmitError::MissingOutput {
                op: OpKind::Loop,
                index: i,
            })?;
            mv(
                prog,
                self.table.get(graph.value(out)),
                body_inputs[i + 2],
                &exit_info,
            );
        }

        // Stacked scan outputs.
        let stack_axis = node.int_attr("stack_axis").unwrap_or(0);
        for k in 0..num_scans {
            let out = node.outputs()[num_states + k].ok_or(EmitError::MissingOutput {
                op: OpKind::Loop,
                index: num_states + k,
            })?;
            push(
                prog,
                Opcode::SequenceStack,
                vec![self.table.get(graph.value(out))],
                vec![
                    Operand::Reg(scan_accumulators[k]),
                    Operand::Int(stack_axis),
                ],
                &exit_info,
            );
            prog.add(Instruction::free(scan_accumulators[k]));
        }

        prog.add(Instruction::free(iter_reg));
        prog.add(Instruction::free(cond_reg));
        Ok(())
    }
}
