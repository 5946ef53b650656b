//! End-to-end emission scenarios.
//!
//! Structural assertions over emitted programs, a lifetime verifier,
//! and a small scalar interpreter that executes emitted programs so the
//! loop lowerings are checked by behavior, not just by shape.

use std::collections::{BTreeMap, HashMap, HashSet};

use synapse_emit::{emit, emit_to_vec, EmitError};
use synapse_graph::{Attr, Graph, Model, OpKind, Tensor};
use synapse_vm::{Opcode, Operand, Program, Reg};

fn emitted(model: &Model) -> Program {
    let mut program = Program::new();
    emit(model, &mut program, false).expect("emission failed");
    program
}

fn reg_of(operand: &Operand) -> Reg {
    match operand {
        Operand::Reg(reg) => *reg,
        other => panic!("expected register operand, got {other:?}"),
    }
}

fn int_of(operand: &Operand) -> i64 {
    match operand {
        Operand::Int(value) => *value,
        other => panic!("expected int operand, got {other:?}"),
    }
}

fn opcodes(program: &Program) -> Vec<Opcode> {
    program.instructions().iter().map(|i| i.opcode).collect()
}

fn find(program: &Program, opcode: Opcode) -> usize {
    program
        .instructions()
        .iter()
        .position(|i| i.opcode == opcode)
        .unwrap_or_else(|| panic!("no {opcode:?} in program"))
}

fn count(program: &Program, opcode: Opcode) -> usize {
    program
        .instructions()
        .iter()
        .filter(|i| i.opcode == opcode)
        .count()
}

/// Checks the static lifetime discipline of an emitted program:
/// every register read was written earlier in the stream, and every
/// written register is freed exactly as many times as it is written.
///
/// Registers that are freed without ever being written are tolerated;
/// the walker releases declared-but-never-materialized temps (the
/// Dropout mask) that way.
fn verify_lifetimes(program: &Program) {
    let mut first_write: HashMap<i32, usize> = HashMap::new();
    let mut writes: HashMap<i32, usize> = HashMap::new();
    let mut frees: HashMap<i32, usize> = HashMap::new();

    for (index, inst) in program.instructions().iter().enumerate() {
        let mut read = |reg: Reg| {
            if reg.is_none() {
                return;
            }
            assert!(
                first_write.get(&reg.id()).is_some_and(|at| *at < index),
                "instruction {index} ({:?}) reads {reg} before any write",
                inst.opcode
            );
        };
        if inst.opcode == Opcode::Free {
            *frees.entry(reg_of(&inst.inputs[0]).id()).or_insert(0) += 1;
        } else {
            for operand in &inst.inputs {
                match operand {
                    Operand::Reg(reg) => read(*reg),
                    Operand::Regs(regs) => regs.iter().copied().for_each(&mut read),
                    _ => {}
                }
            }
        }
        for reg in &inst.outputs {
            if reg.is_none() {
                continue;
            }
            first_write.entry(reg.id()).or_insert(index);
            *writes.entry(reg.id()).or_insert(0) += 1;
        }
    }

    for (reg, write_count) in &writes {
        assert_eq!(
            frees.get(reg).copied().unwrap_or(0),
            *write_count,
            "register ${reg} written {write_count} times but freed {} times",
            frees.get(reg).copied().unwrap_or(0)
        );
    }
}

// ── Scalar interpreter ───────────────────────────────────────────────

/// A runtime value of the test VM: scalars, sequences of scalars, and
/// the result of stacking a sequence.
#[derive(Debug, Clone, PartialEq)]
enum Val {
    Int(i64),
    Seq(Vec<i64>),
    Stacked(Vec<i64>),
}

impl Val {
    fn as_int(&self) -> i64 {
        match self {
            Val::Int(value) => *value,
            other => panic!("expected scalar, got {other:?}"),
        }
    }
}

/// Executes an emitted program over scalar externals, honoring jumps
/// and register lifetimes. Only the opcodes the loop scenarios emit are
/// implemented.
fn run(program: &Program, env: &[(&str, i64)]) -> BTreeMap<String, Val> {
    let env: HashMap<&str, i64> = env.iter().copied().collect();
    let mut regs: HashMap<i32, Val> = HashMap::new();
    let mut moved: HashSet<i32> = HashSet::new();
    let mut outputs = BTreeMap::new();

    let get = |regs: &HashMap<i32, Val>, operand: &Operand| -> Val {
        let reg = reg_of(operand);
        regs.get(&reg.id())
            .unwrap_or_else(|| panic!("read of dead register {reg}"))
            .clone()
    };

    let mut pc = 0usize;
    let mut steps = 0usize;
    while pc < program.len() {
        steps += 1;
        assert!(steps < 100_000, "emitted program did not terminate");
        let inst = program.instruction(pc).unwrap();
        let out0 = inst.outputs.first().map(|reg| reg.id());
        match inst.opcode {
            Opcode::In => {
                let name = match &inst.inputs[0] {
                    Operand::Str(name) => name.as_str(),
                    other => panic!("In without a name: {other:?}"),
                };
                regs.insert(out0.unwrap(), Val::Int(env[name]));
            }
            Opcode::Out => {
                let name = match &inst.inputs[0] {
                    Operand::Str(name) => name.clone(),
                    other => panic!("Out without a name: {other:?}"),
                };
                outputs.insert(name, get(&regs, &inst.inputs[1]));
            }
            Opcode::Free => {
                let reg = reg_of(&inst.inputs[0]).id();
                if !moved.remove(&reg) {
                    assert!(
                        regs.remove(&reg).is_some(),
                        "free of dead register ${reg} at {pc}"
                    );
                }
            }
            Opcode::Identity => {
                let value = get(&regs, &inst.inputs[0]);
                regs.insert(out0.unwrap(), value);
            }
            Opcode::IntScalarConstant => {
                regs.insert(out0.unwrap(), Val::Int(int_of(&inst.inputs[0])));
            }
            Opcode::Add | Opcode::Mul | Opcode::Greater => {
                let a = get(&regs, &inst.inputs[0]).as_int();
                let b = get(&regs, &inst.inputs[1]).as_int();
                let value = match inst.opcode {
                    Opcode::Add => a + b,
                    Opcode::Mul => a * b,
                    Opcode::Greater => i64::from(a > b),
                    _ => unreachable!(),
                };
                regs.insert(out0.unwrap(), Val::Int(value));
            }
            Opcode::JmpTrue => {
                if get(&regs, &inst.inputs[0]).as_int() != 0 {
                    pc = int_of(&inst.inputs[1]) as usize;
                    continue;
                }
            }
            Opcode::JmpFalse => {
                if get(&regs, &inst.inputs[0]).as_int() == 0 {
                    pc = int_of(&inst.inputs[1]) as usize;
                    continue;
                }
            }
            Opcode::SequenceCreate => {
                regs.insert(out0.unwrap(), Val::Seq(Vec::new()));
            }
            Opcode::SequenceAppend => {
                let value = get(&regs, &inst.inputs[1]).as_int();
                let seq = reg_of(&inst.inputs[0]).id();
                match regs.get_mut(&seq) {
                    Some(Val::Seq(items)) => items.push(value),
                    other => panic!("append to non-sequence {other:?}"),
                }
            }
            Opcode::SequenceStack => {
                let items = match get(&regs, &inst.inputs[0]) {
                    Val::Seq(items) => items,
                    other => panic!("stack of non-sequence {other:?}"),
                };
                regs.insert(out0.unwrap(), Val::Stacked(items));
            }
            Opcode::SequenceMove => {
                let src = reg_of(&inst.inputs[0]).id();
                let value = regs.remove(&src).expect("move of dead register");
                moved.insert(src);
                regs.insert(out0.unwrap(), value);
            }
            Opcode::SequenceCopy => {
                let value = get(&regs, &inst.inputs[0]);
                regs.insert(out0.unwrap(), value);
            }
            other => panic!("opcode not supported by the test interpreter: {other:?}"),
        }
        pc += 1;
    }
    outputs
}

// ── Straight-line scenarios ──────────────────────────────────────────

#[test]
fn test_single_relu() {
    let mut g = Graph::new("relu");
    let x = g.add_input("x");
    let y = g.add_output("y");
    g.add_node(OpKind::Relu, vec![Some(x)], vec![Some(y)]);
    let program = emitted(&Model::new(g));

    assert_eq!(
        opcodes(&program),
        vec![
            Opcode::In,
            Opcode::Relu,
            Opcode::Free,
            Opcode::Out,
            Opcode::Free,
        ]
    );
    let relu = program.instruction(1).unwrap();
    assert_eq!(relu.outputs, vec![Reg::new(2)]);
    assert_eq!(reg_of(&relu.inputs[0]), Reg::new(1));
    // The input is released right after its last reader, the output
    // after publication.
    assert_eq!(reg_of(&program.instruction(2).unwrap().inputs[0]), Reg::new(1));
    assert_eq!(reg_of(&program.instruction(4).unwrap().inputs[0]), Reg::new(2));
    verify_lifetimes(&program);
}

#[test]
fn test_add_of_two_inputs() {
    let mut g = Graph::new("add");
    let a = g.add_input("a");
    let b = g.add_input("b");
    let c = g.add_output("c");
    g.add_node(OpKind::Add, vec![Some(a), Some(b)], vec![Some(c)]);
    let program = emitted(&Model::new(g));

    assert_eq!(
        opcodes(&program),
        vec![
            Opcode::In,
            Opcode::In,
            Opcode::Add,
            Opcode::Free,
            Opcode::Free,
            Opcode::Out,
            Opcode::Free,
        ]
    );
    // #nodes + #inputs + #outputs + #frees.
    assert_eq!(program.len(), 1 + 2 + 1 + 3);
    verify_lifetimes(&program);
}

#[test]
fn test_scalar_float_constant() {
    let mut g = Graph::new("const");
    let y = g.add_output("y");
    let node = g.add_node(OpKind::Constant, vec![], vec![Some(y)]);
    g.node_mut(node).set_tensor(Tensor::scalar_f32(3.14));
    let program = emitted(&Model::new(g));

    assert_eq!(
        opcodes(&program),
        vec![Opcode::FloatScalarConstant, Opcode::Out, Opcode::Free]
    );
    let konst = program.instruction(0).unwrap();
    assert_eq!(konst.outputs, vec![Reg::new(1)]);
    match &konst.inputs[0] {
        Operand::Float(value) => assert!((*value - 3.14).abs() < 1e-6),
        other => panic!("expected float operand, got {other:?}"),
    }
    assert_eq!(int_of(&konst.inputs[1]), 1); // float32 wire code
    assert_eq!(int_of(&konst.inputs[2]), 0); // host residency off
    verify_lifetimes(&program);
}

#[test]
fn test_shaped_int_constant() {
    let mut g = Graph::new("const");
    let y = g.add_output("y");
    let node = g.add_node(OpKind::Constant, vec![], vec![Some(y)]);
    g.node_mut(node).set_tensor(Tensor::new(
        vec![3],
        synapse_graph::TensorData::Int32(vec![1, 2, 3]),
    ));
    let program = emitted(&Model::new(g));

    let konst = program.instruction(0).unwrap();
    assert_eq!(konst.opcode, Opcode::IntConstant);
    assert_eq!(konst.inputs[0], Operand::Ints(vec![1, 2, 3]));
    assert_eq!(int_of(&konst.inputs[1]), 6); // int32 wire code
    assert_eq!(konst.inputs[2], Operand::Ints(vec![3]));
}

#[test]
fn test_constant_dimension_out_of_range_is_rejected() {
    let mut g = Graph::new("const");
    let y = g.add_output("y");
    let node = g.add_node(OpKind::Constant, vec![], vec![Some(y)]);
    g.node_mut(node).set_tensor(Tensor::new(
        vec![1i64 << 33],
        synapse_graph::TensorData::Int64(vec![0]),
    ));
    let mut program = Program::new();
    let err = emit(&Model::new(g), &mut program, false).unwrap_err();
    assert!(matches!(err, EmitError::InvalidAttribute { .. }));
}

#[test]
fn test_softmax_negative_axis_defaults_to_one() {
    let mut g = Graph::new("softmax");
    let x = g.add_input("x");
    let y = g.add_output("y");
    let node = g.add_node(OpKind::Softmax, vec![Some(x)], vec![Some(y)]);
    g.node_mut(node).set_attr("axis", Attr::Int(-1));
    let program = emitted(&Model::new(g));

    let softmax = program.instruction(find(&program, Opcode::Softmax)).unwrap();
    assert_eq!(int_of(&softmax.inputs[1]), 1);
}

#[test]
fn test_dropout_lowers_to_single_identity() {
    let mut g = Graph::new("dropout");
    let x = g.add_input("x");
    let y = g.add_output("y");
    let mask = g.add_temp("mask");
    g.add_node(OpKind::Dropout, vec![Some(x)], vec![Some(y), Some(mask)]);
    let program = emitted(&Model::new(g));

    assert_eq!(count(&program, Opcode::Identity), 1);
    // The ignored mask register (temp, so id 2) is still released by
    // the walker even though nothing ever writes it.
    let mask_frees = program
        .instructions()
        .iter()
        .filter(|i| i.opcode == Opcode::Free && reg_of(&i.inputs[0]) == Reg::new(2))
        .count();
    assert_eq!(mask_frees, 1);
}

// ── Attribute defaulting and rejection ───────────────────────────────

#[test]
fn test_conv_symmetric_pads_emit_begin_halves() {
    let mut g = Graph::new("conv");
    let x = g.add_input("x");
    let w = g.add_input("w");
    let y = g.add_output("y");
    let node = g.add_node(OpKind::Conv, vec![Some(x), Some(w)], vec![Some(y)]);
    g.node_mut(node)
        .set_attr("pads", Attr::Ints(vec![1, 2, 1, 2]));
    let program = emitted(&Model::new(g));

    let conv = program.instruction(find(&program, Opcode::Conv)).unwrap();
    assert_eq!(reg_of(&conv.inputs[2]), Reg::NONE); // bias omitted
    assert_eq!(conv.inputs[3], Operand::Ints(vec![1, 1])); // default strides
    assert_eq!(conv.inputs[4], Operand::Ints(vec![1, 2]));
}

#[test]
fn test_conv_asymmetric_pads_are_rejected() {
    let mut g = Graph::new("conv");
    let x = g.add_input("x");
    let w = g.add_input("w");
    let y = g.add_output("y");
    let node = g.add_node(OpKind::Conv, vec![Some(x), Some(w)], vec![Some(y)]);
    g.node_mut(node)
        .set_attr("pads", Attr::Ints(vec![1, 2, 3, 4]));
    let mut program = Program::new();
    let err = emit(&Model::new(g), &mut program, false).unwrap_err();
    assert!(matches!(err, EmitError::InvalidAttribute { .. }));
}

#[test]
fn test_conv_dilation_is_rejected() {
    let mut g = Graph::new("conv");
    let x = g.add_input("x");
    let w = g.add_input("w");
    let y = g.add_output("y");
    let node = g.add_node(OpKind::Conv, vec![Some(x), Some(w)], vec![Some(y)]);
    g.node_mut(node)
        .set_attr("dilations", Attr::Ints(vec![2, 2]));
    let mut program = Program::new();
    let err = emit(&Model::new(g), &mut program, false).unwrap_err();
    assert!(matches!(err, EmitError::Unsupported { .. }));
}

#[test]
fn test_rnn_reverse_direction_is_rejected() {
    let mut g = Graph::new("rnn");
    let x = g.add_input("x");
    let w = g.add_input("w");
    let r = g.add_input("r");
    let y = g.add_output("y");
    let node = g.add_node(
        OpKind::RNN,
        vec![Some(x), Some(w), Some(r)],
        vec![Some(y)],
    );
    g.node_mut(node)
        .set_attr("direction", Attr::Str("reverse".to_string()));
    let mut program = Program::new();
    let err = emit(&Model::new(g), &mut program, false).unwrap_err();
    assert!(matches!(err, EmitError::Unsupported { .. }));
}

#[test]
fn test_pad_non_constant_mode_is_rejected() {
    let mut g = Graph::new("pad");
    let x = g.add_input("x");
    let y = g.add_output("y");
    let node = g.add_node(OpKind::Pad, vec![Some(x)], vec![Some(y)]);
    g.node_mut(node)
        .set_attr("mode", Attr::Str("reflect".to_string()));
    let mut program = Program::new();
    let err = emit(&Model::new(g), &mut program, false).unwrap_err();
    assert!(matches!(err, EmitError::Unsupported { .. }));
}

#[test]
fn test_slice_empty_axes_default_to_iota() {
    let mut g = Graph::new("slice");
    let x = g.add_input("x");
    let y = g.add_output("y");
    let node = g.add_node(OpKind::Slice, vec![Some(x)], vec![Some(y)]);
    g.node_mut(node).set_attr("starts", Attr::Ints(vec![0, 1]));
    g.node_mut(node).set_attr("ends", Attr::Ints(vec![2, 3]));
    let program = emitted(&Model::new(g));

    let slice = program.instruction(find(&program, Opcode::Slice)).unwrap();
    assert_eq!(slice.inputs[1], Operand::Ints(vec![0, 1]));
    assert_eq!(slice.inputs[2], Operand::Ints(vec![0, 1]));
    assert_eq!(slice.inputs[3], Operand::Ints(vec![2, 3]));
}

#[test]
fn test_slice_length_mismatch_is_rejected() {
    let mut g = Graph::new("slice");
    let x = g.add_input("x");
    let y = g.add_output("y");
    let node = g.add_node(OpKind::Slice, vec![Some(x)], vec![Some(y)]);
    g.node_mut(node).set_attr("starts", Attr::Ints(vec![0, 1]));
    g.node_mut(node).set_attr("ends", Attr::Ints(vec![2]));
    let mut program = Program::new();
    assert!(emit(&Model::new(g), &mut program, false).is_err());
}

#[test]
fn test_missing_mandatory_input_is_reported() {
    let mut g = Graph::new("gemm");
    let a = g.add_input("a");
    let b = g.add_input("b");
    let y = g.add_output("y");
    g.add_node(OpKind::Gemm, vec![Some(a), Some(b), None], vec![Some(y)]);
    let mut program = Program::new();
    let err = emit(&Model::new(g), &mut program, false).unwrap_err();
    assert!(matches!(
        err,
        EmitError::MissingInput {
            op: OpKind::Gemm,
            index: 2
        }
    ));
}

// ── Sequence append move/copy ────────────────────────────────────────

fn append_model(extra_reader: bool) -> Model {
    let mut g = Graph::new("append");
    let seq = g.add_input("seq");
    let value = g.add_input("v");
    let out = g.add_output("out");
    g.add_node(
        OpKind::SequenceAppend,
        vec![Some(seq), Some(value)],
        vec![Some(out)],
    );
    if extra_reader {
        let size = g.add_output("size");
        g.add_node(OpKind::SequenceSize, vec![Some(seq)], vec![Some(size)]);
    }
    Model::new(g)
}

#[test]
fn test_sequence_append_sole_reader_moves() {
    let program = emitted(&append_model(false));
    let at = find(&program, Opcode::SequenceMove);
    assert_eq!(
        program.instruction(at + 1).unwrap().opcode,
        Opcode::SequenceAppend
    );
    assert_eq!(count(&program, Opcode::SequenceCopy), 0);
}

#[test]
fn test_sequence_append_shared_reader_copies() {
    let program = emitted(&append_model(true));
    let at = find(&program, Opcode::SequenceCopy);
    assert_eq!(
        program.instruction(at + 1).unwrap().opcode,
        Opcode::SequenceAppend
    );
    assert_eq!(count(&program, Opcode::SequenceMove), 0);
}

// ── Loops ────────────────────────────────────────────────────────────

/// Loop body `(iter, cond, s) -> (cond, s + iter, iter)`: one carried
/// state accumulating the iteration counter, one scan output recording
/// it.
fn counted_loop_model(with_condition: bool) -> Model {
    let mut body = Graph::new("body");
    let iter = body.add_input("body_iter");
    let cond = body.add_input("body_cond");
    let state = body.add_input("body_state");
    let cond_out = body.add_output("body_cond_out");
    let state_out = body.add_output("body_state_out");
    let scan_out = body.add_output("body_scan");
    body.add_node(OpKind::Identity, vec![Some(cond)], vec![Some(cond_out)]);
    body.add_node(
        OpKind::Add,
        vec![Some(state), Some(iter)],
        vec![Some(state_out)],
    );
    body.add_node(OpKind::Identity, vec![Some(iter)], vec![Some(scan_out)]);

    let mut g = Graph::new("loop");
    let n = g.add_input("n");
    let go = with_condition.then(|| g.add_input("go"));
    let s0 = g.add_input("s0");
    let s_final = g.add_output("s_final");
    let stacked = g.add_output("stacked");
    let node = g.add_node(
        OpKind::Loop,
        vec![Some(n), go, Some(s0)],
        vec![Some(s_final), Some(stacked)],
    );
    g.node_mut(node).set_body(body);
    Model::new(g)
}

#[test]
fn test_counted_loop_structure() {
    let program = emitted(&counted_loop_model(false));

    // No termination condition: the guard jump is absent.
    assert_eq!(count(&program, Opcode::JmpFalse), 0);
    assert_eq!(count(&program, Opcode::SequenceCreate), 1);
    assert_eq!(count(&program, Opcode::SequenceAppend), 1);
    assert_eq!(count(&program, Opcode::SequenceStack), 1);

    // The loop closes with `Greater cond, n, iter` feeding a backward
    // jump to the first body instruction.
    let jmp = program.instruction(find(&program, Opcode::JmpTrue)).unwrap();
    let loop_begin = int_of(&jmp.inputs[1]) as usize;
    assert!(loop_begin < find(&program, Opcode::JmpTrue));
    let greater = program.instruction(find(&program, Opcode::Greater)).unwrap();
    assert_eq!(greater.outputs, vec![reg_of(&jmp.inputs[0])]);
    // SequenceStack lands after the loop.
    assert!(find(&program, Opcode::SequenceStack) > find(&program, Opcode::JmpTrue));
    assert_eq!(count(&program, Opcode::Out), 2);
    verify_lifetimes(&program);
}

#[test]
fn test_counted_loop_sums_and_stacks() {
    let program = emitted(&counted_loop_model(false));
    let outputs = run(&program, &[("n", 3), ("s0", 0)]);
    assert_eq!(outputs["s_final"], Val::Int(3)); // 0 + 0 + 1 + 2
    assert_eq!(outputs["stacked"], Val::Stacked(vec![0, 1, 2]));
}

#[test]
fn test_loop_with_both_conditions_backpatches_guard() {
    let program = emitted(&counted_loop_model(true));

    let guard_at = find(&program, Opcode::JmpFalse);
    let back_at = find(&program, Opcode::JmpTrue);
    assert!(guard_at < back_at);
    let guard = program.instruction(guard_at).unwrap();
    // The guard skips to the instruction immediately after the backward
    // jump.
    assert_eq!(int_of(&guard.inputs[1]) as usize, back_at + 1);
    // Both conditions combine through a Mul.
    assert_eq!(count(&program, Opcode::Mul), 1);
    verify_lifetimes(&program);
}

#[test]
fn test_loop_guard_skips_body_when_condition_is_false() {
    let program = emitted(&counted_loop_model(true));
    let outputs = run(&program, &[("n", 5), ("go", 0), ("s0", 7)]);
    assert_eq!(outputs["s_final"], Val::Int(7));
    assert_eq!(outputs["stacked"], Val::Stacked(vec![]));
}

#[test]
fn test_loop_with_both_conditions_counts_down() {
    let program = emitted(&counted_loop_model(true));
    let outputs = run(&program, &[("n", 2), ("go", 1), ("s0", 7)]);
    assert_eq!(outputs["s_final"], Val::Int(8)); // 7 + 0 + 1
    assert_eq!(outputs["stacked"], Val::Stacked(vec![0, 1]));
}

#[test]
fn test_zero_trip_count_still_runs_body_once() {
    // The counted form tests termination after the body, so a zero
    // trip count still executes one iteration before the Greater test
    // fails.
    let program = emitted(&counted_loop_model(false));
    let outputs = run(&program, &[("n", 0), ("s0", 5)]);
    assert_eq!(outputs["s_final"], Val::Int(5));
    assert_eq!(outputs["stacked"], Val::Stacked(vec![0]));
}

#[test]
fn test_loop_without_any_condition_is_rejected() {
    let mut body = Graph::new("body");
    body.add_input("i");
    let c = body.add_input("c");
    let c2 = body.add_output("c2");
    body.add_node(OpKind::Identity, vec![Some(c)], vec![Some(c2)]);

    let mut g = Graph::new("loop");
    let node = g.add_node(OpKind::Loop, vec![None, None], vec![]);
    g.node_mut(node).set_body(body);
    let mut program = Program::new();
    let err = emit(&Model::new(g), &mut program, false).unwrap_err();
    assert!(matches!(err, EmitError::InfiniteLoop(_)));
}

#[test]
fn test_loop_body_ids_are_disjoint_from_outer_ids() {
    let program = emitted(&counted_loop_model(false));
    // Outer graph: 2 inputs + 2 outputs = ids 1..=4. Everything written
    // between the loop initialization and the backward jump lives in
    // the body's id range.
    let outer_max = 4;
    let back_at = find(&program, Opcode::JmpTrue);
    let first_init = find(&program, Opcode::IntScalarConstant);
    assert!(first_init > 1); // after the two In bindings
    for inst in &program.instructions()[first_init..=back_at] {
        for reg in &inst.outputs {
            assert!(
                reg.id() > outer_max,
                "loop-internal write to outer register {reg}"
            );
        }
    }
}

// ── Whole-program properties ─────────────────────────────────────────

fn mixed_model() -> Model {
    let mut g = Graph::new("mixed");
    let x = g.add_input("x");
    let t = g.add_temp("t");
    let u = g.add_temp("u");
    let y = g.add_output("y");
    g.add_node(OpKind::Relu, vec![Some(x)], vec![Some(t)]);
    g.add_node(OpKind::Exp, vec![Some(t)], vec![Some(u)]);
    g.add_node(OpKind::Add, vec![Some(u), Some(x)], vec![Some(y)]);
    Model::new(g)
}

#[test]
fn test_lifetimes_balance_in_mixed_graph() {
    let program = emitted(&mixed_model());
    verify_lifetimes(&program);
    // x is read by two nodes and freed only after the second.
    let add_at = find(&program, Opcode::Add);
    let x_free = program
        .instructions()
        .iter()
        .position(|i| i.opcode == Opcode::Free && reg_of(&i.inputs[0]) == Reg::new(1))
        .unwrap();
    assert!(x_free > add_at);
}

#[test]
fn test_emission_is_deterministic() {
    let model = counted_loop_model(true);
    let first = emitted(&model);
    let second = emitted(&model);
    assert_eq!(first, second);
}

#[test]
fn test_value_dump_does_not_disturb_emission() {
    let mut g = Graph::new("dump");
    let x = g.add_input("x");
    let y = g.add_output("y");
    g.value_mut(x).set_nbytes(4);
    g.value_mut(y).set_nbytes(4);
    g.add_node(OpKind::Relu, vec![Some(x)], vec![Some(y)]);
    let model = Model::new(g);

    let mut with_dump = Program::new();
    emit(&model, &mut with_dump, true).unwrap();
    assert_eq!(with_dump, emitted(&model));
}

#[test]
fn test_serialized_round_trip() {
    let model = mixed_model();
    let bytes = emit_to_vec(&model, false).unwrap();
    let decoded = Program::from_slice(&bytes).unwrap();
    assert_eq!(decoded, emitted(&model));
}
