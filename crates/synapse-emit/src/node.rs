//! Per-operator node lowering.
//!
//! One exhaustive dispatch over [`OpKind`]: each arm checks the node's
//! arity and attributes, then appends the VM instructions computing its
//! outputs. Operand layouts follow the VM instruction set; attribute
//! defaulting (pads, strides, direction, softmax axis) happens here.

use tracing::warn;

use synapse_graph::{Graph, Node, OpKind, TensorData};
use synapse_vm::{DType, Opcode, Operand, Program, Reg};

use crate::emitter::{push, Emitter};
use crate::table::ValueIdTable;
use crate::EmitError;

/// Borrow-scoped operand accessors for the node being lowered.
///
/// Encodes "this node's operand at index i" plus the attribute
/// defaulting rules shared between operator families.
struct NodeCtx<'a> {
    graph: &'a Graph,
    node: &'a Node,
    table: &'a ValueIdTable,
}

impl<'a> NodeCtx<'a> {
    fn new(graph: &'a Graph, node: &'a Node, table: &'a ValueIdTable) -> Self {
        Self { graph, node, table }
    }

    fn op(&self) -> OpKind {
        self.node.op()
    }

    /// Register of required input `i`.
    fn input(&self, i: usize) -> Result<Reg, EmitError> {
        match self.node.inputs().get(i) {
            Some(Some(value)) => Ok(self.table.get(self.graph.value(*value))),
            _ => Err(EmitError::MissingInput {
                op: self.op(),
                index: i,
            }),
        }
    }

    /// Register of optional input `i`; `Reg::NONE` when absent.
    fn opt_input(&self, i: usize) -> Reg {
        match self.node.inputs().get(i) {
            Some(Some(value)) => self.table.get(self.graph.value(*value)),
            _ => Reg::NONE,
        }
    }

    /// Register of required output `i`.
    fn output(&self, i: usize) -> Result<Reg, EmitError> {
        match self.node.outputs().get(i) {
            Some(Some(value)) => Ok(self.table.get(self.graph.value(*value))),
            _ => Err(EmitError::MissingOutput {
                op: self.op(),
                index: i,
            }),
        }
    }

    /// Register of optional output `i`; `Reg::NONE` when absent.
    fn opt_output(&self, i: usize) -> Reg {
        match self.node.outputs().get(i) {
            Some(Some(value)) => self.table.get(self.graph.value(*value)),
            _ => Reg::NONE,
        }
    }

    /// Registers of all inputs, each required.
    fn all_inputs(&self) -> Result<Vec<Reg>, EmitError> {
        (0..self.node.inputs().len()).map(|i| self.input(i)).collect()
    }

    /// Registers of all outputs, each required.
    fn all_outputs(&self) -> Result<Vec<Reg>, EmitError> {
        (0..self.node.outputs().len())
            .map(|i| self.output(i))
            .collect()
    }

    /// How many nodes consume required input `i`.
    fn input_users(&self, i: usize) -> Result<usize, EmitError> {
        match self.node.inputs().get(i) {
            Some(Some(value)) => Ok(self.graph.value(*value).users().len()),
            _ => Err(EmitError::MissingInput {
                op: self.op(),
                index: i,
            }),
        }
    }

    fn expect_inputs(&self, expected: usize) -> Result<(), EmitError> {
        let found = self.node.inputs().len();
        if found != expected {
            return Err(EmitError::InputArity {
                op: self.op(),
                expected: expected.to_string(),
                found,
            });
        }
        Ok(())
    }

    fn expect_inputs_between(&self, lo: usize, hi: usize) -> Result<(), EmitError> {
        let found = self.node.inputs().len();
        if found < lo || found > hi {
            return Err(EmitError::InputArity {
                op: self.op(),
                expected: format!("{lo}..={hi}"),
                found,
            });
        }
        Ok(())
    }

    fn expect_outputs(&self, expected: usize) -> Result<(), EmitError> {
        let found = self.node.outputs().len();
        if found != expected {
            return Err(EmitError::OutputArity {
                op: self.op(),
                expected: expected.to_string(),
                found,
            });
        }
        Ok(())
    }

    fn expect_outputs_between(&self, lo: usize, hi: usize) -> Result<(), EmitError> {
        let found = self.node.outputs().len();
        if found < lo || found > hi {
            return Err(EmitError::OutputArity {
                op: self.op(),
                expected: format!("{lo}..={hi}"),
                found,
            });
        }
        Ok(())
    }

    /// Per-axis begin padding.
    ///
    /// The attribute concatenates begin and end pads; the VM only takes
    /// one set, so the halves must agree. Empty defaults to `[0, 0]`.
    fn pads(&self) -> Result<Vec<i64>, EmitError> {
        let pads = self.node.ints_attr("pads");
        if pads.is_empty() {
            return Ok(vec![0, 0]);
        }
        if pads.len() % 2 != 0 {
            return Err(EmitError::InvalidAttribute {
                op: self.op(),
                message: format!("pads has odd length {}", pads.len()),
            });
        }
        let half = pads.len() / 2;
        for i in 0..half {
            if pads[i] != pads[i + half] {
                return Err(EmitError::InvalidAttribute {
                    op: self.op(),
                    message: format!(
                        "asymmetric padding: begin {} != end {} on axis {i}",
                        pads[i],
                        pads[i + half]
                    ),
                });
            }
        }
        Ok(pads[..half].to_vec())
    }

    /// Strides; empty defaults to `[1, 1]`.
    fn strides(&self) -> Vec<i64> {
        let strides = self.node.ints_attr("strides");
        if strides.is_empty() {
            vec![1, 1]
        } else {
            strides.to_vec()
        }
    }

    /// The VM kernels only implement unit dilation.
    fn reject_dilations(&self) -> Result<(), EmitError> {
        if self.node.ints_attr("dilations").iter().any(|&d| d != 1) {
            return Err(EmitError::Unsupported {
                op: self.op(),
                message: "non-1 dilations are not supported".to_string(),
            });
        }
        Ok(())
    }

    /// Direction string mapped to the VM's integer code.
    fn direction(&self) -> Result<i64, EmitError> {
        match self.node.str_attr("direction") {
            "" | "forward" => Ok(0),
            "reverse" | "reversed" => Ok(1),
            "bidirectional" => Ok(2),
            other => Err(EmitError::InvalidAttribute {
                op: self.op(),
                message: format!("unknown direction: {other}"),
            }),
        }
    }

    /// Recurrent kernels run forward or bidirectional only.
    fn reject_reverse_direction(&self) -> Result<(), EmitError> {
        if self.node.str_attr("direction") == "reverse" {
            return Err(EmitError::Unsupported {
                op: self.op(),
                message: "reverse direction is not supported".to_string(),
            });
        }
        Ok(())
    }

    /// Recurrent kernels use the cell's standard activations.
    fn reject_activation_overrides(&self) -> Result<(), EmitError> {
        if !self.node.strs_attr("activations").is_empty()
            || !self.node.floats_attr("activation_alpha").is_empty()
            || !self.node.floats_attr("activation_beta").is_empty()
        {
            return Err(EmitError::Unsupported {
                op: self.op(),
                message: "activation overrides are not supported".to_string(),
            });
        }
        Ok(())
    }

    /// Softmax-family axis: negative collapses to 1.
    fn softmax_axis(&self, default: i64) -> i64 {
        let axis = self.node.int_attr("axis").unwrap_or(default);
        if axis < 0 {
            1
        } else {
            axis
        }
    }

    fn ints(&self, name: &str) -> Vec<i64> {
        self.node.ints_attr(name).to_vec()
    }
}

fn emit_unary(
    ctx: &NodeCtx<'_>,
    opcode: Opcode,
    prog: &mut Program,
    debug_info: &str,
) -> Result<(), EmitError> {
    ctx.expect_inputs(1)?;
    ctx.expect_outputs(1)?;
    push(
        prog,
        opcode,
        vec![ctx.output(0)?],
        vec![Operand::Reg(ctx.input(0)?)],
        debug_info,
    );
    Ok(())
}

fn emit_binary(
    ctx: &NodeCtx<'_>,
    opcode: Opcode,
    prog: &mut Program,
    debug_info: &str,
) -> Result<(), EmitError> {
    ctx.expect_inputs(2)?;
    ctx.expect_outputs(1)?;
    push(
        prog,
        opcode,
        vec![ctx.output(0)?],
        vec![Operand::Reg(ctx.input(0)?), Operand::Reg(ctx.input(1)?)],
        debug_info,
    );
    Ok(())
}

fn emit_reduction(
    ctx: &NodeCtx<'_>,
    opcode: Opcode,
    prog: &mut Program,
    debug_info: &str,
) -> Result<(), EmitError> {
    ctx.expect_inputs(1)?;
    ctx.expect_outputs(1)?;
    push(
        prog,
        opcode,
        vec![ctx.output(0)?],
        vec![
            Operand::Reg(ctx.input(0)?),
            Operand::Ints(ctx.ints("axes")),
            Operand::Int(ctx.node.int_attr("keepdims").unwrap_or(1)),
        ],
        debug_info,
    );
    Ok(())
}

impl Emitter {
    /// Lower one node into the program.
    pub(crate) fn emit_node(
        &mut self,
        graph: &Graph,
        node: &Node,
        debug_info: &str,
        prog: &mut Program,
    ) -> Result<(), EmitError> {
        match node.op() {
            OpKind::Loop => return self.emit_loop(graph, node, debug_info, prog),
            OpKind::Constant => return self.emit_constant(graph, node, debug_info, prog),
            _ => {}
        }

        let ctx = NodeCtx::new(graph, node, &self.table);
        match node.op() {
            // Unary elementwise.
            OpKind::Neg => emit_unary(&ctx, Opcode::Neg, prog, debug_info)?,
            OpKind::Reciprocal => emit_unary(&ctx, Opcode::Reciprocal, prog, debug_info)?,
            OpKind::Exp => emit_unary(&ctx, Opcode::Exp, prog, debug_info)?,
            OpKind::Log => emit_unary(&ctx, Opcode::Log, prog, debug_info)?,
            OpKind::Sqrt => emit_unary(&ctx, Opcode::Sqrt, prog, debug_info)?,
            OpKind::Tanh => emit_unary(&ctx, Opcode::Tanh, prog, debug_info)?,
            OpKind::Abs => emit_unary(&ctx, Opcode::Abs, prog, debug_info)?,
            OpKind::Relu => emit_unary(&ctx, Opcode::Relu, prog, debug_info)?,
            OpKind::Floor => emit_unary(&ctx, Opcode::Floor, prog, debug_info)?,
            OpKind::Ceil => emit_unary(&ctx, Opcode::Ceil, prog, debug_info)?,
            OpKind::Sigmoid => emit_unary(&ctx, Opcode::Sigmoid, prog, debug_info)?,
            OpKind::Not => emit_unary(&ctx, Opcode::Not, prog, debug_info)?,
            OpKind::Identity => emit_unary(&ctx, Opcode::Identity, prog, debug_info)?,

            // Binary elementwise.
            OpKind::Add => emit_binary(&ctx, Opcode::Add, prog, debug_info)?,
            OpKind::Sub => emit_binary(&ctx, Opcode::Sub, prog, debug_info)?,
            OpKind::Mul => emit_binary(&ctx, Opcode::Mul, prog, debug_info)?,
            OpKind::Div => emit_binary(&ctx, Opcode::Div, prog, debug_info)?,
            OpKind::Pow => emit_binary(&ctx, Opcode::Pow, prog, debug_info)?,
            OpKind::Equal => emit_binary(&ctx, Opcode::Equal, prog, debug_info)?,
            OpKind::Greater => emit_binary(&ctx, Opcode::Greater, prog, debug_info)?,

            // Gradient helpers with binary shape.
            OpKind::ReluGrad => emit_binary(&ctx, Opcode::ReluGrad, prog, debug_info)?,
            OpKind::MaxPoolGrad => emit_binary(&ctx, Opcode::MaxPoolGrad, prog, debug_info)?,
            OpKind::AveragePoolGrad => {
                emit_binary(&ctx, Opcode::AveragePoolGrad, prog, debug_info)?
            }
            OpKind::SelectItem => emit_binary(&ctx, Opcode::SelectItem, prog, debug_info)?,

            OpKind::Dropout => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs_between(1, 2)?;
                if node.outputs().len() >= 2 && !self.dropout_mask_warned {
                    warn!("the mask output of Dropout is ignored");
                    self.dropout_mask_warned = true;
                }
                push(
                    prog,
                    Opcode::Identity,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?)],
                    debug_info,
                );
            }

            OpKind::Selu => {
                ctx.expect_inputs(1)?;
                push(
                    prog,
                    Opcode::Selu,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Float(node.float_attr("alpha").unwrap_or(1.673_263_242_354_377_2)),
                        Operand::Float(node.float_attr("gamma").unwrap_or(1.050_700_987_355_480_5)),
                    ],
                    debug_info,
                );
            }
            OpKind::LeakyRelu => {
                ctx.expect_inputs(1)?;
                push(
                    prog,
                    Opcode::LeakyRelu,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Float(node.float_attr("alpha").unwrap_or(0.01)),
                    ],
                    debug_info,
                );
            }
            OpKind::Elu => {
                ctx.expect_inputs(1)?;
                push(
                    prog,
                    Opcode::Elu,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Float(node.float_attr("alpha").unwrap_or(1.0)),
                    ],
                    debug_info,
                );
            }

            OpKind::Conv => {
                ctx.expect_inputs_between(2, 3)?;
                ctx.expect_outputs(1)?;
                ctx.reject_dilations()?;
                push(
                    prog,
                    Opcode::Conv,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.opt_input(2)),
                        Operand::Ints(ctx.strides()),
                        Operand::Ints(ctx.pads()?),
                    ],
                    debug_info,
                );
            }
            OpKind::ConvTranspose => {
                ctx.expect_inputs_between(2, 3)?;
                ctx.expect_outputs(1)?;
                ctx.reject_dilations()?;
                push(
                    prog,
                    Opcode::ConvTranspose,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.opt_input(2)),
                        Operand::Ints(ctx.strides()),
                        Operand::Ints(ctx.pads()?),
                        Operand::Ints(ctx.ints("output_shape")),
                    ],
                    debug_info,
                );
            }
            OpKind::ConvTransposeWithDynamicShape => {
                ctx.expect_inputs(3)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::ConvTransposeWithDynamicShape,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.input(2)?),
                        Operand::Ints(ctx.strides()),
                        Operand::Ints(ctx.pads()?),
                    ],
                    debug_info,
                );
            }
            OpKind::ConvGradWeight => {
                ctx.expect_inputs(3)?;
                ctx.expect_outputs(1)?;
                ctx.reject_dilations()?;
                push(
                    prog,
                    Opcode::ConvGradWeight,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.input(2)?),
                        Operand::Ints(ctx.strides()),
                        Operand::Ints(ctx.pads()?),
                    ],
                    debug_info,
                );
            }

            OpKind::RNN => {
                ctx.reject_reverse_direction()?;
                ctx.reject_activation_overrides()?;
                push(
                    prog,
                    Opcode::RNN,
                    vec![ctx.opt_output(0), ctx.opt_output(1)],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.input(2)?),
                        Operand::Reg(ctx.opt_input(3)),
                        Operand::Reg(ctx.opt_input(4)),
                        Operand::Reg(ctx.opt_input(5)),
                        Operand::Int(node.int_attr("hidden_size").unwrap_or(0)),
                    ],
                    debug_info,
                );
            }
            OpKind::GRU => {
                ctx.reject_reverse_direction()?;
                ctx.reject_activation_overrides()?;
                push(
                    prog,
                    Opcode::GRU,
                    vec![ctx.opt_output(0), ctx.opt_output(1)],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.input(2)?),
                        Operand::Reg(ctx.opt_input(3)),
                        Operand::Reg(ctx.opt_input(4)),
                        Operand::Reg(ctx.opt_input(5)),
                        Operand::Int(node.int_attr("hidden_size").unwrap_or(0)),
                        Operand::Int(node.int_attr("linear_before_reset").unwrap_or(0)),
                    ],
                    debug_info,
                );
            }
            OpKind::LSTM => {
                ctx.reject_reverse_direction()?;
                ctx.reject_activation_overrides()?;
                ctx.expect_inputs_between(3, 8)?;
                ctx.expect_outputs_between(0, 3)?;
                let direction = ctx.direction()?;
                push(
                    prog,
                    Opcode::LSTM,
                    vec![ctx.opt_output(0), ctx.opt_output(1), ctx.opt_output(2)],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.input(2)?),
                        Operand::Reg(ctx.opt_input(3)),
                        Operand::Reg(ctx.opt_input(4)),
                        Operand::Reg(ctx.opt_input(5)),
                        Operand::Reg(ctx.opt_input(6)),
                        Operand::Reg(ctx.opt_input(7)),
                        Operand::Int(node.int_attr("hidden_size").unwrap_or(0)),
                        Operand::Int(direction),
                    ],
                    debug_info,
                );
            }

            OpKind::Shape => emit_unary(&ctx, Opcode::Shape, prog, debug_info)?,
            OpKind::Size => emit_unary(&ctx, Opcode::Size, prog, debug_info)?,
            OpKind::Reshape => emit_binary(&ctx, Opcode::Reshape, prog, debug_info)?,
            OpKind::Expand => emit_binary(&ctx, Opcode::Expand, prog, debug_info)?,
            OpKind::Squeeze => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Squeeze,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Ints(ctx.ints("axes"))],
                    debug_info,
                );
            }
            OpKind::Unsqueeze => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Unsqueeze,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Ints(ctx.ints("axes"))],
                    debug_info,
                );
            }

            OpKind::MatMul => emit_binary(&ctx, Opcode::MatMul, prog, debug_info)?,
            OpKind::Gemm => {
                ctx.expect_inputs(3)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Gemm,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.input(2)?),
                        Operand::Float(node.float_attr("alpha").unwrap_or(1.0)),
                        Operand::Float(node.float_attr("beta").unwrap_or(1.0)),
                        Operand::Int(node.int_attr("trans_a").unwrap_or(0)),
                        Operand::Int(node.int_attr("trans_b").unwrap_or(0)),
                    ],
                    debug_info,
                );
            }

            OpKind::BatchNormalization => {
                ctx.expect_inputs(5)?;
                push(
                    prog,
                    Opcode::BatchNormalization,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.input(2)?),
                        Operand::Reg(ctx.input(3)?),
                        Operand::Reg(ctx.input(4)?),
                        Operand::Float(node.float_attr("epsilon").unwrap_or(1e-5)),
                        Operand::Float(node.float_attr("momentum").unwrap_or(0.9)),
                        Operand::Int(node.int_attr("spatial").unwrap_or(1)),
                    ],
                    debug_info,
                );
            }
            OpKind::BatchNormalizationGrad => {
                ctx.expect_inputs(2)?;
                ctx.expect_outputs(3)?;
                push(
                    prog,
                    Opcode::BatchNormalizationGrad,
                    vec![ctx.output(0)?, ctx.output(1)?, ctx.output(2)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Reg(ctx.input(1)?)],
                    debug_info,
                );
            }
            OpKind::LRN => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::LRN,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Float(node.float_attr("alpha").unwrap_or(1e-4)),
                        Operand::Float(node.float_attr("beta").unwrap_or(0.75)),
                        Operand::Float(node.float_attr("bias").unwrap_or(1.0)),
                        Operand::Int(node.int_attr("size").unwrap_or(1)),
                    ],
                    debug_info,
                );
            }
            OpKind::LRNGrad => {
                ctx.expect_inputs(3)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::LRNGrad,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.input(2)?),
                        Operand::Float(node.float_attr("alpha").unwrap_or(1e-4)),
                        Operand::Float(node.float_attr("beta").unwrap_or(0.75)),
                        Operand::Float(node.float_attr("bias").unwrap_or(1.0)),
                        Operand::Int(node.int_attr("size").unwrap_or(1)),
                    ],
                    debug_info,
                );
            }

            OpKind::Pad => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                let mode = node.str_attr("mode");
                if !matches!(mode, "" | "constant") {
                    return Err(EmitError::Unsupported {
                        op: node.op(),
                        message: format!("only constant padding is supported, got {mode:?}"),
                    });
                }
                push(
                    prog,
                    Opcode::Pad,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Ints(ctx.ints("pads")),
                        Operand::Float(node.float_attr("value").unwrap_or(0.0)),
                    ],
                    debug_info,
                );
            }
            OpKind::MaxPool => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::MaxPool,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Ints(ctx.ints("kernel_shape")),
                        Operand::Ints(ctx.strides()),
                        Operand::Ints(ctx.pads()?),
                    ],
                    debug_info,
                );
            }
            OpKind::AveragePool => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::AveragePool,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Ints(ctx.ints("kernel_shape")),
                        Operand::Ints(ctx.strides()),
                        Operand::Ints(ctx.pads()?),
                        Operand::Int(node.int_attr("count_include_pad").unwrap_or(0)),
                    ],
                    debug_info,
                );
            }

            OpKind::Softmax => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Softmax,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Int(ctx.softmax_axis(1))],
                    debug_info,
                );
            }
            OpKind::LogSoftmax => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::LogSoftmax,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Int(ctx.softmax_axis(1))],
                    debug_info,
                );
            }
            OpKind::Hardmax => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Hardmax,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Int(ctx.softmax_axis(1))],
                    debug_info,
                );
            }
            OpKind::ArgMax => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::ArgMax,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Int(ctx.softmax_axis(0)),
                        Operand::Int(node.int_attr("keepdims").unwrap_or(1)),
                    ],
                    debug_info,
                );
            }

            OpKind::ReduceMax => emit_reduction(&ctx, Opcode::ReduceMax, prog, debug_info)?,
            OpKind::ReduceSum => emit_reduction(&ctx, Opcode::ReduceSum, prog, debug_info)?,
            OpKind::ReduceSumSquare => {
                emit_reduction(&ctx, Opcode::ReduceSumSquare, prog, debug_info)?
            }
            OpKind::ReduceMean => emit_reduction(&ctx, Opcode::ReduceMean, prog, debug_info)?,
            OpKind::ReduceSumTo => emit_binary(&ctx, Opcode::ReduceSumTo, prog, debug_info)?,

            OpKind::Cast => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Cast,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Int(node.int_attr("to").unwrap_or(0)),
                    ],
                    debug_info,
                );
            }
            OpKind::ConstantFill => {
                if node.int_attr("input_as_shape").unwrap_or(0) != 0 {
                    ctx.expect_inputs(1)?;
                } else {
                    ctx.expect_inputs(0)?;
                }
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::ConstantFill,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.opt_input(0)),
                        Operand::Int(node.int_attr("dtype").unwrap_or(DType::Float32.code())),
                        Operand::Ints(ctx.ints("extra_shape")),
                        Operand::Ints(ctx.ints("shape")),
                        Operand::Float(node.float_attr("value").unwrap_or(0.0)),
                    ],
                    debug_info,
                );
            }

            OpKind::Slice => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                let starts = ctx.ints("starts");
                let ends = ctx.ints("ends");
                if starts.is_empty() || ends.is_empty() || starts.len() != ends.len() {
                    return Err(EmitError::InvalidAttribute {
                        op: node.op(),
                        message: format!(
                            "starts and ends must be non-empty and equal length, got {} and {}",
                            starts.len(),
                            ends.len()
                        ),
                    });
                }
                let mut axes = ctx.ints("axes");
                if axes.is_empty() {
                    axes = (0..starts.len() as i64).collect();
                } else if axes.len() != starts.len() {
                    return Err(EmitError::InvalidAttribute {
                        op: node.op(),
                        message: format!(
                            "axes length {} does not match starts length {}",
                            axes.len(),
                            starts.len()
                        ),
                    });
                }
                push(
                    prog,
                    Opcode::Slice,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Ints(axes),
                        Operand::Ints(starts),
                        Operand::Ints(ends),
                    ],
                    debug_info,
                );
            }
            OpKind::DynamicSlice => {
                push(
                    prog,
                    Opcode::DynamicSlice,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.input(2)?),
                        Operand::Reg(ctx.opt_input(3)),
                    ],
                    debug_info,
                );
            }
            OpKind::Gather => {
                ctx.expect_inputs(2)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Gather,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Int(node.int_attr("axis").unwrap_or(0)),
                    ],
                    debug_info,
                );
            }
            OpKind::SelectItemGrad => {
                ctx.expect_inputs(3)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::SelectItemGrad,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.input(1)?),
                        Operand::Reg(ctx.input(2)?),
                    ],
                    debug_info,
                );
            }

            OpKind::Concat => {
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Concat,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Regs(ctx.all_inputs()?),
                        Operand::Int(node.int_attr("axis").unwrap_or(1)),
                    ],
                    debug_info,
                );
            }
            OpKind::Split => {
                ctx.expect_inputs(1)?;
                push(
                    prog,
                    Opcode::Split,
                    ctx.all_outputs()?,
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Int(node.int_attr("axis").unwrap_or(0)),
                        Operand::Ints(ctx.ints("split")),
                    ],
                    debug_info,
                );
            }
            OpKind::Clip => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Clip,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Float(node.float_attr("max").unwrap_or(f64::from(f32::MAX))),
                        Operand::Float(node.float_attr("min").unwrap_or(f64::from(f32::MIN))),
                    ],
                    debug_info,
                );
            }
            OpKind::Max => {
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Max,
                    vec![ctx.output(0)?],
                    vec![Operand::Regs(ctx.all_inputs()?)],
                    debug_info,
                );
            }
            OpKind::Transpose => {
                ctx.expect_inputs(1)?;
                ctx.expect_outputs(1)?;
                push(
                    prog,
                    Opcode::Transpose,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Ints(ctx.ints("perm"))],
                    debug_info,
                );
            }

            // Sequences.
            OpKind::SequenceCreate => {
                push(prog, Opcode::SequenceCreate, vec![ctx.output(0)?], vec![], debug_info);
            }
            OpKind::SequenceSize => {
                push(
                    prog,
                    Opcode::SequenceSize,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?)],
                    debug_info,
                );
            }
            OpKind::SequenceLengths => {
                push(
                    prog,
                    Opcode::SequenceLengths,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?)],
                    debug_info,
                );
            }
            OpKind::SequenceAppend => {
                // A sole reader lets the append take the source sequence
                // by move; anything else pays for a copy so the original
                // stays observable.
                let transfer = if ctx.input_users(0)? == 1 {
                    Opcode::SequenceMove
                } else {
                    Opcode::SequenceCopy
                };
                push(
                    prog,
                    transfer,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?)],
                    debug_info,
                );
                push(
                    prog,
                    Opcode::SequenceAppend,
                    vec![],
                    vec![Operand::Reg(ctx.output(0)?), Operand::Reg(ctx.input(1)?)],
                    debug_info,
                );
            }
            OpKind::SequenceLookup => {
                push(
                    prog,
                    Opcode::SequenceLookup,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Reg(ctx.input(1)?)],
                    debug_info,
                );
            }
            OpKind::SequenceStack => {
                push(
                    prog,
                    Opcode::SequenceStack,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Int(node.int_attr("axis").unwrap_or(0)),
                    ],
                    debug_info,
                );
            }
            OpKind::SequenceSplit => {
                push(
                    prog,
                    Opcode::SequenceSplit,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Int(node.int_attr("axis").unwrap_or(0)),
                    ],
                    debug_info,
                );
            }
            OpKind::SequenceUnpad => {
                push(
                    prog,
                    Opcode::SequenceUnpad,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Reg(ctx.input(1)?)],
                    debug_info,
                );
            }
            OpKind::SequencePad => {
                push(
                    prog,
                    Opcode::SequencePad,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Int(node.int_attr("length").unwrap_or(0)),
                        Operand::Float(node.float_attr("value").unwrap_or(0.0)),
                    ],
                    debug_info,
                );
            }

            // Generic containers.
            OpKind::GenericLen => {
                push(
                    prog,
                    Opcode::GenericLen,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?)],
                    debug_info,
                );
            }
            OpKind::GenericGetItem => {
                push(
                    prog,
                    Opcode::GenericGetItem,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Reg(ctx.input(1)?)],
                    debug_info,
                );
            }
            OpKind::GenericGetSlice => {
                push(
                    prog,
                    Opcode::GenericGetSlice,
                    vec![ctx.output(0)?],
                    vec![
                        Operand::Reg(ctx.input(0)?),
                        Operand::Reg(ctx.opt_input(1)),
                        Operand::Reg(ctx.opt_input(2)),
                        Operand::Reg(ctx.opt_input(3)),
                    ],
                    debug_info,
                );
            }
            OpKind::GenericAdd => {
                push(
                    prog,
                    Opcode::GenericAdd,
                    vec![ctx.output(0)?],
                    vec![Operand::Reg(ctx.input(0)?), Operand::Reg(ctx.input(1)?)],
                    debug_info,
                );
            }

            OpKind::Loop | OpKind::Constant => unreachable!("lowered before the dispatch"),
        }
        Ok(())
    }

    /// Lower a `Constant` node: read the tensor payload and materialize
    /// it with the scalar or shaped constant opcode for its dtype class.
    pub(crate) fn emit_constant(
        &mut self,
        graph: &Graph,
        node: &Node,
        debug_info: &str,
        prog: &mut Program,
    ) -> Result<(), EmitError> {
        if node.outputs().len() != 1 {
            return Err(EmitError::OutputArity {
                op: node.op(),
                expected: "1".to_string(),
                found: node.outputs().len(),
            });
        }
        let out = match node.outputs()[0] {
            Some(value) => self.table.get(graph.value(value)),
            None => {
                return Err(EmitError::MissingOutput {
                    op: node.op(),
                    index: 0,
                })
            }
        };
        let tensor = node.tensor().ok_or_else(|| EmitError::InvalidAttribute {
            op: node.op(),
            message: "Constant node without a tensor payload".to_string(),
        })?;

        let mut shape = Vec::with_capacity(tensor.dims().len());
        for &dim in tensor.dims() {
            if !(0..1i64 << 32).contains(&dim) {
                return Err(EmitError::InvalidAttribute {
                    op: node.op(),
                    message: format!("tensor dimension out of range: {dim}"),
                });
            }
            shape.push(dim);
        }

        let dtype = tensor.dtype();
        let host = node.int_attr("host").unwrap_or(0);
        if dtype.is_float() {
            let values: Vec<f64> = match tensor.data() {
                TensorData::Float32(v) => v.iter().map(|&x| f64::from(x)).collect(),
                TensorData::Float64(v) => v.clone(),
                _ => unreachable!("float dtype with integer storage"),
            };
            if shape.is_empty() {
                let value = *values.first().ok_or_else(|| EmitError::InvalidAttribute {
                    op: node.op(),
                    message: "scalar constant without elements".to_string(),
                })?;
                push(
                    prog,
                    Opcode::FloatScalarConstant,
                    vec![out],
                    vec![
                        Operand::Float(value),
                        Operand::Int(dtype.code()),
                        Operand::Int(host),
                    ],
                    debug_info,
                );
            } else {
                push(
                    prog,
                    Opcode::FloatConstant,
                    vec![out],
                    vec![
                        Operand::Floats(values),
                        Operand::Int(dtype.code()),
                        Operand::Ints(shape),
                        Operand::Int(host),
                    ],
                    debug_info,
                );
            }
        } else {
            let values: Vec<i64> = match tensor.data() {
                TensorData::Bool(v) => v.iter().map(|&x| i64::from(x)).collect(),
                TensorData::Int8(v) => v.iter().map(|&x| i64::from(x)).collect(),
                TensorData::Int16(v) => v.iter().map(|&x| i64::from(x)).collect(),
                TensorData::Int32(v) => v.iter().map(|&x| i64::from(x)).collect(),
                TensorData::Int64(v) => v.clone(),
                _ => unreachable!("integer dtype with float storage"),
            };
            if shape.is_empty() {
                let value = *values.first().ok_or_else(|| EmitError::InvalidAttribute {
                    op: node.op(),
                    message: "scalar constant without elements".to_string(),
                })?;
                push(
                    prog,
                    Opcode::IntScalarConstant,
                    vec![out],
                    vec![
                        Operand::Int(value),
                        Operand::Int(dtype.code()),
                        Operand::Int(host),
                    ],
                    debug_info,
                );
            } else {
                push(
                    prog,
                    Opcode::IntConstant,
                    vec![out],
                    vec![
                        Operand::Ints(values),
                        Operand::Int(dtype.code()),
                        Operand::Ints(shape),
                        Operand::Int(host),
                    ],
                    debug_info,
                );
            }
        }
        Ok(())
    }
}
