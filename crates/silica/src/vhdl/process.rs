use crate::hlim::node::reg;
use crate::hlim::{
    ArithmeticOp, Circuit, CompareOp, Interpretation, LogicOp, NodeKind, NodePort, RewireSource,
};
use crate::vhdl::ast::{Ast, Process, ProcessKind, RegisterConfig};
use crate::vhdl::scope::ScopeId;
use crate::vhdl::ExportError;
use std::collections::BTreeSet;

pub(crate) struct ExprCtx<'a> {
    pub ast: &'a Ast,
    pub circuit: &'a Circuit,
    pub scope: ScopeId,
    pub inputs: &'a BTreeSet<NodePort>,
    pub outputs: &'a BTreeSet<NodePort>,
    pub locals: &'a BTreeSet<NodePort>,
}

impl ExprCtx<'_> {
    fn name_of(&self, port: NodePort) -> String {
        if let NodeKind::Pin(_) = self.circuit.node(port.node).kind {
            if port.port == 0 {
                if let Some(name) = self.ast.scopes.pin_name(self.scope, port.node) {
                    return name.to_string();
                }
            }
        }
        self.ast
            .scopes
            .node_name(self.scope, port)
            .unwrap_or_else(|| panic!("no name allocated for {port}"))
            .to_string()
    }

    /// Formats the value of `port` as a right-hand-side expression, inlining
    /// unnamed intermediates and collecting every named signal the
    /// expression reads into `deps`.
    pub(crate) fn format_expression(
        &self,
        out: &mut String,
        port: Option<NodePort>,
        deps: &mut BTreeSet<NodePort>,
        force_unfold: bool,
    ) -> Result<(), ExportError> {
        let Some(port) = port else {
            out.push_str("(others => 'X')");
            return Ok(());
        };

        if !force_unfold
            && (self.inputs.contains(&port)
                || self.outputs.contains(&port)
                || self.locals.contains(&port)
                || matches!(self.circuit.node(port.node).kind, NodeKind::Pin(_)))
        {
            out.push_str(&self.name_of(port));
            deps.insert(port);
            return Ok(());
        }

        let node = self.circuit.node(port.node);
        match &node.kind {
            NodeKind::Signal => {
                self.format_expression(out, self.circuit.driver(port.node, 0), deps, false)
            }
            NodeKind::Arithmetic(op) => {
                out.push('(');
                self.format_expression(out, self.circuit.driver(port.node, 0), deps, false)?;
                out.push_str(match op {
                    ArithmeticOp::Add => " + ",
                    ArithmeticOp::Sub => " - ",
                    ArithmeticOp::Mul => " * ",
                    ArithmeticOp::Div => " / ",
                    ArithmeticOp::Rem => " MOD ",
                });
                self.format_expression(out, self.circuit.driver(port.node, 1), deps, false)?;
                out.push(')');
                Ok(())
            }
            NodeKind::Logic(op) => {
                out.push('(');
                if op.is_unary() {
                    out.push_str("not ");
                    self.format_expression(out, self.circuit.driver(port.node, 0), deps, false)?;
                } else {
                    self.format_expression(out, self.circuit.driver(port.node, 0), deps, false)?;
                    out.push_str(match op {
                        LogicOp::And => " and ",
                        LogicOp::Nand => " nand ",
                        LogicOp::Or => " or ",
                        LogicOp::Nor => " nor ",
                        LogicOp::Xor => " xor ",
                        LogicOp::Xnor => " xnor ",
                        LogicOp::Not => unreachable!("NOT is unary"),
                    });
                    self.format_expression(out, self.circuit.driver(port.node, 1), deps, false)?;
                }
                out.push(')');
                Ok(())
            }
            NodeKind::Compare(op) => {
                out.push_str("bool2stdlogic(");
                self.format_expression(out, self.circuit.driver(port.node, 0), deps, false)?;
                out.push_str(match op {
                    CompareOp::Eq => " = ",
                    CompareOp::Neq => " /= ",
                    CompareOp::Lt => " < ",
                    CompareOp::Gt => " > ",
                    CompareOp::Leq => " <= ",
                    CompareOp::Geq => " >= ",
                });
                self.format_expression(out, self.circuit.driver(port.node, 1), deps, false)?;
                out.push(')');
                Ok(())
            }
            NodeKind::Rewire(op) => {
                if let Some(bit) = op.is_bit_extract() {
                    self.format_expression(out, self.circuit.driver(port.node, 0), deps, false)?;
                    out.push_str(&format!("({bit})"));
                    return Ok(());
                }
                if op.ranges.len() > 1 {
                    out.push('(');
                }
                for (i, range) in op.ranges.iter().rev().enumerate() {
                    if i > 0 {
                        out.push_str(" & ");
                    }
                    match range.source {
                        RewireSource::Input { input, offset } => {
                            let driver = self.circuit.driver(port.node, input);
                            self.format_expression(out, driver, deps, false)?;
                            if let Some(driver) = driver {
                                let full = self.circuit.connection_type(driver).width;
                                if offset != 0 || range.subwidth != full {
                                    out.push_str(&format!(
                                        "({} downto {})",
                                        offset + range.subwidth - 1,
                                        offset
                                    ));
                                }
                            }
                        }
                        RewireSource::ConstZero => {
                            out.push('"');
                            out.push_str(&"0".repeat(range.subwidth));
                            out.push('"');
                        }
                        RewireSource::ConstOne => {
                            out.push('"');
                            out.push_str(&"1".repeat(range.subwidth));
                            out.push('"');
                        }
                    }
                }
                if op.ranges.len() > 1 {
                    out.push(')');
                }
                Ok(())
            }
            NodeKind::Constant(value) => {
                let ty = self.circuit.connection_type(port);
                let quote = if ty.interpretation == Interpretation::Bit {
                    '\''
                } else {
                    '"'
                };
                out.push(quote);
                out.push_str(&value.to_bit_string());
                out.push(quote);
                Ok(())
            }
            other => Err(ExportError::UnhandledExternal(port.node, format!("{other:?}"))),
        }
    }
}

struct Statement {
    inputs: BTreeSet<NodePort>,
    outputs: Vec<NodePort>,
    code: String,
}

pub(crate) fn write_combinational_process(
    ast: &Ast,
    circuit: &Circuit,
    process: &Process,
    out: &mut String,
    indent: usize,
) -> Result<(), ExportError> {
    let cf = &ast.formatting;
    let ctx = ExprCtx {
        ast,
        circuit,
        scope: process.scope,
        inputs: &process.inputs,
        outputs: &process.outputs,
        locals: &process.locals,
    };

    cf.indent(out, indent);
    out.push_str(&format!("{} : PROCESS(all)\n", process.name));
    for local in &process.locals {
        cf.indent(out, indent + 1);
        out.push_str(&format!("VARIABLE {} : ", ctx.name_of(*local)));
        cf.format_connection_type(out, circuit.connection_type(*local));
        out.push_str(";\n");
    }
    cf.indent(out, indent);
    out.push_str("BEGIN\n");

    let mut statements = Vec::new();
    for port in process.outputs.iter().chain(process.locals.iter()) {
        statements.push(build_statement(&ctx, cf, circuit, *port, indent)?);
    }

    // dependency-sorted emission: a statement may run once everything it
    // reads is either produced by an already emitted statement or comes
    // from outside the process
    let produced: BTreeSet<NodePort> = statements
        .iter()
        .flat_map(|statement| statement.outputs.iter().copied())
        .collect();
    let mut emitted: BTreeSet<NodePort> = BTreeSet::new();
    while !statements.is_empty() {
        let position = statements.iter().position(|statement| {
            statement
                .inputs
                .iter()
                .all(|input| emitted.contains(input) || !produced.contains(input))
        });
        let Some(position) = position else {
            return Err(ExportError::CyclicSignalDependency);
        };
        let statement = statements.swap_remove(position);
        out.push_str(&statement.code);
        emitted.extend(statement.outputs.iter().copied());
    }

    cf.indent(out, indent);
    out.push_str("END PROCESS;\n\n");
    Ok(())
}

fn build_statement(
    ctx: &ExprCtx<'_>,
    cf: &crate::vhdl::format::CodeFormatting,
    circuit: &Circuit,
    port: NodePort,
    indent: usize,
) -> Result<Statement, ExportError> {
    let mut inputs = BTreeSet::new();
    let mut code = String::new();
    let assign_op = if ctx.locals.contains(&port) { " := " } else { " <= " };
    let target = ctx.name_of(port);

    match &circuit.node(port.node).kind {
        NodeKind::Multiplexer if circuit.node(port.node).num_inputs() == 3 => {
            cf.indent(&mut code, indent + 1);
            code.push_str("IF ");
            ctx.format_expression(&mut code, circuit.driver(port.node, 0), &mut inputs, false)?;
            code.push_str(" = '1' THEN\n");
            cf.indent(&mut code, indent + 2);
            code.push_str(&target);
            code.push_str(assign_op);
            ctx.format_expression(&mut code, circuit.driver(port.node, 2), &mut inputs, false)?;
            code.push_str(";\n");
            cf.indent(&mut code, indent + 1);
            code.push_str("ELSE\n");
            cf.indent(&mut code, indent + 2);
            code.push_str(&target);
            code.push_str(assign_op);
            ctx.format_expression(&mut code, circuit.driver(port.node, 1), &mut inputs, false)?;
            code.push_str(";\n");
            cf.indent(&mut code, indent + 1);
            code.push_str("END IF;\n");
        }
        NodeKind::Multiplexer => {
            let selector = circuit
                .non_signal_driver(port.node, 0)
                .map(|driver| circuit.connection_type(driver).width)
                .unwrap_or(1);
            cf.indent(&mut code, indent + 1);
            code.push_str("CASE ");
            ctx.format_expression(&mut code, circuit.driver(port.node, 0), &mut inputs, false)?;
            code.push_str(" IS\n");
            for choice in 1..circuit.node(port.node).num_inputs() {
                cf.indent(&mut code, indent + 2);
                code.push_str("WHEN \"");
                let index = choice - 1;
                for bit in (0..selector).rev() {
                    code.push(if index >> bit & 1 != 0 { '1' } else { '0' });
                }
                code.push_str("\" => ");
                code.push_str(&target);
                code.push_str(assign_op);
                ctx.format_expression(
                    &mut code,
                    circuit.driver(port.node, choice),
                    &mut inputs,
                    false,
                )?;
                code.push_str(";\n");
            }
            cf.indent(&mut code, indent + 2);
            code.push_str("WHEN OTHERS => ");
            code.push_str(&target);
            code.push_str(assign_op);
            code.push_str(&format!(
                "\"{}\";\n",
                "X".repeat(circuit.connection_type(port).width)
            ));
            cf.indent(&mut code, indent + 1);
            code.push_str("END CASE;\n");
        }
        NodeKind::PriorityConditional => {
            let num_choices = (circuit.node(port.node).num_inputs() - 1) / 2;
            if num_choices == 0 {
                cf.indent(&mut code, indent + 1);
                code.push_str(&target);
                code.push_str(assign_op);
                ctx.format_expression(
                    &mut code,
                    circuit.driver(port.node, 0),
                    &mut inputs,
                    false,
                )?;
                code.push_str(";\n");
            } else {
                for choice in 0..num_choices {
                    cf.indent(&mut code, indent + 1);
                    code.push_str(if choice == 0 { "IF " } else { "ELSIF " });
                    ctx.format_expression(
                        &mut code,
                        circuit.driver(port.node, 1 + 2 * choice),
                        &mut inputs,
                        false,
                    )?;
                    code.push_str(" = '1' THEN\n");
                    cf.indent(&mut code, indent + 2);
                    code.push_str(&target);
                    code.push_str(assign_op);
                    ctx.format_expression(
                        &mut code,
                        circuit.driver(port.node, 2 + 2 * choice),
                        &mut inputs,
                        false,
                    )?;
                    code.push_str(";\n");
                }
                cf.indent(&mut code, indent + 1);
                code.push_str("ELSE\n");
                cf.indent(&mut code, indent + 2);
                code.push_str(&target);
                code.push_str(assign_op);
                ctx.format_expression(
                    &mut code,
                    circuit.driver(port.node, 0),
                    &mut inputs,
                    false,
                )?;
                code.push_str(";\n");
                cf.indent(&mut code, indent + 1);
                code.push_str("END IF;\n");
            }
        }
        _ => {
            cf.indent(&mut code, indent + 1);
            code.push_str(&target);
            code.push_str(assign_op);
            ctx.format_expression(&mut code, Some(port), &mut inputs, true)?;
            code.push_str(";\n");
        }
    }

    Ok(Statement {
        inputs,
        outputs: vec![port],
        code,
    })
}

pub(crate) fn write_register_process(
    ast: &Ast,
    circuit: &Circuit,
    process: &Process,
    config: &RegisterConfig,
    out: &mut String,
    indent: usize,
) -> Result<(), ExportError> {
    let cf = &ast.formatting;
    let ctx = ExprCtx {
        ast,
        circuit,
        scope: process.scope,
        inputs: &process.inputs,
        outputs: &process.outputs,
        locals: &process.locals,
    };
    let clock = circuit.clock(config.clock);
    let clock_name = ast
        .scopes
        .clock_name(process.scope, config.clock)
        .expect("clock name allocated")
        .to_string();
    let reset_name = format!("{}{}", clock_name, clock.reset_name);
    let reset_active = if clock.reset_high_active { '1' } else { '0' };
    let async_reset = config.has_reset
        && clock.reset_type == crate::clock::ResetType::Asynchronous;
    let sync_reset = config.has_reset
        && clock.reset_type == crate::clock::ResetType::Synchronous;

    cf.indent(out, indent);
    if async_reset {
        out.push_str(&format!(
            "{} : PROCESS({}, {})\n",
            process.name, clock_name, reset_name
        ));
    } else {
        out.push_str(&format!("{} : PROCESS({})\n", process.name, clock_name));
    }
    cf.indent(out, indent);
    out.push_str("BEGIN\n");

    let write_resets = |out: &mut String, depth: usize| {
        for &node in &process.nodes {
            let output = NodePort::new(node, 0);
            if let Some(reset_value) = circuit.driver(node, reg::RESET_VALUE) {
                cf.indent(out, depth);
                out.push_str(&format!(
                    "{} <= {};\n",
                    ctx.name_of(output),
                    ctx.name_of(reset_value)
                ));
            }
        }
    };

    let edge = match clock.trigger_event {
        crate::clock::TriggerEvent::Rising => format!("rising_edge({clock_name})"),
        crate::clock::TriggerEvent::Falling => format!("falling_edge({clock_name})"),
        crate::clock::TriggerEvent::RisingAndFalling => format!("{clock_name}'event"),
    };

    if async_reset {
        cf.indent(out, indent + 1);
        out.push_str(&format!("IF ({reset_name} = '{reset_active}') THEN\n"));
        write_resets(out, indent + 2);
        cf.indent(out, indent + 1);
        out.push_str(&format!("ELSIF ({edge}) THEN\n"));
    } else {
        cf.indent(out, indent + 1);
        out.push_str(&format!("IF ({edge}) THEN\n"));
    }

    let mut body_indent = indent + 2;
    if sync_reset {
        cf.indent(out, indent + 2);
        out.push_str(&format!("IF ({reset_name} = '{reset_active}') THEN\n"));
        write_resets(out, indent + 3);
        cf.indent(out, indent + 2);
        out.push_str("ELSE\n");
        body_indent = indent + 3;
    }

    for &node in &process.nodes {
        let output = NodePort::new(node, 0);
        let data = circuit.driver(node, reg::DATA);
        let data_name = match data {
            Some(data) => ctx.name_of(data),
            None => "(others => 'X')".to_string(),
        };
        if let Some(enable) = circuit.driver(node, reg::ENABLE) {
            cf.indent(out, body_indent);
            out.push_str(&format!("IF ({} = '1') THEN\n", ctx.name_of(enable)));
            cf.indent(out, body_indent + 1);
            out.push_str(&format!("{} <= {};\n", ctx.name_of(output), data_name));
            cf.indent(out, body_indent);
            out.push_str("END IF;\n");
        } else {
            cf.indent(out, body_indent);
            out.push_str(&format!("{} <= {};\n", ctx.name_of(output), data_name));
        }
    }

    if sync_reset {
        cf.indent(out, indent + 2);
        out.push_str("END IF;\n");
    }
    cf.indent(out, indent + 1);
    out.push_str("END IF;\n");
    cf.indent(out, indent);
    out.push_str("END PROCESS;\n\n");
    Ok(())
}

pub(crate) fn write_process(
    ast: &Ast,
    circuit: &Circuit,
    process: &Process,
    out: &mut String,
    indent: usize,
) -> Result<(), ExportError> {
    match &process.kind {
        ProcessKind::Combinational => {
            write_combinational_process(ast, circuit, process, out, indent)
        }
        ProcessKind::Register(config) => {
            let config = *config;
            write_register_process(ast, circuit, process, &config, out, indent)
        }
    }
}
