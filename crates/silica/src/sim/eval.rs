use crate::bitvec::{BitVectorState, Plane};
use crate::hlim::node::{read_port, reg, write_port, GeneratorOutputs};
use crate::hlim::{
    ArithmeticOp, Circuit, CompareOp, LogicOp, MessagePart, NodeId, NodeKind, PinPolicy,
    RewireSource, SignalTapLevel, SignalTapTrigger,
};
use num_bigint::BigUint;
use num_traits::Zero;

/// Sentinel offset of an unconnected input.
pub(crate) const UNCONNECTED: usize = usize::MAX;

/// Sink for messages produced during evaluation (signal taps).
pub(crate) trait EvalDiagnostics {
    fn message(&mut self, node: NodeId, level: SignalTapLevel, text: &str);
}

/// Diagnostics sink used where tap output is irrelevant, e.g. constant
/// propagation.
pub(crate) struct IgnoreDiagnostics;

impl EvalDiagnostics for IgnoreDiagnostics {
    fn message(&mut self, _node: NodeId, _level: SignalTapLevel, _text: &str) {}
}

fn read_big(state: &BitVectorState, offset: usize, width: usize) -> BigUint {
    let mut bytes = Vec::with_capacity(width.div_ceil(8));
    let mut pos = 0;
    while pos < width {
        let chunk = (width - pos).min(64);
        bytes.extend_from_slice(&state.get_u64(Plane::Value, offset + pos, chunk).to_le_bytes());
        pos += 64;
    }
    BigUint::from_bytes_le(&bytes)
}

fn write_big(state: &mut BitVectorState, offset: usize, width: usize, value: &BigUint) {
    let bytes = value.to_bytes_le();
    let mut pos = 0;
    while pos < width {
        let chunk = (width - pos).min(64);
        let mut word = [0u8; 8];
        for (i, slot) in word.iter_mut().enumerate() {
            if let Some(byte) = bytes.get(pos / 8 + i) {
                *slot = *byte;
            }
        }
        state.set_u64(Plane::Value, offset + pos, chunk, u64::from_le_bytes(word));
        pos += 64;
    }
}

fn output_undefined(state: &mut BitVectorState, offset: usize, width: usize) {
    state.clear_range(Plane::Defined, offset, width);
}

fn input_fully_defined(state: &BitVectorState, offset: usize, width: usize) -> bool {
    offset != UNCONNECTED && state.all_defined(offset, width)
}

/// Writes a node's reset-time output state. Only nodes with constant or
/// latched outputs appear on the reset list.
pub(crate) fn reset_node(
    circuit: &Circuit,
    node: NodeId,
    state: &mut BitVectorState,
    internal: &[usize],
    outputs: &[usize],
) {
    match &circuit.node(node).kind {
        NodeKind::Constant(value) => {
            state.insert(outputs[0], value);
        }
        NodeKind::Register => {
            let width = circuit.node(node).connection_type(0).width;
            match circuit.non_signal_driver(node, reg::RESET_VALUE) {
                Some(driver) => match &circuit.node(driver.node).kind {
                    NodeKind::Constant(value) => state.insert(outputs[0], value),
                    _ => output_undefined(state, outputs[0], width),
                },
                None => {
                    output_undefined(state, internal[reg::INT_DATA], width);
                    output_undefined(state, outputs[0], width);
                }
            }
        }
        NodeKind::Pin(policy) => {
            let width = circuit.node(node).connection_type(0).width;
            match policy {
                PinPolicy::PullUp => {
                    state.set_range(Plane::Value, outputs[0], width);
                    state.set_range(Plane::Defined, outputs[0], width);
                }
                PinPolicy::PullDown => {
                    state.clear_range(Plane::Value, outputs[0], width);
                    state.set_range(Plane::Defined, outputs[0], width);
                }
                PinPolicy::Undefined => output_undefined(state, outputs[0], width),
            }
        }
        NodeKind::Memory { power_on, .. } => {
            state.insert(internal[0], power_on);
        }
        NodeKind::SignalGenerator(producer) => {
            state.set_u64(Plane::Value, internal[0], 64, 0);
            state.set_range(Plane::Defined, internal[0], 64);
            run_generator(circuit, node, producer.clone(), state, outputs, 0);
        }
        _ => {}
    }
}

fn run_generator(
    circuit: &Circuit,
    node: NodeId,
    producer: crate::hlim::SignalProducer,
    state: &mut BitVectorState,
    outputs: &[usize],
    tick: u64,
) {
    let widths: Vec<usize> = (0..circuit.node(node).num_outputs())
        .map(|port| circuit.node(node).connection_type(port).width)
        .collect();
    let mut writer = GeneratorOutputs {
        state,
        offsets: outputs,
        widths: &widths,
    };
    (producer.0)(&mut writer, tick);
}

/// One combinational evaluation of a node. For each output bit the result is
/// undefined whenever the bit depends on an undefined input bit under the
/// operation's semantics.
pub(crate) fn evaluate_node(
    circuit: &Circuit,
    node: NodeId,
    state: &mut BitVectorState,
    internal: &[usize],
    inputs: &[usize],
    outputs: &[usize],
    diag: &mut dyn EvalDiagnostics,
) {
    match &circuit.node(node).kind {
        NodeKind::Constant(_)
        | NodeKind::Signal
        | NodeKind::Pin(_)
        | NodeKind::Memory { .. }
        | NodeKind::SignalGenerator(_) => {}

        NodeKind::Arithmetic(op) => {
            let width = circuit.node(node).connection_type(0).width;
            if !input_fully_defined(state, inputs[0], width)
                || !input_fully_defined(state, inputs[1], width)
            {
                output_undefined(state, outputs[0], width);
                return;
            }
            if width <= 64 {
                let a = state.get_u64(Plane::Value, inputs[0], width);
                let b = state.get_u64(Plane::Value, inputs[1], width);
                let result = match op {
                    ArithmeticOp::Add => a.wrapping_add(b),
                    ArithmeticOp::Sub => a.wrapping_sub(b),
                    ArithmeticOp::Mul => a.wrapping_mul(b),
                    ArithmeticOp::Div | ArithmeticOp::Rem => {
                        if b == 0 {
                            output_undefined(state, outputs[0], width);
                            return;
                        }
                        if matches!(op, ArithmeticOp::Div) {
                            a / b
                        } else {
                            a % b
                        }
                    }
                };
                state.set_u64(Plane::Value, outputs[0], width, result);
            } else {
                let a = read_big(state, inputs[0], width);
                let b = read_big(state, inputs[1], width);
                let modulus = BigUint::from(1u8) << width;
                let result = match op {
                    ArithmeticOp::Add => a + b,
                    ArithmeticOp::Sub => a + modulus - b,
                    ArithmeticOp::Mul => a * b,
                    ArithmeticOp::Div | ArithmeticOp::Rem => {
                        if b.is_zero() {
                            output_undefined(state, outputs[0], width);
                            return;
                        }
                        if matches!(op, ArithmeticOp::Div) {
                            a / b
                        } else {
                            a % b
                        }
                    }
                };
                write_big(state, outputs[0], width, &result);
            }
            state.set_range(Plane::Defined, outputs[0], width);
        }

        NodeKind::Compare(op) => {
            let width = match circuit.non_signal_driver(node, 0) {
                Some(driver) => circuit.connection_type(driver).width,
                None => {
                    output_undefined(state, outputs[0], 1);
                    return;
                }
            };
            if !input_fully_defined(state, inputs[0], width)
                || !input_fully_defined(state, inputs[1], width)
            {
                output_undefined(state, outputs[0], 1);
                return;
            }
            let a = read_big(state, inputs[0], width);
            let b = read_big(state, inputs[1], width);
            let result = match op {
                CompareOp::Eq => a == b,
                CompareOp::Neq => a != b,
                CompareOp::Lt => a < b,
                CompareOp::Gt => a > b,
                CompareOp::Leq => a <= b,
                CompareOp::Geq => a >= b,
            };
            state.set_bit_to(Plane::Value, outputs[0], result);
            state.set_bit(Plane::Defined, outputs[0]);
        }

        NodeKind::Logic(op) => {
            let width = circuit.node(node).connection_type(0).width;
            let mut pos = 0;
            while pos < width {
                let chunk = (width - pos).min(64);
                let (va, da) = if inputs[0] == UNCONNECTED {
                    (0, 0)
                } else {
                    (
                        state.get_u64(Plane::Value, inputs[0] + pos, chunk),
                        state.get_u64(Plane::Defined, inputs[0] + pos, chunk),
                    )
                };
                let (value, defined) = if op.is_unary() {
                    (!va, da)
                } else {
                    let (vb, db) = if inputs[1] == UNCONNECTED {
                        (0, 0)
                    } else {
                        (
                            state.get_u64(Plane::Value, inputs[1] + pos, chunk),
                            state.get_u64(Plane::Defined, inputs[1] + pos, chunk),
                        )
                    };
                    match op {
                        LogicOp::And => (va & vb, da & db | da & !va | db & !vb),
                        LogicOp::Nand => (!(va & vb), da & db | da & !va | db & !vb),
                        LogicOp::Or => (va | vb, da & db | da & va | db & vb),
                        LogicOp::Nor => (!(va | vb), da & db | da & va | db & vb),
                        LogicOp::Xor => (va ^ vb, da & db),
                        LogicOp::Xnor => (!(va ^ vb), da & db),
                        LogicOp::Not => unreachable!("NOT is unary"),
                    }
                };
                state.set_u64(Plane::Value, outputs[0] + pos, chunk, value);
                state.set_u64(Plane::Defined, outputs[0] + pos, chunk, defined);
                pos += chunk;
            }
        }

        NodeKind::Multiplexer => {
            let width = circuit.node(node).connection_type(0).width;
            let selector_width = match circuit.non_signal_driver(node, 0) {
                Some(driver) => circuit.connection_type(driver).width,
                None => {
                    output_undefined(state, outputs[0], width);
                    return;
                }
            };
            debug_assert!(selector_width <= 64, "selector wider than 64 bits");
            if !input_fully_defined(state, inputs[0], selector_width) {
                output_undefined(state, outputs[0], width);
                return;
            }
            let selector = state.get_u64(Plane::Value, inputs[0], selector_width) as usize;
            if selector >= circuit.node(node).num_inputs() - 1 {
                output_undefined(state, outputs[0], width);
                return;
            }
            if inputs[1 + selector] != UNCONNECTED {
                state.copy_range_within(outputs[0], inputs[1 + selector], width);
            } else {
                output_undefined(state, outputs[0], width);
            }
        }

        NodeKind::PriorityConditional => {
            let width = circuit.node(node).connection_type(0).width;
            let num_choices = (circuit.node(node).num_inputs() - 1) / 2;
            for choice in 0..num_choices {
                let condition_input = inputs[1 + 2 * choice];
                if condition_input == UNCONNECTED
                    || !state.get(Plane::Defined, condition_input)
                {
                    output_undefined(state, outputs[0], width);
                    return;
                }
                if state.get(Plane::Value, condition_input) {
                    let value_input = inputs[2 + 2 * choice];
                    if value_input != UNCONNECTED {
                        state.copy_range_within(outputs[0], value_input, width);
                    } else {
                        output_undefined(state, outputs[0], width);
                    }
                    return;
                }
            }
            if inputs[0] != UNCONNECTED {
                state.copy_range_within(outputs[0], inputs[0], width);
            } else {
                output_undefined(state, outputs[0], width);
            }
        }

        NodeKind::Register => {
            let width = circuit.node(node).connection_type(0).width;
            if inputs[reg::DATA] == UNCONNECTED {
                output_undefined(state, internal[reg::INT_DATA], width);
            } else {
                state.copy_range_within(internal[reg::INT_DATA], inputs[reg::DATA], width);
            }
            if inputs[reg::ENABLE] == UNCONNECTED {
                state.set_bit(Plane::Value, internal[reg::INT_ENABLE]);
                state.set_bit(Plane::Defined, internal[reg::INT_ENABLE]);
            } else {
                state.copy_range_within(internal[reg::INT_ENABLE], inputs[reg::ENABLE], 1);
            }
        }

        NodeKind::Rewire(op) => {
            let mut output_offset = outputs[0];
            for range in &op.ranges {
                match range.source {
                    RewireSource::Input { input, offset } => {
                        if inputs[input] == UNCONNECTED {
                            output_undefined(state, output_offset, range.subwidth);
                        } else {
                            state.copy_range_within(
                                output_offset,
                                inputs[input] + offset,
                                range.subwidth,
                            );
                        }
                    }
                    RewireSource::ConstZero | RewireSource::ConstOne => {
                        let bit = matches!(range.source, RewireSource::ConstOne);
                        state.fill_range(Plane::Value, output_offset, range.subwidth, bit);
                        state.set_range(Plane::Defined, output_offset, range.subwidth);
                    }
                }
                output_offset += range.subwidth;
            }
        }

        NodeKind::MemReadPort { width } => {
            let width = *width;
            let memory = circuit
                .non_signal_driver(node, read_port::MEMORY)
                .map(|driver| driver.node);
            let Some(memory) = memory else {
                output_undefined(state, outputs[0], width);
                return;
            };
            let num_words = match circuit.node(memory).kind {
                NodeKind::Memory { num_words, .. } => num_words,
                _ => 0,
            };
            let memory_offset = internal[0];
            if memory_offset == UNCONNECTED {
                output_undefined(state, outputs[0], width);
                return;
            }

            if inputs[read_port::ENABLE] != UNCONNECTED {
                if !state.get(Plane::Defined, inputs[read_port::ENABLE])
                    || !state.get(Plane::Value, inputs[read_port::ENABLE])
                {
                    output_undefined(state, outputs[0], width);
                    return;
                }
            }
            let address_width = match circuit.non_signal_driver(node, read_port::ADDRESS) {
                Some(driver) => circuit.connection_type(driver).width,
                None => {
                    output_undefined(state, outputs[0], width);
                    return;
                }
            };
            if !input_fully_defined(state, inputs[read_port::ADDRESS], address_width) {
                output_undefined(state, outputs[0], width);
                return;
            }
            let address =
                state.get_u64(Plane::Value, inputs[read_port::ADDRESS], address_width) as usize;
            if address >= num_words {
                output_undefined(state, outputs[0], width);
                return;
            }
            state.copy_range_within(outputs[0], memory_offset + address * width, width);
        }

        NodeKind::MemWritePort { width } => {
            let width = *width;
            if inputs[write_port::WR_DATA] == UNCONNECTED {
                output_undefined(state, internal[write_port::INT_DATA], width);
            } else {
                state.copy_range_within(
                    internal[write_port::INT_DATA],
                    inputs[write_port::WR_DATA],
                    width,
                );
            }
            let address_width = address_width(circuit, node);
            if inputs[write_port::ADDRESS] == UNCONNECTED || address_width == 0 {
                output_undefined(state, internal[write_port::INT_ADDRESS], 64);
            } else {
                state.copy_range_within(
                    internal[write_port::INT_ADDRESS],
                    inputs[write_port::ADDRESS],
                    address_width,
                );
                state.set_range(
                    Plane::Defined,
                    internal[write_port::INT_ADDRESS] + address_width,
                    64 - address_width,
                );
                state.clear_range(
                    Plane::Value,
                    internal[write_port::INT_ADDRESS] + address_width,
                    64 - address_width,
                );
            }
            for (int_idx, input) in [
                (write_port::INT_ENABLE, write_port::ENABLE),
                (write_port::INT_WR_ENABLE, write_port::WR_ENABLE),
            ] {
                if inputs[input] == UNCONNECTED {
                    state.set_bit(Plane::Value, internal[int_idx]);
                    state.set_bit(Plane::Defined, internal[int_idx]);
                } else {
                    state.copy_range_within(internal[int_idx], inputs[input], 1);
                }
            }
        }

        NodeKind::SignalTap {
            level,
            trigger,
            message,
        } => {
            let fires = match trigger {
                SignalTapTrigger::Always => true,
                SignalTapTrigger::FirstInputHigh | SignalTapTrigger::FirstInputLow => {
                    let already = state.get(Plane::Value, internal[0]);
                    if already || inputs[0] == UNCONNECTED {
                        false
                    } else if !state.get(Plane::Defined, inputs[0]) {
                        false
                    } else {
                        let high = state.get(Plane::Value, inputs[0]);
                        matches!(trigger, SignalTapTrigger::FirstInputHigh) == high
                    }
                }
                SignalTapTrigger::FirstClock => !state.get(Plane::Value, internal[0]),
            };
            if !fires {
                return;
            }
            if !matches!(trigger, SignalTapTrigger::Always) {
                state.set_bit(Plane::Value, internal[0]);
            }
            let mut text = String::new();
            for part in message {
                match part {
                    MessagePart::Text(s) => text.push_str(s),
                    MessagePart::Input(input) => {
                        if inputs[*input] == UNCONNECTED {
                            text.push('X');
                        } else {
                            let width = circuit
                                .non_signal_driver(node, *input)
                                .map(|driver| circuit.connection_type(driver).width)
                                .unwrap_or(0);
                            text.push_str(
                                &state.extract(inputs[*input], width).to_bit_string(),
                            );
                        }
                    }
                }
            }
            diag.message(node, *level, &text);
        }
    }
}

/// Advances a latched node on a matching edge of the clock bound to
/// `clock_port`.
pub(crate) fn advance_node(
    circuit: &Circuit,
    node: NodeId,
    state: &mut BitVectorState,
    internal: &[usize],
    outputs: &[usize],
    clock_port: usize,
) {
    match &circuit.node(node).kind {
        NodeKind::Register => {
            debug_assert_eq!(clock_port, 0);
            let width = circuit.node(node).connection_type(0).width;
            let enable_defined = state.get(Plane::Defined, internal[reg::INT_ENABLE]);
            let enable = state.get(Plane::Value, internal[reg::INT_ENABLE]);
            if !enable_defined {
                output_undefined(state, outputs[0], width);
            } else if enable {
                state.copy_range_within(outputs[0], internal[reg::INT_DATA], width);
            }
        }

        NodeKind::MemWritePort { width } => {
            let width = *width;
            let Some(memory) = circuit
                .non_signal_driver(node, write_port::MEMORY)
                .map(|driver| driver.node)
            else {
                return;
            };
            let (word_width, num_words) = match circuit.node(memory).kind {
                NodeKind::Memory {
                    word_width,
                    num_words,
                    ..
                } => (word_width, num_words),
                _ => return,
            };
            debug_assert_eq!(word_width, width);
            let memory_offset = internal[write_port::NUM_INTERNALS];
            if memory_offset == UNCONNECTED {
                return;
            }

            let enable_defined = state.get(Plane::Defined, internal[write_port::INT_ENABLE]);
            let enable = state.get(Plane::Value, internal[write_port::INT_ENABLE]);
            let wr_defined = state.get(Plane::Defined, internal[write_port::INT_WR_ENABLE]);
            let wr = state.get(Plane::Value, internal[write_port::INT_WR_ENABLE]);

            let control_defined = enable_defined && wr_defined;
            if control_defined && (!enable || !wr) {
                return;
            }

            if !state.all_defined(internal[write_port::INT_ADDRESS], 64) {
                // a possibly active write to an unknown address taints the
                // entire memory
                output_undefined(state, memory_offset, word_width * num_words);
                return;
            }
            let address = state.get_u64(Plane::Value, internal[write_port::INT_ADDRESS], 64) as usize;
            if address >= num_words {
                return;
            }
            if !control_defined {
                output_undefined(state, memory_offset + address * width, width);
            } else {
                state.copy_range_within(
                    memory_offset + address * width,
                    internal[write_port::INT_DATA],
                    width,
                );
            }
        }

        NodeKind::SignalGenerator(producer) => {
            let tick = state.get_u64(Plane::Value, internal[0], 64) + 1;
            state.set_u64(Plane::Value, internal[0], 64, tick);
            run_generator(circuit, node, producer.clone(), state, outputs, tick);
        }

        _ => {}
    }
}

fn address_width(circuit: &Circuit, node: NodeId) -> usize {
    circuit
        .non_signal_driver(node, write_port::ADDRESS)
        .map(|driver| circuit.connection_type(driver).width)
        .unwrap_or(0)
}
