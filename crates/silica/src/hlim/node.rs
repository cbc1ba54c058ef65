use crate::bitvec::{BitVectorState, Plane};
use crate::clock::ClockId;
use crate::hlim::{
    Circuit, ConnectionType, GroupId, HlimError, Interpretation, NodeId, NodePort, OutputPort,
    OutputType,
};
use std::fmt;
use std::sync::Arc;

/// Register input ports.
pub mod reg {
    pub const DATA: usize = 0;
    pub const RESET_VALUE: usize = 1;
    pub const ENABLE: usize = 2;
    pub const NUM_INPUTS: usize = 3;
    /// Internal state words.
    pub const INT_DATA: usize = 0;
    pub const INT_ENABLE: usize = 1;
}

/// Memory read port inputs/outputs.
pub mod read_port {
    pub const MEMORY: usize = 0;
    pub const ENABLE: usize = 1;
    pub const ADDRESS: usize = 2;
    pub const NUM_INPUTS: usize = 3;
    pub const DATA_OUT: usize = 0;
}

/// Memory write port inputs/outputs.
pub mod write_port {
    pub const MEMORY: usize = 0;
    pub const ENABLE: usize = 1;
    pub const WR_ENABLE: usize = 2;
    pub const ADDRESS: usize = 3;
    pub const WR_DATA: usize = 4;
    pub const ORDER_AFTER: usize = 5;
    pub const NUM_INPUTS: usize = 6;
    pub const ORDER_BEFORE_OUT: usize = 0;
    /// Internal state words.
    pub const INT_DATA: usize = 0;
    pub const INT_ADDRESS: usize = 1;
    pub const INT_ENABLE: usize = 2;
    pub const INT_WR_ENABLE: usize = 3;
    pub const NUM_INTERNALS: usize = 4;
}

/// IO pin inputs.
pub mod pin {
    pub const DATA: usize = 0;
    pub const OUTPUT_ENABLE: usize = 1;
    pub const NUM_INPUTS: usize = 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Nand,
    Or,
    Nor,
    Xor,
    Xnor,
    /// Unary.
    Not,
}

impl LogicOp {
    pub fn is_unary(&self) -> bool {
        matches!(self, LogicOp::Not)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RewireSource {
    Input { input: usize, offset: usize },
    ConstZero,
    ConstOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RewireRange {
    pub subwidth: usize,
    pub source: RewireSource,
}

/// Output description of a rewire node: an ordered list of slices taken from
/// inputs or constant fills, concatenated LSB first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RewireOp {
    pub ranges: Vec<RewireRange>,
}

impl RewireOp {
    /// Pass-through of input `idx` in its entirety.
    pub fn forward(idx: usize, width: usize) -> Self {
        Self {
            ranges: vec![RewireRange {
                subwidth: width,
                source: RewireSource::Input {
                    input: idx,
                    offset: 0,
                },
            }],
        }
    }

    /// Contiguous slice `[offset, offset+width)` of input 0.
    pub fn extract(offset: usize, width: usize) -> Self {
        Self {
            ranges: vec![RewireRange {
                subwidth: width,
                source: RewireSource::Input { input: 0, offset },
            }],
        }
    }

    pub fn output_width(&self) -> usize {
        self.ranges.iter().map(|r| r.subwidth).sum()
    }

    /// The special case of a single-bit extraction from input 0, which both
    /// the namer and the VHDL emitter render as indexed access.
    pub fn is_bit_extract(&self) -> Option<usize> {
        match self.ranges.as_slice() {
            [RewireRange {
                subwidth: 1,
                source: RewireSource::Input { input: 0, offset },
            }] => Some(*offset),
            _ => None,
        }
    }
}

/// Resolution of an undriven tri-state pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PinPolicy {
    PullUp,
    PullDown,
    #[default]
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalTapLevel {
    Assert,
    Warn,
    Debug,
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalTapTrigger {
    Always,
    FirstInputHigh,
    FirstInputLow,
    FirstClock,
}

/// One piece of a signal tap's log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Text(String),
    /// Value of the given input, rendered as a bit string.
    Input(usize),
}

/// Output access handed to a signal generator's producer function.
pub struct GeneratorOutputs<'a> {
    pub(crate) state: &'a mut BitVectorState,
    pub(crate) offsets: &'a [usize],
    pub(crate) widths: &'a [usize],
}

impl GeneratorOutputs<'_> {
    pub fn num_outputs(&self) -> usize {
        self.offsets.len()
    }

    pub fn set_u64(&mut self, output: usize, value: u64) {
        let (offset, width) = (self.offsets[output], self.widths[output]);
        self.state.set_u64(Plane::Value, offset, width, value);
        self.state.set_range(Plane::Defined, offset, width);
    }

    pub fn set_undefined(&mut self, output: usize) {
        let (offset, width) = (self.offsets[output], self.widths[output]);
        self.state.clear_range(Plane::Defined, offset, width);
    }

    pub fn set(&mut self, output: usize, value: &BitVectorState) {
        let (offset, width) = (self.offsets[output], self.widths[output]);
        self.state.copy_range_from(offset, value, 0, width.min(value.len()));
    }
}

/// Tick function of a signal generator; receives the output writer and the
/// tick index (0 at reset).
#[derive(Clone)]
pub struct SignalProducer(pub Arc<dyn Fn(&mut GeneratorOutputs<'_>, u64) + Send + Sync>);

impl fmt::Debug for SignalProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignalProducer(..)")
    }
}

/// The closed set of primitive node kinds. Adding a kind is a compile-time
/// breaking change for every exhaustive match in the crate.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Constant(BitVectorState),
    Signal,
    Arithmetic(ArithmeticOp),
    Compare(CompareOp),
    Logic(LogicOp),
    Multiplexer,
    PriorityConditional,
    Register,
    Rewire(RewireOp),
    Pin(PinPolicy),
    Memory {
        word_width: usize,
        num_words: usize,
        power_on: BitVectorState,
    },
    MemReadPort {
        width: usize,
    },
    MemWritePort {
        width: usize,
    },
    SignalTap {
        level: SignalTapLevel,
        trigger: SignalTapTrigger,
        message: Vec<MessagePart>,
    },
    SignalGenerator(SignalProducer),
}

/// A circuit node: a kind tag plus input bindings, typed outputs with their
/// fan-out, clock slots and bookkeeping metadata. All cross references are
/// non-owning handles into the circuit.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub(crate) inputs: Vec<Option<NodePort>>,
    pub(crate) outputs: Vec<OutputPort>,
    pub(crate) clocks: Vec<Option<ClockId>>,
    pub name: String,
    pub comment: String,
    pub(crate) group: Option<GroupId>,
    pub(crate) trace: Option<String>,
    pub(crate) id: NodeId,
}

impl Node {
    pub(crate) fn new(
        kind: NodeKind,
        num_inputs: usize,
        outputs: Vec<OutputPort>,
        num_clocks: usize,
    ) -> Self {
        Self {
            kind,
            inputs: vec![None; num_inputs],
            outputs,
            clocks: vec![None; num_clocks],
            name: String::new(),
            comment: String::new(),
            group: None,
            trace: None,
            id: NodeId(usize::MAX),
        }
    }

    /// Unconnected clone used by subnet copies: same kind, port shapes and
    /// types, no bindings.
    pub(crate) fn new_like(template: &Node) -> Self {
        let outputs = template
            .outputs
            .iter()
            .map(|out| OutputPort::new(out.connection_type.clone(), out.output_type))
            .collect();
        let mut node = Self::new(
            template.kind.clone(),
            template.inputs.len(),
            outputs,
            template.clocks.len(),
        );
        node.trace = template.trace.clone();
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn num_clock_slots(&self) -> usize {
        self.clocks.len()
    }

    pub fn clock(&self, slot: usize) -> Option<ClockId> {
        self.clocks[slot]
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub fn connection_type(&self, output: usize) -> &ConnectionType {
        &self.outputs[output].connection_type
    }

    pub fn output_type(&self, output: usize) -> OutputType {
        self.outputs[output].output_type
    }

    /// Captures the current backtrace as the node's construction record.
    pub fn record_trace(&mut self) {
        self.trace = Some(std::backtrace::Backtrace::force_capture().to_string());
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    /// No connected input and no consumer on any output.
    pub fn is_orphaned(&self) -> bool {
        self.inputs.iter().all(|input| input.is_none())
            && self.outputs.iter().all(|out| out.consumers.is_empty())
    }

    /// True iff dead-code elimination must keep the node. Latched outputs,
    /// pins and signal taps always qualify; a write port qualifies once it
    /// is bound to a memory.
    pub fn has_side_effects(&self) -> bool {
        match &self.kind {
            NodeKind::Pin(_) | NodeKind::SignalTap { .. } => true,
            NodeKind::MemWritePort { .. } => self.inputs[write_port::MEMORY].is_some(),
            NodeKind::Memory { .. } => false,
            _ => self
                .outputs
                .iter()
                .any(|out| out.output_type == OutputType::Latched),
        }
    }

    pub fn is_combinational(&self) -> bool {
        self.clocks.iter().all(|clock| clock.is_none())
    }

    /// Word sizes of the internal simulation state this node needs.
    pub fn internal_state_sizes(&self) -> Vec<usize> {
        match &self.kind {
            NodeKind::Register => vec![self.outputs[0].connection_type.width, 1],
            NodeKind::Memory {
                word_width,
                num_words,
                ..
            } => vec![word_width * num_words],
            NodeKind::MemWritePort { width } => vec![*width, 64, 1, 1],
            NodeKind::SignalTap { .. } => vec![1],
            NodeKind::SignalGenerator(_) => vec![64],
            _ => Vec::new(),
        }
    }

    /// Input whose driver's internal state this node reads and writes during
    /// simulation (the backing memory of a memory port).
    pub fn referenced_internal_input(&self) -> Option<usize> {
        match &self.kind {
            NodeKind::MemReadPort { .. } => Some(read_port::MEMORY),
            NodeKind::MemWritePort { .. } => Some(write_port::MEMORY),
            _ => None,
        }
    }

    pub(crate) fn input_is_dependency(&self, input: usize) -> bool {
        match &self.kind {
            NodeKind::MemReadPort { .. } => input == read_port::MEMORY,
            NodeKind::MemWritePort { .. } => {
                input == write_port::MEMORY || input == write_port::ORDER_AFTER
            }
            _ => false,
        }
    }

    /// Output whose connection type follows the type of the given input.
    pub(crate) fn followed_output(&self, input: usize) -> Option<usize> {
        match &self.kind {
            NodeKind::Signal => Some(0),
            NodeKind::Arithmetic(_) => Some(0),
            NodeKind::Logic(_) => Some(0),
            NodeKind::Multiplexer if input >= 1 => Some(0),
            NodeKind::PriorityConditional if input == 0 || (input >= 2 && input % 2 == 0) => {
                Some(0)
            }
            NodeKind::Register if input == reg::DATA || input == reg::RESET_VALUE => Some(0),
            _ => None,
        }
    }

    /// Per-kind admission rule for a producer's connection type.
    pub(crate) fn input_accepts(
        &self,
        circuit: &Circuit,
        input: usize,
        ty: &ConnectionType,
    ) -> Result<(), HlimError> {
        let reject = |message: String| {
            Err(HlimError::TypeMismatch {
                node: self.id,
                input,
                message,
            })
        };

        if self.input_is_dependency(input) != ty.is_dependency() {
            return reject(if ty.is_dependency() {
                "dependency output driving a data input".to_string()
            } else {
                "data output driving a dependency input".to_string()
            });
        }
        if ty.is_dependency() {
            return Ok(());
        }

        let other_width = |skip: usize| -> Option<usize> {
            self.inputs
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .filter_map(|(_, binding)| *binding)
                .map(|driver| circuit.connection_type(driver).width)
                .next()
        };

        match &self.kind {
            NodeKind::Constant(_) | NodeKind::Memory { .. } | NodeKind::SignalGenerator(_) => {
                reject("node has no inputs".to_string())
            }
            NodeKind::Signal | NodeKind::Rewire(_) => Ok(()),
            NodeKind::Arithmetic(_) | NodeKind::Logic(_) | NodeKind::Compare(_) => {
                match other_width(input) {
                    Some(w) if w != ty.width => {
                        reject(format!("operand widths differ: {w} vs {}", ty.width))
                    }
                    _ => Ok(()),
                }
            }
            NodeKind::Multiplexer => {
                if input == 0 {
                    if ty.width == 0 {
                        reject("selector must carry at least one bit".to_string())
                    } else {
                        Ok(())
                    }
                } else {
                    let conflicting = self
                        .inputs
                        .iter()
                        .enumerate()
                        .skip(1)
                        .filter(|(i, _)| *i != input)
                        .filter_map(|(_, binding)| *binding)
                        .any(|driver| circuit.connection_type(driver) != ty);
                    if conflicting {
                        reject("data paths of a multiplexer must have identical types".to_string())
                    } else {
                        Ok(())
                    }
                }
            }
            NodeKind::PriorityConditional => {
                if input >= 1 && input % 2 == 1 {
                    if ty.interpretation != Interpretation::Bit || ty.width != 1 {
                        reject("condition must be a single bit".to_string())
                    } else {
                        Ok(())
                    }
                } else {
                    let conflicting = self
                        .inputs
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != input && (*i == 0 || (*i >= 2 && *i % 2 == 0)))
                        .filter_map(|(_, binding)| *binding)
                        .any(|driver| circuit.connection_type(driver) != ty);
                    if conflicting {
                        reject("choice values must have identical types".to_string())
                    } else {
                        Ok(())
                    }
                }
            }
            NodeKind::Register => match input {
                reg::DATA | reg::RESET_VALUE => {
                    let sibling = if input == reg::DATA {
                        reg::RESET_VALUE
                    } else {
                        reg::DATA
                    };
                    match self.inputs[sibling]
                        .map(|driver| circuit.connection_type(driver).clone())
                    {
                        Some(other) if other != *ty => {
                            reject("data and reset value must have identical types".to_string())
                        }
                        _ => Ok(()),
                    }
                }
                reg::ENABLE => {
                    if ty.width != 1 {
                        reject("enable must be a single bit".to_string())
                    } else {
                        Ok(())
                    }
                }
                _ => reject("register has no such input".to_string()),
            },
            NodeKind::Pin(_) => match input {
                pin::DATA => {
                    let own = &self.outputs[0].connection_type;
                    if own.width != 0 && own != ty {
                        reject("pin driver must match the pin's connection type".to_string())
                    } else {
                        Ok(())
                    }
                }
                pin::OUTPUT_ENABLE => {
                    if ty.width != 1 {
                        reject("output enable must be a single bit".to_string())
                    } else {
                        Ok(())
                    }
                }
                _ => reject("pin has no such input".to_string()),
            },
            NodeKind::MemReadPort { .. } => match input {
                read_port::ENABLE => {
                    if ty.width != 1 {
                        reject("enable must be a single bit".to_string())
                    } else {
                        Ok(())
                    }
                }
                read_port::ADDRESS => {
                    if ty.width == 0 || ty.width > 64 {
                        reject("address must be 1..=64 bits".to_string())
                    } else {
                        Ok(())
                    }
                }
                _ => Ok(()),
            },
            NodeKind::MemWritePort { width } => match input {
                write_port::ENABLE | write_port::WR_ENABLE => {
                    if ty.width != 1 {
                        reject("enable must be a single bit".to_string())
                    } else {
                        Ok(())
                    }
                }
                write_port::ADDRESS => {
                    if ty.width == 0 || ty.width > 64 {
                        reject("address must be 1..=64 bits".to_string())
                    } else {
                        Ok(())
                    }
                }
                write_port::WR_DATA => {
                    if ty.width != *width {
                        reject(format!(
                            "write data width {} does not match port width {width}",
                            ty.width
                        ))
                    } else {
                        Ok(())
                    }
                }
                _ => Ok(()),
            },
            NodeKind::SignalTap { .. } => {
                if input == 0 && ty.width != 1 {
                    reject("tap trigger must be a single bit".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn type_name(&self) -> String {
        match &self.kind {
            NodeKind::Constant(value) => value.to_bit_string(),
            NodeKind::Signal => "Signal".to_string(),
            NodeKind::Arithmetic(op) => format!("{op:?}"),
            NodeKind::Compare(op) => format!("{op:?}"),
            NodeKind::Logic(op) => format!("{op:?}"),
            NodeKind::Multiplexer => "mux".to_string(),
            NodeKind::PriorityConditional => "PrioConditional".to_string(),
            NodeKind::Register => "Register".to_string(),
            NodeKind::Rewire(op) => match op.is_bit_extract() {
                Some(bit) => format!("bit {bit}"),
                None => "Rewire".to_string(),
            },
            NodeKind::Pin(_) => "ioPin".to_string(),
            NodeKind::Memory { .. } => "memory".to_string(),
            NodeKind::MemReadPort { .. } => "mem_read_port".to_string(),
            NodeKind::MemWritePort { .. } => "mem_write_port".to_string(),
            NodeKind::SignalTap { .. } => "SignalTap".to_string(),
            NodeKind::SignalGenerator(_) => "SignalGenerator".to_string(),
        }
    }

    pub fn input_name(&self, input: usize) -> String {
        match &self.kind {
            NodeKind::Register => match input {
                reg::DATA => "data_in".to_string(),
                reg::RESET_VALUE => "reset_value".to_string(),
                reg::ENABLE => "enable".to_string(),
                _ => "invalid".to_string(),
            },
            NodeKind::Multiplexer => {
                if input == 0 {
                    "select".to_string()
                } else {
                    format!("in_{}", input - 1)
                }
            }
            NodeKind::PriorityConditional => {
                if input == 0 {
                    "default".to_string()
                } else if input % 2 == 1 {
                    format!("condition_{}", (input - 1) / 2)
                } else {
                    format!("value_{}", (input - 1) / 2)
                }
            }
            NodeKind::Pin(_) => match input {
                pin::DATA => "in".to_string(),
                _ => "output_enable".to_string(),
            },
            NodeKind::MemReadPort { .. } => match input {
                read_port::MEMORY => "memory".to_string(),
                read_port::ENABLE => "enable".to_string(),
                read_port::ADDRESS => "addr".to_string(),
                _ => "invalid".to_string(),
            },
            NodeKind::MemWritePort { .. } => match input {
                write_port::MEMORY => "memory".to_string(),
                write_port::ENABLE => "enable".to_string(),
                write_port::WR_ENABLE => "wrEnable".to_string(),
                write_port::ADDRESS => "addr".to_string(),
                write_port::WR_DATA => "wrData".to_string(),
                write_port::ORDER_AFTER => "orderAfter".to_string(),
                _ => "invalid".to_string(),
            },
            _ => format!("in_{input}"),
        }
    }

    pub fn output_name(&self, output: usize) -> String {
        match &self.kind {
            NodeKind::Register => "data_out".to_string(),
            NodeKind::Memory { .. } => "memory_ports".to_string(),
            NodeKind::MemReadPort { .. } => "data".to_string(),
            NodeKind::MemWritePort { .. } => "orderBefore".to_string(),
            NodeKind::Pin(_) => "out".to_string(),
            _ => format!("out_{output}"),
        }
    }
}
