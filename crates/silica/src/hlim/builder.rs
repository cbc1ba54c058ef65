use crate::bitvec::BitVectorState;
use crate::clock::ClockId;
use crate::hlim::node::{self, Node, NodeKind, SignalProducer};
use crate::hlim::{
    ArithmeticOp, CompareOp, ConnectionType, Circuit, HlimError, LogicOp, MessagePart, NodeId,
    NodePort, OutputPort, OutputType, PinPolicy, RewireOp, SignalTapLevel, SignalTapTrigger,
};
use std::sync::Arc;

/// Creation methods, one per primitive of the catalog. Creation itself never
/// fails; only connecting can.
impl Circuit {
    pub fn add_constant(&mut self, value: BitVectorState, ty: ConnectionType) -> NodeId {
        assert_eq!(value.len(), ty.width, "constant value must match its type width");
        self.add_node(Node::new(
            NodeKind::Constant(value),
            0,
            vec![OutputPort::new(ty, OutputType::Constant)],
            0,
        ))
    }

    pub fn add_constant_u64(&mut self, value: u64, width: usize) -> NodeId {
        self.add_constant(
            BitVectorState::from_u64(value, width),
            ConnectionType::bitvec(width),
        )
    }

    pub fn add_signal(&mut self, ty: ConnectionType) -> NodeId {
        self.add_node(Node::new(
            NodeKind::Signal,
            1,
            vec![OutputPort::new(ty, OutputType::Immediate)],
            0,
        ))
    }

    pub fn add_named_signal(&mut self, ty: ConnectionType, name: &str) -> NodeId {
        let id = self.add_signal(ty);
        self.node_mut(id).name = name.to_string();
        id
    }

    pub fn add_arithmetic(&mut self, op: ArithmeticOp) -> NodeId {
        self.add_node(Node::new(
            NodeKind::Arithmetic(op),
            2,
            vec![OutputPort::new(ConnectionType::bitvec(0), OutputType::Immediate)],
            0,
        ))
    }

    pub fn add_compare(&mut self, op: CompareOp) -> NodeId {
        self.add_node(Node::new(
            NodeKind::Compare(op),
            2,
            vec![OutputPort::new(ConnectionType::bit(), OutputType::Immediate)],
            0,
        ))
    }

    pub fn add_logic(&mut self, op: LogicOp) -> NodeId {
        let num_inputs = if op.is_unary() { 1 } else { 2 };
        self.add_node(Node::new(
            NodeKind::Logic(op),
            num_inputs,
            vec![OutputPort::new(ConnectionType::bitvec(0), OutputType::Immediate)],
            0,
        ))
    }

    /// Input 0 is the selector, inputs `1..=num_data_paths` the data paths.
    pub fn add_multiplexer(&mut self, num_data_paths: usize) -> NodeId {
        self.add_node(Node::new(
            NodeKind::Multiplexer,
            1 + num_data_paths,
            vec![OutputPort::new(ConnectionType::bitvec(0), OutputType::Immediate)],
            0,
        ))
    }

    /// Starts with only the default input; choices are appended with
    /// [`add_priority_choice`](Self::add_priority_choice).
    pub fn add_priority_conditional(&mut self) -> NodeId {
        self.add_node(Node::new(
            NodeKind::PriorityConditional,
            1,
            vec![OutputPort::new(ConnectionType::bitvec(0), OutputType::Immediate)],
            0,
        ))
    }

    /// Appends a `(condition, value)` pair; earlier choices take priority.
    pub fn add_priority_choice(
        &mut self,
        node: NodeId,
        condition: NodePort,
        value: NodePort,
    ) -> Result<usize, HlimError> {
        debug_assert!(matches!(self.node(node).kind, NodeKind::PriorityConditional));
        let choice = (self.node(node).num_inputs() - 1) / 2;
        self.node_mut(node).inputs.extend([None, None]);
        self.connect(condition, node, 1 + 2 * choice)?;
        self.connect(value, node, 2 + 2 * choice)?;
        Ok(choice)
    }

    pub fn add_register(&mut self, clock: ClockId) -> NodeId {
        let id = self.add_node(Node::new(
            NodeKind::Register,
            node::reg::NUM_INPUTS,
            vec![OutputPort::new(ConnectionType::bitvec(0), OutputType::Latched)],
            1,
        ));
        self.attach_clock(id, 0, clock);
        id
    }

    pub fn add_rewire(&mut self, num_inputs: usize, op: RewireOp) -> NodeId {
        let width = op.output_width();
        self.add_node(Node::new(
            NodeKind::Rewire(op),
            num_inputs,
            vec![OutputPort::new(ConnectionType::bitvec(width), OutputType::Immediate)],
            0,
        ))
    }

    /// Replaces a rewire node's slice list; fails if the implied output
    /// width no longer matches a locked output type.
    pub fn set_rewire_op(&mut self, node: NodeId, op: RewireOp) -> Result<(), HlimError> {
        let width = op.output_width();
        let port = NodePort::new(node, 0);
        if self.connection_type(port).width != width {
            if !self.consumers(port).is_empty() {
                return Err(HlimError::ConnectionTypeLocked { port });
            }
            self.node_mut(node).outputs[0].connection_type = ConnectionType::bitvec(width);
        }
        match &mut self.node_mut(node).kind {
            NodeKind::Rewire(current) => *current = op,
            _ => unreachable!("set_rewire_op on a non-rewire node"),
        }
        Ok(())
    }

    /// An IO pin observing (and in simulation, driving) `ty`-shaped data.
    pub fn add_pin(&mut self, ty: ConnectionType, policy: PinPolicy) -> NodeId {
        self.add_node(Node::new(
            NodeKind::Pin(policy),
            node::pin::NUM_INPUTS,
            vec![OutputPort::new(ty, OutputType::Latched)],
            0,
        ))
    }

    pub fn add_memory(&mut self, word_width: usize, num_words: usize) -> NodeId {
        self.add_node(Node::new(
            NodeKind::Memory {
                word_width,
                num_words,
                power_on: BitVectorState::undefined(word_width * num_words),
            },
            0,
            vec![OutputPort::new(ConnectionType::dependency(), OutputType::Immediate)],
            0,
        ))
    }

    pub fn set_memory_power_on(
        &mut self,
        memory: NodeId,
        state: BitVectorState,
    ) -> Result<(), HlimError> {
        match &mut self.node_mut(memory).kind {
            NodeKind::Memory {
                word_width,
                num_words,
                power_on,
            } => {
                if state.len() != *word_width * *num_words {
                    let (word_width, num_words) = (*word_width, *num_words);
                    return Err(HlimError::DesignAssert {
                        node: memory,
                        message: format!(
                            "power-on state of {} bits does not cover {num_words} x {word_width} bits",
                            state.len()
                        ),
                    });
                }
                *power_on = state;
                Ok(())
            }
            _ => Err(HlimError::DesignAssert {
                node: memory,
                message: "not a memory node".to_string(),
            }),
        }
    }

    /// An asynchronous read port on `memory`; a following register (detected
    /// by the memory pass) makes it synchronous.
    pub fn add_read_port(&mut self, memory: NodeId) -> NodeId {
        let width = self.memory_word_width(memory);
        let id = self.add_node(Node::new(
            NodeKind::MemReadPort { width },
            node::read_port::NUM_INPUTS,
            vec![OutputPort::new(ConnectionType::bitvec(width), OutputType::Immediate)],
            0,
        ));
        self.connect(NodePort::new(memory, 0), id, node::read_port::MEMORY)
            .expect("memory output is a dependency edge");
        id
    }

    /// A clocked write port on `memory`, ordered after the memory's previous
    /// write port so that writes sharing the memory commit in creation
    /// order.
    pub fn add_write_port(&mut self, memory: NodeId, clock: ClockId) -> NodeId {
        let width = self.memory_word_width(memory);
        let previous = self
            .consumers(NodePort::new(memory, 0))
            .iter()
            .map(|consumer| consumer.node)
            .filter(|id| matches!(self.node(*id).kind, NodeKind::MemWritePort { .. }))
            .max();
        let id = self.add_node(Node::new(
            NodeKind::MemWritePort { width },
            node::write_port::NUM_INPUTS,
            vec![OutputPort::new(ConnectionType::dependency(), OutputType::Immediate)],
            1,
        ));
        self.attach_clock(id, 0, clock);
        self.connect(NodePort::new(memory, 0), id, node::write_port::MEMORY)
            .expect("memory output is a dependency edge");
        if let Some(previous) = previous {
            self.connect(
                NodePort::new(previous, node::write_port::ORDER_BEFORE_OUT),
                id,
                node::write_port::ORDER_AFTER,
            )
            .expect("order output is a dependency edge");
        }
        id
    }

    fn memory_word_width(&self, memory: NodeId) -> usize {
        match &self.node(memory).kind {
            NodeKind::Memory { word_width, .. } => *word_width,
            _ => panic!("{memory} is not a memory node"),
        }
    }

    /// A diagnostic tap; input 0 is the optional trigger, further inputs are
    /// message payloads.
    pub fn add_signal_tap(
        &mut self,
        level: SignalTapLevel,
        trigger: SignalTapTrigger,
    ) -> NodeId {
        self.add_node(Node::new(
            NodeKind::SignalTap {
                level,
                trigger,
                message: Vec::new(),
            },
            1,
            Vec::new(),
            0,
        ))
    }

    /// Appends a payload input to a signal tap and returns its index.
    pub fn add_tap_input(&mut self, tap: NodeId, driver: NodePort) -> Result<usize, HlimError> {
        debug_assert!(matches!(self.node(tap).kind, NodeKind::SignalTap { .. }));
        let input = self.node(tap).num_inputs();
        self.node_mut(tap).inputs.push(None);
        self.connect(driver, tap, input)?;
        Ok(input)
    }

    pub fn add_tap_message_part(&mut self, tap: NodeId, part: MessagePart) {
        match &mut self.node_mut(tap).kind {
            NodeKind::SignalTap { message, .. } => message.push(part),
            _ => unreachable!("add_tap_message_part on a non-tap node"),
        }
    }

    /// Stimulus source: on reset it emits tick 0, on each clock advance the
    /// producer computes the next tick's outputs. Not synthesized.
    pub fn add_signal_generator(
        &mut self,
        clock: ClockId,
        outputs: Vec<ConnectionType>,
        producer: impl Fn(&mut node::GeneratorOutputs<'_>, u64) + Send + Sync + 'static,
    ) -> NodeId {
        let outputs = outputs
            .into_iter()
            .map(|ty| OutputPort::new(ty, OutputType::Latched))
            .collect();
        let id = self.add_node(Node::new(
            NodeKind::SignalGenerator(SignalProducer(Arc::new(producer))),
            0,
            outputs,
            1,
        ));
        self.attach_clock(id, 0, clock);
        id
    }
}
