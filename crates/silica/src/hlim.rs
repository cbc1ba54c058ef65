use crate::clock::{Clock, ClockId, ClockKind, ClockRational};
use crate::HashMap;
use std::fmt;
use thiserror::Error;

mod builder;
mod explore;
mod memory;
pub mod node;

pub use explore::Exploration;
pub use memory::{find_memory_groups, MemoryGroupPorts, MemoryReadPort};
pub use node::{
    ArithmeticOp, CompareOp, LogicOp, MessagePart, Node, NodeKind, PinPolicy, RewireOp,
    RewireRange, RewireSource, SignalProducer, SignalTapLevel, SignalTapTrigger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A directed handle to one output (or input, depending on context) of a
/// node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePort {
    pub node: NodeId,
    pub port: usize,
}

impl NodePort {
    pub fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }
}

impl fmt::Display for NodePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpretation {
    Bit,
    BitVec,
    /// Zero-information ordering edge between side-effecting nodes.
    Dependency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericInterpretation {
    Unsigned,
    Signed2Complement,
    OneHot,
    Float,
}

/// Describes the signal carried by an output port. The fixed-point and float
/// fields are carried verbatim for front ends; no core pass interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionType {
    pub interpretation: Interpretation,
    pub width: usize,
    pub numeric: NumericInterpretation,
    pub fixed_point_denominator: u64,
    pub float_sign_bit: bool,
    pub float_mantissa_bits: usize,
    pub float_exponent_bias: i32,
}

impl ConnectionType {
    pub fn bit() -> Self {
        Self {
            interpretation: Interpretation::Bit,
            width: 1,
            ..Self::default()
        }
    }

    pub fn bitvec(width: usize) -> Self {
        Self {
            interpretation: Interpretation::BitVec,
            width,
            ..Self::default()
        }
    }

    pub fn dependency() -> Self {
        Self {
            interpretation: Interpretation::Dependency,
            width: 0,
            ..Self::default()
        }
    }

    pub fn is_dependency(&self) -> bool {
        self.interpretation == Interpretation::Dependency
    }
}

impl Default for ConnectionType {
    fn default() -> Self {
        Self {
            interpretation: Interpretation::BitVec,
            width: 0,
            numeric: NumericInterpretation::Unsigned,
            fixed_point_denominator: 1,
            float_sign_bit: false,
            float_mantissa_bits: 0,
            float_exponent_bias: 0,
        }
    }
}

/// Output discipline of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
    /// Combinational, recomputed on every evaluation pass.
    Immediate,
    /// Updates only on a clock edge.
    Latched,
    /// Fixed at reset.
    Constant,
}

#[derive(Debug, Clone)]
pub struct OutputPort {
    pub(crate) connection_type: ConnectionType,
    pub(crate) output_type: OutputType,
    pub(crate) consumers: Vec<NodePort>,
}

impl OutputPort {
    pub(crate) fn new(connection_type: ConnectionType, output_type: OutputType) -> Self {
        Self {
            connection_type,
            output_type,
            consumers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Emitted as a separate VHDL entity.
    Entity,
    /// Emitted as a nested block (or process) inside its entity.
    Area,
    /// Special-function subgroup, e.g. a detected memory cluster.
    Sfu,
}

/// A named, tree-structured partition of nodes used for emission scoping.
/// Groups own their children; node membership is non-owning.
#[derive(Debug)]
pub struct NodeGroup {
    pub kind: GroupKind,
    pub name: String,
    pub comment: String,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) children: Vec<GroupId>,
    pub(crate) parent: Option<GroupId>,
    /// Filled in by the memory detector for SFU memory groups.
    pub(crate) memory_ports: Option<MemoryGroupPorts>,
}

impl NodeGroup {
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn children(&self) -> &[GroupId] {
        &self.children
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub fn memory_ports(&self) -> Option<&MemoryGroupPorts> {
        self.memory_ports.as_ref()
    }
}

#[derive(Error, Debug)]
pub enum HlimError {
    #[error("type mismatch connecting input {input} of {node}: {message}")]
    TypeMismatch {
        node: NodeId,
        input: usize,
        message: String,
    },
    #[error("connection type of output {port} is locked by existing consumers")]
    ConnectionTypeLocked { port: NodePort },
    #[error("design rule violated at {node}: {message}")]
    DesignAssert { node: NodeId, message: String },
}

/// The circuit container. Owns all nodes, clocks and the group tree; every
/// cross reference between them is an index handle. Node ids are stable,
/// reflect creation order and survive subnet copies.
pub struct Circuit {
    nodes: Vec<Option<Node>>,
    clocks: Vec<Clock>,
    groups: Vec<NodeGroup>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Circuit {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            clocks: Vec::new(),
            groups: vec![NodeGroup {
                kind: GroupKind::Entity,
                name: "root".to_string(),
                comment: String::new(),
                nodes: Vec::new(),
                children: Vec::new(),
                parent: None,
                memory_ports: None,
            }],
        }
    }

    // ------------------------------------------------------------------
    // nodes

    pub(crate) fn add_node(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        node.group = Some(self.root_group());
        self.groups[0].nodes.push(id);
        self.nodes.push(Some(node));
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0].as_ref().expect("node was removed")
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0].as_mut().expect("node was removed")
    }

    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.try_node(id).is_some()
    }

    /// Live node ids in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| NodeId(i))
    }

    pub fn num_live_nodes(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    // ------------------------------------------------------------------
    // connections

    pub fn driver(&self, node: NodeId, input: usize) -> Option<NodePort> {
        self.node(node).inputs[input]
    }

    /// Walks through pure renaming signal nodes to the first non-signal
    /// producer of an input.
    pub fn non_signal_driver(&self, node: NodeId, input: usize) -> Option<NodePort> {
        let mut driver = self.node(node).inputs[input];
        while let Some(np) = driver {
            if matches!(self.node(np.node).kind, NodeKind::Signal) {
                driver = self.node(np.node).inputs[0];
            } else {
                break;
            }
        }
        driver
    }

    pub fn consumers(&self, port: NodePort) -> &[NodePort] {
        &self.node(port.node).outputs[port.port].consumers
    }

    pub fn output_type(&self, port: NodePort) -> OutputType {
        self.node(port.node).outputs[port.port].output_type
    }

    pub fn connection_type(&self, port: NodePort) -> &ConnectionType {
        &self.node(port.node).outputs[port.port].connection_type
    }

    /// Binds an input to a producer. A previously bound producer is detached
    /// first. Fails when the consumer's kind rejects the producer's
    /// connection type, or when a type that would have to follow the new
    /// producer is already locked by other consumers.
    pub fn connect(
        &mut self,
        driver: NodePort,
        consumer: NodeId,
        input: usize,
    ) -> Result<(), HlimError> {
        if self.node(consumer).inputs[input] == Some(driver) {
            return Ok(());
        }

        let ty = self.connection_type(driver).clone();
        self.node(consumer).input_accepts(self, input, &ty)?;

        // An output whose type follows this input must still be retypable.
        if let Some(out) = self.node(consumer).followed_output(input) {
            let port = NodePort::new(consumer, out);
            if *self.connection_type(port) != ty && !self.consumers(port).is_empty() {
                return Err(HlimError::ConnectionTypeLocked { port });
            }
        }

        self.disconnect_input(consumer, input);
        self.node_mut(consumer).inputs[input] = Some(driver);
        self.node_mut(driver.node).outputs[driver.port]
            .consumers
            .push(NodePort::new(consumer, input));

        if let Some(out) = self.node(consumer).followed_output(input) {
            self.node_mut(consumer).outputs[out].connection_type = ty;
        }
        Ok(())
    }

    /// Symmetric removal; the order of the remaining fan-out entries is not
    /// preserved.
    pub fn disconnect_input(&mut self, node: NodeId, input: usize) {
        if let Some(driver) = self.node(node).inputs[input] {
            let consumers = &mut self.node_mut(driver.node).outputs[driver.port].consumers;
            let pos = consumers
                .iter()
                .position(|c| *c == NodePort::new(node, input))
                .expect("fan-out list out of sync with input binding");
            consumers.swap_remove(pos);
            self.node_mut(node).inputs[input] = None;
        }
    }

    /// Rewires every consumer of `(node, output)` to the driver of
    /// `(node, input)`, leaving the output unconsumed.
    pub fn bypass_output_to_input(&mut self, node: NodeId, output: usize, input: usize) {
        let driver = self.node(node).inputs[input];
        while let Some(consumer) = self.node(node).outputs[output].consumers.last().copied() {
            self.disconnect_input(consumer.node, consumer.port);
            if let Some(driver) = driver {
                self.connect(driver, consumer.node, consumer.port)
                    .expect("bypass must preserve the connection type");
            }
        }
    }

    /// Detaches everything and retires the id. The id is never reused.
    pub fn remove_node(&mut self, id: NodeId) {
        for input in 0..self.node(id).inputs.len() {
            self.disconnect_input(id, input);
        }
        for output in 0..self.node(id).outputs.len() {
            while let Some(consumer) = self.node(id).outputs[output].consumers.last().copied() {
                self.disconnect_input(consumer.node, consumer.port);
            }
        }
        for slot in 0..self.node(id).clocks.len() {
            self.detach_clock(id, slot);
        }
        self.move_to_group(id, None);
        self.nodes[id.0] = None;
    }

    // ------------------------------------------------------------------
    // groups

    pub fn root_group(&self) -> GroupId {
        GroupId(0)
    }

    pub fn create_group(&mut self, parent: GroupId, kind: GroupKind, name: &str) -> GroupId {
        let id = GroupId(self.groups.len());
        self.groups.push(NodeGroup {
            kind,
            name: name.to_string(),
            comment: String::new(),
            nodes: Vec::new(),
            children: Vec::new(),
            parent: Some(parent),
            memory_ports: None,
        });
        self.groups[parent.0].children.push(id);
        id
    }

    pub fn group(&self, id: GroupId) -> &NodeGroup {
        &self.groups[id.0]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut NodeGroup {
        &mut self.groups[id.0]
    }

    pub fn group_is_child_of(&self, group: GroupId, ancestor: GroupId) -> bool {
        let mut current = self.groups[group.0].parent;
        while let Some(g) = current {
            if g == ancestor {
                return true;
            }
            current = self.groups[g.0].parent;
        }
        false
    }

    /// Removes the node from its previous parent (if any) and appends it to
    /// the new one; membership order is not meaningful.
    pub fn move_to_group(&mut self, node: NodeId, group: Option<GroupId>) {
        let old = self.node(node).group;
        if old == group {
            return;
        }
        if let Some(old) = old {
            let nodes = &mut self.groups[old.0].nodes;
            let pos = nodes
                .iter()
                .position(|n| *n == node)
                .expect("group membership out of sync");
            nodes.swap_remove(pos);
        }
        self.node_mut(node).group = group;
        if let Some(group) = group {
            self.groups[group.0].nodes.push(node);
        }
    }

    // ------------------------------------------------------------------
    // clocks

    pub fn create_root_clock(&mut self, name: &str, frequency: ClockRational) -> ClockId {
        let id = ClockId(self.clocks.len());
        self.clocks
            .push(Clock::new(ClockKind::Root { frequency }, name.to_string()));
        id
    }

    pub fn create_derived_clock(
        &mut self,
        parent: ClockId,
        multiplier: ClockRational,
        phase_shift: ClockRational,
    ) -> ClockId {
        let id = ClockId(self.clocks.len());
        let name = format!("{}_derived", self.clocks[parent.0].name);
        self.clocks.push(Clock::new(
            ClockKind::Derived {
                parent,
                multiplier,
                phase_shift,
            },
            name,
        ));
        id
    }

    pub fn clock(&self, id: ClockId) -> &Clock {
        &self.clocks[id.0]
    }

    pub fn clock_mut(&mut self, id: ClockId) -> &mut Clock {
        &mut self.clocks[id.0]
    }

    pub fn clock_ids(&self) -> impl Iterator<Item = ClockId> + '_ {
        (0..self.clocks.len()).map(ClockId)
    }

    pub fn num_clocks(&self) -> usize {
        self.clocks.len()
    }

    /// Walks the derivation chain to the root.
    pub fn clock_absolute_frequency(&self, id: ClockId) -> ClockRational {
        match &self.clocks[id.0].kind {
            ClockKind::Root { frequency } => *frequency,
            ClockKind::Derived {
                parent, multiplier, ..
            } => self.clock_absolute_frequency(*parent) * *multiplier,
        }
    }

    pub fn clock_absolute_period(&self, id: ClockId) -> ClockRational {
        self.clock_absolute_frequency(id).recip()
    }

    /// Accumulated phase shift down the derivation chain.
    pub fn clock_absolute_phase(&self, id: ClockId) -> ClockRational {
        match &self.clocks[id.0].kind {
            ClockKind::Root { .. } => ClockRational::new(0, 1),
            ClockKind::Derived {
                parent,
                phase_shift,
                ..
            } => self.clock_absolute_phase(*parent) + *phase_shift,
        }
    }

    pub fn attach_clock(&mut self, node: NodeId, slot: usize, clock: ClockId) {
        if self.node(node).clocks[slot] == Some(clock) {
            return;
        }
        self.detach_clock(node, slot);
        self.node_mut(node).clocks[slot] = Some(clock);
        self.clocks[clock.0].clocked_nodes.push((node, slot));
    }

    pub fn detach_clock(&mut self, node: NodeId, slot: usize) {
        if let Some(clock) = self.node(node).clocks[slot] {
            let nodes = &mut self.clocks[clock.0].clocked_nodes;
            let pos = nodes
                .iter()
                .position(|entry| *entry == (node, slot))
                .expect("clock back-reference out of sync");
            nodes.swap_remove(pos);
            self.node_mut(node).clocks[slot] = None;
        }
    }

    // ------------------------------------------------------------------
    // subnet copy

    /// Clones a set of nodes, assigning fresh ids that preserve the relative
    /// order of the originals. Connections between copied nodes are
    /// re-established; connections leaving the set are left unconnected.
    /// Clock bindings and group membership carry over.
    pub fn copy_subnet(&mut self, nodes: &[NodeId]) -> HashMap<NodeId, NodeId> {
        let mut sorted: Vec<NodeId> = nodes.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut mapping: HashMap<NodeId, NodeId> = HashMap::default();
        for &old in &sorted {
            let template = self.node(old);
            let mut copy = Node::new_like(template);
            copy.name = template.name.clone();
            copy.comment = template.comment.clone();
            let group = template.group;
            let clocks: Vec<Option<ClockId>> = template.clocks.clone();
            let new = self.add_node(copy);
            self.move_to_group(new, group);
            for (slot, clock) in clocks.iter().enumerate() {
                if let Some(clock) = clock {
                    self.attach_clock(new, slot, *clock);
                }
            }
            mapping.insert(old, new);
        }
        for &old in &sorted {
            let new = mapping[&old];
            for input in 0..self.node(old).inputs.len() {
                if let Some(driver) = self.node(old).inputs[input] {
                    if let Some(&mapped) = mapping.get(&driver.node) {
                        self.connect(NodePort::new(mapped, driver.port), new, input)
                            .expect("copied connection must keep its type");
                    }
                }
            }
        }
        mapping
    }

    // ------------------------------------------------------------------
    // exploration

    /// Lazy depth-first walk over everything reachable forward from an
    /// output port.
    pub fn explore_output(&self, port: NodePort) -> Exploration<'_> {
        Exploration::forward(self, port)
    }

    /// Lazy depth-first walk over everything reachable backward from an
    /// input port.
    pub fn explore_input(&self, node: NodeId, input: usize) -> Exploration<'_> {
        Exploration::backward(self, node, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_is_symmetric() {
        let mut c = Circuit::new();
        let a = c.add_signal(ConnectionType::bitvec(8));
        let b = c.add_signal(ConnectionType::bitvec(8));
        c.connect(NodePort::new(a, 0), b, 0).unwrap();
        assert_eq!(c.driver(b, 0), Some(NodePort::new(a, 0)));
        assert_eq!(c.consumers(NodePort::new(a, 0)), &[NodePort::new(b, 0)]);

        c.disconnect_input(b, 0);
        assert_eq!(c.driver(b, 0), None);
        assert!(c.consumers(NodePort::new(a, 0)).is_empty());
    }

    #[test]
    fn reconnect_detaches_previous_producer() {
        let mut c = Circuit::new();
        let a = c.add_signal(ConnectionType::bitvec(4));
        let b = c.add_signal(ConnectionType::bitvec(4));
        let s = c.add_signal(ConnectionType::bitvec(4));
        c.connect(NodePort::new(a, 0), s, 0).unwrap();
        c.connect(NodePort::new(b, 0), s, 0).unwrap();
        assert!(c.consumers(NodePort::new(a, 0)).is_empty());
        assert_eq!(c.consumers(NodePort::new(b, 0)), &[NodePort::new(s, 0)]);
    }

    #[test]
    fn non_signal_driver_walks_renames() {
        let mut c = Circuit::new();
        let k = c.add_constant(crate::bitvec::BitVectorState::from_u64(3, 4), ConnectionType::bitvec(4));
        let s1 = c.add_signal(ConnectionType::bitvec(4));
        let s2 = c.add_signal(ConnectionType::bitvec(4));
        let and = c.add_logic(LogicOp::And);
        c.connect(NodePort::new(k, 0), s1, 0).unwrap();
        c.connect(NodePort::new(s1, 0), s2, 0).unwrap();
        c.connect(NodePort::new(s2, 0), and, 0).unwrap();
        assert_eq!(c.non_signal_driver(and, 0), Some(NodePort::new(k, 0)));
    }

    #[test]
    fn output_type_locks_with_first_consumer() {
        let mut c = Circuit::new();
        let narrow = c.add_signal(ConnectionType::bitvec(4));
        let wide = c.add_signal(ConnectionType::bitvec(8));
        let s = c.add_signal(ConnectionType::bitvec(4));
        let consumer = c.add_signal(ConnectionType::bitvec(4));
        c.connect(NodePort::new(narrow, 0), s, 0).unwrap();
        c.connect(NodePort::new(s, 0), consumer, 0).unwrap();

        let err = c.connect(NodePort::new(wide, 0), s, 0).unwrap_err();
        assert!(matches!(err, HlimError::ConnectionTypeLocked { .. }));
    }

    #[test]
    fn remove_node_cleans_all_references() {
        let mut c = Circuit::new();
        let clk = c.create_root_clock("clk", ClockRational::new(1000, 1));
        let a = c.add_signal(ConnectionType::bitvec(2));
        let reg = c.add_register(clk);
        c.connect(NodePort::new(a, 0), reg, node::reg::DATA).unwrap();

        c.remove_node(reg);
        assert!(c.consumers(NodePort::new(a, 0)).is_empty());
        assert!(c.clock(clk).clocked_nodes().is_empty());
        assert!(!c.contains_node(reg));
        // removal never recycles the id
        let next = c.add_signal(ConnectionType::bit());
        assert!(next.0 > reg.0);
    }

    #[test]
    fn subnet_copy_preserves_order_and_wiring() {
        let mut c = Circuit::new();
        let a = c.add_signal(ConnectionType::bitvec(4));
        let b = c.add_signal(ConnectionType::bitvec(4));
        let and = c.add_logic(LogicOp::And);
        c.connect(NodePort::new(a, 0), and, 0).unwrap();
        c.connect(NodePort::new(b, 0), and, 1).unwrap();

        let mapping = c.copy_subnet(&[and, a, b]);
        assert_eq!(mapping.len(), 3);
        assert!(mapping[&a] < mapping[&b]);
        assert!(mapping[&b] < mapping[&and]);
        assert_eq!(
            c.driver(mapping[&and], 0),
            Some(NodePort::new(mapping[&a], 0))
        );
        assert_eq!(
            c.driver(mapping[&and], 1),
            Some(NodePort::new(mapping[&b], 0))
        );
    }

    #[test]
    fn derived_clock_frequency_walks_to_root() {
        let mut c = Circuit::new();
        let root = c.create_root_clock("clk", ClockRational::new(100, 1));
        let half = c.create_derived_clock(root, ClockRational::new(1, 2), ClockRational::new(0, 1));
        let eighth =
            c.create_derived_clock(half, ClockRational::new(1, 4), ClockRational::new(1, 800));
        assert_eq!(c.clock_absolute_frequency(half), ClockRational::new(50, 1));
        assert_eq!(
            c.clock_absolute_frequency(eighth),
            ClockRational::new(25, 2)
        );
        assert_eq!(c.clock_absolute_phase(eighth), ClockRational::new(1, 800));
    }
}
