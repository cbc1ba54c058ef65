use crate::bitvec::BitVectorState;
use crate::hlim::node::{reg, NodeKind};
use crate::hlim::{find_memory_groups, Circuit, LogicOp, NodeId, NodePort};
use crate::sim::eval::{self, IgnoreDiagnostics, UNCONNECTED};
use crate::HashSet;

mod condition;

use condition::HierarchyCondition;

/// A rewrite pass editing the circuit in place. Passes are idempotent and
/// preserve observable behavior.
pub trait CircuitPass {
    fn name(&self) -> &'static str;
    fn run(&self, circuit: &mut Circuit);
}

#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn CircuitPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass<P>(&mut self, pass: P)
    where
        P: CircuitPass + 'static,
    {
        self.passes.push(Box::new(pass));
    }

    pub fn run(&self, circuit: &mut Circuit) {
        for pass in &self.passes {
            pass.run(circuit);
        }
    }
}

/// Runs the optimization pipeline. The level selects a suffix of the full
/// pipeline; level 0 is a no-op.
pub fn optimize(circuit: &mut Circuit, level: usize) {
    let mut manager = PassManager::new();
    match level {
        0 => {}
        1 => {
            manager.add_pass(CullOrphanedSignalNodes);
        }
        2 => {
            manager.add_pass(CullOrphanedSignalNodes);
            manager.add_pass(CullUnnamedSignalNodes);
            manager.add_pass(CullUnusedNodes);
        }
        _ => {
            manager.add_pass(PropagateConstants);
            manager.add_pass(CullOrphanedSignalNodes);
            manager.add_pass(CullUnnamedSignalNodes);
            manager.add_pass(MergeMuxes);
            manager.add_pass(RemoveIrrelevantMuxes);
            manager.add_pass(CullMuxConditionNegations);
            manager.add_pass(RemoveNoOps);
            manager.add_pass(FoldRegisterMuxEnableLoops);
            // muxes are gone, constants may have become reachable again
            manager.add_pass(PropagateConstants);
            manager.add_pass(CullUnusedNodes);
            manager.add_pass(FindMemoryGroups);
        }
    }
    manager.run(circuit);
}

macro_rules! circuit_pass {
    ($ty:ident, $name:literal, $func:path) => {
        pub struct $ty;

        impl CircuitPass for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn run(&self, circuit: &mut Circuit) {
                $func(circuit);
            }
        }
    };
}

circuit_pass!(CullOrphanedSignalNodes, "cull_orphaned_signal_nodes", cull_orphaned_signal_nodes);
circuit_pass!(CullUnnamedSignalNodes, "cull_unnamed_signal_nodes", cull_unnamed_signal_nodes);
circuit_pass!(CullUnusedNodes, "cull_unused_nodes", cull_unused_nodes);
circuit_pass!(MergeMuxes, "merge_muxes", merge_muxes);
circuit_pass!(RemoveIrrelevantMuxes, "remove_irrelevant_muxes", remove_irrelevant_muxes);
circuit_pass!(CullMuxConditionNegations, "cull_mux_condition_negations", cull_mux_condition_negations);
circuit_pass!(RemoveNoOps, "remove_no_ops", remove_no_ops);
circuit_pass!(FoldRegisterMuxEnableLoops, "fold_register_mux_enable_loops", fold_register_mux_enable_loops);
circuit_pass!(PropagateConstants, "propagate_constants", propagate_constants);
circuit_pass!(FindMemoryGroups, "find_memory_groups", find_memory_groups);

fn is_two_input_mux(circuit: &Circuit, node: NodeId) -> bool {
    matches!(circuit.node(node).kind, NodeKind::Multiplexer)
        && circuit.node(node).num_inputs() == 3
}

/// Removes signal nodes with no input and no fan-out.
pub fn cull_orphaned_signal_nodes(circuit: &mut Circuit) {
    let orphans: Vec<NodeId> = circuit
        .node_ids()
        .filter(|id| {
            matches!(circuit.node(*id).kind, NodeKind::Signal) && circuit.node(*id).is_orphaned()
        })
        .collect();
    for id in orphans {
        circuit.remove_node(id);
    }
}

/// Removes unnamed signal nodes whose input is a signal or unconnected and
/// whose consumers are all signal nodes, connecting the consumers directly
/// to the original non-signal driver.
pub fn cull_unnamed_signal_nodes(circuit: &mut Circuit) {
    let candidates: Vec<NodeId> = circuit
        .node_ids()
        .filter(|id| matches!(circuit.node(*id).kind, NodeKind::Signal))
        .collect();

    for id in candidates {
        if !circuit.node(id).name.is_empty() {
            continue;
        }
        let input_is_signal_or_unconnected = match circuit.driver(id, 0) {
            None => true,
            Some(driver) => matches!(circuit.node(driver.node).kind, NodeKind::Signal),
        };
        let all_consumers_are_signals = circuit
            .consumers(NodePort::new(id, 0))
            .iter()
            .all(|consumer| matches!(circuit.node(consumer.node).kind, NodeKind::Signal));
        if !input_is_signal_or_unconnected || !all_consumers_are_signals {
            continue;
        }

        let new_source = circuit.non_signal_driver(id, 0);
        while let Some(consumer) = circuit.consumers(NodePort::new(id, 0)).last().copied() {
            circuit.disconnect_input(consumer.node, consumer.port);
            if let Some(source) = new_source {
                circuit
                    .connect(source, consumer.node, consumer.port)
                    .expect("signal bypass keeps the connection type");
            }
        }
        circuit.remove_node(id);
    }
}

/// Repeatedly removes nodes without side effects whose outputs have no
/// consumers. Terminates because every iteration removes at least one node.
pub fn cull_unused_nodes(circuit: &mut Circuit) {
    loop {
        let unused: Vec<NodeId> = circuit
            .node_ids()
            .filter(|id| {
                let node = circuit.node(*id);
                !node.has_side_effects()
                    && (0..node.num_outputs())
                        .all(|port| circuit.consumers(NodePort::new(*id, port)).is_empty())
            })
            .collect();
        if unused.is_empty() {
            break;
        }
        for id in unused {
            circuit.remove_node(id);
        }
    }
}

/// Collapses chains of two-input muxes with equal or negated selector
/// conditions: the outer mux is rewired to bypass the inner one's redundant
/// side.
pub fn merge_muxes(circuit: &mut Circuit) {
    loop {
        let mut changed = false;
        let muxes: Vec<NodeId> = circuit
            .node_ids()
            .filter(|id| is_two_input_mux(circuit, *id))
            .collect();

        for mux in muxes {
            let condition = HierarchyCondition::parse(circuit, mux, 0);

            for mux_input in 0..2usize {
                let prev_port = 1 + mux_input;
                let other_port = 2 - mux_input;
                if circuit.non_signal_driver(mux, other_port).is_none() {
                    continue;
                }
                let Some(prev) = circuit.non_signal_driver(mux, prev_port) else {
                    continue;
                };
                if !is_two_input_mux(circuit, prev.node) {
                    continue;
                }

                let prev_condition = HierarchyCondition::parse(circuit, prev.node, 0);
                let prev_negated = if prev_condition.is_equal_of(&condition) {
                    mux_input == 1
                } else if condition.is_negation_of(&prev_condition) {
                    mux_input == 0
                } else {
                    continue;
                };

                let bypass_port = if prev_negated { 2 } else { 1 };
                if let Some(bypass) = circuit.driver(prev.node, bypass_port) {
                    if circuit.driver(mux, prev_port) != Some(bypass) {
                        circuit
                            .connect(bypass, mux, prev_port)
                            .expect("mux data paths share one connection type");
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Bypasses a mux on a data input when every downstream path inside the same
/// group is re-muxed under the same condition, making this mux's choice
/// irrelevant for those consumers.
pub fn remove_irrelevant_muxes(circuit: &mut Circuit) {
    loop {
        let mut changed = false;
        let muxes: Vec<NodeId> = circuit
            .node_ids()
            .filter(|id| is_two_input_mux(circuit, *id))
            .collect();

        for mux in muxes {
            let condition = HierarchyCondition::parse(circuit, mux, 0);
            let mux_group = circuit.node(mux).group();

            for data_port in 1..3usize {
                let consumers: Vec<NodePort> = circuit.consumers(NodePort::new(mux, 0)).to_vec();
                for consumer in consumers {
                    let mut open = vec![consumer];
                    let mut closed: HashSet<NodePort> = HashSet::default();
                    let mut all_paths_remuxed = true;

                    while let Some(handle) = open.pop() {
                        if !closed.insert(handle) {
                            continue;
                        }
                        let node = circuit.node(handle.node);
                        if node.has_side_effects() || node.group() != mux_group {
                            all_paths_remuxed = false;
                            break;
                        }
                        if is_two_input_mux(circuit, handle.node) {
                            let sub = HierarchyCondition::parse(circuit, handle.node, 0);
                            if handle.port == data_port && condition.is_equal_of(&sub) {
                                continue;
                            }
                            if handle.port != data_port && condition.is_negation_of(&sub) {
                                continue;
                            }
                        }
                        for output in 0..node.num_outputs() {
                            open.extend_from_slice(
                                circuit.consumers(NodePort::new(handle.node, output)),
                            );
                        }
                    }

                    if all_paths_remuxed {
                        if let Some(driver) = circuit.driver(mux, data_port) {
                            circuit.disconnect_input(consumer.node, consumer.port);
                            circuit
                                .connect(driver, consumer.node, consumer.port)
                                .expect("mux data paths share one connection type");
                            changed = true;
                        }
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// When a mux selector is a NOT, rewires the selector to the inner signal
/// and swaps the two data inputs. Chains of NOTs unravel completely.
pub fn cull_mux_condition_negations(circuit: &mut Circuit) {
    let muxes: Vec<NodeId> = circuit
        .node_ids()
        .filter(|id| is_two_input_mux(circuit, *id))
        .collect();

    for mux in muxes {
        loop {
            let Some(selector) = circuit.non_signal_driver(mux, 0) else {
                break;
            };
            if !matches!(circuit.node(selector.node).kind, NodeKind::Logic(LogicOp::Not)) {
                break;
            }
            let Some(inner) = circuit.driver(selector.node, 0) else {
                break;
            };
            circuit
                .connect(inner, mux, 0)
                .expect("selector stays a single bit");

            let d1 = circuit.driver(mux, 1);
            let d2 = circuit.driver(mux, 2);
            match d2 {
                Some(d2) => circuit
                    .connect(d2, mux, 1)
                    .expect("mux data paths share one connection type"),
                None => circuit.disconnect_input(mux, 1),
            }
            match d1 {
                Some(d1) => circuit
                    .connect(d1, mux, 2)
                    .expect("mux data paths share one connection type"),
                None => circuit.disconnect_input(mux, 2),
            }
        }
    }
}

/// Removes rewire nodes whose configured output is bit-identical to their
/// single input.
pub fn remove_no_ops(circuit: &mut Circuit) {
    let rewires: Vec<NodeId> = circuit
        .node_ids()
        .filter(|id| matches!(circuit.node(*id).kind, NodeKind::Rewire(_)))
        .collect();

    for id in rewires {
        let NodeKind::Rewire(op) = &circuit.node(id).kind else {
            continue;
        };
        let is_no_op = match op.ranges.as_slice() {
            [crate::hlim::RewireRange {
                subwidth,
                source: crate::hlim::RewireSource::Input { input: 0, offset: 0 },
            }] => match circuit.driver(id, 0) {
                Some(driver) => circuit.connection_type(driver).width == *subwidth,
                None => false,
            },
            _ => false,
        };
        if is_no_op {
            circuit.bypass_output_to_input(id, 0, 0);
            circuit.remove_node(id);
        }
    }
}

/// Rewrites `register.data = mux(c, regOut, a)` feedback loops into a plain
/// register enable; an existing enable is ANDed with the mux condition.
pub fn fold_register_mux_enable_loops(circuit: &mut Circuit) {
    let registers: Vec<NodeId> = circuit
        .node_ids()
        .filter(|id| matches!(circuit.node(*id).kind, NodeKind::Register))
        .collect();

    for register in registers {
        let Some(data) = circuit.non_signal_driver(register, reg::DATA) else {
            continue;
        };
        if !is_two_input_mux(circuit, data.node) {
            continue;
        }
        let mux = data.node;

        let side_1 = circuit.non_signal_driver(mux, 1);
        let side_2 = circuit.non_signal_driver(mux, 2);
        let Some(mux_condition) = circuit.driver(mux, 0) else {
            continue;
        };
        let enable_condition = circuit.non_signal_driver(register, reg::ENABLE);
        let group = circuit.node(register).group();

        // `mux(c, regOut, a)` keeps the register when c == 0, so the enable
        // is c itself; the mirrored pattern needs the inverted condition.
        let (feeds_back_on_1, new_data) = if side_1.map(|np| np.node) == Some(register) {
            (true, circuit.driver(mux, 2))
        } else if side_2.map(|np| np.node) == Some(register) {
            (false, circuit.driver(mux, 1))
        } else {
            continue;
        };
        let Some(new_data) = new_data else {
            continue;
        };

        let condition = if feeds_back_on_1 {
            mux_condition
        } else {
            let not_node = circuit.add_logic(LogicOp::Not);
            circuit.move_to_group(not_node, group);
            circuit
                .connect(mux_condition, not_node, 0)
                .expect("selector stays a single bit");
            NodePort::new(not_node, 0)
        };

        let enable = match enable_condition {
            Some(existing) => {
                let and_node = circuit.add_logic(LogicOp::And);
                circuit.move_to_group(and_node, group);
                circuit
                    .connect(existing, and_node, 0)
                    .expect("enable stays a single bit");
                circuit
                    .connect(condition, and_node, 1)
                    .expect("enable stays a single bit");
                NodePort::new(and_node, 0)
            }
            None => condition,
        };

        circuit
            .connect(enable, register, reg::ENABLE)
            .expect("enable stays a single bit");
        circuit
            .connect(new_data, register, reg::DATA)
            .expect("register data keeps its connection type");
    }
}

/// Work-list constant propagation. Seeded from constant outputs; any pure
/// combinational node whose evaluation over the constant inputs yields a
/// fully defined output is replaced by a fresh constant, which re-seeds the
/// work list.
pub fn propagate_constants(circuit: &mut Circuit) {
    let mut open: Vec<NodePort> = circuit
        .node_ids()
        .filter(|id| matches!(circuit.node(*id).kind, NodeKind::Constant(_)))
        .map(|id| NodePort::new(id, 0))
        .collect();

    while let Some(const_port) = open.pop() {
        let successors: Vec<NodePort> = circuit.consumers(const_port).to_vec();
        for successor in successors {
            let node = successor.node;
            if matches!(circuit.node(node).kind, NodeKind::Signal) {
                open.push(NodePort::new(node, 0));
                continue;
            }
            if circuit.node(node).has_side_effects()
                || !circuit.node(node).internal_state_sizes().is_empty()
                || circuit.node(node).referenced_internal_input().is_some()
            {
                continue;
            }

            // Stage the node's inputs in a scratch state, constants defined
            // and everything else undefined, then run its evaluator.
            let num_inputs = circuit.node(node).num_inputs();
            let mut state = BitVectorState::new();
            let mut input_offsets = vec![UNCONNECTED; num_inputs];
            for port in 0..num_inputs {
                if let Some(driver) = circuit.non_signal_driver(node, port) {
                    let width = circuit.connection_type(driver).width;
                    let offset = state.len();
                    state.resize(offset + width.next_multiple_of(64));
                    input_offsets[port] = offset;
                    if let NodeKind::Constant(value) = &circuit.node(driver.node).kind {
                        let value = value.clone();
                        state.insert(offset, &value);
                    }
                }
            }
            let num_outputs = circuit.node(node).num_outputs();
            let mut output_offsets = vec![UNCONNECTED; num_outputs];
            for port in 0..num_outputs {
                let width = circuit.node(node).connection_type(port).width;
                let offset = state.len();
                state.resize(offset + width.next_multiple_of(64));
                output_offsets[port] = offset;
            }

            eval::evaluate_node(
                circuit,
                node,
                &mut state,
                &[],
                &input_offsets,
                &output_offsets,
                &mut IgnoreDiagnostics,
            );

            for port in 0..num_outputs {
                let out_port = NodePort::new(node, port);
                let ty = circuit.connection_type(out_port).clone();
                if ty.width == 0 || !state.all_defined(output_offsets[port], ty.width) {
                    continue;
                }
                let value = state.extract(output_offsets[port], ty.width);
                let group = circuit.node(node).group();
                let constant = circuit.add_constant(value, ty);
                circuit.move_to_group(constant, group);
                let const_out = NodePort::new(constant, 0);
                while let Some(consumer) = circuit.consumers(out_port).last().copied() {
                    circuit.disconnect_input(consumer.node, consumer.port);
                    circuit
                        .connect(const_out, consumer.node, consumer.port)
                        .expect("constant replacement keeps the connection type");
                }
                open.push(const_out);
            }
        }
    }
}
