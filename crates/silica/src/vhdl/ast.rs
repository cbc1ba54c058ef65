use crate::clock::ClockId;
use crate::hlim::{
    Circuit, GroupId, GroupKind, MemoryGroupPorts, NodeId, NodeKind, NodePort,
};
use crate::vhdl::format::{CodeFormatting, SignalRole};
use crate::vhdl::scope::{ScopeId, Scopes, GLOBAL_SCOPE};
use crate::vhdl::ExportError;
use crate::HashSet;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct RegisterConfig {
    pub clock: ClockId,
    pub has_reset: bool,
}

pub(crate) enum ProcessKind {
    Combinational,
    Register(RegisterConfig),
}

pub(crate) struct Process {
    pub name: String,
    pub scope: ScopeId,
    pub kind: ProcessKind,
    pub nodes: Vec<NodeId>,
    pub inputs: BTreeSet<NodePort>,
    pub outputs: BTreeSet<NodePort>,
    pub locals: BTreeSet<NodePort>,
}

pub(crate) struct Block {
    pub name: String,
    pub processes: Vec<Process>,
    pub sub_entities: Vec<usize>,
}

pub(crate) struct Entity {
    pub name: String,
    pub group: GroupId,
    pub scope: ScopeId,
    pub inputs: BTreeSet<NodePort>,
    pub outputs: BTreeSet<NodePort>,
    pub locals: BTreeSet<NodePort>,
    pub input_clocks: BTreeSet<ClockId>,
    pub io_pins: BTreeSet<NodeId>,
    pub processes: Vec<Process>,
    pub blocks: Vec<Block>,
    pub sub_entities: Vec<usize>,
    pub externals: Vec<NodeId>,
    pub memory: Option<MemoryGroupPorts>,
    pub comment: String,
}

/// Mirror hierarchy of the circuit built for emission: one entity per
/// `ENTITY` group (plus specialized memory entities for SFU groups), blocks
/// for structured areas, processes for the logic.
pub struct Ast {
    pub(crate) formatting: CodeFormatting,
    pub(crate) scopes: Scopes,
    pub(crate) entities: Vec<Entity>,
    pub(crate) helper_package: String,
}

impl Ast {
    pub fn new(formatting: CodeFormatting) -> Self {
        let mut scopes = Scopes::new();
        let helper_package = scopes.allocate_package_name("SilicaHelperPackage", &formatting);
        Self {
            formatting,
            scopes,
            entities: Vec::new(),
            helper_package,
        }
    }

    pub fn formatting(&self) -> &CodeFormatting {
        &self.formatting
    }

    pub fn helper_package_name(&self) -> &str {
        &self.helper_package
    }

    pub fn root_entity_name(&self) -> &str {
        &self.entities[0].name
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|entity| entity.name.as_str())
    }

    /// Builds the complete mirror hierarchy from the optimized circuit.
    pub fn convert(&mut self, circuit: &Circuit) -> Result<(), ExportError> {
        self.build_entity(circuit, circuit.root_group())?;
        self.extract_signals(circuit);
        self.allocate_names(circuit);
        Ok(())
    }

    /// Entities ordered such that every entity precedes all entities that
    /// instantiate it (children first, root last).
    pub fn dependency_sorted_entities(&self) -> Vec<usize> {
        fn visit(ast: &Ast, index: usize, out: &mut Vec<usize>) {
            for &child in &ast.entities[index].sub_entities {
                visit(ast, child, out);
            }
            for block in &ast.entities[index].blocks {
                for &child in &block.sub_entities {
                    visit(ast, child, out);
                }
            }
            out.push(index);
        }
        let mut order = Vec::with_capacity(self.entities.len());
        if !self.entities.is_empty() {
            visit(self, 0, &mut order);
        }
        order
    }

    pub fn dependency_sorted_entity_names(&self) -> Vec<String> {
        self.dependency_sorted_entities()
            .into_iter()
            .map(|index| self.entities[index].name.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // structure

    fn build_entity(&mut self, circuit: &Circuit, group: GroupId) -> Result<usize, ExportError> {
        let index = self.entities.len();
        let name = self
            .scopes
            .allocate_entity_name(&circuit.group(group).name, &self.formatting);
        let scope = self.scopes.create(GLOBAL_SCOPE);
        self.entities.push(Entity {
            name,
            group,
            scope,
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            locals: BTreeSet::new(),
            input_clocks: BTreeSet::new(),
            io_pins: BTreeSet::new(),
            processes: Vec::new(),
            blocks: Vec::new(),
            sub_entities: Vec::new(),
            externals: Vec::new(),
            memory: circuit.group(group).memory_ports().cloned(),
            comment: circuit.group(group).comment.clone(),
        });

        if self.entities[index].memory.is_some() {
            // memory entities synthesize their processes directly from the
            // detected port structure
            return Ok(index);
        }

        let own_nodes: Vec<NodeId> = circuit.group(group).nodes().to_vec();
        let (processes, externals, pins) =
            self.processify(circuit, scope, &own_nodes, "default")?;
        self.entities[index].processes = processes;
        self.entities[index].externals = externals;
        self.entities[index].io_pins.extend(pins);

        let children: Vec<GroupId> = circuit.group(group).children().to_vec();
        for child in children {
            match circuit.group(child).kind {
                GroupKind::Entity => {
                    let sub = self.build_entity(circuit, child)?;
                    self.entities[index].sub_entities.push(sub);
                }
                GroupKind::Sfu => {
                    let sub = self.build_entity(circuit, child)?;
                    self.entities[index].sub_entities.push(sub);
                }
                GroupKind::Area => {
                    if self.area_is_leaf(circuit, child) {
                        let nodes = collect_subtree_nodes(circuit, child);
                        let name = circuit.group(child).name.clone();
                        let (processes, externals, pins) =
                            self.processify(circuit, scope, &nodes, &name)?;
                        self.entities[index].processes.extend(processes);
                        self.entities[index].externals.extend(externals);
                        self.entities[index].io_pins.extend(pins);
                    } else {
                        let block = self.build_block(circuit, index, child)?;
                        self.entities[index].blocks.push(block);
                    }
                }
            }
        }
        Ok(index)
    }

    /// An area with neither child groups nor externals melts into a plain
    /// process of the surrounding entity.
    fn area_is_leaf(&self, circuit: &Circuit, group: GroupId) -> bool {
        circuit.group(group).children().is_empty()
            && circuit
                .group(group)
                .nodes()
                .iter()
                .all(|node| !is_external_node(circuit, *node))
    }

    fn build_block(
        &mut self,
        circuit: &Circuit,
        entity_index: usize,
        group: GroupId,
    ) -> Result<Block, ExportError> {
        let entity_scope = self.entities[entity_index].scope;
        let name = self.scopes.allocate_block_name(
            entity_scope,
            &circuit.group(group).name,
            &self.formatting,
        );

        // the block's own nodes plus everything from nested plain areas
        let mut nodes = circuit.group(group).nodes().to_vec();
        let mut sub_entities = Vec::new();
        let mut stack: Vec<GroupId> = circuit.group(group).children().to_vec();
        while let Some(child) = stack.pop() {
            match circuit.group(child).kind {
                GroupKind::Entity | GroupKind::Sfu => {
                    let sub = self.build_entity(circuit, child)?;
                    sub_entities.push(sub);
                }
                GroupKind::Area => {
                    nodes.extend_from_slice(circuit.group(child).nodes());
                    stack.extend_from_slice(circuit.group(child).children());
                }
            }
        }

        let (processes, externals, pins) =
            self.processify(circuit, entity_scope, &nodes, &circuit.group(group).name)?;
        self.entities[entity_index].externals.extend(externals);
        self.entities[entity_index].io_pins.extend(pins);
        Ok(Block {
            name,
            processes,
            sub_entities,
        })
    }

    /// Splits a node set into one combinational process plus one register
    /// process per distinct `(clock, has-reset)` configuration.
    #[allow(clippy::type_complexity)]
    fn processify(
        &mut self,
        circuit: &Circuit,
        entity_scope: ScopeId,
        nodes: &[NodeId],
        desired_name: &str,
    ) -> Result<(Vec<Process>, Vec<NodeId>, Vec<NodeId>), ExportError> {
        let mut normal = Vec::new();
        let mut registers: std::collections::BTreeMap<RegisterConfig, Vec<NodeId>> =
            std::collections::BTreeMap::new();
        let mut externals = Vec::new();
        let mut pins = Vec::new();

        for &node in nodes {
            match &circuit.node(node).kind {
                NodeKind::Pin(_) => pins.push(node),
                NodeKind::Register => {
                    let clock = circuit.node(node).clock(0).ok_or_else(|| {
                        ExportError::DesignAssert(format!("register {node} has no clock bound"))
                    })?;
                    let config = RegisterConfig {
                        clock,
                        has_reset: circuit
                            .non_signal_driver(node, crate::hlim::node::reg::RESET_VALUE)
                            .is_some(),
                    };
                    registers.entry(config).or_default().push(node);
                }
                kind if is_external_kind(kind) => externals.push(node),
                _ => normal.push(node),
            }
        }

        let mut processes = Vec::new();
        if !normal.is_empty() {
            let name = self.scopes.allocate_process_name(
                entity_scope,
                desired_name,
                false,
                &self.formatting,
            );
            processes.push(Process {
                name,
                scope: self.scopes.create(entity_scope),
                kind: ProcessKind::Combinational,
                nodes: normal,
                inputs: BTreeSet::new(),
                outputs: BTreeSet::new(),
                locals: BTreeSet::new(),
            });
        }
        for (config, nodes) in registers {
            let name = self.scopes.allocate_process_name(
                entity_scope,
                desired_name,
                true,
                &self.formatting,
            );
            processes.push(Process {
                name,
                scope: self.scopes.create(entity_scope),
                kind: ProcessKind::Register(config),
                nodes,
                inputs: BTreeSet::new(),
                outputs: BTreeSet::new(),
                locals: BTreeSet::new(),
            });
        }
        Ok((processes, externals, pins))
    }

    // ------------------------------------------------------------------
    // signal extraction

    #[allow(clippy::needless_range_loop)]
    fn extract_signals(&mut self, circuit: &Circuit) {
        // process level first
        for entity in &mut self.entities {
            for process in entity
                .processes
                .iter_mut()
                .chain(entity.blocks.iter_mut().flat_map(|b| b.processes.iter_mut()))
            {
                extract_process_signals(circuit, process);
            }
        }

        // entity level: a port is an input if any driver is external to the
        // entity subtree, an output if any consumer is external
        for index in 0..self.entities.len() {
            let group = self.entities[index].group;
            let inside = |node: NodeId| -> bool {
                match circuit.node(node).group() {
                    Some(g) => g == group || circuit.group_is_child_of(g, group),
                    None => false,
                }
            };

            let mut inputs = BTreeSet::new();
            let mut outputs = BTreeSet::new();
            let mut input_clocks = BTreeSet::new();
            for node in circuit.node_ids() {
                let data = circuit.node(node);
                let node_inside = inside(node);
                if node_inside {
                    for slot in 0..data.num_clock_slots() {
                        if let Some(clock) = data.clock(slot) {
                            input_clocks.insert(clock);
                        }
                    }
                }
                for input in 0..data.num_inputs() {
                    if let Some(driver) = circuit.driver(node, input) {
                        if circuit.connection_type(driver).is_dependency() {
                            continue;
                        }
                        let driver_inside = inside(driver.node);
                        if node_inside && !driver_inside {
                            inputs.insert(driver);
                        }
                        if !node_inside && driver_inside {
                            outputs.insert(driver);
                        }
                    }
                }
            }
            self.entities[index].inputs = inputs;
            self.entities[index].outputs = outputs;
            self.entities[index].input_clocks = input_clocks;
        }

        // locals: everything named groupings inside the entity need that is
        // produced inside and not already a port (children carry final sets
        // because they were built after their parent, hence higher indices)
        for index in (0..self.entities.len()).rev() {
            let mut needed: BTreeSet<NodePort> = BTreeSet::new();
            for process in self.entities[index]
                .processes
                .iter()
                .chain(self.entities[index].blocks.iter().flat_map(|b| b.processes.iter()))
            {
                needed.extend(process.inputs.iter().copied());
                needed.extend(process.outputs.iter().copied());
            }
            let sub_entities: Vec<usize> = self.entities[index]
                .sub_entities
                .iter()
                .copied()
                .chain(
                    self.entities[index]
                        .blocks
                        .iter()
                        .flat_map(|b| b.sub_entities.iter().copied()),
                )
                .collect();
            for sub in sub_entities {
                needed.extend(self.entities[sub].inputs.iter().copied());
                needed.extend(self.entities[sub].outputs.iter().copied());
            }
            for &pin in &self.entities[index].io_pins {
                if let Some(driver) = circuit.driver(pin, 0) {
                    needed.insert(driver);
                }
            }
            let entity = &mut self.entities[index];
            // a memory entity with an output register needs the sync-read
            // register's value as an intermediate signal
            if let Some(memory_ports) = &entity.memory {
                for read_port in &memory_ports.read_ports {
                    if read_port.output_reg.is_some() {
                        if let Some(sync_reg) = read_port.sync_read_data_reg {
                            needed.insert(NodePort::new(sync_reg, 0));
                        }
                    }
                }
            }
            entity.locals = needed
                .into_iter()
                .filter(|port| {
                    // pin-produced values resolve to the pin port itself
                    !entity.inputs.contains(port)
                        && !entity.outputs.contains(port)
                        && !matches!(circuit.node(port.node).kind, NodeKind::Pin(_))
                })
                .collect();
        }
    }

    // ------------------------------------------------------------------
    // names

    #[allow(clippy::needless_range_loop)]
    fn allocate_names(&mut self, circuit: &Circuit) {
        // global clock names for testbench and script use
        for clock in circuit.clock_ids() {
            let desired = circuit.clock(clock).name.clone();
            self.scopes
                .allocate_clock_name(GLOBAL_SCOPE, clock, &desired, &self.formatting);
        }

        for index in 0..self.entities.len() {
            let scope = self.entities[index].scope;
            let ports: Vec<(NodePort, SignalRole)> = self.entities[index]
                .inputs
                .iter()
                .map(|port| (*port, SignalRole::EntityInput))
                .chain(
                    self.entities[index]
                        .outputs
                        .iter()
                        .map(|port| (*port, SignalRole::EntityOutput)),
                )
                .chain(
                    self.entities[index]
                        .locals
                        .iter()
                        .map(|port| (*port, SignalRole::LocalSignal)),
                )
                .collect();
            for (port, role) in ports {
                let desired = desired_name(circuit, port);
                self.scopes
                    .allocate_node_name(scope, port, &desired, role, &self.formatting);
            }
            let clocks: Vec<ClockId> = self.entities[index].input_clocks.iter().copied().collect();
            for clock in clocks {
                let desired = circuit.clock(clock).name.clone();
                self.scopes
                    .allocate_clock_name(scope, clock, &desired, &self.formatting);
            }
            let pins: Vec<NodeId> = self.entities[index].io_pins.iter().copied().collect();
            for pin in pins {
                let desired = circuit.node(pin).name.clone();
                self.scopes
                    .allocate_pin_name(scope, pin, &desired, &self.formatting);
            }

            let mut locals_to_name: Vec<(ScopeId, NodePort)> = Vec::new();
            for process in self.entities[index]
                .processes
                .iter()
                .chain(self.entities[index].blocks.iter().flat_map(|b| b.processes.iter()))
            {
                for port in &process.locals {
                    locals_to_name.push((process.scope, *port));
                }
            }
            for (process_scope, port) in locals_to_name {
                let desired = desired_name(circuit, port);
                self.scopes.allocate_node_name(
                    process_scope,
                    port,
                    &desired,
                    SignalRole::LocalVariable,
                    &self.formatting,
                );
            }
        }
    }
}

/// All nodes in a group subtree.
fn collect_subtree_nodes(circuit: &Circuit, group: GroupId) -> Vec<NodeId> {
    let mut nodes = Vec::new();
    let mut stack = vec![group];
    while let Some(current) = stack.pop() {
        nodes.extend_from_slice(circuit.group(current).nodes());
        stack.extend_from_slice(circuit.group(current).children());
    }
    nodes
}

fn is_external_kind(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::SignalTap { .. }
            | NodeKind::SignalGenerator(_)
            | NodeKind::Memory { .. }
            | NodeKind::MemReadPort { .. }
            | NodeKind::MemWritePort { .. }
    )
}

fn is_external_node(circuit: &Circuit, node: NodeId) -> bool {
    is_external_kind(&circuit.node(node).kind)
}

fn extract_process_signals(circuit: &Circuit, process: &mut Process) {
    let set: HashSet<NodeId> = process.nodes.iter().copied().collect();
    for &node in &process.nodes {
        let data = circuit.node(node);
        for input in 0..data.num_inputs() {
            if let Some(driver) = circuit.driver(node, input) {
                if !set.contains(&driver.node) && !circuit.connection_type(driver).is_dependency()
                {
                    process.inputs.insert(driver);
                }
            }
        }
        for output in 0..data.num_outputs() {
            let port = NodePort::new(node, output);
            if circuit.connection_type(port).is_dependency() {
                continue;
            }
            if circuit
                .consumers(port)
                .iter()
                .any(|consumer| !set.contains(&consumer.node))
            {
                process.outputs.insert(port);
            }
        }
    }

    if matches!(process.kind, ProcessKind::Combinational) {
        for &node in &process.nodes {
            let data = circuit.node(node);
            // multiplexers, priority chains and multi-use intermediates
            // become process variables; slicing needs a named operand too
            for output in 0..data.num_outputs() {
                let port = NodePort::new(node, output);
                if process.outputs.contains(&port) {
                    continue;
                }
                let materialize = matches!(
                    data.kind,
                    NodeKind::Multiplexer | NodeKind::PriorityConditional
                ) || circuit.consumers(port).len() > 1;
                if materialize && !circuit.consumers(port).is_empty() {
                    process.locals.insert(port);
                }
            }
            if let NodeKind::Rewire(op) = &data.kind {
                for range in &op.ranges {
                    if let crate::hlim::RewireSource::Input { input, offset } = range.source {
                        if let Some(driver) = circuit.driver(node, input) {
                            let full = circuit.connection_type(driver).width;
                            let partial = offset != 0 || range.subwidth != full;
                            if partial
                                && set.contains(&driver.node)
                                && !process.outputs.contains(&driver)
                                && !process.inputs.contains(&driver)
                            {
                                process.locals.insert(driver);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Walks toward a human-given name for a port: the producing node's own
/// name, else the first named signal consuming it.
pub(crate) fn desired_name(circuit: &Circuit, port: NodePort) -> String {
    let node = circuit.node(port.node);
    if !node.name.is_empty() {
        return node.name.clone();
    }
    for consumer in circuit.consumers(port) {
        let candidate = circuit.node(consumer.node);
        if matches!(candidate.kind, NodeKind::Signal) && !candidate.name.is_empty() {
            return candidate.name.clone();
        }
    }
    String::new()
}
