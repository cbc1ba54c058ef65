use crate::bitvec::{BitAllocator, BitVectorState, Plane};
use crate::clock::{ClockId, ClockRational};
use crate::hlim::node::reg;
use crate::hlim::{Circuit, NodeId, NodeKind, NodePort, OutputType};
use crate::{HashMap, HashSet};
use bit_set::BitSet;
use itertools::Itertools;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

mod callbacks;
pub(crate) mod eval;
mod process;
mod recorder;
mod scheduler;
pub mod trace;
pub mod vcd;

pub use callbacks::SimulatorCallbacks;
pub use process::{SimulationProcess, WaitRequest, WaitTrigger};
pub use recorder::RecorderCore;

use eval::{EvalDiagnostics, UNCONNECTED};
use process::{until_satisfied, ProcessWait};
use scheduler::{EventKind, Scheduler};

#[derive(Error, Debug)]
pub enum SimError {
    #[error("the simulator has no compiled program")]
    ProgramNotCompiled,
    #[error("cyclic dependency between combinational nodes: {0:?}")]
    CyclicDependency(Vec<NodeId>),
    #[error("design rule violated at {node}: {message}")]
    DesignAssert { node: NodeId, message: String },
}

/// Outcome of an `advance` style call. An abort terminates the call at the
/// next safe point and is reported as a normal return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Advanced,
    /// No events are scheduled.
    Idle,
    Aborted,
}

/// Pre-resolved location of one signal in the packed state buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRef {
    pub offset: usize,
    pub width: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct MappedNode {
    node: NodeId,
    internal: SmallVec<[usize; 4]>,
    inputs: SmallVec<[usize; 6]>,
    outputs: SmallVec<[usize; 2]>,
}

#[derive(Debug, Default, Clone)]
struct ClockDomain {
    latches: Vec<(MappedNode, usize)>,
}

/// A compiled simulation program: the state layout, the reset list, the
/// per-clock latch lists and one topologically ordered combinational
/// execution block.
pub struct Program {
    state_width: usize,
    outputs: HashMap<NodePort, SignalRef>,
    internals: HashMap<NodeId, Vec<usize>>,
    reset_nodes: Vec<MappedNode>,
    clock_domains: Vec<ClockDomain>,
    exec_block: Vec<MappedNode>,
}

impl Program {
    pub(crate) fn compile(
        circuit: &Circuit,
        restrict: Option<&[NodePort]>,
    ) -> Result<Program, SimError> {
        let nodes = match restrict {
            None => circuit.node_ids().collect::<Vec<_>>(),
            Some(outputs) => {
                let mut cone: HashSet<NodeId> = HashSet::default();
                let mut stack: Vec<NodeId> = outputs.iter().map(|port| port.node).collect();
                while let Some(node) = stack.pop() {
                    if cone.insert(node) {
                        for input in 0..circuit.node(node).num_inputs() {
                            if let Some(driver) = circuit.driver(node, input) {
                                stack.push(driver.node);
                            }
                        }
                    }
                }
                cone.into_iter().sorted().collect()
            }
        };

        for &node in &nodes {
            match &circuit.node(node).kind {
                NodeKind::Register => {
                    if let Some(reset) = circuit.non_signal_driver(node, reg::RESET_VALUE) {
                        if !matches!(circuit.node(reset.node).kind, NodeKind::Constant(_)) {
                            return Err(SimError::DesignAssert {
                                node,
                                message: "register reset value must be a constant reachable \
                                          through signal nodes"
                                    .to_string(),
                            });
                        }
                    }
                }
                NodeKind::MemReadPort { width } | NodeKind::MemWritePort { width } => {
                    let input = circuit.node(node).referenced_internal_input().unwrap_or(0);
                    if let Some(memory) = circuit.non_signal_driver(node, input) {
                        if let NodeKind::Memory { word_width, .. } =
                            circuit.node(memory.node).kind
                        {
                            if word_width != *width {
                                return Err(SimError::DesignAssert {
                                    node,
                                    message: format!(
                                        "port width {width} differs from memory word width \
                                         {word_width}"
                                    ),
                                });
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        // State layout: signal nodes alias their driver's offset, everything
        // else gets freshly allocated output and internal-state regions.
        let mut allocator = BitAllocator::new();
        let mut outputs_map: HashMap<NodePort, SignalRef> = HashMap::default();
        let mut internals: HashMap<NodeId, Vec<usize>> = HashMap::default();

        for &node in &nodes {
            if matches!(circuit.node(node).kind, NodeKind::Signal) {
                if let Some(driver) = circuit.non_signal_driver(node, 0) {
                    let width = circuit.connection_type(driver).width;
                    let offset = match outputs_map.get(&driver) {
                        Some(signal) => signal.offset,
                        None => {
                            let offset = allocator.allocate(width);
                            outputs_map.insert(driver, SignalRef { offset, width });
                            offset
                        }
                    };
                    outputs_map.insert(NodePort::new(node, 0), SignalRef { offset, width });
                }
            } else {
                let offsets: Vec<usize> = circuit
                    .node(node)
                    .internal_state_sizes()
                    .iter()
                    .map(|size| allocator.allocate(*size))
                    .collect();
                internals.insert(node, offsets);
                for port in 0..circuit.node(node).num_outputs() {
                    let port = NodePort::new(node, port);
                    let width = circuit.connection_type(port).width;
                    outputs_map.entry(port).or_insert_with(|| SignalRef {
                        offset: allocator.allocate(width),
                        width,
                    });
                }
            }
        }

        let map_node = |node: NodeId| -> MappedNode {
            let data = circuit.node(node);
            let mut internal: SmallVec<[usize; 4]> =
                internals.get(&node).map(|v| v.iter().copied().collect()).unwrap_or_default();
            if let Some(input) = data.referenced_internal_input() {
                let referenced = circuit
                    .non_signal_driver(node, input)
                    .and_then(|memory| internals.get(&memory.node))
                    .and_then(|offsets| offsets.first().copied())
                    .unwrap_or(UNCONNECTED);
                internal.push(referenced);
            }
            let inputs = (0..data.num_inputs())
                .map(|input| match circuit.non_signal_driver(node, input) {
                    Some(driver) => outputs_map
                        .get(&driver)
                        .map(|signal| signal.offset)
                        .unwrap_or(UNCONNECTED),
                    None => UNCONNECTED,
                })
                .collect();
            let outputs = (0..data.num_outputs())
                .map(|port| outputs_map[&NodePort::new(node, port)].offset)
                .collect();
            MappedNode {
                node,
                internal,
                inputs,
                outputs,
            }
        };

        // Partition: constant and latched outputs are produced by the reset
        // list and clock domains and count as ready for the topological
        // ordering of the combinational execution block.
        let mut reset_nodes = Vec::new();
        let mut clock_domains = vec![ClockDomain::default(); circuit.num_clocks()];
        let mut ready: HashSet<NodePort> = HashSet::default();
        let mut remaining = Vec::new();

        for &node in &nodes {
            let data = circuit.node(node);
            if matches!(data.kind, NodeKind::Signal) {
                continue;
            }
            let mapped = map_node(node);

            let mut needs_reset = matches!(data.kind, NodeKind::Memory { .. });
            for port in 0..data.num_outputs() {
                match data.output_type(port) {
                    OutputType::Immediate => {}
                    OutputType::Constant | OutputType::Latched => {
                        ready.insert(NodePort::new(node, port));
                        needs_reset = true;
                    }
                }
            }
            if needs_reset {
                reset_nodes.push(mapped.clone());
            }
            if !data.is_combinational() {
                for slot in 0..data.num_clock_slots() {
                    if let Some(clock) = data.clock(slot) {
                        clock_domains[clock.0].latches.push((mapped.clone(), slot));
                    }
                }
            }
            remaining.push(node);
        }

        let mut exec_block = Vec::new();
        while !remaining.is_empty() {
            let mut progressed = false;
            let mut deferred = Vec::new();
            for node in remaining {
                let all_ready = (0..circuit.node(node).num_inputs()).all(|input| {
                    match circuit.non_signal_driver(node, input) {
                        Some(driver) => ready.contains(&driver),
                        None => true,
                    }
                });
                if all_ready {
                    for port in 0..circuit.node(node).num_outputs() {
                        ready.insert(NodePort::new(node, port));
                    }
                    exec_block.push(map_node(node));
                    progressed = true;
                } else {
                    deferred.push(node);
                }
            }
            if !progressed {
                return Err(SimError::CyclicDependency(deferred));
            }
            remaining = deferred;
        }

        Ok(Program {
            state_width: allocator.total_size(),
            outputs: outputs_map,
            internals,
            reset_nodes,
            clock_domains,
            exec_block,
        })
    }

    pub fn state_width(&self) -> usize {
        self.state_width
    }

    pub fn signal(&self, port: NodePort) -> Option<SignalRef> {
        self.outputs.get(&port).copied()
    }
}

/// Read-only view of the running simulation handed to callbacks.
pub struct SimView<'a> {
    pub(crate) circuit: &'a Circuit,
    pub(crate) program: &'a Program,
    pub(crate) state: &'a BitVectorState,
}

impl SimView<'_> {
    /// The current value of a wire, or `None` if the port was optimized or
    /// compiled away.
    pub fn value_of_output(&self, port: NodePort) -> Option<BitVectorState> {
        let signal = self.program.outputs.get(&port)?;
        Some(self.state.extract(signal.offset, signal.width))
    }

    pub fn circuit(&self) -> &Circuit {
        self.circuit
    }
}

/// IO context handed to simulation processes while they run between
/// suspensions.
pub struct SimIo<'a, 'c> {
    circuit: &'c Circuit,
    program: &'a Program,
    state: &'a mut BitVectorState,
    callbacks: &'a [Rc<RefCell<dyn SimulatorCallbacks>>],
    pins_dirty: &'a mut bool,
    time: ClockRational,
    abort: &'a AtomicBool,
}

impl SimIo<'_, '_> {
    pub fn time(&self) -> ClockRational {
        self.time
    }

    pub fn circuit(&self) -> &Circuit {
        self.circuit
    }

    /// Drives a pin from outside the circuit. The written value reaches the
    /// pin's consumers with the next combinational pass, which the
    /// simulator schedules before the tick ends.
    pub fn set_input_pin(&mut self, pin: NodeId, value: &BitVectorState) {
        assert!(
            matches!(self.circuit.node(pin).kind, NodeKind::Pin(_)),
            "{pin} is not a pin"
        );
        let port = NodePort::new(pin, 0);
        let Some(signal) = self.program.outputs.get(&port) else {
            return; // culled by compilation
        };
        self.state
            .copy_range_from(signal.offset, value, 0, signal.width.min(value.len()));
        *self.pins_dirty = true;
        for callback in self.callbacks {
            callback
                .borrow_mut()
                .on_sim_proc_output_overridden(port, value);
        }
    }

    /// Reads a wire, announcing the observation to the callbacks (the
    /// testbench recorder turns it into an assertion).
    pub fn value_of_output(&mut self, port: NodePort) -> Option<BitVectorState> {
        let signal = self.program.outputs.get(&port)?;
        let value = self.state.extract(signal.offset, signal.width);
        for callback in self.callbacks {
            callback.borrow_mut().on_sim_proc_output_read(port, &value);
        }
        Some(value)
    }

    pub fn output_optimized_away(&self, port: NodePort) -> bool {
        !self.program.outputs.contains_key(&port)
    }

    /// Requests an abort; the current `advance` call returns at the next
    /// safe point.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }
}

/// Clonable handle that can abort a running simulation from callbacks or
/// other code holding no simulator reference.
#[derive(Clone)]
pub struct SimulatorControl {
    abort: Arc<AtomicBool>,
}

impl SimulatorControl {
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }
}

struct ProcessSlot {
    process: Option<Box<dyn SimulationProcess>>,
    wait: ProcessWait,
    seq: u64,
}

type ProcessFactory = Box<dyn Fn() -> Box<dyn SimulationProcess>>;

struct CallbackDiag<'a> {
    callbacks: &'a [Rc<RefCell<dyn SimulatorCallbacks>>],
}

impl EvalDiagnostics for CallbackDiag<'_> {
    fn message(&mut self, node: NodeId, level: crate::hlim::SignalTapLevel, text: &str) {
        use crate::hlim::SignalTapLevel::*;
        for callback in self.callbacks {
            let mut callback = callback.borrow_mut();
            match level {
                Assert => callback.on_assert(Some(node), text),
                Warn => callback.on_warning(Some(node), text),
                Debug | Watch => callback.on_debug_message(Some(node), text),
            }
        }
    }
}

/// The event-driven reference simulator. Compiles the circuit into a
/// [`Program`] snapshot and expects the IR to remain untouched until the
/// program is recompiled.
pub struct Simulator<'c> {
    circuit: &'c Circuit,
    program: Option<Program>,
    state: BitVectorState,
    scheduler: Scheduler,
    clock_levels: BitSet,
    callbacks: Vec<Rc<RefCell<dyn SimulatorCallbacks>>>,
    factories: Vec<ProcessFactory>,
    processes: Vec<ProcessSlot>,
    abort: Arc<AtomicBool>,
    pins_dirty: bool,
    next_seq: u64,
}

impl<'c> Simulator<'c> {
    pub fn new(circuit: &'c Circuit) -> Self {
        Self {
            circuit,
            program: None,
            state: BitVectorState::new(),
            scheduler: Scheduler::new(),
            clock_levels: BitSet::new(),
            callbacks: Vec::new(),
            factories: Vec::new(),
            processes: Vec::new(),
            abort: Arc::new(AtomicBool::new(false)),
            pins_dirty: false,
            next_seq: 0,
        }
    }

    /// Compiles the circuit, optionally restricted to the transitive input
    /// cone of the given output ports.
    pub fn compile_program(&mut self, outputs: Option<&[NodePort]>) -> Result<(), SimError> {
        self.program = Some(Program::compile(self.circuit, outputs)?);
        Ok(())
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn add_callbacks(&mut self, callbacks: Rc<RefCell<dyn SimulatorCallbacks>>) {
        self.callbacks.push(callbacks);
    }

    /// Registers a coroutine factory; processes are (re)created at every
    /// power-on.
    pub fn add_simulation_process<F, P>(&mut self, factory: F)
    where
        F: Fn() -> P + 'static,
        P: SimulationProcess + 'static,
    {
        self.factories
            .push(Box::new(move || Box::new(factory()) as Box<dyn SimulationProcess>));
    }

    pub fn control(&self) -> SimulatorControl {
        SimulatorControl {
            abort: self.abort.clone(),
        }
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    pub fn current_time(&self) -> ClockRational {
        self.scheduler.time
    }

    pub fn clock_state(&self, clock: ClockId) -> bool {
        self.clock_levels.contains(clock.0)
    }

    fn require_program(&self) -> Result<&Program, SimError> {
        self.program.as_ref().ok_or(SimError::ProgramNotCompiled)
    }

    fn view(&self) -> SimView<'_> {
        SimView {
            circuit: self.circuit,
            program: self.program.as_ref().expect("program compiled"),
            state: &self.state,
        }
    }

    /// Resets circuit state and simulation processes into the power-on
    /// state: zeroes the state buffer, runs every reset node, settles the
    /// combinational network, schedules the first clock edges and runs each
    /// process up to its first suspension.
    pub fn power_on(&mut self) -> Result<(), SimError> {
        let width = self.require_program()?.state_width;
        self.state = BitVectorState::undefined(width);
        self.abort.store(false, Ordering::Relaxed);
        self.pins_dirty = false;
        self.scheduler.clear();
        self.clock_levels = BitSet::with_capacity(self.circuit.num_clocks());

        let program = self.program.as_ref().expect("program compiled");
        for mapped in &program.reset_nodes {
            eval::reset_node(
                self.circuit,
                mapped.node,
                &mut self.state,
                &mapped.internal,
                &mapped.outputs,
            );
        }

        for clock in self.circuit.clock_ids() {
            let period = self.circuit.clock_absolute_period(clock);
            let first_rising = period / 2 + self.circuit.clock_absolute_phase(clock);
            self.scheduler
                .push(first_rising, EventKind::ClockEdge { clock, rising: true });
        }

        self.run_exec_block()?;

        {
            let view = self.view();
            for callback in &self.callbacks {
                callback.borrow_mut().on_power_on(&view);
            }
        }

        self.processes = self
            .factories
            .iter()
            .map(|factory| {
                let seq = self.next_seq;
                self.next_seq += 1;
                ProcessSlot {
                    process: Some(factory()),
                    wait: ProcessWait::PowerOn,
                    seq,
                }
            })
            .collect();
        for index in 0..self.processes.len() {
            self.resume_one(index)?;
        }
        if self.pins_dirty {
            self.pins_dirty = false;
            self.run_exec_block()?;
        }
        Ok(())
    }

    /// One combinational pass over the compiled execution block. Returns
    /// `false` when an abort terminated the pass early.
    fn run_exec_block(&mut self) -> Result<bool, SimError> {
        let Some(program) = self.program.as_ref() else {
            return Err(SimError::ProgramNotCompiled);
        };
        let mut diag = CallbackDiag {
            callbacks: &self.callbacks,
        };
        for step in &program.exec_block {
            if self.abort.load(Ordering::Relaxed) {
                return Ok(false);
            }
            eval::evaluate_node(
                self.circuit,
                step.node,
                &mut self.state,
                &step.internal,
                &step.inputs,
                &step.outputs,
                &mut diag,
            );
        }
        Ok(true)
    }

    /// Forces a reevaluation of all combinational networks.
    pub fn reevaluate(&mut self) -> Result<(), SimError> {
        self.pins_dirty = false;
        self.run_exec_block().map(|_| ())
    }

    fn advance_clock_domain(&mut self, clock: ClockId) {
        let program = self.program.as_ref().expect("program compiled");
        for (mapped, clock_port) in &program.clock_domains[clock.0].latches {
            eval::advance_node(
                self.circuit,
                mapped.node,
                &mut self.state,
                &mapped.internal,
                &mapped.outputs,
                *clock_port,
            );
        }
    }

    /// Advances simulation time to the next scheduled event and processes
    /// everything due at that instant: clock edges advance their latches,
    /// one combinational pass runs, then processes whose resume condition
    /// is satisfied run in FIFO order of suspension. A further pass runs
    /// whenever a process modified a pin.
    pub fn advance_event(&mut self) -> Result<StepResult, SimError> {
        self.require_program()?;
        let Some(time) = self.scheduler.next_event_time() else {
            return Ok(StepResult::Idle);
        };
        self.scheduler.time = time;
        {
            let view = self.view();
            for callback in &self.callbacks {
                callback.borrow_mut().on_new_tick(time, &view);
            }
        }

        loop {
            if self.aborted() {
                return Ok(StepResult::Aborted);
            }
            let events = self.scheduler.pop_events_at(time);
            let mut wakes: Vec<usize> = Vec::new();
            let mut activated: Vec<ClockId> = Vec::new();
            for event in &events {
                match event.kind {
                    EventKind::ClockEdge { clock, rising } => {
                        if rising {
                            self.clock_levels.insert(clock.0);
                        } else {
                            self.clock_levels.remove(clock.0);
                        }
                        let half = self.circuit.clock_absolute_period(clock) / 2;
                        self.scheduler
                            .push(time + half, EventKind::ClockEdge { clock, rising: !rising });
                        for callback in &self.callbacks {
                            callback.borrow_mut().on_clock(clock, rising);
                        }
                        if self.circuit.clock(clock).trigger_event.matches(rising) {
                            self.advance_clock_domain(clock);
                            activated.push(clock);
                        }
                    }
                    EventKind::ProcessWake { process } => wakes.push(process),
                }
            }

            if !events.is_empty() || self.pins_dirty {
                self.pins_dirty = false;
                if !self.run_exec_block()? {
                    return Ok(StepResult::Aborted);
                }
            }

            self.resume_due_processes(&wakes, &activated)?;
            if self.aborted() {
                return Ok(StepResult::Aborted);
            }

            let more_at_tick = self.scheduler.next_event_time() == Some(time);
            if !more_at_tick && !self.pins_dirty {
                break;
            }
        }
        Ok(StepResult::Advanced)
    }

    /// Advances through all events up to `duration` from now, or until
    /// aborted; simulation time ends at exactly `now + duration`.
    pub fn advance(&mut self, duration: ClockRational) -> Result<StepResult, SimError> {
        self.require_program()?;
        let end = self.scheduler.time + duration;
        while let Some(next) = self.scheduler.next_event_time() {
            if next > end {
                break;
            }
            if self.advance_event()? == StepResult::Aborted {
                return Ok(StepResult::Aborted);
            }
        }
        self.scheduler.time = end;
        Ok(StepResult::Advanced)
    }

    fn resume_due_processes(
        &mut self,
        wakes: &[usize],
        activated: &[ClockId],
    ) -> Result<bool, SimError> {
        let mut due: Vec<(u64, usize)> = Vec::new();
        for index in 0..self.processes.len() {
            let ready = match self.processes[index].wait {
                ProcessWait::Time => wakes.contains(&index),
                ProcessWait::Clock(clock) => activated.contains(&clock),
                ProcessWait::Until {
                    port,
                    trigger,
                    last,
                } => match self.sample_bit(port) {
                    Some(now) => {
                        let satisfied = until_satisfied(trigger, last, now);
                        if !satisfied {
                            // edge triggers compare against the most recent
                            // evaluation, not the suspension-time sample
                            if let ProcessWait::Until { last, .. } =
                                &mut self.processes[index].wait
                            {
                                *last = now;
                            }
                        }
                        satisfied
                    }
                    None => false,
                },
                ProcessWait::PowerOn | ProcessWait::Finished => false,
            };
            if ready {
                due.push((self.processes[index].seq, index));
            }
        }
        due.sort_unstable();
        let any = !due.is_empty();
        for (_, index) in due {
            if self.aborted() {
                break;
            }
            self.resume_one(index)?;
        }
        Ok(any)
    }

    fn resume_one(&mut self, index: usize) -> Result<(), SimError> {
        let mut process = self.processes[index]
            .process
            .take()
            .expect("process is not re-entrant");
        let request = {
            let program = self.program.as_ref().expect("program compiled");
            let mut io = SimIo {
                circuit: self.circuit,
                program,
                state: &mut self.state,
                callbacks: &self.callbacks,
                pins_dirty: &mut self.pins_dirty,
                time: self.scheduler.time,
                abort: &self.abort,
            };
            process.resume(&mut io)
        };
        self.processes[index].process = Some(process);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.processes[index].seq = seq;
        self.processes[index].wait = match request {
            None => ProcessWait::Finished,
            Some(WaitRequest::For(duration)) => {
                self.scheduler.push(
                    self.scheduler.time + duration,
                    EventKind::ProcessWake { process: index },
                );
                ProcessWait::Time
            }
            Some(WaitRequest::Until { port, trigger }) => {
                let last = self.sample_bit(port).unwrap_or((false, false));
                ProcessWait::Until {
                    port,
                    trigger,
                    last,
                }
            }
            Some(WaitRequest::Clock(clock)) => ProcessWait::Clock(clock),
        };
        Ok(())
    }

    fn sample_bit(&self, port: NodePort) -> Option<(bool, bool)> {
        let program = self.program.as_ref()?;
        let signal = program.outputs.get(&port)?;
        Some((
            self.state.get(Plane::Value, signal.offset),
            self.state.get(Plane::Defined, signal.offset),
        ))
    }

    /// Drives a pin from the outside, e.g. from test harness code running
    /// between `advance` calls.
    pub fn set_input_pin(&mut self, pin: NodeId, value: &BitVectorState) -> Result<(), SimError> {
        let Some(program) = self.program.as_ref() else {
            return Err(SimError::ProgramNotCompiled);
        };
        assert!(
            matches!(self.circuit.node(pin).kind, NodeKind::Pin(_)),
            "{pin} is not a pin"
        );
        let port = NodePort::new(pin, 0);
        if let Some(signal) = program.outputs.get(&port) {
            self.state
                .copy_range_from(signal.offset, value, 0, signal.width.min(value.len()));
            self.pins_dirty = true;
            for callback in &self.callbacks {
                callback
                    .borrow_mut()
                    .on_sim_proc_output_overridden(port, value);
            }
        }
        Ok(())
    }

    /// The current value of a wire. Returns `None` for ports the compiler
    /// culled, see [`output_optimized_away`](Self::output_optimized_away).
    pub fn value_of_output(&self, port: NodePort) -> Option<BitVectorState> {
        let program = self.program.as_ref()?;
        let signal = program.outputs.get(&port)?;
        Some(self.state.extract(signal.offset, signal.width))
    }

    pub fn output_optimized_away(&self, port: NodePort) -> bool {
        match self.program.as_ref() {
            Some(program) => !program.outputs.contains_key(&port),
            None => false,
        }
    }

    /// A slice of a node's internal simulation state.
    pub fn value_of_internal_state(&self, node: NodeId, index: usize) -> Option<BitVectorState> {
        let program = self.program.as_ref()?;
        let offsets = program.internals.get(&node)?;
        let sizes = self.circuit.node(node).internal_state_sizes();
        let offset = *offsets.get(index)?;
        let size = *sizes.get(index)?;
        Some(self.state.extract(offset, size))
    }
}
