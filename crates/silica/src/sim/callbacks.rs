use crate::clock::{ClockId, ClockRational};
use crate::hlim::{NodeId, NodePort};
use crate::bitvec::BitVectorState;
use crate::sim::SimView;

/// Observer interface of the simulator. Waveform recorders, the testbench
/// recorder and user diagnostics sinks all register through this; the
/// simulator invokes them synchronously within the tick in which an event
/// occurs. The core itself writes no logs.
pub trait SimulatorCallbacks {
    /// The simulation was reset into its power-on state.
    fn on_power_on(&mut self, _view: &SimView<'_>) {}

    /// Simulation time advanced to `time`; fired once per processed event
    /// time, before clock edges of that tick are applied.
    fn on_new_tick(&mut self, _time: ClockRational, _view: &SimView<'_>) {}

    /// A clock line toggled.
    fn on_clock(&mut self, _clock: ClockId, _rising: bool) {}

    fn on_debug_message(&mut self, _source: Option<NodeId>, _message: &str) {}
    fn on_warning(&mut self, _source: Option<NodeId>, _message: &str) {}
    fn on_assert(&mut self, _source: Option<NodeId>, _message: &str) {}

    /// A simulation process drove a pin.
    fn on_sim_proc_output_overridden(&mut self, _output: NodePort, _state: &BitVectorState) {}

    /// A simulation process observed a wire.
    fn on_sim_proc_output_read(&mut self, _output: NodePort, _state: &BitVectorState) {}
}
