use num_rational::Ratio;
use std::fmt;

/// Exact rational time/frequency type used throughout the clock tree so that
/// derived-clock chains never accumulate rounding error. Values are only
/// rounded once, at emission boundaries (picoseconds in the VCD and
/// testbench writers).
pub type ClockRational = Ratio<u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockId(pub usize);

impl fmt::Display for ClockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clk{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerEvent {
    Rising,
    Falling,
    RisingAndFalling,
}

impl TriggerEvent {
    pub fn matches(&self, rising: bool) -> bool {
        match self {
            TriggerEvent::Rising => rising,
            TriggerEvent::Falling => !rising,
            TriggerEvent::RisingAndFalling => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetType {
    None,
    Synchronous,
    Asynchronous,
}

#[derive(Debug, Clone)]
pub enum ClockKind {
    Root {
        frequency: ClockRational,
    },
    Derived {
        parent: ClockId,
        multiplier: ClockRational,
        phase_shift: ClockRational,
    },
}

/// A named clock. Root clocks carry an absolute frequency; derived clocks a
/// rational multiplier relative to their parent plus a phase shift.
#[derive(Debug, Clone)]
pub struct Clock {
    pub kind: ClockKind,
    pub name: String,
    pub reset_name: String,
    pub trigger_event: TriggerEvent,
    pub reset_type: ResetType,
    pub reset_high_active: bool,
    pub initialize_regs: bool,
    /// Clock slots bound to this clock, kept for symmetric teardown.
    pub(crate) clocked_nodes: Vec<(crate::hlim::NodeId, usize)>,
}

impl Clock {
    pub(crate) fn new(kind: ClockKind, name: String) -> Self {
        Self {
            kind,
            name,
            reset_name: "_reset".to_string(),
            trigger_event: TriggerEvent::Rising,
            reset_type: ResetType::Synchronous,
            reset_high_active: true,
            initialize_regs: true,
            clocked_nodes: Vec::new(),
        }
    }

    pub fn clocked_nodes(&self) -> &[(crate::hlim::NodeId, usize)] {
        &self.clocked_nodes
    }
}
