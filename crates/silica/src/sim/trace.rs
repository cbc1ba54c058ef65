use crate::bitvec::BitVectorState;
use crate::clock::ClockRational;
use crate::hlim::NodePort;
use crate::sim::{RecorderCore, SimView, SimulatorCallbacks};

/// In-memory waveform: a flat value buffer plus per-signal records and a
/// sequence of change events.
#[derive(Debug, Default)]
pub struct MemoryTrace {
    pub data: BitVectorState,
    pub signals: Vec<TraceSignal>,
    pub events: Vec<TraceEvent>,
}

#[derive(Debug, Clone)]
pub struct TraceSignal {
    pub port: NodePort,
    pub name: String,
    pub width: usize,
    pub is_bool: bool,
    pub state_offset: usize,
}

#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub timestamp: ClockRational,
    pub changes: Vec<TraceChange>,
}

#[derive(Debug, Clone, Copy)]
pub struct TraceChange {
    pub signal: usize,
    /// Offset of the recorded value in [`MemoryTrace::data`].
    pub data_offset: usize,
}

impl MemoryTrace {
    /// The recorded value of one change.
    pub fn value(&self, change: TraceChange) -> BitVectorState {
        let width = self.signals[change.signal].width;
        self.data.extract(change.data_offset, width)
    }

    /// The last recorded value of a signal up to and including `time`.
    pub fn last_value_at(&self, signal: usize, time: ClockRational) -> Option<BitVectorState> {
        let mut latest = None;
        for event in &self.events {
            if event.timestamp > time {
                break;
            }
            for change in &event.changes {
                if change.signal == signal {
                    latest = Some(*change);
                }
            }
        }
        latest.map(|change| self.value(change))
    }
}

/// Records an in-memory trace of the selected signals.
pub struct MemoryTraceRecorder {
    core: RecorderCore,
    trace: MemoryTrace,
    recording: bool,
}

impl MemoryTraceRecorder {
    pub fn new(mut core: RecorderCore) -> Self {
        core.initialize();
        let signals = core
            .signals()
            .iter()
            .map(|signal| TraceSignal {
                port: signal.port,
                name: signal.name.clone(),
                width: signal.width,
                is_bool: signal.is_bool,
                state_offset: signal.offset,
            })
            .collect();
        Self {
            core,
            trace: MemoryTrace {
                data: BitVectorState::new(),
                signals,
                events: Vec::new(),
            },
            recording: true,
        }
    }

    pub fn start(&mut self) {
        self.recording = true;
    }

    pub fn stop(&mut self) {
        self.recording = false;
    }

    pub fn trace(&self) -> &MemoryTrace {
        &self.trace
    }

    pub fn into_trace(self) -> MemoryTrace {
        self.trace
    }

    fn record(&mut self, timestamp: ClockRational, view: &SimView<'_>) {
        if !self.recording {
            return;
        }
        let changed = self.core.poll(view);
        if changed.is_empty() {
            return;
        }
        let mut changes = Vec::with_capacity(changed.len());
        for id in changed {
            let signal = &self.core.signals()[id];
            let data_offset = self.trace.data.len();
            self.trace.data.resize(data_offset + signal.width);
            let value = self.core.tracked().extract(signal.offset, signal.width);
            self.trace.data.insert(data_offset, &value);
            changes.push(TraceChange {
                signal: id,
                data_offset,
            });
        }
        self.trace.events.push(TraceEvent { timestamp, changes });
    }
}

impl SimulatorCallbacks for MemoryTraceRecorder {
    fn on_power_on(&mut self, view: &SimView<'_>) {
        self.record(ClockRational::new(0, 1), view);
    }

    fn on_new_tick(&mut self, time: ClockRational, view: &SimView<'_>) {
        self.record(time, view);
    }
}
