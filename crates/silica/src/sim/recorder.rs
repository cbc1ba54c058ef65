use crate::bitvec::{BitAllocator, BitVectorState, Plane};
use crate::hlim::{Circuit, Interpretation, NodeKind, NodePort, SignalTapLevel};
use crate::sim::SimView;
use crate::HashMap;

/// One signal tracked by a waveform recorder.
#[derive(Debug, Clone)]
pub struct RecordedSignal {
    pub port: NodePort,
    pub name: String,
    pub width: usize,
    pub is_bool: bool,
    /// Offset into the recorder's packed tracking buffer.
    pub offset: usize,
}

/// Shared machinery of the waveform sinks: signal selection, a packed copy
/// of the last observed values and per-tick change detection.
#[derive(Debug, Default)]
pub struct RecorderCore {
    signals: Vec<RecordedSignal>,
    index: HashMap<NodePort, usize>,
    tracked: BitVectorState,
    primed: bool,
}

impl RecorderCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_signal(&mut self, circuit: &Circuit, port: NodePort, name_override: &str) {
        if self.index.contains_key(&port) {
            return;
        }
        assert!(
            !circuit.connection_type(port).is_dependency(),
            "dependency edges carry no data to record"
        );
        let node = circuit.node(port.node);
        let name = if name_override.is_empty() {
            let base = if node.name.is_empty() {
                "unnamed"
            } else {
                &node.name
            };
            format!("{}_id_{}", base, port.node.0)
        } else {
            name_override.to_string()
        };
        let ty = circuit.connection_type(port);
        self.index.insert(port, self.signals.len());
        self.signals.push(RecordedSignal {
            port,
            name,
            width: ty.width,
            is_bool: ty.interpretation == Interpretation::Bit,
            offset: 0,
        });
    }

    /// Every pin's driven and observed value.
    pub fn add_all_pins(&mut self, circuit: &Circuit) {
        for id in circuit.node_ids() {
            if matches!(circuit.node(id).kind, NodeKind::Pin(_)) {
                let name = circuit.node(id).name.clone();
                if let Some(driver) = circuit.driver(id, 0) {
                    self.add_signal(circuit, driver, &name);
                }
                if !circuit.consumers(NodePort::new(id, 0)).is_empty() {
                    self.add_signal(circuit, NodePort::new(id, 0), &name);
                }
            }
        }
    }

    /// Only the values the circuit drives out through pins.
    pub fn add_all_out_pins(&mut self, circuit: &Circuit) {
        for id in circuit.node_ids() {
            if matches!(circuit.node(id).kind, NodeKind::Pin(_)) {
                if let Some(driver) = circuit.driver(id, 0) {
                    let name = circuit.node(id).name.clone();
                    self.add_signal(circuit, driver, &name);
                }
            }
        }
    }

    /// Every named signal node.
    pub fn add_all_named_signals(&mut self, circuit: &Circuit) {
        for id in circuit.node_ids() {
            if matches!(circuit.node(id).kind, NodeKind::Signal)
                && !circuit.node(id).name.is_empty()
            {
                let name = circuit.node(id).name.clone();
                self.add_signal(circuit, NodePort::new(id, 0), &name);
            }
        }
    }

    /// The trigger inputs of all watch-level signal taps.
    pub fn add_all_watch_signal_taps(&mut self, circuit: &Circuit) {
        for id in circuit.node_ids() {
            if let NodeKind::SignalTap { level, .. } = &circuit.node(id).kind {
                if *level == SignalTapLevel::Watch {
                    if let Some(driver) = circuit.driver(id, 0) {
                        let name = circuit.node(id).name.clone();
                        self.add_signal(circuit, driver, &name);
                    }
                }
            }
        }
    }

    /// Packs the tracking buffer; call once after signal selection.
    pub fn initialize(&mut self) {
        let mut allocator = BitAllocator::new();
        for signal in &mut self.signals {
            signal.offset = allocator.allocate(signal.width);
        }
        self.tracked = BitVectorState::undefined(allocator.total_size());
    }

    pub fn signals(&self) -> &[RecordedSignal] {
        &self.signals
    }

    pub fn tracked(&self) -> &BitVectorState {
        &self.tracked
    }

    /// Compares the simulator's values against the tracked copy, updates the
    /// copy and returns the ids of all signals that changed. The first poll
    /// reports every signal so sinks capture the power-on state.
    pub fn poll(&mut self, view: &SimView<'_>) -> Vec<usize> {
        let first = !std::mem::replace(&mut self.primed, true);
        let mut changed = Vec::new();
        for (id, signal) in self.signals.iter().enumerate() {
            let Some(current) = view.value_of_output(signal.port) else {
                continue;
            };
            let mut differs = first;
            'planes: for plane in [Plane::Value, Plane::Defined] {
                for bit in 0..signal.width {
                    if differs {
                        break 'planes;
                    }
                    if current.get(plane, bit) != self.tracked.get(plane, signal.offset + bit) {
                        differs = true;
                    }
                }
            }
            if differs {
                self.tracked.copy_range_from(signal.offset, &current, 0, signal.width);
                changed.push(id);
            }
        }
        changed
    }

    /// MSB-first `0`/`1`/`X` rendering of a tracked signal.
    pub fn render(&self, id: usize) -> String {
        let signal = &self.signals[id];
        self.tracked
            .extract(signal.offset, signal.width)
            .to_bit_string()
    }
}
