//! Silica is a hardware construction library: circuits are built as an
//! in-memory graph of typed primitive nodes, optimized by graph rewrites,
//! simulated with four-valued logic and emitted as a VHDL project.

mod bitvec;
mod clock;
mod hlim;
mod optimizer;
mod sim;
mod vhdl;

pub(crate) use fxhash::FxHashMap as HashMap;
pub(crate) use fxhash::FxHashSet as HashSet;

pub use bitvec::{BitAllocator, BitVectorState, Plane, BITS_PER_BLOCK, NUM_PLANES};
pub use clock::{Clock, ClockId, ClockKind, ClockRational, ResetType, TriggerEvent};
pub use hlim::node::{self, GeneratorOutputs};
pub use hlim::{
    find_memory_groups, ArithmeticOp, Circuit, CompareOp, ConnectionType, Exploration, GroupId,
    GroupKind, HlimError,
    Interpretation, LogicOp, MemoryGroupPorts, MemoryReadPort, MessagePart, Node, NodeGroup,
    NodeId, NodeKind, NodePort, NumericInterpretation, OutputType, PinPolicy, RewireOp,
    RewireRange, RewireSource, SignalProducer, SignalTapLevel, SignalTapTrigger,
};
pub use optimizer::{optimize, CircuitPass, PassManager};
pub use sim::trace::{MemoryTrace, MemoryTraceRecorder, TraceChange, TraceEvent, TraceSignal};
pub use sim::vcd::VcdSink;
pub use sim::{
    Program, RecorderCore, SimError, SimIo, SimView, SignalRef, SimulationProcess, Simulator,
    SimulatorCallbacks, SimulatorControl, StepResult, WaitRequest, WaitTrigger,
};
pub use vhdl::{
    Ast, CodeFormatting, ExportError, ExternalNodeContext, ExternalNodeHandler, SignalRole,
    TestbenchRecorder, VhdlExport,
};
