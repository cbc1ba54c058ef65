use silica::{
    node, optimize, BitVectorState, Circuit, ClockRational, ConnectionType, LogicOp, NodeKind,
    NodePort, PinPolicy, Simulator,
};

const MHZ: u64 = 1_000_000;

fn run_pin(
    circuit: &Circuit,
    writes: &[(silica::NodeId, u64, usize)],
    observe: NodePort,
) -> String {
    let mut sim = Simulator::new(circuit);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    for (pin, value, width) in writes {
        sim.set_input_pin(*pin, &BitVectorState::from_u64(*value, *width))
            .unwrap();
    }
    sim.reevaluate().unwrap();
    sim.value_of_output(observe).unwrap().to_bit_string()
}

/// `AND(0xFF, x)` cannot constant-fold (an undefined operand bit stays
/// undefined under AND with 1), but the optimized circuit still computes the
/// identity and unused renaming signals disappear.
#[test]
fn constant_fold_and_dce() {
    let mut c = Circuit::new();
    c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let x = c.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    c.node_mut(x).name = "x".to_string();
    let ones = c.add_constant_u64(0xFF, 8);
    let and = c.add_logic(LogicOp::And);
    c.connect(NodePort::new(ones, 0), and, 0).unwrap();
    c.connect(NodePort::new(x, 0), and, 1).unwrap();

    let unused = c.add_signal(ConnectionType::bitvec(8));
    c.connect(NodePort::new(and, 0), unused, 0).unwrap();

    let y = c.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    c.node_mut(y).name = "y".to_string();
    c.connect(NodePort::new(and, 0), y, node::pin::DATA).unwrap();

    optimize(&mut c, 3);
    assert!(!c.contains_node(unused));

    let driver = c.driver(y, node::pin::DATA).unwrap();
    let out = run_pin(&c, &[(x, 0xA5, 8)], driver);
    assert_eq!(out, "10100101");
}

/// A fully constant subnet collapses into a constant and the dead operators
/// disappear.
#[test]
fn fully_constant_subnet_collapses() {
    let mut c = Circuit::new();
    c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let k1 = c.add_constant_u64(0x0F, 8);
    let k2 = c.add_constant_u64(0x35, 8);
    let and = c.add_logic(LogicOp::And);
    c.connect(NodePort::new(k1, 0), and, 0).unwrap();
    c.connect(NodePort::new(k2, 0), and, 1).unwrap();
    let y = c.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    c.connect(NodePort::new(and, 0), y, node::pin::DATA).unwrap();

    optimize(&mut c, 3);
    assert!(!c.contains_node(and));
    let driver = c.driver(y, node::pin::DATA).unwrap();
    assert!(matches!(c.node(driver.node).kind, NodeKind::Constant(_)));
    assert_eq!(run_pin(&c, &[], driver), "00000101");
}

/// Scenario: `R.data = MUX(c, R.out, a)` with no explicit enable becomes
/// `R{enable = c, data = a}`.
#[test]
fn register_mux_feedback_folds_into_enable() {
    let mut c = Circuit::new();
    let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let cond = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    c.node_mut(cond).name = "c".to_string();
    let a = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    c.node_mut(a).name = "a".to_string();

    let r = c.add_register(clk);
    let mux = c.add_multiplexer(2);
    c.connect(NodePort::new(cond, 0), mux, 0).unwrap();
    c.connect(NodePort::new(r, 0), mux, 1).unwrap(); // selected when c == 0
    c.connect(NodePort::new(a, 0), mux, 2).unwrap(); // selected when c == 1
    c.connect(NodePort::new(mux, 0), r, node::reg::DATA).unwrap();

    let y = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    c.connect(NodePort::new(r, 0), y, node::pin::DATA).unwrap();

    optimize(&mut c, 3);

    assert_eq!(c.driver(r, node::reg::ENABLE), Some(NodePort::new(cond, 0)));
    assert_eq!(c.driver(r, node::reg::DATA), Some(NodePort::new(a, 0)));
    assert!(!c.contains_node(mux));

    // behavior: updates only while c is high
    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    sim.set_input_pin(cond, &BitVectorState::from_u64(1, 1)).unwrap();
    sim.set_input_pin(a, &BitVectorState::from_u64(0x9, 4)).unwrap();
    sim.reevaluate().unwrap();
    sim.advance_event().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "1001"
    );
    sim.set_input_pin(cond, &BitVectorState::from_u64(0, 1)).unwrap();
    sim.set_input_pin(a, &BitVectorState::from_u64(0x3, 4)).unwrap();
    sim.reevaluate().unwrap();
    sim.advance(ClockRational::new(1, MHZ)).unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "1001"
    );
}

/// The mirrored feedback pattern `MUX(c, a, R.out)` folds through an
/// inverted condition.
#[test]
fn register_mux_feedback_mirrored_pattern() {
    let mut c = Circuit::new();
    let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let cond = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let a = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);

    let r = c.add_register(clk);
    let mux = c.add_multiplexer(2);
    c.connect(NodePort::new(cond, 0), mux, 0).unwrap();
    c.connect(NodePort::new(a, 0), mux, 1).unwrap(); // selected when c == 0
    c.connect(NodePort::new(r, 0), mux, 2).unwrap(); // selected when c == 1
    c.connect(NodePort::new(mux, 0), r, node::reg::DATA).unwrap();
    let y = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    c.connect(NodePort::new(r, 0), y, node::pin::DATA).unwrap();

    optimize(&mut c, 3);

    assert_eq!(c.driver(r, node::reg::DATA), Some(NodePort::new(a, 0)));
    let enable = c.driver(r, node::reg::ENABLE).expect("enable folded in");
    assert!(matches!(
        c.node(enable.node).kind,
        NodeKind::Logic(LogicOp::Not)
    ));

    // updates only while c is low now
    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    sim.set_input_pin(cond, &BitVectorState::from_u64(0, 1)).unwrap();
    sim.set_input_pin(a, &BitVectorState::from_u64(0x6, 4)).unwrap();
    sim.reevaluate().unwrap();
    sim.advance_event().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "0110"
    );
    sim.set_input_pin(cond, &BitVectorState::from_u64(1, 1)).unwrap();
    sim.set_input_pin(a, &BitVectorState::from_u64(0xF, 4)).unwrap();
    sim.reevaluate().unwrap();
    sim.advance(ClockRational::new(1, MHZ)).unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "0110"
    );
}

/// Chained two-input muxes sharing a selector collapse so the inner mux's
/// redundant side is bypassed.
#[test]
fn chained_muxes_with_equal_condition_merge() {
    let mut c = Circuit::new();
    c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let sel = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let a = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let b = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let d = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);

    let inner = c.add_multiplexer(2);
    c.connect(NodePort::new(sel, 0), inner, 0).unwrap();
    c.connect(NodePort::new(a, 0), inner, 1).unwrap();
    c.connect(NodePort::new(b, 0), inner, 2).unwrap();

    let outer = c.add_multiplexer(2);
    c.connect(NodePort::new(sel, 0), outer, 0).unwrap();
    c.connect(NodePort::new(inner, 0), outer, 1).unwrap(); // taken when sel == 0
    c.connect(NodePort::new(d, 0), outer, 2).unwrap();

    let y = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    c.connect(NodePort::new(outer, 0), y, node::pin::DATA).unwrap();

    silica::optimize(&mut c, 3);

    // when sel == 0 the inner mux picks its side-1 input, so the outer mux
    // reads `a` directly now
    assert_eq!(c.driver(outer, 1), Some(NodePort::new(a, 0)));

    let driver = c.driver(y, node::pin::DATA).unwrap();
    let low = run_pin(&c, &[(sel, 0, 1), (a, 3, 4), (b, 9, 4), (d, 12, 4)], driver);
    assert_eq!(low, "0011");
    let high = run_pin(&c, &[(sel, 1, 1), (a, 3, 4), (b, 9, 4), (d, 12, 4)], driver);
    assert_eq!(high, "1100");
}

/// Selector negations disappear by swapping the data inputs.
#[test]
fn mux_selector_negation_is_culled() {
    let mut c = Circuit::new();
    c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let sel = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let not_sel = c.add_logic(LogicOp::Not);
    c.connect(NodePort::new(sel, 0), not_sel, 0).unwrap();

    let a = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let b = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let mux = c.add_multiplexer(2);
    c.connect(NodePort::new(not_sel, 0), mux, 0).unwrap();
    c.connect(NodePort::new(a, 0), mux, 1).unwrap();
    c.connect(NodePort::new(b, 0), mux, 2).unwrap();
    let y = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    c.connect(NodePort::new(mux, 0), y, node::pin::DATA).unwrap();

    optimize(&mut c, 3);

    assert_eq!(c.driver(mux, 0), Some(NodePort::new(sel, 0)));
    assert!(!c.contains_node(not_sel));
    let driver = c.driver(y, node::pin::DATA).unwrap();
    // not(sel)=1 for sel=0 selects data path 1, which now carries b
    assert_eq!(run_pin(&c, &[(sel, 0, 1), (a, 5, 4), (b, 10, 4)], driver), "1010");
    assert_eq!(run_pin(&c, &[(sel, 1, 1), (a, 5, 4), (b, 10, 4)], driver), "0101");
}

#[test]
fn level_two_culls_unused_and_unnamed() {
    let mut c = Circuit::new();
    c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let x = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let orphan = c.add_signal(ConnectionType::bitvec(4));
    let unnamed1 = c.add_signal(ConnectionType::bitvec(4));
    let unnamed2 = c.add_signal(ConnectionType::bitvec(4));
    c.connect(NodePort::new(x, 0), unnamed1, 0).unwrap();
    c.connect(NodePort::new(unnamed1, 0), unnamed2, 0).unwrap();
    let not = c.add_logic(LogicOp::Not);
    c.connect(NodePort::new(unnamed2, 0), not, 0).unwrap();

    // the NOT has no consumers and no side effects
    optimize(&mut c, 2);
    assert!(!c.contains_node(orphan));
    assert!(!c.contains_node(not));
    assert!(!c.contains_node(unnamed1));
    assert!(!c.contains_node(unnamed2));
}

/// Optimization must not change any observable waveform (scenario 4's
/// property, checked over a handful of stimuli).
#[test]
fn optimization_preserves_observable_behavior() {
    let build = || {
        let mut c = Circuit::new();
        let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));
        let cond = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
        let a = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
        let r = c.add_register(clk);
        let mux = c.add_multiplexer(2);
        c.connect(NodePort::new(cond, 0), mux, 0).unwrap();
        c.connect(NodePort::new(r, 0), mux, 1).unwrap();
        c.connect(NodePort::new(a, 0), mux, 2).unwrap();
        c.connect(NodePort::new(mux, 0), r, node::reg::DATA).unwrap();
        let y = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
        c.connect(NodePort::new(r, 0), y, node::pin::DATA).unwrap();
        (c, cond, a, r)
    };

    let stimulus = [(1u64, 0x3u64), (0, 0x7), (1, 0x9), (1, 0xE), (0, 0x1)];

    let run = |circuit: &Circuit, cond: silica::NodeId, a: silica::NodeId, r: silica::NodeId| {
        let mut sim = Simulator::new(circuit);
        sim.compile_program(None).unwrap();
        sim.power_on().unwrap();
        let mut waveform = Vec::new();
        for (c_val, a_val) in stimulus {
            sim.set_input_pin(cond, &BitVectorState::from_u64(c_val, 1)).unwrap();
            sim.set_input_pin(a, &BitVectorState::from_u64(a_val, 4)).unwrap();
            sim.reevaluate().unwrap();
            sim.advance(ClockRational::new(1, MHZ)).unwrap();
            waveform.push(sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string());
        }
        waveform
    };

    let (before, cond_b, a_b, r_b) = build();
    let reference = run(&before, cond_b, a_b, r_b);

    let (mut after, cond_a, a_a, r_a) = build();
    optimize(&mut after, 3);
    let optimized = run(&after, cond_a, a_a, r_a);

    assert_eq!(reference, optimized);
}
