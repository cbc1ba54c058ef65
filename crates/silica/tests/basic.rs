use silica::{
    node, ArithmeticOp, BitVectorState, Circuit, ClockRational, ConnectionType, NodePort,
    PinPolicy, Simulator, StepResult,
};

fn bv(value: u64, width: usize) -> BitVectorState {
    BitVectorState::from_u64(value, width)
}

const MHZ: u64 = 1_000_000;

#[test]
fn adder_register_pipeline() {
    let mut c = Circuit::new();
    let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));

    let a = c.add_pin(ConnectionType::bitvec(2), PinPolicy::Undefined);
    c.node_mut(a).name = "a".to_string();
    let b = c.add_pin(ConnectionType::bitvec(2), PinPolicy::Undefined);
    c.node_mut(b).name = "b".to_string();

    let add = c.add_arithmetic(ArithmeticOp::Add);
    c.connect(NodePort::new(a, 0), add, 0).unwrap();
    c.connect(NodePort::new(b, 0), add, 1).unwrap();

    let r = c.add_register(clk);
    c.connect(NodePort::new(add, 0), r, node::reg::DATA).unwrap();

    let y = c.add_pin(ConnectionType::bitvec(2), PinPolicy::Undefined);
    c.node_mut(y).name = "y".to_string();
    c.connect(NodePort::new(r, 0), y, node::pin::DATA).unwrap();

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();

    // drive A=01, B=01; after the first rising edge the register holds 10
    sim.set_input_pin(a, &bv(1, 2)).unwrap();
    sim.set_input_pin(b, &bv(1, 2)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(sim.advance_event().unwrap(), StepResult::Advanced);
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "10"
    );

    // an undefined operand taints the sum and, with the next edge, the
    // register output
    sim.set_input_pin(a, &BitVectorState::undefined(2)).unwrap();
    sim.reevaluate().unwrap();
    sim.advance(ClockRational::new(1, MHZ)).unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "XX"
    );
}

#[test]
fn register_without_reset_powers_on_undefined() {
    let mut c = Circuit::new();
    let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let d = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let r = c.add_register(clk);
    c.connect(NodePort::new(d, 0), r, node::reg::DATA).unwrap();

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "XXXX"
    );
}

#[test]
fn register_reset_value_loads_at_power_on() {
    let mut c = Circuit::new();
    let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let reset_value = c.add_constant_u64(0b1010, 4);
    let d = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let r = c.add_register(clk);
    c.connect(NodePort::new(d, 0), r, node::reg::DATA).unwrap();
    c.connect(NodePort::new(reset_value, 0), r, node::reg::RESET_VALUE)
        .unwrap();

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "1010"
    );
}

#[test]
fn register_enable_gates_the_update() {
    let mut c = Circuit::new();
    let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let d = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let en = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let r = c.add_register(clk);
    c.connect(NodePort::new(d, 0), r, node::reg::DATA).unwrap();
    c.connect(NodePort::new(en, 0), r, node::reg::ENABLE).unwrap();

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();

    sim.set_input_pin(d, &bv(0x5, 4)).unwrap();
    sim.set_input_pin(en, &bv(1, 1)).unwrap();
    sim.reevaluate().unwrap();
    sim.advance_event().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "0101"
    );

    // enable low holds the value
    sim.set_input_pin(d, &bv(0xF, 4)).unwrap();
    sim.set_input_pin(en, &bv(0, 1)).unwrap();
    sim.reevaluate().unwrap();
    sim.advance(ClockRational::new(1, MHZ)).unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "0101"
    );

    // an undefined enable taints the output
    sim.set_input_pin(en, &BitVectorState::undefined(1)).unwrap();
    sim.reevaluate().unwrap();
    sim.advance(ClockRational::new(1, MHZ)).unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(r, 0)).unwrap().to_bit_string(),
        "XXXX"
    );
}

#[test]
fn pin_pull_policies_resolve_undriven_pins() {
    let mut c = Circuit::new();
    c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let up = c.add_pin(ConnectionType::bitvec(4), PinPolicy::PullUp);
    let down = c.add_pin(ConnectionType::bitvec(4), PinPolicy::PullDown);
    let floating = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(up, 0)).unwrap().to_bit_string(),
        "1111"
    );
    assert_eq!(
        sim.value_of_output(NodePort::new(down, 0)).unwrap().to_bit_string(),
        "0000"
    );
    assert_eq!(
        sim.value_of_output(NodePort::new(floating, 0)).unwrap().to_bit_string(),
        "XXXX"
    );
}

#[test]
fn compile_restricted_to_output_cone() {
    let mut c = Circuit::new();
    c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let a = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let b = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let keep = c.add_logic(silica::LogicOp::Not);
    c.connect(NodePort::new(a, 0), keep, 0).unwrap();
    let culled = c.add_logic(silica::LogicOp::Not);
    c.connect(NodePort::new(b, 0), culled, 0).unwrap();

    let mut sim = Simulator::new(&c);
    sim.compile_program(Some(&[NodePort::new(keep, 0)])).unwrap();
    sim.power_on().unwrap();
    sim.set_input_pin(a, &bv(0b1100, 4)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(keep, 0)).unwrap().to_bit_string(),
        "0011"
    );
    assert!(sim.output_optimized_away(NodePort::new(culled, 0)));
    assert!(sim.value_of_output(NodePort::new(culled, 0)).is_none());
}

#[test]
fn simulator_refuses_to_run_without_a_program() {
    let c = Circuit::new();
    let mut sim = Simulator::new(&c);
    assert!(matches!(sim.power_on(), Err(silica::SimError::ProgramNotCompiled)));
}

#[test]
fn combinational_cycle_is_rejected() {
    let mut c = Circuit::new();
    let and1 = c.add_logic(silica::LogicOp::And);
    let and2 = c.add_logic(silica::LogicOp::And);
    let input = c.add_pin(ConnectionType::bitvec(1), PinPolicy::Undefined);
    c.connect(NodePort::new(input, 0), and1, 0).unwrap();
    c.connect(NodePort::new(input, 0), and2, 0).unwrap();
    c.connect(NodePort::new(and2, 0), and1, 1).unwrap();
    c.connect(NodePort::new(and1, 0), and2, 1).unwrap();

    let mut sim = Simulator::new(&c);
    assert!(matches!(
        sim.compile_program(None),
        Err(silica::SimError::CyclicDependency(_))
    ));
}

#[test]
fn clock_states_toggle_with_edges() {
    let mut c = Circuit::new();
    let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let d = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let r = c.add_register(clk);
    c.connect(NodePort::new(d, 0), r, node::reg::DATA).unwrap();

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    assert!(!sim.clock_state(clk));
    sim.advance_event().unwrap(); // rising
    assert!(sim.clock_state(clk));
    sim.advance_event().unwrap(); // falling
    assert!(!sim.clock_state(clk));
}
