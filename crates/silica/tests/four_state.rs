use silica::{
    ArithmeticOp, BitVectorState, Circuit, ClockRational, CompareOp, ConnectionType, LogicOp,
    NodePort, PinPolicy, Simulator,
};
use test_case::test_case;

const MHZ: u64 = 1_000_000;

struct TwoInput {
    circuit: Circuit,
    a: silica::NodeId,
    b: silica::NodeId,
    out: NodePort,
}

fn logic_fixture(op: LogicOp, width: usize) -> TwoInput {
    let mut circuit = Circuit::new();
    circuit.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let a = circuit.add_pin(ConnectionType::bitvec(width), PinPolicy::Undefined);
    let b = circuit.add_pin(ConnectionType::bitvec(width), PinPolicy::Undefined);
    let gate = circuit.add_logic(op);
    circuit.connect(NodePort::new(a, 0), gate, 0).unwrap();
    if !op.is_unary() {
        circuit.connect(NodePort::new(b, 0), gate, 1).unwrap();
    }
    TwoInput {
        circuit,
        a,
        b,
        out: NodePort::new(gate, 0),
    }
}

fn run_two_input(fixture: &TwoInput, a: &str, b: &str) -> String {
    let mut sim = Simulator::new(&fixture.circuit);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    sim.set_input_pin(fixture.a, &BitVectorState::from_bit_str(a)).unwrap();
    sim.set_input_pin(fixture.b, &BitVectorState::from_bit_str(b)).unwrap();
    sim.reevaluate().unwrap();
    sim.value_of_output(fixture.out).unwrap().to_bit_string()
}

// dominance rules: AND(x,0)=0 and OR(x,1)=1 regardless of definedness,
// AND(x,1)=x, XOR taints on any undefined operand bit
#[test_case(LogicOp::And,  "10XX", "1X01", "100X" ; "and dominance")]
#[test_case(LogicOp::Or,   "10XX", "1X01", "1XX1" ; "or dominance")]
#[test_case(LogicOp::Nand, "10XX", "1X01", "011X" ; "nand dominance")]
#[test_case(LogicOp::Nor,  "10XX", "1X01", "0XX0" ; "nor dominance")]
#[test_case(LogicOp::Xor,  "10XX", "1101", "01XX" ; "xor taints")]
#[test_case(LogicOp::Xnor, "10XX", "1101", "10XX" ; "xnor taints")]
fn four_valued_logic_tables(op: LogicOp, a: &str, b: &str, expected: &str) {
    let fixture = logic_fixture(op, a.len());
    assert_eq!(run_two_input(&fixture, a, b), expected);
}

#[test]
fn not_preserves_undefined_bits() {
    let fixture = logic_fixture(LogicOp::Not, 4);
    let mut sim = Simulator::new(&fixture.circuit);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    sim.set_input_pin(fixture.a, &BitVectorState::from_bit_str("1X0X")).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(sim.value_of_output(fixture.out).unwrap().to_bit_string(), "0X1X");
}

fn compare_fixture(op: CompareOp) -> TwoInput {
    let mut circuit = Circuit::new();
    circuit.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let a = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    let b = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    let cmp = circuit.add_compare(op);
    circuit.connect(NodePort::new(a, 0), cmp, 0).unwrap();
    circuit.connect(NodePort::new(b, 0), cmp, 1).unwrap();
    TwoInput {
        circuit,
        a,
        b,
        out: NodePort::new(cmp, 0),
    }
}

#[test_case(CompareOp::Eq,  "00001010", "00001010", "1" ; "eq true")]
#[test_case(CompareOp::Neq, "00001010", "00001010", "0" ; "neq false")]
#[test_case(CompareOp::Lt,  "00000001", "00000010", "1" ; "lt true")]
#[test_case(CompareOp::Geq, "00000001", "00000010", "0" ; "geq false")]
#[test_case(CompareOp::Eq,  "0000101X", "00001010", "X" ; "eq undefined taints")]
#[test_case(CompareOp::Lt,  "00000001", "000000X0", "X" ; "lt undefined taints")]
fn comparisons_are_undefined_with_any_undefined_bit(
    op: CompareOp,
    a: &str,
    b: &str,
    expected: &str,
) {
    let fixture = compare_fixture(op);
    assert_eq!(run_two_input(&fixture, a, b), expected);
}

#[test_case(ArithmeticOp::Add, 250, 10, "00000100" ; "add wraps")]
#[test_case(ArithmeticOp::Sub, 5, 10, "11111011" ; "sub wraps")]
#[test_case(ArithmeticOp::Mul, 16, 17, "00010000" ; "mul truncates")]
#[test_case(ArithmeticOp::Div, 100, 7, "00001110" ; "div")]
#[test_case(ArithmeticOp::Rem, 100, 7, "00000010" ; "rem")]
fn arithmetic_on_defined_inputs(op: ArithmeticOp, a: u64, b: u64, expected: &str) {
    let mut circuit = Circuit::new();
    circuit.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let pa = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    let pb = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    let alu = circuit.add_arithmetic(op);
    circuit.connect(NodePort::new(pa, 0), alu, 0).unwrap();
    circuit.connect(NodePort::new(pb, 0), alu, 1).unwrap();

    let mut sim = Simulator::new(&circuit);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    sim.set_input_pin(pa, &BitVectorState::from_u64(a, 8)).unwrap();
    sim.set_input_pin(pb, &BitVectorState::from_u64(b, 8)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(alu, 0)).unwrap().to_bit_string(),
        expected
    );
}

#[test]
fn arithmetic_taints_fully_on_any_undefined_bit() {
    let fixture = {
        let mut circuit = Circuit::new();
        circuit.create_root_clock("clk", ClockRational::new(MHZ, 1));
        let a = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
        let b = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
        let alu = circuit.add_arithmetic(ArithmeticOp::Add);
        circuit.connect(NodePort::new(a, 0), alu, 0).unwrap();
        circuit.connect(NodePort::new(b, 0), alu, 1).unwrap();
        TwoInput {
            circuit,
            a,
            b,
            out: NodePort::new(alu, 0),
        }
    };
    assert_eq!(run_two_input(&fixture, "0000101X", "00000001"), "XXXXXXXX");
}

#[test]
fn division_by_zero_is_undefined() {
    let mut circuit = Circuit::new();
    circuit.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let a = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    let b = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    let alu = circuit.add_arithmetic(ArithmeticOp::Div);
    circuit.connect(NodePort::new(a, 0), alu, 0).unwrap();
    circuit.connect(NodePort::new(b, 0), alu, 1).unwrap();

    let mut sim = Simulator::new(&circuit);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    sim.set_input_pin(a, &BitVectorState::from_u64(42, 8)).unwrap();
    sim.set_input_pin(b, &BitVectorState::from_u64(0, 8)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(alu, 0)).unwrap().to_bit_string(),
        "XXXXXXXX"
    );
}

#[test]
fn wide_arithmetic_crosses_word_boundaries() {
    let mut circuit = Circuit::new();
    circuit.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let a = circuit.add_pin(ConnectionType::bitvec(96), PinPolicy::Undefined);
    let b = circuit.add_pin(ConnectionType::bitvec(96), PinPolicy::Undefined);
    let alu = circuit.add_arithmetic(ArithmeticOp::Add);
    circuit.connect(NodePort::new(a, 0), alu, 0).unwrap();
    circuit.connect(NodePort::new(b, 0), alu, 1).unwrap();

    let mut sim = Simulator::new(&circuit);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();

    // all-ones plus one wraps to zero across the 64-bit block boundary
    let mut ones = BitVectorState::undefined(96);
    ones.set_range(silica::Plane::Value, 0, 96);
    ones.set_range(silica::Plane::Defined, 0, 96);
    let mut one = BitVectorState::undefined(96);
    one.set_range(silica::Plane::Defined, 0, 96);
    one.set_bit(silica::Plane::Value, 0);
    sim.set_input_pin(a, &ones).unwrap();
    sim.set_input_pin(b, &one).unwrap();
    sim.reevaluate().unwrap();
    let out = sim.value_of_output(NodePort::new(alu, 0)).unwrap();
    assert_eq!(out.to_bit_string(), "0".repeat(96));
}

#[test]
fn multiplexer_with_undefined_selector_is_undefined() {
    let mut circuit = Circuit::new();
    circuit.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let sel = circuit.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let a = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    let b = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    let mux = circuit.add_multiplexer(2);
    circuit.connect(NodePort::new(sel, 0), mux, 0).unwrap();
    circuit.connect(NodePort::new(a, 0), mux, 1).unwrap();
    circuit.connect(NodePort::new(b, 0), mux, 2).unwrap();

    let mut sim = Simulator::new(&circuit);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    sim.set_input_pin(a, &BitVectorState::from_u64(0xAA, 8)).unwrap();
    sim.set_input_pin(b, &BitVectorState::from_u64(0xBB, 8)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(mux, 0)).unwrap().to_bit_string(),
        "XXXXXXXX"
    );

    // defined selector picks the corresponding data path
    sim.set_input_pin(sel, &BitVectorState::from_u64(1, 1)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(mux, 0)).unwrap().to_bit_string(),
        "10111011"
    );
}

#[test]
fn multiplexer_selector_out_of_range_is_undefined() {
    let mut circuit = Circuit::new();
    circuit.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let sel = circuit.add_pin(ConnectionType::bitvec(2), PinPolicy::Undefined);
    let a = circuit.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let b = circuit.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let c = circuit.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);
    let mux = circuit.add_multiplexer(3);
    circuit.connect(NodePort::new(sel, 0), mux, 0).unwrap();
    circuit.connect(NodePort::new(a, 0), mux, 1).unwrap();
    circuit.connect(NodePort::new(b, 0), mux, 2).unwrap();
    circuit.connect(NodePort::new(c, 0), mux, 3).unwrap();

    let mut sim = Simulator::new(&circuit);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    sim.set_input_pin(a, &BitVectorState::from_u64(1, 4)).unwrap();
    sim.set_input_pin(b, &BitVectorState::from_u64(2, 4)).unwrap();
    sim.set_input_pin(c, &BitVectorState::from_u64(3, 4)).unwrap();
    sim.set_input_pin(sel, &BitVectorState::from_u64(3, 2)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(mux, 0)).unwrap().to_bit_string(),
        "XXXX"
    );
}

#[test]
fn priority_conditional_picks_first_firing_choice() {
    let mut circuit = Circuit::new();
    circuit.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let c0 = circuit.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let c1 = circuit.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let d0 = circuit.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let d1 = circuit.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let default = circuit.add_pin(ConnectionType::bit(), PinPolicy::Undefined);

    let prio = circuit.add_priority_conditional();
    circuit.connect(NodePort::new(default, 0), prio, 0).unwrap();
    circuit
        .add_priority_choice(prio, NodePort::new(c0, 0), NodePort::new(d0, 0))
        .unwrap();
    circuit
        .add_priority_choice(prio, NodePort::new(c1, 0), NodePort::new(d1, 0))
        .unwrap();

    let mut sim = Simulator::new(&circuit);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();

    // c0=0, c1=1, d1=1, def=0 -> second choice fires
    sim.set_input_pin(c0, &BitVectorState::from_u64(0, 1)).unwrap();
    sim.set_input_pin(c1, &BitVectorState::from_u64(1, 1)).unwrap();
    sim.set_input_pin(d1, &BitVectorState::from_u64(1, 1)).unwrap();
    sim.set_input_pin(default, &BitVectorState::from_u64(0, 1)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(prio, 0)).unwrap().to_bit_string(),
        "1"
    );

    // an undefined earlier condition taints the result even though a later
    // choice would fire
    sim.set_input_pin(c0, &BitVectorState::undefined(1)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(prio, 0)).unwrap().to_bit_string(),
        "X"
    );

    // no firing condition falls back to the default
    sim.set_input_pin(c0, &BitVectorState::from_u64(0, 1)).unwrap();
    sim.set_input_pin(c1, &BitVectorState::from_u64(0, 1)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(prio, 0)).unwrap().to_bit_string(),
        "0"
    );
}

#[test]
fn rewire_slices_and_constant_fills() {
    let mut circuit = Circuit::new();
    circuit.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let src = circuit.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    // output = ones(2) . src[7:4] . zeros(2), LSB first
    let op = silica::RewireOp {
        ranges: vec![
            silica::RewireRange {
                subwidth: 2,
                source: silica::RewireSource::ConstZero,
            },
            silica::RewireRange {
                subwidth: 4,
                source: silica::RewireSource::Input { input: 0, offset: 4 },
            },
            silica::RewireRange {
                subwidth: 2,
                source: silica::RewireSource::ConstOne,
            },
        ],
    };
    let rewire = circuit.add_rewire(1, op);
    circuit.connect(NodePort::new(src, 0), rewire, 0).unwrap();

    let mut sim = Simulator::new(&circuit);
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();
    sim.set_input_pin(src, &BitVectorState::from_u64(0xA5, 8)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(
        sim.value_of_output(NodePort::new(rewire, 0)).unwrap().to_bit_string(),
        "11101000"
    );
}
