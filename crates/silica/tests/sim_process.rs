use silica::{
    node, BitVectorState, Circuit, ClockRational, ConnectionType, NodePort, PinPolicy, SimIo,
    Simulator, StepResult, WaitRequest, WaitTrigger,
};

const MHZ: u64 = 1_000_000;

fn bv(value: u64, width: usize) -> BitVectorState {
    BitVectorState::from_u64(value, width)
}

#[test]
fn wait_clock_resumes_after_latches() {
    let mut c = Circuit::new();
    let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let d = c.add_pin(ConnectionType::bitvec(8), PinPolicy::Undefined);
    let r = c.add_register(clk);
    c.connect(NodePort::new(d, 0), r, node::reg::DATA).unwrap();

    let observed = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let observed_in_proc = observed.clone();

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.add_simulation_process(move || {
        let observed = observed_in_proc.clone();
        let mut step = 0usize;
        move |io: &mut SimIo<'_, '_>| -> Option<WaitRequest> {
            match step {
                0 => {
                    io.set_input_pin(d, &bv(0x42, 8));
                    step = 1;
                    Some(WaitRequest::Clock(clk))
                }
                1 => {
                    // resumed after the rising edge advanced the register
                    let value = io.value_of_output(NodePort::new(r, 0)).unwrap();
                    observed.borrow_mut().push(value.to_bit_string());
                    None
                }
                _ => None,
            }
        }
    });
    sim.power_on().unwrap();
    sim.advance(ClockRational::new(1, MHZ)).unwrap();

    assert_eq!(observed.borrow().as_slice(), ["01000010".to_string()]);
}

#[test]
fn wait_for_wakes_at_exact_time() {
    let mut c = Circuit::new();
    c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let pin = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);

    let times = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let times_in_proc = times.clone();

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.add_simulation_process(move || {
        let times = times_in_proc.clone();
        let mut step = 0usize;
        move |io: &mut SimIo<'_, '_>| -> Option<WaitRequest> {
            times.borrow_mut().push(io.time());
            io.set_input_pin(pin, &bv(step as u64, 4));
            step += 1;
            if step < 3 {
                // a third of a period: not aligned with any clock edge
                Some(WaitRequest::For(ClockRational::new(1, 3 * MHZ)))
            } else {
                None
            }
        }
    });
    sim.power_on().unwrap();
    sim.advance(ClockRational::new(1, MHZ)).unwrap();

    assert_eq!(
        times.borrow().as_slice(),
        [
            ClockRational::new(0, 1),
            ClockRational::new(1, 3 * MHZ),
            ClockRational::new(2, 3 * MHZ),
        ]
    );
}

#[test]
fn wait_until_rising_edge_of_a_wire() {
    let mut c = Circuit::new();
    let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let d = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let r = c.add_register(clk);
    c.connect(NodePort::new(d, 0), r, node::reg::DATA).unwrap();

    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let seen_in_proc = seen.clone();

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.add_simulation_process(move || {
        let seen = seen_in_proc.clone();
        let mut started = false;
        move |io: &mut SimIo<'_, '_>| -> Option<WaitRequest> {
            if !started {
                started = true;
                io.set_input_pin(d, &bv(0, 1));
                return Some(WaitRequest::Until {
                    port: NodePort::new(r, 0),
                    trigger: WaitTrigger::Rising,
                });
            }
            seen.borrow_mut().push(io.time());
            None
        }
    });
    sim.power_on().unwrap();

    // register stays low for two cycles, then the input goes high
    sim.advance(ClockRational::new(2, MHZ)).unwrap();
    assert!(seen.borrow().is_empty());

    sim.set_input_pin(d, &bv(1, 1)).unwrap();
    sim.reevaluate().unwrap();
    sim.advance(ClockRational::new(1, MHZ)).unwrap();
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn abort_terminates_advance_at_a_safe_point() {
    let mut c = Circuit::new();
    c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let _pin = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    sim.add_simulation_process(move || {
        let mut ticks = 0usize;
        move |io: &mut SimIo<'_, '_>| -> Option<WaitRequest> {
            ticks += 1;
            if ticks == 3 {
                io.abort();
            }
            Some(WaitRequest::For(ClockRational::new(1, 2 * MHZ)))
        }
    });
    sim.power_on().unwrap();
    let result = sim.advance(ClockRational::new(1_000, MHZ)).unwrap();
    assert_eq!(result, StepResult::Aborted);
    // simulation stopped long before the requested end time
    assert!(sim.current_time() < ClockRational::new(10, MHZ));

    // power-on clears the abort and the simulation is usable again (the
    // window stays short of the process's third resume)
    sim.power_on().unwrap();
    assert_eq!(
        sim.advance(ClockRational::new(1, 2 * MHZ)).unwrap(),
        StepResult::Advanced
    );
}

#[test]
fn processes_resume_in_fifo_order() {
    let mut c = Circuit::new();
    let clk = c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let d = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let r = c.add_register(clk);
    c.connect(NodePort::new(d, 0), r, node::reg::DATA).unwrap();

    let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

    let mut sim = Simulator::new(&c);
    sim.compile_program(None).unwrap();
    for tag in ["first", "second", "third"] {
        let order = order.clone();
        sim.add_simulation_process(move || {
            let order = order.clone();
            let mut resumed = false;
            move |_io: &mut SimIo<'_, '_>| -> Option<WaitRequest> {
                if resumed {
                    order.borrow_mut().push(tag);
                    None
                } else {
                    resumed = true;
                    Some(WaitRequest::Clock(clk))
                }
            }
        });
    }
    sim.power_on().unwrap();
    sim.advance(ClockRational::new(1, MHZ)).unwrap();
    assert_eq!(order.borrow().as_slice(), ["first", "second", "third"]);
}

#[test]
fn signal_taps_report_through_callbacks() {
    use silica::{SimulatorCallbacks, SimView};

    #[derive(Default)]
    struct Sink {
        warnings: Vec<String>,
        debug: Vec<String>,
    }
    impl SimulatorCallbacks for Sink {
        fn on_warning(&mut self, _source: Option<silica::NodeId>, message: &str) {
            self.warnings.push(message.to_string());
        }
        fn on_debug_message(&mut self, _source: Option<silica::NodeId>, message: &str) {
            self.debug.push(message.to_string());
        }
        fn on_new_tick(&mut self, _time: ClockRational, _view: &SimView<'_>) {}
    }

    let mut c = Circuit::new();
    c.create_root_clock("clk", ClockRational::new(MHZ, 1));
    let trigger = c.add_pin(ConnectionType::bit(), PinPolicy::Undefined);
    let payload = c.add_pin(ConnectionType::bitvec(4), PinPolicy::Undefined);

    let tap = c.add_signal_tap(
        silica::SignalTapLevel::Warn,
        silica::SignalTapTrigger::FirstInputHigh,
    );
    c.connect(NodePort::new(trigger, 0), tap, 0).unwrap();
    let payload_input = c.add_tap_input(tap, NodePort::new(payload, 0)).unwrap();
    c.add_tap_message_part(tap, silica::MessagePart::Text("payload is ".to_string()));
    c.add_tap_message_part(tap, silica::MessagePart::Input(payload_input));

    let sink = std::rc::Rc::new(std::cell::RefCell::new(Sink::default()));
    let mut sim = Simulator::new(&c);
    sim.add_callbacks(sink.clone());
    sim.compile_program(None).unwrap();
    sim.power_on().unwrap();

    sim.set_input_pin(payload, &bv(0b1001, 4)).unwrap();
    sim.set_input_pin(trigger, &bv(0, 1)).unwrap();
    sim.reevaluate().unwrap();
    assert!(sink.borrow().warnings.is_empty());

    sim.set_input_pin(trigger, &bv(1, 1)).unwrap();
    sim.reevaluate().unwrap();
    assert_eq!(sink.borrow().warnings.as_slice(), ["payload is 1001".to_string()]);

    // a first-input trigger fires only once
    sim.reevaluate().unwrap();
    assert_eq!(sink.borrow().warnings.len(), 1);
}
