use crate::bitvec::{BitVectorState, Plane};
use crate::clock::{ClockId, ClockRational};
use crate::hlim::node::pin;
use crate::hlim::{Circuit, Interpretation, NodePort};
use crate::sim::{SimView, SimulatorCallbacks};
use crate::vhdl::ast::Ast;
use crate::vhdl::{write_file, ExportError};
use crate::HashMap;
use std::path::PathBuf;

fn format_time(time: ClockRational) -> String {
    let ps = (time * ClockRational::new(1_000_000_000_000, 1)).to_integer();
    format!("{ps} ps")
}

/// Simulator callback that replays the observed stimulus and responses as a
/// self-checking VHDL testbench: pin writes become signal assignments, pin
/// reads become `ASSERT`s checked halfway into the following tick.
pub struct TestbenchRecorder {
    name: String,
    path: PathBuf,
    indentation: String,
    body: String,
    asserts: String,
    last_time: ClockRational,
    pin_names: HashMap<NodePort, String>,
    pin_is_bool: HashMap<NodePort, bool>,
    clock_names: Vec<(ClockId, String)>,
    finished: bool,
}

impl TestbenchRecorder {
    pub(crate) fn new(ast: &Ast, circuit: &Circuit, path: PathBuf, name: &str) -> Self {
        let root = &ast.entities[0];
        let indentation = ast.formatting.indentation.clone();
        let mut body = String::new();

        body.push_str("LIBRARY ieee;\n");
        body.push_str("USE ieee.std_logic_1164.ALL;\n");
        body.push_str("USE ieee.numeric_std.all;\n\n");
        body.push_str(&format!("ENTITY {name} IS\nEND {name};\n\n"));
        body.push_str(&format!("ARCHITECTURE tb OF {name} IS\n\n"));

        // one signal per root port
        for declaration in ast.port_declarations(circuit, 0) {
            let declaration = declaration
                .replace(" : IN ", " : ")
                .replace(" : OUT ", " : ")
                .replace(" : INOUT ", " : ");
            body.push_str(&indentation);
            body.push_str(&format!("SIGNAL {declaration};\n"));
        }
        body.push_str("BEGIN\n");

        // instantiate the design under test
        body.push_str(&indentation);
        body.push_str(&format!(
            "inst_root : entity work.{}(impl) port map (\n",
            root.name
        ));
        let mut portmap = Vec::new();
        let mut clock_names = Vec::new();
        let mut resets = Vec::new();
        for &clock in &root.input_clocks {
            let clock_name = ast
                .scopes
                .clock_name(root.scope, clock)
                .expect("clock name allocated")
                .to_string();
            portmap.push(format!("{clock_name} => {clock_name}"));
            if circuit.clock(clock).reset_type != crate::clock::ResetType::None {
                let reset = format!("{clock_name}{}", circuit.clock(clock).reset_name);
                portmap.push(format!("{reset} => {reset}"));
                resets.push((reset, circuit.clock(clock).reset_high_active));
            }
            clock_names.push((clock, clock_name));
        }
        let mut pin_names = HashMap::default();
        let mut pin_is_bool = HashMap::default();
        for &pin_node in &root.io_pins {
            let pin_name = ast
                .scopes
                .pin_name(root.scope, pin_node)
                .expect("pin name allocated")
                .to_string();
            portmap.push(format!("{pin_name} => {pin_name}"));
            let observed = NodePort::new(pin_node, 0);
            if !circuit.consumers(observed).is_empty() {
                pin_names.insert(observed, pin_name.clone());
                pin_is_bool.insert(
                    observed,
                    circuit.connection_type(observed).interpretation == Interpretation::Bit,
                );
            }
            if let Some(driver) = circuit.driver(pin_node, pin::DATA) {
                pin_names.insert(driver, pin_name.clone());
                pin_is_bool.insert(
                    driver,
                    circuit.connection_type(driver).interpretation == Interpretation::Bit,
                );
            }
        }
        for &port in root.inputs.iter().chain(root.outputs.iter()) {
            let port_name = ast.port_name(circuit, root.scope, port);
            portmap.push(format!("{port_name} => {port_name}"));
        }
        for (i, line) in portmap.iter().enumerate() {
            body.push_str(&indentation);
            body.push_str(&indentation);
            body.push_str(line);
            if i + 1 < portmap.len() {
                body.push(',');
            }
            body.push('\n');
        }
        body.push_str(&indentation);
        body.push_str(");\n");

        body.push_str(&indentation);
        body.push_str("sim_process : PROCESS\n");
        body.push_str(&indentation);
        body.push_str("BEGIN\n");

        // power-on preamble: clocks low, resets asserted, one reset pulse
        let indent2 = format!("{indentation}{indentation}");
        for (_, clock_name) in &clock_names {
            body.push_str(&format!("{indent2}{clock_name} <= '0';\n"));
        }
        for (reset, active_high) in &resets {
            let level = if *active_high { '1' } else { '0' };
            body.push_str(&format!("{indent2}{reset} <= '{level}';\n"));
        }
        body.push_str(&format!("{indent2}WAIT FOR 1 us;\n"));
        for (_, clock_name) in &clock_names {
            body.push_str(&format!("{indent2}{clock_name} <= '1';\n"));
        }
        body.push_str(&format!("{indent2}WAIT FOR 1 us;\n"));
        for (_, clock_name) in &clock_names {
            body.push_str(&format!("{indent2}{clock_name} <= '0';\n"));
        }
        for (reset, active_high) in &resets {
            let level = if *active_high { '0' } else { '1' };
            body.push_str(&format!("{indent2}{reset} <= '{level}';\n"));
        }
        body.push_str(&format!("{indent2}WAIT FOR 1 us;\n"));

        Self {
            name: name.to_string(),
            path,
            indentation,
            body,
            asserts: String::new(),
            last_time: ClockRational::new(0, 1),
            pin_names,
            pin_is_bool,
            clock_names,
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn indent2(&self) -> String {
        format!("{}{}", self.indentation, self.indentation)
    }

    /// Collected assertions run halfway between the tick whose signals they
    /// observed and the next one.
    fn flush_wait(&mut self, diff: ClockRational) {
        let indent = self.indent2();
        if self.asserts.is_empty() {
            self.body
                .push_str(&format!("{indent}WAIT FOR {};\n", format_time(diff)));
        } else {
            let half = diff / 2;
            self.body
                .push_str(&format!("{indent}WAIT FOR {};\n", format_time(half)));
            self.body.push_str(&self.asserts);
            self.asserts.clear();
            self.body
                .push_str(&format!("{indent}WAIT FOR {};\n", format_time(half)));
        }
    }

    /// Writes postamble and file; recording after this is a no-op.
    pub fn finish(&mut self) -> Result<(), ExportError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let indent = self.indent2();
        if !self.asserts.is_empty() {
            self.body.push_str(&format!("{indent}WAIT FOR 1 ns;\n"));
            let asserts = std::mem::take(&mut self.asserts);
            self.body.push_str(&asserts);
        }
        self.body.push_str(&format!("{indent}WAIT;\n"));
        self.body.push_str(&self.indentation);
        self.body.push_str("END PROCESS;\n");
        self.body.push_str("END;\n");
        write_file(&self.path, &self.body)
    }
}

impl SimulatorCallbacks for TestbenchRecorder {
    fn on_new_tick(&mut self, time: ClockRational, _view: &SimView<'_>) {
        if self.finished {
            return;
        }
        let diff = time - self.last_time;
        self.last_time = time;
        self.flush_wait(diff);
    }

    fn on_clock(&mut self, clock: ClockId, rising: bool) {
        if self.finished {
            return;
        }
        if let Some((_, name)) = self.clock_names.iter().find(|(id, _)| *id == clock) {
            let indent = self.indent2();
            let level = if rising { '1' } else { '0' };
            self.body.push_str(&format!("{indent}{name} <= '{level}';\n"));
        }
    }

    fn on_sim_proc_output_overridden(&mut self, output: NodePort, state: &BitVectorState) {
        if self.finished {
            return;
        }
        let Some(name) = self.pin_names.get(&output) else {
            return;
        };
        let quote = if self.pin_is_bool[&output] { '\'' } else { '"' };
        let indent = self.indent2();
        self.body.push_str(&format!(
            "{indent}{name} <= {quote}{}{quote};\n",
            state.to_bit_string()
        ));
    }

    fn on_sim_proc_output_read(&mut self, output: NodePort, state: &BitVectorState) {
        if self.finished {
            return;
        }
        let Some(name) = self.pin_names.get(&output) else {
            return;
        };
        let indent = self.indent2();
        if self.pin_is_bool[&output] {
            if state.get(Plane::Defined, 0) {
                self.asserts.push_str(&format!(
                    "{indent}ASSERT {name} = '{}';\n",
                    state.to_bit_string()
                ));
            }
            return;
        }
        if state.all_defined(0, state.len()) {
            self.asserts.push_str(&format!(
                "{indent}ASSERT {name} = \"{}\";\n",
                state.to_bit_string()
            ));
        } else {
            for bit in 0..state.len() {
                if state.get(Plane::Defined, bit) {
                    let value = if state.get(Plane::Value, bit) { '1' } else { '0' };
                    self.asserts.push_str(&format!(
                        "{indent}ASSERT {name}({bit}) = '{value}';\n"
                    ));
                }
            }
        }
    }
}
