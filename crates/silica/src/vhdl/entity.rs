use crate::clock::ResetType;
use crate::hlim::node::pin;
use crate::hlim::{Circuit, Interpretation, NodeId, NodeKind, NodePort};
use crate::vhdl::ast::Ast;
use crate::vhdl::format::ExternalNodeContext;
use crate::vhdl::process::write_process;
use crate::vhdl::scope::ScopeId;
use crate::vhdl::ExportError;

impl Ast {
    /// Resolves the name a grouping uses for a port, routing pin outputs to
    /// the pin's port name.
    pub(crate) fn port_name(&self, circuit: &Circuit, scope: ScopeId, port: NodePort) -> String {
        if matches!(circuit.node(port.node).kind, NodeKind::Pin(_)) && port.port == 0 {
            if let Some(name) = self.scopes.pin_name(scope, port.node) {
                return name.to_string();
            }
        }
        self.scopes
            .node_name(scope, port)
            .unwrap_or_else(|| panic!("no name allocated for {port}"))
            .to_string()
    }

    pub(crate) fn port_declarations(&self, circuit: &Circuit, index: usize) -> Vec<String> {
        let entity = &self.entities[index];
        let mut ports = Vec::new();
        for &clock in &entity.input_clocks {
            let name = self
                .scopes
                .clock_name(entity.scope, clock)
                .expect("clock name allocated");
            ports.push(format!("{name} : IN STD_LOGIC"));
            if circuit.clock(clock).reset_type != ResetType::None {
                ports.push(format!(
                    "{name}{} : IN STD_LOGIC",
                    circuit.clock(clock).reset_name
                ));
            }
        }
        for &pin_node in &entity.io_pins {
            let name = self
                .scopes
                .pin_name(entity.scope, pin_node)
                .expect("pin name allocated");
            let is_input = !circuit.consumers(NodePort::new(pin_node, 0)).is_empty();
            let is_output = circuit.driver(pin_node, pin::DATA).is_some();
            let mut ty = String::new();
            if is_output {
                let driver = circuit
                    .driver(pin_node, pin::DATA)
                    .expect("pin output driver");
                self.formatting
                    .format_connection_type(&mut ty, circuit.connection_type(driver));
            } else {
                self.formatting.format_connection_type(
                    &mut ty,
                    circuit.connection_type(NodePort::new(pin_node, 0)),
                );
            }
            let direction = match (is_input, is_output) {
                (true, true) => "INOUT",
                (true, false) => "IN",
                (false, true) => "OUT",
                (false, false) => continue,
            };
            ports.push(format!("{name} : {direction} {ty}"));
        }
        for &port in &entity.inputs {
            let name = self.port_name(circuit, entity.scope, port);
            let mut ty = String::new();
            self.formatting
                .format_connection_type(&mut ty, circuit.connection_type(port));
            ports.push(format!("{name} : IN {ty}"));
        }
        for &port in &entity.outputs {
            let name = self.port_name(circuit, entity.scope, port);
            let mut ty = String::new();
            self.formatting
                .format_connection_type(&mut ty, circuit.connection_type(port));
            ports.push(format!("{name} : OUT {ty}"));
        }
        ports
    }

    /// The complete `.vhdl` text of one entity.
    pub(crate) fn entity_vhdl(&self, circuit: &Circuit, index: usize) -> Result<String, ExportError> {
        let entity = &self.entities[index];
        let cf = &self.formatting;
        let mut out = String::new();

        out.push_str(&cf.file_header);
        out.push_str("LIBRARY ieee;\n");
        out.push_str("USE ieee.std_logic_1164.ALL;\n");
        out.push_str("USE ieee.numeric_std.all;\n\n");
        out.push_str(&format!("USE work.{}.all;\n\n", self.helper_package));

        out.push_str("------------------------------------------------\n");
        out.push_str(&format!("--  Entity: {}\n", entity.name));
        if !entity.comment.is_empty() {
            for line in entity.comment.lines() {
                out.push_str(&format!("-- {line}\n"));
            }
        }
        out.push_str("------------------------------------------------\n\n");

        out.push_str(&format!("ENTITY {} IS \n", entity.name));
        cf.indent(&mut out, 1);
        out.push_str("PORT(\n");
        let ports = self.port_declarations(circuit, index);
        for (i, port) in ports.iter().enumerate() {
            cf.indent(&mut out, 2);
            out.push_str(port);
            if i + 1 < ports.len() {
                out.push(';');
            }
            out.push('\n');
        }
        cf.indent(&mut out, 1);
        out.push_str(");\n");
        out.push_str(&format!("END {};\n\n", entity.name));

        out.push_str(&format!("ARCHITECTURE impl OF {} IS \n", entity.name));
        if entity.memory.is_some() {
            self.write_memory_declarations(circuit, index, &mut out)?;
        }
        for &local in &entity.locals {
            cf.indent(&mut out, 1);
            let mut ty = String::new();
            cf.format_connection_type(&mut ty, circuit.connection_type(local));
            out.push_str(&format!(
                "SIGNAL {} : {};\n",
                self.port_name(circuit, entity.scope, local),
                ty
            ));
        }
        out.push_str("BEGIN\n");

        if entity.memory.is_some() {
            self.write_memory_statements(circuit, index, &mut out)?;
        }

        for &sub in &entity.sub_entities {
            self.write_instantiation(circuit, index, sub, &mut out, 1);
        }
        for process in &entity.processes {
            write_process(self, circuit, process, &mut out, 1)?;
        }
        for block in &entity.blocks {
            cf.indent(&mut out, 1);
            out.push_str(&format!("{} : BLOCK\n", block.name));
            cf.indent(&mut out, 1);
            out.push_str("BEGIN\n");
            for &sub in &block.sub_entities {
                self.write_instantiation(circuit, index, sub, &mut out, 2);
            }
            for process in &block.processes {
                write_process(self, circuit, process, &mut out, 2)?;
            }
            cf.indent(&mut out, 1);
            out.push_str(&format!("END BLOCK {};\n\n", block.name));
        }

        // drive output pins
        for &pin_node in &entity.io_pins {
            if let Some(driver) = circuit.driver(pin_node, pin::DATA) {
                let pin_name = self
                    .scopes
                    .pin_name(entity.scope, pin_node)
                    .expect("pin name allocated");
                let driver_name = self.port_name(circuit, entity.scope, driver);
                cf.indent(&mut out, 1);
                match circuit.driver(pin_node, pin::OUTPUT_ENABLE) {
                    Some(enable) => {
                        let enable_name = self.port_name(circuit, entity.scope, enable);
                        let high_z = if circuit.connection_type(driver).interpretation
                            == Interpretation::Bit
                        {
                            "'Z'".to_string()
                        } else {
                            "(others => 'Z')".to_string()
                        };
                        out.push_str(&format!(
                            "{pin_name} <= {driver_name} WHEN {enable_name} = '1' ELSE {high_z};\n"
                        ));
                    }
                    None => {
                        out.push_str(&format!("{pin_name} <= {driver_name};\n"));
                    }
                }
            }
        }

        for &external in &entity.externals {
            self.write_external(circuit, index, external, &mut out)?;
        }

        out.push_str("END impl;\n");
        Ok(out)
    }

    fn write_instantiation(
        &self,
        circuit: &Circuit,
        parent: usize,
        child: usize,
        out: &mut String,
        indent: usize,
    ) {
        let cf = &self.formatting;
        let parent_scope = self.entities[parent].scope;
        let child_entity = &self.entities[child];

        cf.indent(out, indent);
        out.push_str(&format!(
            "inst_{} : entity work.{}(impl) port map (\n",
            child_entity.name, child_entity.name
        ));

        let mut lines = Vec::new();
        for &clock in &child_entity.input_clocks {
            let child_name = self
                .scopes
                .clock_name(child_entity.scope, clock)
                .expect("clock name allocated");
            let parent_name = self
                .scopes
                .clock_name(parent_scope, clock)
                .expect("clock name allocated");
            lines.push(format!("{child_name} => {parent_name}"));
            if circuit.clock(clock).reset_type != ResetType::None {
                let reset = &circuit.clock(clock).reset_name;
                lines.push(format!("{child_name}{reset} => {parent_name}{reset}"));
            }
        }
        for &port in child_entity.inputs.iter().chain(child_entity.outputs.iter()) {
            let child_name = self.port_name(circuit, child_entity.scope, port);
            let parent_name = self.port_name(circuit, parent_scope, port);
            lines.push(format!("{child_name} => {parent_name}"));
        }
        for (i, line) in lines.iter().enumerate() {
            cf.indent(out, indent + 1);
            out.push_str(line);
            if i + 1 < lines.len() {
                out.push(',');
            }
            out.push('\n');
        }
        cf.indent(out, indent);
        out.push_str(");\n");
    }

    /// Signal taps are simulation-only diagnostics and emit nothing; every
    /// other external primitive must be claimed by a configured handler.
    fn write_external(
        &self,
        circuit: &Circuit,
        index: usize,
        node: NodeId,
        out: &mut String,
    ) -> Result<(), ExportError> {
        if matches!(circuit.node(node).kind, NodeKind::SignalTap { .. }) {
            return Ok(());
        }
        let entity = &self.entities[index];
        let data = circuit.node(node);
        let context = ExternalNodeContext {
            input_names: (0..data.num_inputs())
                .map(|input| {
                    circuit
                        .driver(node, input)
                        .map(|driver| self.port_name(circuit, entity.scope, driver))
                })
                .collect(),
            output_names: (0..data.num_outputs())
                .map(|port| {
                    self.scopes
                        .node_name(entity.scope, NodePort::new(node, port))
                        .map(str::to_string)
                        .unwrap_or_else(|| "open".to_string())
                })
                .collect(),
            clock_names: (0..data.num_clock_slots())
                .map(|slot| {
                    data.clock(slot).map(|clock| {
                        self.scopes
                            .clock_name(entity.scope, clock)
                            .expect("clock name allocated")
                            .to_string()
                    })
                })
                .collect(),
            indentation: 1,
        };
        if self
            .formatting
            .instantiate_external(out, circuit, node, &context)
        {
            Ok(())
        } else {
            Err(ExportError::UnhandledExternal(
                node,
                circuit.node(node).type_name(),
            ))
        }
    }
}
