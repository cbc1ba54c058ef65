use crate::bitvec::Plane;
use crate::clock::ClockId;
use crate::hlim::node::{read_port, reg, write_port};
use crate::hlim::{Circuit, NodeId, NodeKind, NodePort};
use crate::vhdl::ast::Ast;
use crate::vhdl::ExportError;
use itertools::Itertools;
use std::collections::BTreeMap;

impl Ast {
    /// Array type, power-on constant and helper signals of a memory entity.
    pub(crate) fn write_memory_declarations(
        &self,
        circuit: &Circuit,
        index: usize,
        out: &mut String,
    ) -> Result<(), ExportError> {
        let cf = &self.formatting;
        let entity = &self.entities[index];
        let memory_ports = entity.memory.as_ref().expect("memory entity");
        let NodeKind::Memory {
            word_width,
            num_words,
            power_on,
        } = &circuit.node(memory_ports.memory).kind
        else {
            return Err(ExportError::DesignAssert(format!(
                "group of entity {} holds no memory node",
                entity.name
            )));
        };

        let port_widths: Vec<usize> = memory_ports
            .write_ports
            .iter()
            .chain(memory_ports.read_ports.iter().map(|rp| &rp.node))
            .map(|&port| match circuit.node(port).kind {
                NodeKind::MemReadPort { width } | NodeKind::MemWritePort { width } => width,
                _ => 0,
            })
            .chain(std::iter::once(*word_width))
            .unique()
            .collect();
        if port_widths.len() > 1 {
            return Err(ExportError::DesignAssert(format!(
                "memory {} has mixed port sizes {port_widths:?}",
                memory_ports.memory
            )));
        }

        cf.indent(out, 1);
        out.push_str(&format!("CONSTANT WORD_WIDTH : integer := {word_width};\n"));
        cf.indent(out, 1);
        out.push_str(&format!("CONSTANT NUM_WORDS : integer := {num_words};\n"));
        cf.indent(out, 1);
        out.push_str("SUBTYPE mem_word_type IS UNSIGNED(WORD_WIDTH-1 downto 0);\n");
        cf.indent(out, 1);
        out.push_str("TYPE mem_type IS array(NUM_WORDS-1 downto 0) of mem_word_type;\n");

        // power-on content, X/0/1 per bit; all-undefined memories skip the
        // initializer entirely
        let any_defined = (0..power_on.len()).any(|bit| power_on.get(Plane::Defined, bit));
        cf.indent(out, 1);
        if any_defined {
            out.push_str("SIGNAL memory : mem_type := (\n");
            for word in (0..*num_words).rev() {
                cf.indent(out, 2);
                out.push('"');
                out.push_str(
                    &power_on
                        .extract(word * word_width, *word_width)
                        .to_bit_string(),
                );
                out.push('"');
                if word > 0 {
                    out.push(',');
                }
                out.push('\n');
            }
            cf.indent(out, 1);
            out.push_str(");\n");
        } else {
            out.push_str("SIGNAL memory : mem_type;\n");
        }

        Ok(())
    }

    /// One clocked process per involved clock plus concurrent assignments
    /// for asynchronous read ports.
    pub(crate) fn write_memory_statements(
        &self,
        circuit: &Circuit,
        index: usize,
        out: &mut String,
    ) -> Result<(), ExportError> {
        let cf = &self.formatting;
        let entity = &self.entities[index];
        let memory_ports = entity.memory.as_ref().expect("memory entity");
        let scope = entity.scope;

        let input_name = |node: NodeId, input: usize| -> Option<String> {
            circuit
                .driver(node, input)
                .map(|driver| self.port_name(circuit, scope, driver))
        };

        // asynchronous reads
        for rp in &memory_ports.read_ports {
            if rp.sync_read_data_reg.is_none() {
                let data = self.port_name(circuit, scope, rp.data_output);
                let address = input_name(rp.node, read_port::ADDRESS).ok_or_else(|| {
                    ExportError::DesignAssert(format!("read port {} has no address", rp.node))
                })?;
                cf.indent(out, 1);
                out.push_str(&format!("{data} <= memory(TO_INTEGER({address}));\n"));
            }
        }
        out.push('\n');

        // clocked ports grouped per clock
        struct ClockedPorts<'a> {
            writes: Vec<NodeId>,
            reads: Vec<&'a crate::hlim::MemoryReadPort>,
        }
        let mut clocks: BTreeMap<ClockId, ClockedPorts<'_>> = BTreeMap::new();
        for &wp in &memory_ports.write_ports {
            let clock = circuit.node(wp).clock(0).ok_or_else(|| {
                ExportError::DesignAssert(format!("write port {wp} has no clock bound"))
            })?;
            clocks
                .entry(clock)
                .or_insert_with(|| ClockedPorts {
                    writes: Vec::new(),
                    reads: Vec::new(),
                })
                .writes
                .push(wp);
        }
        for rp in &memory_ports.read_ports {
            if let Some(sync_reg) = rp.sync_read_data_reg {
                let clock = circuit.node(sync_reg).clock(0).ok_or_else(|| {
                    ExportError::DesignAssert(format!("register {sync_reg} has no clock bound"))
                })?;
                clocks
                    .entry(clock)
                    .or_insert_with(|| ClockedPorts {
                        writes: Vec::new(),
                        reads: Vec::new(),
                    })
                    .reads
                    .push(rp);
            }
        }

        for (clock, ports) in &clocks {
            let clock_name = self
                .scopes
                .clock_name(scope, *clock)
                .expect("clock name allocated");
            let edge = match circuit.clock(*clock).trigger_event {
                crate::clock::TriggerEvent::Rising => format!("rising_edge({clock_name})"),
                crate::clock::TriggerEvent::Falling => format!("falling_edge({clock_name})"),
                crate::clock::TriggerEvent::RisingAndFalling => format!("{clock_name}'event"),
            };
            cf.indent(out, 1);
            out.push_str(&format!("mem_{clock_name} : PROCESS({clock_name})\n"));
            cf.indent(out, 1);
            out.push_str("BEGIN\n");
            cf.indent(out, 2);
            out.push_str(&format!("IF ({edge}) THEN\n"));

            for &wp in &ports.writes {
                let address = input_name(wp, write_port::ADDRESS).ok_or_else(|| {
                    ExportError::DesignAssert(format!("write port {wp} has no address"))
                })?;
                let data = input_name(wp, write_port::WR_DATA).ok_or_else(|| {
                    ExportError::DesignAssert(format!("write port {wp} has no data"))
                })?;
                let enable = input_name(wp, write_port::WR_ENABLE)
                    .or_else(|| input_name(wp, write_port::ENABLE));
                match enable {
                    Some(enable) => {
                        cf.indent(out, 3);
                        out.push_str(&format!("IF ({enable} = '1') THEN\n"));
                        cf.indent(out, 4);
                        out.push_str(&format!("memory(TO_INTEGER({address})) <= {data};\n"));
                        cf.indent(out, 3);
                        out.push_str("END IF;\n");
                    }
                    None => {
                        cf.indent(out, 3);
                        out.push_str(&format!("memory(TO_INTEGER({address})) <= {data};\n"));
                    }
                }
            }

            for rp in &ports.reads {
                let sync_reg = rp.sync_read_data_reg.expect("grouped by sync register");
                let target = if rp.output_reg.is_some() {
                    self.port_name(circuit, scope, NodePort::new(sync_reg, 0))
                } else {
                    self.port_name(circuit, scope, rp.data_output)
                };
                let address = input_name(rp.node, read_port::ADDRESS).ok_or_else(|| {
                    ExportError::DesignAssert(format!("read port {} has no address", rp.node))
                })?;
                let enable = input_name(rp.node, read_port::ENABLE);
                match enable {
                    Some(enable) => {
                        cf.indent(out, 3);
                        out.push_str(&format!("IF ({enable} = '1') THEN\n"));
                        cf.indent(out, 4);
                        out.push_str(&format!("{target} <= memory(TO_INTEGER({address}));\n"));
                        cf.indent(out, 3);
                        out.push_str("END IF;\n");
                    }
                    None => {
                        cf.indent(out, 3);
                        out.push_str(&format!("{target} <= memory(TO_INTEGER({address}));\n"));
                    }
                }
                if let Some(output_reg) = rp.output_reg {
                    let source = self.port_name(circuit, scope, NodePort::new(sync_reg, 0));
                    let target = self.port_name(circuit, scope, rp.data_output);
                    match circuit.driver(output_reg, reg::ENABLE) {
                        Some(enable) => {
                            let enable = self.port_name(circuit, scope, enable);
                            cf.indent(out, 3);
                            out.push_str(&format!("IF ({enable} = '1') THEN\n"));
                            cf.indent(out, 4);
                            out.push_str(&format!("{target} <= {source};\n"));
                            cf.indent(out, 3);
                            out.push_str("END IF;\n");
                        }
                        None => {
                            cf.indent(out, 3);
                            out.push_str(&format!("{target} <= {source};\n"));
                        }
                    }
                }
            }

            cf.indent(out, 2);
            out.push_str("END IF;\n");
            cf.indent(out, 1);
            out.push_str("END PROCESS;\n\n");
        }
        Ok(())
    }
}
