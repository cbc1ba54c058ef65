use crate::clock::{ClockId, ClockRational};
use crate::hlim::{Circuit, GroupId};
use crate::sim::{RecorderCore, SimView, SimulatorCallbacks};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// IEEE-1364 VCD writer with a `ps` timescale. The module hierarchy mirrors
/// the node-group tree plus a `clocks` pseudo-module. Registers as a
/// simulator callback; undefined bits dump as `X`.
pub struct VcdSink {
    core: RecorderCore,
    writer: BufWriter<File>,
    codes: Vec<String>,
    clock_codes: Vec<String>,
}

fn vcd_identifier(mut index: usize) -> String {
    let mut code = String::new();
    loop {
        code.push(((index % 94) + 33) as u8 as char);
        if index < 94 {
            break;
        }
        index = index / 94 - 1;
    }
    code.chars().rev().collect()
}

fn timestamp_ps(time: ClockRational) -> u64 {
    let scaled = time * ClockRational::new(1_000_000_000_000, 1);
    scaled.to_integer()
}

#[derive(Default)]
struct Module {
    children: BTreeMap<String, Module>,
    signals: Vec<usize>,
}

impl VcdSink {
    /// Opens the file and writes the declaration section; `core` must have
    /// its signals selected already (offsets are assigned here).
    pub fn new<P: AsRef<Path>>(
        path: P,
        circuit: &Circuit,
        mut core: RecorderCore,
    ) -> std::io::Result<Self> {
        core.initialize();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "$version")?;
        writeln!(writer, "  silica simulation output")?;
        writeln!(writer, "$end")?;
        writeln!(writer, "$timescale 1ps $end")?;

        // group signals into the emission module tree
        let mut root = Module::default();
        let mut codes = Vec::with_capacity(core.signals().len());
        for (id, signal) in core.signals().iter().enumerate() {
            codes.push(vcd_identifier(id));
            let mut path: Vec<GroupId> = Vec::new();
            let mut group = circuit.node(signal.port.node).group();
            while let Some(current) = group {
                path.push(current);
                group = circuit.group(current).parent();
            }
            let mut module = &mut root;
            for group in path.iter().rev() {
                let name = circuit.group(*group).name.clone();
                module = module.children.entry(name).or_default();
            }
            module.signals.push(id);
        }

        fn write_module(
            writer: &mut BufWriter<File>,
            core: &RecorderCore,
            codes: &[String],
            module: &Module,
        ) -> std::io::Result<()> {
            for (name, child) in &module.children {
                writeln!(writer, "$scope module {name} $end")?;
                write_module(writer, core, codes, child)?;
                writeln!(writer, "$upscope $end")?;
            }
            for &id in &module.signals {
                let signal = &core.signals()[id];
                writeln!(
                    writer,
                    "$var wire {} {} {} $end",
                    signal.width, codes[id], signal.name
                )?;
            }
            Ok(())
        }
        write_module(&mut writer, &core, &codes, &root)?;

        writeln!(writer, "$scope module clocks $end")?;
        let mut clock_codes = Vec::with_capacity(circuit.num_clocks());
        for clock in circuit.clock_ids() {
            let code = vcd_identifier(codes.len() + clock.0);
            writeln!(
                writer,
                "$var wire 1 {} {} $end",
                code,
                circuit.clock(clock).name
            )?;
            clock_codes.push(code);
        }
        writeln!(writer, "$upscope $end")?;

        writeln!(writer, "$enddefinitions $end")?;
        writeln!(writer, "$dumpvars")?;
        writeln!(writer, "$end")?;

        Ok(Self {
            core,
            writer,
            codes,
            clock_codes,
        })
    }

    fn dump_changes(&mut self, view: &SimView<'_>) {
        for id in self.core.poll(view) {
            let signal = &self.core.signals()[id];
            let rendered = self.core.render(id);
            let result = if signal.width == 1 {
                writeln!(self.writer, "{}{}", rendered, self.codes[id])
            } else {
                writeln!(self.writer, "b{} {}", rendered, self.codes[id])
            };
            result.expect("vcd write failed");
        }
        self.writer.flush().expect("vcd flush failed");
    }
}

impl SimulatorCallbacks for VcdSink {
    fn on_power_on(&mut self, view: &SimView<'_>) {
        writeln!(self.writer, "#0").expect("vcd write failed");
        self.dump_changes(view);
    }

    fn on_new_tick(&mut self, time: ClockRational, view: &SimView<'_>) {
        self.dump_changes(view);
        writeln!(self.writer, "#{}", timestamp_ps(time)).expect("vcd write failed");
    }

    fn on_clock(&mut self, clock: ClockId, rising: bool) {
        let bit = if rising { '1' } else { '0' };
        writeln!(self.writer, "{}{}", bit, self.clock_codes[clock.0]).expect("vcd write failed");
    }
}
