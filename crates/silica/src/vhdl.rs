use crate::hlim::{Circuit, NodeId};
use crate::sim::Simulator;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

pub(crate) mod ast;
mod entity;
pub mod format;
mod memory;
mod process;
mod scope;
mod testbench;

pub use ast::Ast;
pub use format::{CodeFormatting, ExternalNodeContext, ExternalNodeHandler, SignalRole};
pub use testbench::TestbenchRecorder;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("no external node handler claimed {0} ({1})")]
    UnhandledExternal(NodeId, String),
    #[error("failed to write output file {path}")]
    OutputOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cyclic signal dependency between combinational statements")]
    CyclicSignalDependency,
    #[error("design rule violated: {0}")]
    DesignAssert(String),
}

pub(crate) fn write_file(path: &Path, content: &str) -> Result<(), ExportError> {
    std::fs::write(path, content).map_err(|source| ExportError::OutputOpenFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn helper_package_vhdl(ast: &Ast) -> String {
    let cf = ast.formatting();
    let name = ast.helper_package_name();
    let mut out = String::new();
    out.push_str(&cf.file_header);
    out.push_str("LIBRARY ieee;\n");
    out.push_str("USE ieee.std_logic_1164.ALL;\n");
    out.push_str("USE ieee.numeric_std.all;\n\n");
    out.push_str(&format!("PACKAGE {name} IS\n"));
    cf.indent(&mut out, 1);
    out.push_str("FUNCTION bool2stdlogic(v : BOOLEAN) RETURN STD_LOGIC;\n");
    cf.indent(&mut out, 1);
    out.push_str("FUNCTION stdlogic2bool(v : STD_LOGIC) RETURN BOOLEAN;\n");
    out.push_str(&format!("END PACKAGE {name};\n\n"));

    out.push_str(&format!("PACKAGE BODY {name} IS\n"));
    cf.indent(&mut out, 1);
    out.push_str("FUNCTION bool2stdlogic(v : BOOLEAN) RETURN STD_LOGIC IS\n");
    cf.indent(&mut out, 1);
    out.push_str("BEGIN\n");
    cf.indent(&mut out, 2);
    out.push_str("IF v THEN\n");
    cf.indent(&mut out, 3);
    out.push_str("RETURN '1';\n");
    cf.indent(&mut out, 2);
    out.push_str("ELSE\n");
    cf.indent(&mut out, 3);
    out.push_str("RETURN '0';\n");
    cf.indent(&mut out, 2);
    out.push_str("END IF;\n");
    cf.indent(&mut out, 1);
    out.push_str("END bool2stdlogic;\n\n");
    cf.indent(&mut out, 1);
    out.push_str("FUNCTION stdlogic2bool(v : STD_LOGIC) RETURN BOOLEAN IS\n");
    cf.indent(&mut out, 1);
    out.push_str("BEGIN\n");
    cf.indent(&mut out, 2);
    out.push_str("RETURN v = '1';\n");
    cf.indent(&mut out, 1);
    out.push_str("END stdlogic2bool;\n\n");
    out.push_str(&format!("END PACKAGE BODY {name};\n"));
    out
}

/// Writes the VHDL rendition of a circuit: one file per entity and package
/// in the destination directory, optionally plus a recorded testbench and a
/// GHDL driver script.
pub struct VhdlExport {
    destination: PathBuf,
    formatting: CodeFormatting,
    ast: Option<Ast>,
    testbench: Option<Rc<RefCell<TestbenchRecorder>>>,
}

impl VhdlExport {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            formatting: CodeFormatting::default(),
            ast: None,
            testbench: None,
        }
    }

    pub fn set_formatting(&mut self, formatting: CodeFormatting) -> &mut Self {
        self.formatting = formatting;
        self
    }

    /// For registering external-node handlers before exporting.
    pub fn formatting_mut(&mut self) -> &mut CodeFormatting {
        &mut self.formatting
    }

    fn file_path(&self, name: &str, extension: &str) -> PathBuf {
        self.destination.join(format!("{name}{extension}"))
    }

    /// Builds the AST mirror of the circuit and writes all files.
    pub fn export(&mut self, circuit: &Circuit) -> Result<(), ExportError> {
        std::fs::create_dir_all(&self.destination).map_err(|source| {
            ExportError::OutputOpenFailed {
                path: self.destination.clone(),
                source,
            }
        })?;

        let mut ast = Ast::new(std::mem::take(&mut self.formatting));
        ast.convert(circuit)?;

        let extension = ast.formatting().filename_extension.clone();
        write_file(
            &self.file_path(ast.helper_package_name(), &extension),
            &helper_package_vhdl(&ast),
        )?;
        let names: Vec<String> = ast.entity_names().map(str::to_string).collect();
        for (index, name) in names.iter().enumerate() {
            let content = ast.entity_vhdl(circuit, index)?;
            write_file(&self.file_path(name, &extension), &content)?;
        }
        self.ast = Some(ast);
        Ok(())
    }

    pub fn ast(&self) -> Option<&Ast> {
        self.ast.as_ref()
    }

    /// Attaches a testbench recorder to the simulator; the file is written
    /// on [`finish_testbench`](Self::finish_testbench) (or recorder
    /// `finish`).
    pub fn record_testbench(
        &mut self,
        simulator: &mut Simulator<'_>,
        circuit: &Circuit,
        name: &str,
    ) -> Result<Rc<RefCell<TestbenchRecorder>>, ExportError> {
        let ast = self.ast.as_ref().ok_or_else(|| {
            ExportError::DesignAssert("export the circuit before recording a testbench".to_string())
        })?;
        let extension = ast.formatting().filename_extension.clone();
        let path = self.file_path(name, &extension);
        let recorder = Rc::new(RefCell::new(TestbenchRecorder::new(
            ast, circuit, path, name,
        )));
        simulator.add_callbacks(recorder.clone());
        self.testbench = Some(recorder.clone());
        Ok(recorder)
    }

    pub fn finish_testbench(&mut self) -> Result<(), ExportError> {
        if let Some(testbench) = &self.testbench {
            testbench.borrow_mut().finish()?;
        }
        Ok(())
    }

    /// Emits a shell script that analyzes the helper package, then the
    /// dependency-sorted entities, then the testbench, and elaborates and
    /// runs it under GHDL with VCD and GHW dumps.
    pub fn write_ghdl_script(&self, name: &str) -> Result<(), ExportError> {
        let ast = self.ast.as_ref().ok_or_else(|| {
            ExportError::DesignAssert("export the circuit before writing a script".to_string())
        })?;
        let extension = &ast.formatting().filename_extension;
        let mut out = String::new();
        out.push_str("#!/bin/sh\n");
        out.push_str(&format!(
            "ghdl -a --std=08 --ieee=synopsys {}{}\n",
            ast.helper_package_name(),
            extension
        ));
        for entity in ast.dependency_sorted_entity_names() {
            out.push_str(&format!(
                "ghdl -a --std=08 --ieee=synopsys {entity}{extension}\n"
            ));
        }
        if let Some(testbench) = &self.testbench {
            let testbench_name = testbench.borrow().name().to_string();
            out.push_str(&format!(
                "ghdl -a --std=08 --ieee=synopsys {testbench_name}{extension}\n"
            ));
            out.push_str(&format!("ghdl -e --std=08 --ieee=synopsys {testbench_name}\n"));
            out.push_str(&format!(
                "ghdl -r {testbench_name} --vcd=signals.vcd --wave=signals.ghw\n"
            ));
        }
        write_file(&self.destination.join(name), &out)
    }
}
