use crate::hlim::{Circuit, ConnectionType, Interpretation, NodeId};

/// Role of a signal, selecting the name prefix during allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRole {
    EntityInput,
    EntityOutput,
    LocalSignal,
    LocalVariable,
}

/// Names and declarations handed to an external-node handler.
pub struct ExternalNodeContext {
    pub input_names: Vec<Option<String>>,
    pub output_names: Vec<String>,
    pub clock_names: Vec<Option<String>>,
    pub indentation: usize,
}

/// A hook claiming the instantiation of a primitive the core emitter does
/// not synthesize itself. Returns `true` when it wrote the instantiation.
pub type ExternalNodeHandler =
    Box<dyn Fn(&mut String, &Circuit, NodeId, &ExternalNodeContext) -> bool>;

/// Text-level emission policy: indentation, file naming, identifier
/// sanitation, name prefixes per signal role, and the external-node handler
/// chain.
pub struct CodeFormatting {
    pub indentation: String,
    pub file_header: String,
    pub filename_extension: String,
    external_handlers: Vec<ExternalNodeHandler>,
}

impl Default for CodeFormatting {
    fn default() -> Self {
        Self {
            indentation: "    ".to_string(),
            file_header: "-- Generated by silica. DO NOT MODIFY; changes will be lost on \
                          regeneration.\n"
                .to_string(),
            filename_extension: ".vhdl".to_string(),
            external_handlers: Vec::new(),
        }
    }
}

/// Keeps identifier characters VHDL can stomach; everything else becomes an
/// underscore and the result never starts with a digit or underscore.
pub(crate) fn sanitize_identifier(desired: &str) -> String {
    let mut out = String::with_capacity(desired.len());
    for c in desired.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.starts_with(|c: char| c.is_ascii_digit() || c == '_') {
        out.remove(0);
    }
    if out.ends_with('_') {
        out.pop();
    }
    out
}

impl CodeFormatting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indent(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str(&self.indentation);
        }
    }

    fn attempt_suffix(base: String, attempt: usize) -> String {
        if attempt == 0 {
            base
        } else {
            format!("{}_{}", base, attempt + 1)
        }
    }

    pub fn signal_name(&self, desired: &str, role: SignalRole, attempt: usize) -> String {
        let mut base = sanitize_identifier(desired);
        if base.is_empty() {
            base = "unnamed".to_string();
        }
        let prefixed = match role {
            SignalRole::EntityInput => format!("in_{base}"),
            SignalRole::EntityOutput => format!("out_{base}"),
            SignalRole::LocalSignal => format!("s_{base}"),
            SignalRole::LocalVariable => format!("v_{base}"),
        };
        Self::attempt_suffix(prefixed, attempt)
    }

    pub fn entity_name(&self, desired: &str, attempt: usize) -> String {
        let mut base = sanitize_identifier(desired);
        if base.is_empty() {
            base = "UnnamedEntity".to_string();
        }
        Self::attempt_suffix(base, attempt)
    }

    pub fn block_name(&self, desired: &str, attempt: usize) -> String {
        let mut base = sanitize_identifier(desired);
        if base.is_empty() {
            base = "unnamedBlock".to_string();
        }
        Self::attempt_suffix(base, attempt)
    }

    pub fn process_name(&self, desired: &str, clocked: bool, attempt: usize) -> String {
        let mut base = sanitize_identifier(desired);
        if base.is_empty() {
            base = "unnamedProcess".to_string();
        }
        let suffix = if clocked { "_reg" } else { "_comb" };
        format!("{}{}", Self::attempt_suffix(base, attempt), suffix)
    }

    pub fn clock_name(&self, desired: &str, attempt: usize) -> String {
        let mut base = sanitize_identifier(desired);
        if base.is_empty() {
            base = "unnamedClock".to_string();
        }
        Self::attempt_suffix(base, attempt)
    }

    pub fn io_pin_name(&self, desired: &str, attempt: usize) -> String {
        let mut base = sanitize_identifier(desired);
        if base.is_empty() {
            base = "unnamedIoPin".to_string();
        }
        Self::attempt_suffix(base, attempt)
    }

    pub fn package_name(&self, desired: &str, attempt: usize) -> String {
        let mut base = sanitize_identifier(desired);
        if base.is_empty() {
            base = "UnnamedPackage".to_string();
        }
        Self::attempt_suffix(base, attempt)
    }

    /// Booleans become `STD_LOGIC`, numeric vectors `UNSIGNED`.
    pub fn format_connection_type(&self, out: &mut String, ty: &ConnectionType) {
        match ty.interpretation {
            Interpretation::Bit => out.push_str("STD_LOGIC"),
            Interpretation::BitVec => {
                out.push_str(&format!("UNSIGNED({} downto 0)", ty.width.saturating_sub(1)));
            }
            Interpretation::Dependency => out.push_str("-- dependency"),
        }
    }

    pub fn add_external_node_handler(&mut self, handler: ExternalNodeHandler) {
        self.external_handlers.push(handler);
    }

    /// Runs the handler chain; the first handler that claims the node wins.
    pub(crate) fn instantiate_external(
        &self,
        out: &mut String,
        circuit: &Circuit,
        node: NodeId,
        context: &ExternalNodeContext,
    ) -> bool {
        self.external_handlers
            .iter()
            .any(|handler| handler(out, circuit, node, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_sanitized() {
        assert_eq!(sanitize_identifier("my.signal[3]"), "my_signal_3");
        assert_eq!(sanitize_identifier("3fast"), "fast");
        assert_eq!(sanitize_identifier("__"), "");
        assert_eq!(sanitize_identifier("plain_name"), "plain_name");
    }

    #[test]
    fn prefixes_and_suffixes() {
        let cf = CodeFormatting::default();
        assert_eq!(cf.signal_name("data", SignalRole::EntityInput, 0), "in_data");
        assert_eq!(cf.signal_name("data", SignalRole::LocalSignal, 2), "s_data_3");
        assert_eq!(cf.process_name("core", true, 0), "core_reg");
        assert_eq!(cf.process_name("", false, 1), "unnamedProcess_2_comb");
    }
}
