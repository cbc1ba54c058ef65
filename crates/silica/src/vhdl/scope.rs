use crate::clock::ClockId;
use crate::hlim::{NodeId, NodePort};
use crate::vhdl::format::{CodeFormatting, SignalRole};
use crate::{HashMap, HashSet};
use once_cell::sync::Lazy;

/// VHDL-93 reserved words; every scope chain is seeded with them so no
/// allocated name can collide case-insensitively.
static RESERVED_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "abs", "access", "after", "alias", "all", "and", "architecture", "array", "assert",
        "attribute", "begin", "block", "body", "buffer", "bus", "case", "component",
        "configuration", "constant", "disconnect", "downto", "else", "elsif", "end", "entity",
        "exit", "file", "for", "function", "generate", "generic", "group", "guarded", "if",
        "impure", "in", "inertial", "inout", "is", "label", "library", "linkage", "literal",
        "loop", "map", "mod", "nand", "new", "next", "nor", "not", "null", "of", "on", "open",
        "or", "others", "out", "package", "port", "postponed", "procedure", "process", "pure",
        "range", "record", "register", "reject", "return", "rol", "ror", "select", "severity",
        "signal", "shared", "sla", "sll", "sra", "srl", "subtype", "then", "to", "transport",
        "type", "unaffected", "units", "until", "use", "variable", "wait", "when", "while",
        "with", "xnor", "xor",
    ]
    .into_iter()
    .collect()
});

pub(crate) type ScopeId = usize;

#[derive(Default)]
struct ScopeData {
    parent: Option<ScopeId>,
    /// Lowercased names taken in this scope (VHDL identifiers compare
    /// case-insensitively).
    in_use: HashSet<String>,
    node_names: HashMap<NodePort, String>,
    clock_names: HashMap<ClockId, String>,
    pin_names: HashMap<NodeId, String>,
}

/// Arena of lexically linked namespace scopes. Scope 0 is the global scope
/// holding entity, package and clock names.
pub(crate) struct Scopes {
    scopes: Vec<ScopeData>,
}

pub(crate) const GLOBAL_SCOPE: ScopeId = 0;

impl Scopes {
    pub fn new() -> Self {
        Self {
            scopes: vec![ScopeData::default()],
        }
    }

    pub fn create(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(ScopeData {
            parent: Some(parent),
            ..ScopeData::default()
        });
        self.scopes.len() - 1
    }

    fn is_in_use(&self, scope: ScopeId, lowercase: &str) -> bool {
        if RESERVED_WORDS.contains(lowercase) {
            return true;
        }
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.scopes[id].in_use.contains(lowercase) {
                return true;
            }
            current = self.scopes[id].parent;
        }
        false
    }

    fn claim(&mut self, scope: ScopeId, make: impl Fn(usize) -> String) -> String {
        let mut attempt = 0;
        loop {
            let name = make(attempt);
            if !self.is_in_use(scope, &name.to_lowercase()) {
                self.scopes[scope].in_use.insert(name.to_lowercase());
                return name;
            }
            attempt += 1;
        }
    }

    pub fn allocate_node_name(
        &mut self,
        scope: ScopeId,
        port: NodePort,
        desired: &str,
        role: SignalRole,
        formatting: &CodeFormatting,
    ) -> String {
        debug_assert!(!self.scopes[scope].node_names.contains_key(&port));
        let name = self.claim(scope, |attempt| formatting.signal_name(desired, role, attempt));
        self.scopes[scope].node_names.insert(port, name.clone());
        name
    }

    /// A clock already named anywhere up the scope chain keeps that name, so
    /// ports and port maps agree on it across entities.
    pub fn allocate_clock_name(
        &mut self,
        scope: ScopeId,
        clock: ClockId,
        desired: &str,
        formatting: &CodeFormatting,
    ) -> String {
        if let Some(existing) = self.clock_name(scope, clock) {
            return existing.to_string();
        }
        let name = self.claim(scope, |attempt| formatting.clock_name(desired, attempt));
        self.scopes[scope].clock_names.insert(clock, name.clone());
        name
    }

    pub fn allocate_pin_name(
        &mut self,
        scope: ScopeId,
        pin: NodeId,
        desired: &str,
        formatting: &CodeFormatting,
    ) -> String {
        let name = self.claim(scope, |attempt| formatting.io_pin_name(desired, attempt));
        self.scopes[scope].pin_names.insert(pin, name.clone());
        name
    }

    pub fn allocate_entity_name(&mut self, desired: &str, formatting: &CodeFormatting) -> String {
        self.claim(GLOBAL_SCOPE, |attempt| formatting.entity_name(desired, attempt))
    }

    pub fn allocate_package_name(&mut self, desired: &str, formatting: &CodeFormatting) -> String {
        self.claim(GLOBAL_SCOPE, |attempt| formatting.package_name(desired, attempt))
    }

    pub fn allocate_block_name(
        &mut self,
        scope: ScopeId,
        desired: &str,
        formatting: &CodeFormatting,
    ) -> String {
        self.claim(scope, |attempt| formatting.block_name(desired, attempt))
    }

    pub fn allocate_process_name(
        &mut self,
        scope: ScopeId,
        desired: &str,
        clocked: bool,
        formatting: &CodeFormatting,
    ) -> String {
        self.claim(scope, |attempt| formatting.process_name(desired, clocked, attempt))
    }

    /// Walks the scope chain to the allocated name of a node port.
    pub fn node_name(&self, scope: ScopeId, port: NodePort) -> Option<&str> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(name) = self.scopes[id].node_names.get(&port) {
                return Some(name);
            }
            current = self.scopes[id].parent;
        }
        None
    }

    pub fn clock_name(&self, scope: ScopeId, clock: ClockId) -> Option<&str> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(name) = self.scopes[id].clock_names.get(&clock) {
                return Some(name);
            }
            current = self.scopes[id].parent;
        }
        None
    }

    pub fn pin_name(&self, scope: ScopeId, pin: NodeId) -> Option<&str> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(name) = self.scopes[id].pin_names.get(&pin) {
                return Some(name);
            }
            current = self.scopes[id].parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_words_are_avoided() {
        let formatting = CodeFormatting::default();
        let mut scopes = Scopes::new();
        let name = scopes.allocate_entity_name("signal", &formatting);
        assert_ne!(name.to_lowercase(), "signal");
    }

    #[test]
    fn collisions_get_numeric_suffixes() {
        let formatting = CodeFormatting::default();
        let mut scopes = Scopes::new();
        let scope = scopes.create(GLOBAL_SCOPE);
        let port_a = NodePort::new(NodeId(1), 0);
        let port_b = NodePort::new(NodeId(2), 0);
        let first =
            scopes.allocate_node_name(scope, port_a, "data", SignalRole::LocalSignal, &formatting);
        let second =
            scopes.allocate_node_name(scope, port_b, "data", SignalRole::LocalSignal, &formatting);
        assert_eq!(first, "s_data");
        assert_eq!(second, "s_data_2");
        assert_eq!(scopes.node_name(scope, port_a), Some("s_data"));
    }

    #[test]
    fn child_scopes_see_parent_names() {
        let formatting = CodeFormatting::default();
        let mut scopes = Scopes::new();
        let outer = scopes.create(GLOBAL_SCOPE);
        let inner = scopes.create(outer);
        let port = NodePort::new(NodeId(7), 0);
        scopes.allocate_node_name(outer, port, "x", SignalRole::LocalSignal, &formatting);
        assert_eq!(scopes.node_name(inner, port), Some("s_x"));
        // the inner scope cannot reuse the identifier
        let clash = NodePort::new(NodeId(8), 0);
        let name =
            scopes.allocate_node_name(inner, clash, "x", SignalRole::LocalSignal, &formatting);
        assert_eq!(name, "s_x_2");
    }
}
