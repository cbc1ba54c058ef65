use crate::hlim::{Circuit, NodeId, NodePort};

/// Lazy depth-first traversal over the IR.
///
/// Forward exploration yields `(node, input port)` handles of consumers;
/// backward exploration yields `(node, output port)` handles of drivers.
/// The walk is lazy: a handle's fan-out is only expanded when the iteration
/// moves past it, so [`backtrack`](Self::backtrack) can prune the subtree
/// below the most recently returned handle.
pub struct Exploration<'c> {
    circuit: &'c Circuit,
    forward: bool,
    skip_dependencies: bool,
    stack: Vec<NodePort>,
    pending: Option<NodePort>,
}

impl<'c> Exploration<'c> {
    pub(crate) fn forward(circuit: &'c Circuit, port: NodePort) -> Self {
        let stack = circuit.consumers(port).to_vec();
        Self {
            circuit,
            forward: true,
            skip_dependencies: false,
            stack,
            pending: None,
        }
    }

    pub(crate) fn backward(circuit: &'c Circuit, node: NodeId, input: usize) -> Self {
        let stack = circuit.driver(node, input).into_iter().collect();
        Self {
            circuit,
            forward: false,
            skip_dependencies: false,
            stack,
            pending: None,
        }
    }

    /// Excludes `DEPENDENCY`-typed edges from the walk.
    pub fn skip_dependencies(mut self) -> Self {
        self.skip_dependencies = true;
        self
    }

    /// Drops the subtree below the handle most recently returned by
    /// [`next`](Iterator::next).
    pub fn backtrack(&mut self) {
        self.pending = None;
    }

    fn expand(&mut self, handle: NodePort) {
        let node = self.circuit.node(handle.node);
        if self.forward {
            for output in 0..node.num_outputs() {
                let port = NodePort::new(handle.node, output);
                if self.skip_dependencies && self.circuit.connection_type(port).is_dependency() {
                    continue;
                }
                self.stack.extend_from_slice(self.circuit.consumers(port));
            }
        } else {
            for input in 0..node.num_inputs() {
                if let Some(driver) = self.circuit.driver(handle.node, input) {
                    if self.skip_dependencies
                        && self.circuit.connection_type(driver).is_dependency()
                    {
                        continue;
                    }
                    self.stack.push(driver);
                }
            }
        }
    }
}

impl Iterator for Exploration<'_> {
    type Item = NodePort;

    fn next(&mut self) -> Option<NodePort> {
        if let Some(pending) = self.pending.take() {
            self.expand(pending);
        }
        let handle = self.stack.pop()?;
        self.pending = Some(handle);
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hlim::{ConnectionType, LogicOp};

    #[test]
    fn forward_walk_reaches_all_consumers() {
        let mut c = Circuit::new();
        let a = c.add_signal(ConnectionType::bitvec(4));
        let s = c.add_signal(ConnectionType::bitvec(4));
        let and = c.add_logic(LogicOp::And);
        c.connect(NodePort::new(a, 0), s, 0).unwrap();
        c.connect(NodePort::new(s, 0), and, 0).unwrap();
        c.connect(NodePort::new(a, 0), and, 1).unwrap();

        let visited: Vec<NodeId> = c
            .explore_output(NodePort::new(a, 0))
            .map(|np| np.node)
            .collect();
        assert_eq!(visited.len(), 3);
        assert!(visited.contains(&s));
        assert_eq!(visited.iter().filter(|n| **n == and).count(), 2);
    }

    #[test]
    fn backtrack_prunes_subtree() {
        let mut c = Circuit::new();
        let a = c.add_signal(ConnectionType::bitvec(4));
        let s = c.add_signal(ConnectionType::bitvec(4));
        let deep = c.add_signal(ConnectionType::bitvec(4));
        c.connect(NodePort::new(a, 0), s, 0).unwrap();
        c.connect(NodePort::new(s, 0), deep, 0).unwrap();

        let mut walk = c.explore_output(NodePort::new(a, 0));
        let first = walk.next().unwrap();
        assert_eq!(first.node, s);
        walk.backtrack();
        assert_eq!(walk.next(), None);
    }

    #[test]
    fn backward_walk_follows_drivers() {
        let mut c = Circuit::new();
        let a = c.add_signal(ConnectionType::bitvec(4));
        let b = c.add_signal(ConnectionType::bitvec(4));
        let and = c.add_logic(LogicOp::And);
        c.connect(NodePort::new(a, 0), and, 0).unwrap();
        c.connect(NodePort::new(b, 0), and, 1).unwrap();

        let visited: Vec<NodeId> = c.explore_input(and, 0).map(|np| np.node).collect();
        assert_eq!(visited, vec![a]);
    }
}
