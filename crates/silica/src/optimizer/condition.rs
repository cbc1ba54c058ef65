use crate::hlim::{Circuit, LogicOp, NodeId, NodeKind, NodePort};
use crate::HashMap;

/// A mux selector normalized into an AND of (possibly negated) literals.
/// `NOT` nodes are peeled into the negation flag and `AND` nodes are
/// flattened, so structurally different selector trees compare equal when
/// they express the same conjunction.
#[derive(Debug, Default)]
pub(crate) struct HierarchyCondition {
    terms: HashMap<NodePort, bool>,
    undefined: bool,
    contradicting: bool,
}

impl HierarchyCondition {
    pub fn parse(circuit: &Circuit, node: NodeId, input: usize) -> Self {
        let mut condition = Self::default();
        let mut stack: Vec<(Option<NodePort>, bool)> =
            vec![(circuit.non_signal_driver(node, input), false)];

        while let Some((driver, negated)) = stack.pop() {
            let Some(driver) = driver else {
                condition.undefined = true;
                continue;
            };
            match circuit.node(driver.node).kind {
                NodeKind::Logic(LogicOp::Not) => {
                    stack.push((circuit.non_signal_driver(driver.node, 0), !negated));
                }
                NodeKind::Logic(LogicOp::And) => {
                    for port in 0..circuit.node(driver.node).num_inputs() {
                        stack.push((circuit.non_signal_driver(driver.node, port), negated));
                    }
                }
                _ => match condition.terms.get(&driver) {
                    Some(existing) => condition.contradicting |= *existing != negated,
                    None => {
                        condition.terms.insert(driver, negated);
                    }
                },
            }
        }
        condition
    }

    pub fn is_equal_of(&self, other: &Self) -> bool {
        if self.undefined || other.undefined {
            return false;
        }
        if self.contradicting && other.contradicting {
            return true;
        }
        self.terms.len() == other.terms.len()
            && self
                .terms
                .iter()
                .all(|(port, negated)| other.terms.get(port) == Some(negated))
    }

    pub fn is_negation_of(&self, other: &Self) -> bool {
        if self.undefined || other.undefined || self.contradicting || other.contradicting {
            return false;
        }
        self.terms.len() == other.terms.len()
            && self
                .terms
                .iter()
                .all(|(port, negated)| other.terms.get(port) == Some(&!negated))
    }
}
