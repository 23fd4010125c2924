use crate::analysis::arg::ArgId;
use crate::analysis::location::LocationState;
use crate::analysis::predicate::PredicateState;
use crate::analysis::predicate::abe::AbeState;
use crate::analysis::property::PropertyState;
use crate::analysis::stack::StackState;
use crate::analysis::value::ValueState;
use magpie_cfa::NodeId;
use std::fmt::{Display, Formatter};

/// One abstract state of the configurable analysis.
///
/// The algebra is closed, so states are a tagged sum rather than trait
/// objects; every CPA matches on the variant it owns and treats any
/// other shape as a programmer error.
#[derive(Debug, Clone, PartialEq)]
pub enum AbstractState {
    Location(LocationState),
    Property(PropertyState),
    Value(ValueState),
    Predicate(PredicateState),
    PredicateAbe(AbeState),
    Composite(Vec<AbstractState>),
    Stack(StackState),
    Arg(ArgId),
}

impl AbstractState {
    /// The program location tracked inside this state, if any. For
    /// stacks this is the location of the active frame.
    pub fn location(&self) -> Option<NodeId> {
        match self {
            AbstractState::Location(s) => Some(s.node),
            AbstractState::Composite(components) => {
                components.iter().find_map(AbstractState::location)
            }
            AbstractState::Stack(s) => s.frames.last().and_then(AbstractState::location),
            _ => None,
        }
    }

    /// Replace the tracked location, leaving everything else untouched.
    /// Used when a return edge redirects control to the caller's
    /// post-call node.
    pub fn with_location(&self, node: NodeId) -> AbstractState {
        match self {
            AbstractState::Location(_) => AbstractState::Location(LocationState { node }),
            AbstractState::Composite(components) => AbstractState::Composite(
                components.iter().map(|c| c.with_location(node)).collect(),
            ),
            AbstractState::Stack(s) => {
                let mut frames = s.frames.clone();
                if let Some(top) = frames.last_mut() {
                    *top = top.with_location(node);
                }
                AbstractState::Stack(StackState {
                    frames,
                    call_edges: s.call_edges.clone(),
                })
            }
            other => other.clone(),
        }
    }

    /// Whether any property component reports the error reached.
    pub fn property_violated(&self) -> bool {
        match self {
            AbstractState::Property(s) => !s.safe,
            AbstractState::Composite(components) => {
                components.iter().any(AbstractState::property_violated)
            }
            AbstractState::Stack(s) => s.frames.iter().any(AbstractState::property_violated),
            _ => false,
        }
    }
}

impl Display for AbstractState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AbstractState::Location(s) => write!(f, "{s}"),
            AbstractState::Property(s) => write!(f, "{s}"),
            AbstractState::Value(s) => write!(f, "{s}"),
            AbstractState::Predicate(s) => write!(f, "{s}"),
            AbstractState::PredicateAbe(s) => write!(f, "{s}"),
            AbstractState::Composite(components) => {
                write!(f, "(")?;
                for (i, c) in components.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            AbstractState::Stack(s) => write!(f, "{s}"),
            AbstractState::Arg(id) => write!(f, "N{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_is_found_through_wrappers() {
        let node = NodeId::new(3);
        let state = AbstractState::Stack(StackState {
            frames: vec![AbstractState::Composite(vec![
                AbstractState::Property(PropertyState { safe: true }),
                AbstractState::Location(LocationState { node }),
            ])],
            call_edges: vec![],
        });
        assert_eq!(state.location(), Some(node));

        let moved = state.with_location(NodeId::new(7));
        assert_eq!(moved.location(), Some(NodeId::new(7)));
        // the property component is untouched
        assert!(!moved.property_violated());
    }
}
