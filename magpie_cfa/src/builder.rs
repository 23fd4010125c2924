use crate::cfa::{Cfa, CfaNode, EdgeId, NodeId};
use crate::error::CfaError;
use crate::expr::{Expr, VarName};
use crate::instruction::Instruction;
use petgraph::prelude::DiGraph;

/// Constructs a [Cfa] one location and edge at a time.
///
/// This is the interface the front end (and the tests) use to hand a
/// normalized program to the analyses; the automaton is immutable once
/// `build` succeeds.
#[derive(Debug, Default)]
pub struct CfaBuilder {
    graph: DiGraph<CfaNode, Instruction>,
    entry: Option<NodeId>,
}

impl CfaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self) -> NodeId {
        self.graph.add_node(CfaNode::default())
    }

    pub fn function_node<S: Into<String>>(&mut self, function: S) -> NodeId {
        self.graph.add_node(CfaNode {
            function: Some(function.into()),
            is_error: false,
        })
    }

    pub fn error_node(&mut self) -> NodeId {
        self.graph.add_node(CfaNode {
            function: None,
            is_error: true,
        })
    }

    pub fn set_entry(&mut self, entry: NodeId) {
        self.entry = Some(entry);
    }

    pub fn edge(&mut self, from: NodeId, to: NodeId, instruction: Instruction) -> EdgeId {
        self.graph.add_edge(from, to, instruction)
    }

    pub fn statement<V: Into<VarName>>(
        &mut self,
        from: NodeId,
        to: NodeId,
        target: V,
        value: Expr,
    ) -> EdgeId {
        self.edge(
            from,
            to,
            Instruction::Statement {
                target: target.into(),
                value,
            },
        )
    }

    pub fn assume(&mut self, from: NodeId, to: NodeId, condition: Expr) -> EdgeId {
        self.edge(
            from,
            to,
            Instruction::Assumption {
                condition,
                negated: false,
            },
        )
    }

    pub fn assume_not(&mut self, from: NodeId, to: NodeId, condition: Expr) -> EdgeId {
        self.edge(
            from,
            to,
            Instruction::Assumption {
                condition,
                negated: true,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn call<S: Into<String>, V: Into<VarName>>(
        &mut self,
        from: NodeId,
        to: NodeId,
        entry: NodeId,
        callee: S,
        params: Vec<VarName>,
        args: Vec<VarName>,
        target: V,
    ) -> EdgeId {
        self.edge(
            from,
            to,
            Instruction::Call {
                entry,
                callee: callee.into(),
                params,
                args,
                target: target.into(),
            },
        )
    }

    pub fn ret<V: Into<VarName>>(&mut self, from: NodeId, to: NodeId, var: V) -> EdgeId {
        self.edge(from, to, Instruction::Return { var: var.into() })
    }

    pub fn nondet<V: Into<VarName>>(&mut self, from: NodeId, to: NodeId, target: V) -> EdgeId {
        self.edge(
            from,
            to,
            Instruction::Nondet {
                target: target.into(),
            },
        )
    }

    pub fn reach_error(&mut self, from: NodeId, to: NodeId) -> EdgeId {
        self.edge(from, to, Instruction::ReachError)
    }

    pub fn nop(&mut self, from: NodeId, to: NodeId) -> EdgeId {
        self.edge(from, to, Instruction::Nop)
    }

    pub fn build(self) -> Result<Cfa, CfaError> {
        let entry = self.entry.ok_or(CfaError::MissingEntry)?;
        let cfa = Cfa {
            graph: self.graph,
            entry,
        };
        cfa.validate()?;
        Ok(cfa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::InstructionKind;

    #[test]
    fn build_requires_an_entry() {
        let b = CfaBuilder::new();
        assert!(matches!(b.build(), Err(CfaError::MissingEntry)));
    }

    #[test]
    fn edges_land_on_their_endpoints() {
        let mut b = CfaBuilder::new();
        let n0 = b.node();
        let n1 = b.node();
        b.set_entry(n0);
        let e = b.statement(n0, n1, "x", Expr::Const(1));
        let cfa = b.build().unwrap();
        let view = cfa.edge(e);
        assert_eq!(view.source, n0);
        assert_eq!(view.target, n1);
        assert_eq!(view.instruction.kind(), InstructionKind::Statement);
    }
}
