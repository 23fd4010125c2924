use crate::error::CfaError;
use crate::instruction::{Instruction, InstructionKind};
use petgraph::Direction;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::prelude::DiGraph;
use petgraph::visit::{Control, DfsEvent, EdgeRef, depth_first_search};
use std::collections::BTreeSet;

pub type NodeId = NodeIndex;
pub type EdgeId = EdgeIndex;

/// Per-node data of the control-flow automaton.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CfaNode {
    /// Owning function, if the node belongs to one.
    pub function: Option<String>,
    /// Whether this location is a designated error location.
    pub is_error: bool,
}

/// A resolved view of one CFA edge.
#[derive(Debug, Clone, Copy)]
pub struct EdgeView<'a> {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub instruction: &'a Instruction,
}

/// A control-flow automaton: program locations connected by labelled
/// edges. Immutable once built; the analyses share it read-only.
#[derive(Debug, Clone)]
pub struct Cfa {
    pub(crate) graph: DiGraph<CfaNode, Instruction>,
    pub(crate) entry: NodeId,
}

impl Cfa {
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn node(&self, id: NodeId) -> &CfaNode {
        &self.graph[id]
    }

    pub fn is_error(&self, id: NodeId) -> bool {
        self.graph[id].is_error
    }

    pub fn edge(&self, id: EdgeId) -> EdgeView<'_> {
        let (source, target) = self
            .graph
            .edge_endpoints(id)
            .expect("edge id from a foreign graph");
        EdgeView {
            id,
            source,
            target,
            instruction: &self.graph[id],
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_indices()
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.graph.edge_indices()
    }

    /// Edges leaving `node`, in insertion order.
    pub fn leaving(&self, node: NodeId) -> Vec<EdgeId> {
        let mut edges: Vec<EdgeId> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        // petgraph yields outgoing edges newest-first; the analyses want
        // the order the builder produced.
        edges.reverse();
        edges
    }

    /// Edges entering `node`.
    pub fn entering(&self, node: NodeId) -> Vec<EdgeId> {
        let mut edges: Vec<EdgeId> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        edges.reverse();
        edges
    }

    pub fn error_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|n| self.graph[*n].is_error)
            .collect()
    }

    /// Targets of DFS back edges reachable from the entry. Used to place
    /// adjustable-block-encoding abstraction points at loop heads.
    pub fn loop_heads(&self) -> BTreeSet<NodeId> {
        let mut heads = BTreeSet::new();
        depth_first_search(&self.graph, Some(self.entry), |event| {
            if let DfsEvent::BackEdge(_, head) = event {
                heads.insert(head);
            }
            Control::<()>::Continue
        });
        heads
    }

    /// Whether any edge leaving `node` has one of the given kinds.
    pub fn leaves_with_kind(&self, node: NodeId, kinds: &[InstructionKind]) -> bool {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .any(|e| kinds.contains(&e.weight().kind()))
    }

    /// Structural checks beyond what the graph maintains by construction:
    /// call edges must point at real entry nodes distinct from their own
    /// successor bookkeeping.
    pub fn validate(&self) -> Result<(), CfaError> {
        if self.graph.node_weight(self.entry).is_none() {
            return Err(CfaError::MissingEntry);
        }
        for edge in self.graph.edge_indices() {
            if let Instruction::Call { entry, callee, .. } = &self.graph[edge] {
                if self.graph.node_weight(*entry).is_none() {
                    return Err(CfaError::InvalidCallTarget(callee.clone()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::CfaBuilder;
    use crate::expr::{BinOp, Expr};

    #[test]
    fn leaving_edges_keep_builder_order() {
        let mut b = CfaBuilder::new();
        let n0 = b.node();
        let n1 = b.node();
        let n2 = b.node();
        b.set_entry(n0);
        let cond = Expr::binary(BinOp::Eq, Expr::var("x"), Expr::Const(0));
        let then_edge = b.assume(n0, n1, cond.clone());
        let else_edge = b.assume_not(n0, n2, cond);
        let cfa = b.build().unwrap();
        assert_eq!(cfa.leaving(n0), vec![then_edge, else_edge]);
        assert!(cfa.entering(n1).contains(&then_edge));
    }

    #[test]
    fn loop_heads_are_back_edge_targets() {
        // n0 -> n1 -> n2 -> n1 (loop), n2 -> n3
        let mut b = CfaBuilder::new();
        let n0 = b.node();
        let n1 = b.node();
        let n2 = b.node();
        let n3 = b.node();
        b.set_entry(n0);
        b.nop(n0, n1);
        b.nop(n1, n2);
        b.nop(n2, n1);
        b.nop(n2, n3);
        let cfa = b.build().unwrap();
        let heads = cfa.loop_heads();
        assert!(heads.contains(&n1));
        assert!(!heads.contains(&n3));
    }

    #[test]
    fn error_nodes_are_reported() {
        let mut b = CfaBuilder::new();
        let n0 = b.node();
        let err = b.error_node();
        b.set_entry(n0);
        b.reach_error(n0, err);
        let cfa = b.build().unwrap();
        assert_eq!(cfa.error_nodes(), vec![err]);
        assert!(cfa.is_error(err));
        assert!(!cfa.is_error(n0));
    }
}
