use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::state::AbstractState;
use crate::error::AnalysisError;
use magpie_cfa::{Cfa, DotGraph, EdgeId, render_dot};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::Arc;

/// Index of a state in the ARG arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArgId(usize);

impl Display for ArgId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One node of the abstract reachability graph. Parent and child links
/// are arena ids, so the cyclic graph needs no ownership cycles.
#[derive(Debug, Clone)]
pub struct ArgNode {
    pub id: ArgId,
    pub state: AbstractState,
    pub parents: Vec<ArgId>,
    pub children: Vec<ArgId>,
    /// The CFA edge whose transfer created this node. The root has
    /// none; merged nodes record one only when it is unambiguous.
    pub creating_edge: Option<EdgeId>,
}

/// The unfolding of the analysis: every created abstract state with its
/// parent links, retained after the fixpoint run for counterexample
/// extraction.
#[derive(Debug, Default)]
pub struct ArgGraph {
    nodes: Vec<ArgNode>,
}

impl ArgGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<ArgId> {
        self.nodes.first().map(|n| n.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ArgId) -> &ArgNode {
        &self.nodes[id.0]
    }

    pub fn add_root(&mut self, state: AbstractState) -> ArgId {
        debug_assert!(self.nodes.is_empty(), "a run builds exactly one root");
        let id = ArgId(self.nodes.len());
        self.nodes.push(ArgNode {
            id,
            state,
            parents: vec![],
            children: vec![],
            creating_edge: None,
        });
        id
    }

    pub fn add_successor(&mut self, parent: ArgId, edge: EdgeId, state: AbstractState) -> ArgId {
        let id = ArgId(self.nodes.len());
        self.nodes.push(ArgNode {
            id,
            state,
            parents: vec![parent],
            children: vec![],
            creating_edge: Some(edge),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Replace `a` and `b` with a joint node carrying `state`. Links of
    /// both are rewired onto the new node; the husks stay in the arena
    /// unlinked. The creating edge survives only when unambiguous.
    pub fn merge_nodes(&mut self, a: ArgId, b: ArgId, state: AbstractState) -> ArgId {
        let id = ArgId(self.nodes.len());
        let creating_edge = match (self.node(a).creating_edge, self.node(b).creating_edge) {
            (x, y) if x == y => x,
            _ => None,
        };

        let mut parents: Vec<ArgId> = Vec::new();
        let mut children: Vec<ArgId> = Vec::new();
        for old in [a, b] {
            for p in std::mem::take(&mut self.nodes[old.0].parents) {
                if p != a && p != b && !parents.contains(&p) {
                    parents.push(p);
                }
                self.nodes[p.0].children.retain(|c| *c != old);
            }
            for c in std::mem::take(&mut self.nodes[old.0].children) {
                if c != a && c != b && !children.contains(&c) {
                    children.push(c);
                }
                self.nodes[c.0].parents.retain(|p| *p != old);
            }
        }
        for p in &parents {
            self.nodes[p.0].children.push(id);
        }
        for c in &children {
            self.nodes[c.0].parents.push(id);
        }
        self.nodes.push(ArgNode {
            id,
            state,
            parents,
            children,
            creating_edge,
        });
        id
    }

    /// The CFA edges from the root to `from`, following first parents.
    /// `None` when the walk does not reach the root (a disconnected
    /// error state).
    pub fn path_to_root(&self, from: ArgId) -> Option<Vec<EdgeId>> {
        let root = self.root()?;
        let mut edges = Vec::new();
        let mut visited = HashSet::new();
        let mut current = from;
        while current != root {
            if !visited.insert(current) {
                return None;
            }
            let node = self.node(current);
            let parent = *node.parents.first()?;
            edges.push(node.creating_edge?);
            current = parent;
        }
        edges.reverse();
        Some(edges)
    }
}

/// Wraps the full analysis stack to record, for every successor, its
/// parents and the CFA edge that created it.
pub struct ArgCpa {
    cfa: Arc<Cfa>,
    inner: Box<dyn ConfigurableProgramAnalysis>,
    arg: Rc<RefCell<ArgGraph>>,
}

impl ArgCpa {
    pub fn new(
        cfa: Arc<Cfa>,
        inner: Box<dyn ConfigurableProgramAnalysis>,
        arg: Rc<RefCell<ArgGraph>>,
    ) -> Self {
        Self { cfa, inner, arg }
    }

    fn unwrap_state(state: &AbstractState) -> ArgId {
        match state {
            AbstractState::Arg(id) => *id,
            other => unreachable!("ARG analysis given {other:?}"),
        }
    }

    fn wrapped(&self, state: &AbstractState) -> AbstractState {
        self.arg
            .borrow()
            .node(Self::unwrap_state(state))
            .state
            .clone()
    }

    fn wrapped_is_target(&self, wrapped: &AbstractState) -> bool {
        wrapped.property_violated()
            || wrapped
                .location()
                .is_some_and(|node| self.cfa.is_error(node))
    }
}

impl ConfigurableProgramAnalysis for ArgCpa {
    fn initial_state(&self) -> AbstractState {
        let root = self.arg.borrow_mut().add_root(self.inner.initial_state());
        AbstractState::Arg(root)
    }

    fn successors_for_edge(
        &self,
        state: &AbstractState,
        edge: EdgeId,
    ) -> Result<Vec<AbstractState>, AnalysisError> {
        let parent = Self::unwrap_state(state);
        let wrapped = self.wrapped(state);
        let successors = self.inner.successors_for_edge(&wrapped, edge)?;
        Ok(successors
            .into_iter()
            .map(|s| {
                let id = self.arg.borrow_mut().add_successor(parent, edge, s);
                AbstractState::Arg(id)
            })
            .collect())
    }

    fn successors(&self, state: &AbstractState) -> Result<Vec<AbstractState>, AnalysisError> {
        let wrapped = self.wrapped(state);
        let node = wrapped.location().ok_or(AnalysisError::MissingLocation)?;
        let mut result = Vec::new();
        for edge in self.cfa.leaving(node) {
            result.extend(self.successors_for_edge(state, edge)?);
        }
        Ok(result)
    }

    fn merge(
        &self,
        state: &AbstractState,
        reached: &AbstractState,
    ) -> Result<AbstractState, AnalysisError> {
        let s_id = Self::unwrap_state(state);
        let r_id = Self::unwrap_state(reached);
        let s_wrapped = self.wrapped(state);
        let r_wrapped = self.wrapped(reached);
        let merged = self.inner.merge(&s_wrapped, &r_wrapped)?;
        if merged == r_wrapped {
            return Ok(reached.clone());
        }
        let id = self.arg.borrow_mut().merge_nodes(s_id, r_id, merged);
        Ok(AbstractState::Arg(id))
    }

    fn stop(
        &self,
        state: &AbstractState,
        reached: &[AbstractState],
    ) -> Result<bool, AnalysisError> {
        let wrapped = self.wrapped(state);
        let reached_wrapped: Vec<AbstractState> =
            reached.iter().map(|r| self.wrapped(r)).collect();
        self.inner.stop(&wrapped, &reached_wrapped)
    }

    fn is_target(&self, state: &AbstractState) -> bool {
        self.wrapped_is_target(&self.wrapped(state))
    }
}

/// View of one ARG node for dot rendering.
pub struct ArgDot {
    arg: Rc<RefCell<ArgGraph>>,
    cfa: Arc<Cfa>,
    id: ArgId,
}

impl DotGraph for ArgDot {
    fn node_id(&self) -> String {
        format!("N{}", self.id)
    }

    fn node_label(&self) -> String {
        let arg = self.arg.borrow();
        let node = arg.node(self.id);
        let target = node.state.property_violated()
            || node
                .state
                .location()
                .is_some_and(|n| self.cfa.is_error(n));
        let marker = if target { " T" } else { "" };
        format!("N{}{} {}", self.id, marker, node.state)
    }

    fn successors(&self) -> Vec<Self> {
        self.arg
            .borrow()
            .node(self.id)
            .children
            .iter()
            .map(|c| ArgDot {
                arg: self.arg.clone(),
                cfa: self.cfa.clone(),
                id: *c,
            })
            .collect()
    }

    fn edge_labels(&self, successor: &Self) -> Vec<String> {
        let arg = self.arg.borrow();
        match arg.node(successor.id).creating_edge {
            Some(edge) => vec![self.cfa.edge(edge).instruction.label()],
            None => vec!["?".to_string()],
        }
    }
}

/// Render the ARG of a run into Graphviz dot text.
pub fn render_arg(arg: &Rc<RefCell<ArgGraph>>, cfa: &Arc<Cfa>) -> String {
    let roots = match arg.borrow().root() {
        Some(root) => vec![ArgDot {
            arg: arg.clone(),
            cfa: cfa.clone(),
            id: root,
        }],
        None => vec![],
    };
    render_dot("ARG", roots)
}
