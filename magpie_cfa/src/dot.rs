use crate::cfa::{Cfa, NodeId};
use std::collections::HashSet;
use std::fmt::Write;

/// Anything that can be walked and rendered as a Graphviz digraph.
///
/// The CFA, the abstract reachability graph, and precision dumps all
/// implement this to share one renderer.
pub trait DotGraph: Sized {
    /// Stable unique identifier of this node within the graph.
    fn node_id(&self) -> String;
    fn node_label(&self) -> String;
    fn successors(&self) -> Vec<Self>;
    fn edge_labels(&self, successor: &Self) -> Vec<String>;
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Breadth-first walk from `roots`, rendering every reachable node and
/// edge into Graphviz dot syntax.
pub fn render_dot<G: DotGraph>(name: &str, roots: Vec<G>) -> String {
    let mut out = String::new();
    writeln!(out, "digraph {name} {{").unwrap();
    writeln!(out, "    rankdir=LR;").unwrap();
    writeln!(out, "    node [shape=box];").unwrap();

    let mut seen: HashSet<String> = HashSet::new();
    let mut worklist: Vec<G> = roots;
    while let Some(node) = worklist.pop() {
        if !seen.insert(node.node_id()) {
            continue;
        }
        writeln!(
            out,
            "    \"{}\" [label=\"{}\"];",
            escape(&node.node_id()),
            escape(&node.node_label())
        )
        .unwrap();
        for succ in node.successors() {
            for label in node.edge_labels(&succ) {
                writeln!(
                    out,
                    "    \"{}\" -> \"{}\" [label=\"{}\"];",
                    escape(&node.node_id()),
                    escape(&succ.node_id()),
                    escape(&label)
                )
                .unwrap();
            }
            worklist.push(succ);
        }
    }
    writeln!(out, "}}").unwrap();
    out
}

/// View of one CFA location for dot rendering.
pub struct CfaDot<'a> {
    cfa: &'a Cfa,
    node: NodeId,
}

impl DotGraph for CfaDot<'_> {
    fn node_id(&self) -> String {
        format!("n{}", self.node.index())
    }

    fn node_label(&self) -> String {
        let data = self.cfa.node(self.node);
        let mut label = format!("{}", self.node.index());
        if let Some(function) = &data.function {
            label.push_str(&format!(" ({function})"));
        }
        if data.is_error {
            label.push_str(" [error]");
        }
        label
    }

    fn successors(&self) -> Vec<Self> {
        self.cfa
            .leaving(self.node)
            .into_iter()
            .map(|e| CfaDot {
                cfa: self.cfa,
                node: self.cfa.edge(e).target,
            })
            .collect()
    }

    fn edge_labels(&self, successor: &Self) -> Vec<String> {
        self.cfa
            .leaving(self.node)
            .into_iter()
            .filter_map(|e| {
                let view = self.cfa.edge(e);
                (view.target == successor.node).then(|| view.instruction.label())
            })
            .collect()
    }
}

impl Cfa {
    pub fn to_dot(&self) -> String {
        render_dot(
            "CFA",
            vec![CfaDot {
                cfa: self,
                node: self.entry(),
            }],
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::CfaBuilder;
    use crate::expr::Expr;

    #[test]
    fn dot_output_contains_every_reachable_edge() {
        let mut b = CfaBuilder::new();
        let n0 = b.node();
        let n1 = b.node();
        b.set_entry(n0);
        b.statement(n0, n1, "x", Expr::Const(3));
        let cfa = b.build().unwrap();
        let dot = cfa.to_dot();
        assert!(dot.starts_with("digraph CFA {"));
        assert!(dot.contains("x = 3"));
        assert!(dot.contains("\"n0\" -> \"n1\""));
    }
}
