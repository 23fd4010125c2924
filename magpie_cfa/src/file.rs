use crate::builder::CfaBuilder;
use crate::cfa::{Cfa, NodeId};
use crate::error::CfaError;
use crate::expr::{Expr, VarName};
use crate::instruction::Instruction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// On-disk form of a normalized program: the document the front end
/// emits and the checker consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramFile {
    pub name: String,
    pub entry: u32,
    pub nodes: Vec<NodeDecl>,
    pub edges: Vec<EdgeDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDecl {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDecl {
    pub from: u32,
    pub to: u32,
    pub instruction: InstructionDecl,
}

/// Serialized instruction; call entries are declared node ids rather
/// than graph indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstructionDecl {
    Statement {
        target: VarName,
        value: Expr,
    },
    Assumption {
        condition: Expr,
        #[serde(default)]
        negated: bool,
    },
    Call {
        entry: u32,
        callee: String,
        params: Vec<VarName>,
        args: Vec<VarName>,
        target: VarName,
    },
    Return {
        var: VarName,
    },
    Nondet {
        target: VarName,
    },
    ReachError,
    Nop,
}

impl ProgramFile {
    pub fn from_json(text: &str) -> Result<Self, CfaError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, CfaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CfaError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Resolve the document into a validated automaton. Duplicate or
    /// dangling node ids are rejected before any analysis runs.
    pub fn to_cfa(&self) -> Result<Cfa, CfaError> {
        let mut builder = CfaBuilder::new();
        let mut ids: HashMap<u32, NodeId> = HashMap::new();

        for decl in &self.nodes {
            if ids.contains_key(&decl.id) {
                return Err(CfaError::DuplicateNode(decl.id));
            }
            let node = match (&decl.function, decl.error) {
                (_, true) => builder.error_node(),
                (Some(function), false) => builder.function_node(function.clone()),
                (None, false) => builder.node(),
            };
            ids.insert(decl.id, node);
        }

        let resolve = |id: u32| ids.get(&id).copied().ok_or(CfaError::UnknownNode(id));

        for decl in &self.edges {
            let from = resolve(decl.from)?;
            let to = resolve(decl.to)?;
            let instruction = match &decl.instruction {
                InstructionDecl::Statement { target, value } => Instruction::Statement {
                    target: *target,
                    value: value.clone(),
                },
                InstructionDecl::Assumption { condition, negated } => Instruction::Assumption {
                    condition: condition.clone(),
                    negated: *negated,
                },
                InstructionDecl::Call {
                    entry,
                    callee,
                    params,
                    args,
                    target,
                } => Instruction::Call {
                    entry: resolve(*entry)?,
                    callee: callee.clone(),
                    params: params.clone(),
                    args: args.clone(),
                    target: *target,
                },
                InstructionDecl::Return { var } => Instruction::Return { var: *var },
                InstructionDecl::Nondet { target } => Instruction::Nondet { target: *target },
                InstructionDecl::ReachError => Instruction::ReachError,
                InstructionDecl::Nop => Instruction::Nop,
            };
            builder.edge(from, to, instruction);
        }

        builder.set_entry(resolve(self.entry)?);
        let cfa = builder.build()?;
        debug!(
            nodes = cfa.node_count(),
            edges = cfa.edge_count(),
            program = %self.name,
            "loaded program"
        );
        Ok(cfa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;

    fn trivial_doc() -> ProgramFile {
        ProgramFile {
            name: "trivial".into(),
            entry: 0,
            nodes: vec![
                NodeDecl {
                    id: 0,
                    function: None,
                    error: false,
                },
                NodeDecl {
                    id: 1,
                    function: None,
                    error: true,
                },
            ],
            edges: vec![EdgeDecl {
                from: 0,
                to: 1,
                instruction: InstructionDecl::Assumption {
                    condition: Expr::binary(BinOp::Eq, Expr::var("x"), Expr::Const(0)),
                    negated: false,
                },
            }],
        }
    }

    #[test]
    fn document_roundtrips_and_resolves() {
        let doc = trivial_doc();
        let text = doc.to_json().unwrap();
        let back = ProgramFile::from_json(&text).unwrap();
        let cfa = back.to_cfa().unwrap();
        assert_eq!(cfa.node_count(), 2);
        assert_eq!(cfa.error_nodes().len(), 1);
    }

    #[test]
    fn dangling_node_ids_are_rejected() {
        let mut doc = trivial_doc();
        doc.edges[0].to = 99;
        assert!(matches!(doc.to_cfa(), Err(CfaError::UnknownNode(99))));
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let mut doc = trivial_doc();
        doc.nodes.push(NodeDecl {
            id: 0,
            function: None,
            error: false,
        });
        assert!(matches!(doc.to_cfa(), Err(CfaError::DuplicateNode(0))));
    }
}
