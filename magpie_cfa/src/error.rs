use thiserror::Error;

/// Errors constructing or loading a control-flow automaton.
#[derive(Debug, Error)]
pub enum CfaError {
    #[error("program declares no entry node")]
    MissingEntry,
    #[error("duplicate node id {0} in program file")]
    DuplicateNode(u32),
    #[error("reference to undeclared node id {0}")]
    UnknownNode(u32),
    #[error("call to '{0}' targets a node outside the automaton")]
    InvalidCallTarget(String),
    #[error("program file is not valid JSON")]
    Document(#[from] serde_json::Error),
    #[error("unable to read program file")]
    Io(#[from] std::io::Error),
}
