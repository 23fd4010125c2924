use magpie_cfa::CfaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("the SMT solver returned unknown")]
    SolverUnknown,
    #[error("this analysis only produces successors for explicit CFA edges")]
    EdgeFreeTransfer,
    #[error("abstract state carries no program location")]
    MissingLocation,
    #[error("the error state is not connected to the ARG root")]
    DisconnectedErrorState,
    #[error("unable to write analysis artifacts")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Cfa(#[from] CfaError),
}
