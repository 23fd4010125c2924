use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::ops::BitAnd;

/// The answer of one verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    True,
    False,
    Unknown,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::True => write!(f, "TRUE"),
            Verdict::False => write!(f, "FALSE"),
            Verdict::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// FALSE dominates, then UNKNOWN; combining per-property verdicts.
impl BitAnd for Verdict {
    type Output = Verdict;

    fn bitand(self, rhs: Verdict) -> Verdict {
        match (self, rhs) {
            (Verdict::False, _) | (_, Verdict::False) => Verdict::False,
            (Verdict::Unknown, _) | (_, Verdict::Unknown) => Verdict::Unknown,
            (Verdict::True, Verdict::True) => Verdict::True,
        }
    }
}

/// How the run ended, independent of the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Timeout,
    OutOfMemory,
    Aborted,
    Error,
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Timeout => write!(f, "TIMEOUT"),
            Status::OutOfMemory => write!(f, "OUT_OF_MEMORY"),
            Status::Aborted => write!(f, "ABORTED"),
            Status::Error => write!(f, "ERROR"),
        }
    }
}

/// A concrete counterexample: the CFA edge labels along the error path
/// and a satisfying assignment of the path formula's SSA symbols.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Witness {
    pub path: Vec<String>,
    pub assignments: BTreeMap<String, i64>,
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub verdict: Verdict,
    pub status: Status,
    pub witness: Option<Witness>,
    /// Short operator-facing explanation for UNKNOWN outcomes.
    pub note: Option<String>,
}

impl AnalysisResult {
    pub fn new(verdict: Verdict, status: Status) -> Self {
        Self {
            verdict,
            status,
            witness: None,
            note: None,
        }
    }

    pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_witness(mut self, witness: Witness) -> Self {
        self.witness = Some(witness);
        self
    }

    /// The one-line summary always emitted: `<program>: <status> <verdict>`.
    pub fn summary_line(&self, program: &str) -> String {
        match &self.note {
            Some(note) => format!("{program}: {} {} ({note})", self.status, self.verdict),
            None => format!("{program}: {} {}", self.status, self.verdict),
        }
    }
}
