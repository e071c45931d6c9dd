//! Error types.

/// A fatal defect detected during one analysis run.
///
/// These indicate a broken lattice or transfer-function contract, not bad
/// input: the run is aborted rather than allowed to return an unsound
/// result.
#[derive(Clone, Debug)]
pub enum AnalysisError {
    /// A merge or transfer produced a value that compares below the value it
    /// replaced. The payload describes where the violation was observed.
    NonMonotone(String),
    /// Expression evaluation exceeded the recursion-depth limit.
    EvalDepthExceeded { depth: usize },
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AnalysisError::NonMonotone(what) => {
                write!(f, "non-monotone analysis update: {}", what)
            }
            AnalysisError::EvalDepthExceeded { depth } => {
                write!(f, "expression nesting exceeded evaluation limit ({})", depth)
            }
        }
    }
}

impl std::error::Error for AnalysisError {}

/// An error that occurs when parsing textual procedure input.
#[derive(Clone, Debug)]
pub enum FrontendError {
    /// The input is not syntactically valid at the given line.
    Syntax(usize, String),
    /// A name was referenced before being declared.
    Undefined(usize, String),
    /// An internal error occurred.
    Internal(String),
}

impl std::fmt::Display for FrontendError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrontendError::Syntax(line, msg) => write!(f, "line {}: {}", line, msg),
            FrontendError::Undefined(line, name) => {
                write!(f, "line {}: undefined name `{}`", line, name)
            }
            FrontendError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for FrontendError {}
