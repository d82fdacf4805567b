use thiserror::Error;

use crate::diagnostics::{DiagnosticKind, DiagnosticLevel};

/// Conditions the resolver reports while it keeps going with an `Any` stand-in.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("unresolved identifier '{name}'")]
    UnresolvedIdentifier { name: String },
    #[error("type '{ty}' has no member '{name}'")]
    UnresolvedMember { ty: String, name: String },
    #[error("{message}")]
    InvalidOperandShape { message: String },
    #[error("no overload of '{name}' accepts arguments ({arguments})")]
    NoMatchingOverload { name: String, arguments: String },
    #[error("loop in '{method}' analyzed for one iteration")]
    LoopCutoff { method: String },
    #[error("recursive call to '{method}' not expanded")]
    RecursionCutoff { method: String },
}

impl AnalysisError {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            AnalysisError::UnresolvedIdentifier { .. } => DiagnosticKind::UnresolvedIdentifier,
            AnalysisError::UnresolvedMember { .. } => DiagnosticKind::UnresolvedMember,
            AnalysisError::InvalidOperandShape { .. } => DiagnosticKind::InvalidOperandShape,
            AnalysisError::NoMatchingOverload { .. } => DiagnosticKind::NoMatchingOverload,
            AnalysisError::LoopCutoff { .. } => DiagnosticKind::LoopCutoff,
            AnalysisError::RecursionCutoff { .. } => DiagnosticKind::RecursionCutoff,
        }
    }

    pub fn level(&self) -> DiagnosticLevel {
        match self {
            AnalysisError::LoopCutoff { .. } | AnalysisError::RecursionCutoff { .. } => {
                DiagnosticLevel::Note
            }
            _ => DiagnosticLevel::Error,
        }
    }
}
