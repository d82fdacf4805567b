use std::collections::HashSet;
use std::fmt;

use crate::ast::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Note,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Note => "note",
        };
        f.write_str(label)
    }
}

/// Category of a diagnostic raised by the resolver. Front-end diagnostics carry no kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    UnresolvedIdentifier,
    UnresolvedMember,
    InvalidOperandShape,
    NoMatchingOverload,
    LoopCutoff,
    RecursionCutoff,
    Lowering,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub level: DiagnosticLevel,
    pub span: Option<SourceSpan>,
    pub kind: Option<DiagnosticKind>,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    seen: HashSet<(Option<DiagnosticKind>, Option<SourceSpan>, String)>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_error_with_span<S: Into<String>>(&mut self, message: S, span: Option<SourceSpan>) {
        self.push_entry(Diagnostic {
            message: message.into(),
            level: DiagnosticLevel::Error,
            span,
            kind: None,
        });
    }

    pub fn push_warning_with_span<S: Into<String>>(
        &mut self,
        message: S,
        span: Option<SourceSpan>,
    ) {
        self.push_entry(Diagnostic {
            message: message.into(),
            level: DiagnosticLevel::Warning,
            span,
            kind: None,
        });
    }

    /// Records a categorized diagnostic. Returns false when an identical report
    /// (same kind, span and message) was already recorded.
    pub fn report(
        &mut self,
        kind: DiagnosticKind,
        level: DiagnosticLevel,
        message: impl Into<String>,
        span: Option<SourceSpan>,
    ) -> bool {
        self.push_entry(Diagnostic {
            message: message.into(),
            level,
            span,
            kind: Some(kind),
        })
    }

    fn push_entry(&mut self, diagnostic: Diagnostic) -> bool {
        let key = (diagnostic.kind, diagnostic.span, diagnostic.message.clone());
        if !self.seen.insert(key) {
            return false;
        }
        self.entries.push(diagnostic);
        true
    }

    pub fn extend(&mut self, other: Diagnostics) {
        for entry in other.entries {
            self.push_entry(entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|diagnostic| diagnostic.level == DiagnosticLevel::Error)
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn count_of(&self, kind: DiagnosticKind) -> usize {
        self.entries
            .iter()
            .filter(|diagnostic| diagnostic.kind == Some(kind))
            .count()
    }
}
