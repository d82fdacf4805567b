//! Path-sensitive type resolution over lowered instruction sets.
//!
//! The [`Analyzer`] walks an [`InstructionSet`](crate::ir::InstructionSet) as a small
//! abstract interpreter: it forks a [`Branch`] at every conditional jump and at every
//! call with more than one possible result, descends into callees, stops loops after
//! one iteration and collects the branches that terminate. Consumers union the
//! values those branches return.

pub mod branch;
pub mod error;
pub mod interpreter;
pub mod overload;
pub mod types;
pub mod value;

use serde::Deserialize;

pub use branch::{Branch, BranchArena, BranchId, BranchParent, RootScope, Termination};
pub use error::AnalysisError;
pub use interpreter::{Analyzer, Resolution};
pub use overload::{resolve_overload, OverloadChoice};
pub use types::{ClassRef, Type};
pub use value::Value;

/// How a conditional jump splits the current path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForkMode {
    /// Follow both the taken and the fall-through side.
    #[default]
    Symmetric,
    /// Follow only the fall-through side.
    FallthroughOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisOptions {
    pub fork_mode: ForkMode,
    /// Nested calls deeper than this resolve to the callee's declared return type.
    pub max_call_depth: usize,
    /// Branches one resolution may allocate before forking is curtailed.
    pub max_branches: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            fork_mode: ForkMode::Symmetric,
            max_call_depth: 32,
            max_branches: 4096,
        }
    }
}
