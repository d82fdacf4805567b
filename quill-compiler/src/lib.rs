pub mod analysis;
mod ast;
mod compiler;
mod diagnostics;
pub mod ir;
mod lexer;
mod parser;
mod source;
pub mod symbols;

pub use crate::analysis::{
    AnalysisError, AnalysisOptions, Analyzer, Branch, BranchArena, BranchId, ForkMode,
    Resolution, RootScope, Termination, Type, Value,
};
pub use crate::ast::{
    AssignmentExpression, BinaryExpression, BinaryOperator, Block, CallExpression, ClassDecl,
    ConditionalStatement, Expression, ExpressionKind, ExpressionStatement, FieldDecl,
    FunctionDecl, GlobalDecl, Identifier, IndexExpression, Item, Literal, MemberExpression,
    Module, Parameter, ReturnStatement, SourceSpan, Statement, TypeAnnotation, UnaryExpression,
    UnaryOperator, VarStatement, WhileStatement,
};
pub use crate::compiler::{Compilation, CompileOptions, Compiler, FunctionSummary};
pub use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLevel, Diagnostics};
pub use crate::ir::{Instruction, InstructionSet, LoweringError, Slot};
pub use crate::lexer::{Keyword, Lexer, LexerError, Token, TokenKind};
pub use crate::parser::Parser;
pub use crate::source::{SourceFile, SourceId};
pub use crate::symbols::{MemberRef, MethodId, SymbolTable};
