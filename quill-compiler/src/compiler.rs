use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::analysis::{AnalysisOptions, Analyzer, RootScope, Type};
use crate::ast::{Module, SourceSpan};
use crate::diagnostics::Diagnostics;
use crate::ir::InstructionSet;
use crate::lexer::{Lexer, LexerError};
use crate::parser::Parser;
use crate::source::SourceFile;
use crate::symbols::{MethodId, SymbolTable};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    pub dump_tokens: bool,
    pub analysis: AnalysisOptions,
}

impl CompileOptions {
    /// Reads options from a JSON file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))
    }
}

/// Inferred facts about one declared function or method.
#[derive(Debug, Clone)]
pub struct FunctionSummary {
    pub id: MethodId,
    /// `Class.method` or the bare function name.
    pub name: String,
    pub return_type: Type,
    /// `None` when the body could not be lowered.
    pub instructions: Option<Rc<InstructionSet>>,
}

pub struct Compilation {
    pub module: Module,
    pub symbols: SymbolTable,
    pub functions: Vec<FunctionSummary>,
    options: AnalysisOptions,
}

impl Compilation {
    /// Summaries named `name`, in declaration order (overloads share a name).
    pub fn functions_named<'c>(
        &'c self,
        name: &'c str,
    ) -> impl Iterator<Item = &'c FunctionSummary> + 'c {
        self.functions.iter().filter(move |summary| summary.name == name)
    }

    /// Return type of the first function or method named `name`.
    pub fn return_type_of(&self, name: &str) -> Option<&Type> {
        self.functions
            .iter()
            .find(|summary| summary.name == name)
            .map(|summary| &summary.return_type)
    }

    /// Resolves a standalone expression against the module's members.
    pub fn expression_type(&self, text: &str) -> Result<(Type, Diagnostics)> {
        let tokens = Lexer::from_text(text).tokenize()?;
        let mut parser = Parser::new(tokens);
        let expression = parser.parse_standalone_expression()?;
        let mut analyzer = Analyzer::new(&self.symbols, self.options.clone());
        let ty = analyzer.resolve_type_of_expression(&expression, RootScope::module());
        Ok((ty, analyzer.into_diagnostics()))
    }
}

pub struct Compiler {
    diagnostics: Diagnostics,
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            diagnostics: Diagnostics::new(),
            options,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    /// Lexes, parses, builds the member tables and infers every declared method.
    /// Fails only when the source cannot be tokenized or parsed; everything found
    /// afterwards is reported through [`Compiler::diagnostics`].
    pub fn compile(&mut self, source: &SourceFile) -> Result<Compilation> {
        let mut lexer = Lexer::new(source);
        let tokens = match lexer.tokenize() {
            Ok(tokens) => tokens,
            Err(err) => {
                if let Some(lexer_error) = err.downcast_ref::<LexerError>() {
                    let line = lexer_error.line();
                    let column = lexer_error.column();
                    self.diagnostics.push_error_with_span(
                        lexer_error.to_string(),
                        Some(SourceSpan::single_point(line, column)),
                    );
                } else {
                    self.diagnostics.push_error_with_span(err.to_string(), None);
                }
                bail!("Lexing failed");
            }
        };

        if self.options.dump_tokens {
            for token in &tokens {
                println!("{token:?}");
            }
        }

        let mut parser = Parser::new(tokens);
        let parsed = parser.parse();
        self.diagnostics.extend(parser.into_diagnostics());
        let module = parsed.context("Parsing failed")?;

        let (symbols, symbol_diagnostics) = SymbolTable::build(&module);
        self.diagnostics.extend(symbol_diagnostics);
        debug!(
            target: "quill::compiler",
            methods = symbols.methods().count(),
            classes = symbols.classes().len(),
            "built member tables"
        );

        let mut analyzer = Analyzer::new(&symbols, self.options.analysis.clone());
        let method_ids: Vec<MethodId> = symbols.methods().map(|(id, _)| id).collect();
        let mut functions = Vec::with_capacity(method_ids.len());
        for id in method_ids {
            let return_type = analyzer.return_type(id);
            let name = symbols.qualified_name(id);
            info!(target: "quill::compiler", function = %name, %return_type, "inferred");
            functions.push(FunctionSummary {
                id,
                name,
                return_type,
                instructions: analyzer.instructions(id),
            });
        }
        self.diagnostics.extend(analyzer.into_diagnostics());

        Ok(Compilation {
            module,
            symbols,
            functions,
            options: self.options.analysis.clone(),
        })
    }
}
