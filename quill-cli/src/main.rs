use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use quill_compiler::{
    Compilation, CompileOptions, Compiler, Diagnostic, DiagnosticLevel, Diagnostics,
    FunctionSummary, SourceFile, SourceId,
};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

const LOG_FILTER: &str = "RUST_LOG";

#[derive(Parser)]
#[command(
    name = "quill",
    version,
    about = "Infer the types quill functions can return.",
    long_about = "Parse a quill source file, lower every function body and resolve the types each function can produce along every execution path."
)]
struct Cli {
    /// Increase log output (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON file with compiler and analysis options.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report diagnostics; exits with status 1 when any error is found.
    Check(InputArgs),
    /// Print the inferred return type of every function and method.
    Infer {
        #[command(flatten)]
        input: InputArgs,

        /// Resolve this expression against the module instead of listing functions.
        #[arg(long, value_name = "EXPR", conflicts_with = "function")]
        expression: Option<String>,

        /// Print the inferred types as a JSON document.
        #[arg(long)]
        json: bool,
    },
    /// Print the lowered instruction listing of every function and method.
    Ir(InputArgs),
}

#[derive(Args)]
struct InputArgs {
    /// Path to a quill source file.
    input: PathBuf,

    /// Only show the function or method with this name (`name` or `Class.name`).
    #[arg(long, value_name = "NAME")]
    function: Option<String>,

    /// Dump the token stream produced by the lexer.
    #[arg(long)]
    dump_tokens: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut options = match &cli.config {
        Some(path) => CompileOptions::load(path)?,
        None => CompileOptions::default(),
    };
    debug!(target: "quill::cli", ?options, "compile options");

    match cli.command {
        Command::Check(input) => {
            options.dump_tokens = input.dump_tokens;
            let (source, compiler, compilation) = compile(&input.input, options)?;
            let diagnostics = compiler.diagnostics();
            let shown = filter_diagnostics(&compilation, diagnostics, input.function.as_deref())?;
            for diagnostic in &shown {
                print_diagnostic(&source, diagnostic);
            }
            let errors = shown
                .iter()
                .filter(|diagnostic| diagnostic.level == DiagnosticLevel::Error)
                .count();
            if errors > 0 {
                eprintln!("{}: {errors} error(s)", source.path.display());
                return Ok(ExitCode::FAILURE);
            }
            println!("{}: ok", source.path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Infer {
            input,
            expression,
            json,
        } => {
            options.dump_tokens = input.dump_tokens;
            let (source, compiler, compilation) = compile(&input.input, options)?;
            print_all(&source, compiler.diagnostics());

            if let Some(expression) = expression {
                let (ty, diagnostics) = compilation
                    .expression_type(&expression)
                    .with_context(|| format!("Failed to parse expression `{expression}`"))?;
                print_all(&source, &diagnostics);
                if json {
                    println!("{}", json!({ "expression": expression, "type": ty.to_string() }));
                } else {
                    println!("{ty}");
                }
                return Ok(ExitCode::SUCCESS);
            }

            let selected = select_functions(&compilation, input.function.as_deref())?;
            if json {
                println!("{}", functions_json(&source, &selected)?);
                return Ok(ExitCode::SUCCESS);
            }
            for summary in selected {
                println!("{}: {}", summary.name, summary.return_type);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Ir(input) => {
            options.dump_tokens = input.dump_tokens;
            let (source, compiler, compilation) = compile(&input.input, options)?;
            print_all(&source, compiler.diagnostics());

            for summary in select_functions(&compilation, input.function.as_deref())? {
                println!("fn {}:", summary.name);
                match &summary.instructions {
                    Some(instructions) => print!("{instructions}"),
                    None => println!("  <body could not be lowered>"),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn compile(path: &Path, options: CompileOptions) -> Result<(SourceFile, Compiler, Compilation)> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let source = SourceFile::new(SourceId(0), path.to_path_buf(), contents);
    let mut compiler = Compiler::new(options);

    match compiler.compile(&source) {
        Ok(compilation) => Ok((source, compiler, compilation)),
        Err(err) => {
            print_all(&source, compiler.diagnostics());
            Err(err.context("Compilation failed"))
        }
    }
}

fn select_functions<'c>(
    compilation: &'c Compilation,
    name: Option<&str>,
) -> Result<Vec<&'c FunctionSummary>> {
    let selected: Vec<&FunctionSummary> = compilation
        .functions
        .iter()
        .filter(|summary| name.map_or(true, |name| matches_name(summary, name)))
        .collect();
    if let (Some(name), true) = (name, selected.is_empty()) {
        bail!("no function or method named '{name}'");
    }
    Ok(selected)
}

fn functions_json(source: &SourceFile, functions: &[&FunctionSummary]) -> Result<String> {
    let entries: Vec<_> = functions
        .iter()
        .map(|summary| {
            json!({
                "name": summary.name,
                "return_type": summary.return_type.to_string(),
                "lowered": summary.instructions.is_some(),
            })
        })
        .collect();
    let document = json!({
        "path": source.path.display().to_string(),
        "functions": entries,
    });
    serde_json::to_string_pretty(&document).map_err(Into::into)
}

fn matches_name(summary: &FunctionSummary, name: &str) -> bool {
    summary.name == name || summary.name.rsplit('.').next() == Some(name)
}

/// Diagnostics located inside the selected functions, or all of them without a filter.
fn filter_diagnostics<'d>(
    compilation: &Compilation,
    diagnostics: &'d Diagnostics,
    name: Option<&str>,
) -> Result<Vec<&'d Diagnostic>> {
    let Some(name) = name else {
        return Ok(diagnostics.entries().iter().collect());
    };
    let spans: Vec<_> = select_functions(compilation, Some(name))?
        .into_iter()
        .map(|summary| compilation.symbols.method(summary.id).declaration.span)
        .collect();
    Ok(diagnostics
        .entries()
        .iter()
        .filter(|diagnostic| {
            diagnostic.span.is_some_and(|span| {
                spans
                    .iter()
                    .any(|function| function.contains(span.line, span.column))
            })
        })
        .collect())
}

fn print_all(source: &SourceFile, diagnostics: &Diagnostics) {
    for diagnostic in diagnostics.entries() {
        print_diagnostic(source, diagnostic);
    }
}

fn print_diagnostic(source: &SourceFile, diagnostic: &Diagnostic) {
    let display_path = source.path.display();
    let Some(span) = diagnostic.span else {
        eprintln!("{display_path}: {}: {}", diagnostic.level, diagnostic.message);
        return;
    };
    eprintln!(
        "{display_path}:{}:{}: {}: {}",
        span.line, span.column, diagnostic.level, diagnostic.message
    );

    if let Some(raw_line) = source.contents.lines().nth(span.line.saturating_sub(1)) {
        let display_line = raw_line.replace('\t', "    ");
        eprintln!("    {display_line}");

        let mut caret_line = String::from("    ");
        for (index, ch) in raw_line.chars().enumerate() {
            if index + 1 >= span.column {
                break;
            }
            match ch {
                '\t' => caret_line.push_str("    "),
                _ => caret_line.push(' '),
            }
        }
        let highlight_len = if span.end_line == span.line {
            span.end_column.saturating_sub(span.column).saturating_add(1)
        } else {
            1
        };
        caret_line.push_str(&"^".repeat(highlight_len.max(1)));
        eprintln!("{caret_line}");
    }
}

fn init_tracing(verbosity: u8) {
    let env_filter = match env::var_os(LOG_FILTER) {
        Some(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        None => EnvFilter::new("warn"),
    };

    let level_filter = match verbosity {
        0 => None,
        1 => Some(LevelFilter::DEBUG),
        _ => Some(LevelFilter::TRACE),
    };

    let builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .without_time()
        .with_target(true)
        .with_writer(io::stderr);

    // an explicit verbosity flag overrides RUST_LOG
    if let Some(level_filter) = level_filter {
        builder.with_max_level(level_filter).init();
    } else {
        builder.init();
    }
}
