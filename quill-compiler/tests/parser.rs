use quill_compiler::{
    CompileOptions, Compiler, Expression, ExpressionKind, Item, Lexer, LexerError, Parser,
    SourceFile, Statement,
};

fn parse_expression(text: &str) -> Expression {
    let tokens = Lexer::from_text(text).tokenize().expect("tokenize");
    Parser::new(tokens)
        .parse_standalone_expression()
        .expect("parse expression")
}

/// Prefix rendering of an expression tree, e.g. `(+ 1 (* 2 3))`.
fn render(expression: &Expression) -> String {
    match &expression.kind {
        ExpressionKind::Literal(literal) => literal.to_string(),
        ExpressionKind::Identifier(identifier) => identifier.name.clone(),
        ExpressionKind::SelfRef => "self".to_string(),
        ExpressionKind::Unary(unary) => format!("({} {})", unary.operator, render(&unary.operand)),
        ExpressionKind::Binary(binary) => format!(
            "({} {} {})",
            binary.operator,
            render(&binary.left),
            render(&binary.right)
        ),
        ExpressionKind::Assignment(assignment) => format!(
            "(= {} {})",
            render(&assignment.target),
            render(&assignment.value)
        ),
        ExpressionKind::Call(call) => {
            let mut parts = vec![render(&call.callee)];
            parts.extend(call.arguments.iter().map(render));
            format!("(call {})", parts.join(" "))
        }
        ExpressionKind::Member(member) => format!("(. {} {})", render(&member.object), member.property),
        ExpressionKind::Index(index) => {
            format!("([] {} {})", render(&index.object), render(&index.index))
        }
        ExpressionKind::Grouping(inner) => render(inner),
    }
}

#[test]
fn binary_operators_follow_precedence() {
    assert_eq!(
        render(&parse_expression("1 + 2 * 3 == 7 and !false")),
        "(and (== (+ 1 (* 2 3)) 7) (! false))"
    );
    assert_eq!(render(&parse_expression("10 - 4 - 3")), "(- (- 10 4) 3)");
    assert_eq!(render(&parse_expression("(1 + 2) * 3")), "(* (+ 1 2) 3)");
    assert_eq!(
        render(&parse_expression("a or b and c < d")),
        "(or a (and b (< c d)))"
    );
}

#[test]
fn unary_operand_keeps_postfix_chain() {
    assert_eq!(render(&parse_expression("-point.x")), "(- (. point x))");
    assert_eq!(
        render(&parse_expression("items[0].name(1, \"a\")")),
        "(call (. ([] items 0) name) 1 \"a\")"
    );
}

#[test]
fn assignment_is_right_associative() {
    assert_eq!(render(&parse_expression("a = b = 1")), "(= a (= b 1))");
    assert_eq!(render(&parse_expression("p.x = 2 + 3")), "(= (. p x) (+ 2 3))");
}

#[test]
fn rejects_invalid_assignment_target() {
    let tokens = Lexer::from_text("1 + 2 = 3").tokenize().expect("tokenize");
    let mut parser = Parser::new(tokens);
    let err = parser
        .parse_standalone_expression()
        .expect_err("literal is not assignable");
    assert!(err.to_string().contains("invalid assignment target"));

    let diagnostics = parser.into_diagnostics();
    let entry = &diagnostics.entries()[0];
    assert_eq!(entry.message, "invalid assignment target");
    assert_eq!(entry.span.map(|span| (span.line, span.column)), Some((1, 1)));
}

#[test]
fn else_if_chains_nest_and_else_may_follow_a_newline() {
    let source = r#"
fn grade(n) {
  if n > 90 {
    return "a"
  } else if n > 50 {
    return "b"
  }
  else {
    return "c"
  }
}
"#;
    let tokens = Lexer::from_text(source).tokenize().expect("tokenize");
    let module = Parser::new(tokens).parse().expect("parse");

    let Some(Item::Function(grade)) = module.items.first() else {
        panic!("expected a function");
    };
    assert_eq!(grade.body.statements.len(), 1);
    let Statement::Conditional(outer) = &grade.body.statements[0] else {
        panic!("expected a conditional");
    };
    let alternative = outer.alternative.as_ref().expect("else branch");
    let Statement::Conditional(inner) = &alternative.statements[0] else {
        panic!("expected else-if to nest a conditional");
    };
    assert_eq!(render(&inner.condition), "(> n 50)");
    assert!(inner.alternative.is_some());
    assert_eq!(outer.span.line, 3);
    assert_eq!(outer.span.end_line, 10);
}

#[test]
fn classes_parameters_and_globals() {
    let source = r#"
const LIMIT: Number = 3
var greeting = "hi"

class Counter {
  var count: Number = 0
  var label

  fn add(step: Number = 1, ...rest) -> Number {
    return self.count + step
  }
}
"#;
    let tokens = Lexer::from_text(source).tokenize().expect("tokenize");
    let module = Parser::new(tokens).parse().expect("parse");
    assert_eq!(module.items.len(), 3);

    let Item::Global(limit) = &module.items[0] else {
        panic!("expected a global");
    };
    assert!(limit.is_const);
    assert_eq!(
        limit.type_annotation.as_ref().map(|annotation| annotation.name.as_str()),
        Some("Number")
    );

    let Item::Class(counter) = &module.items[2] else {
        panic!("expected a class");
    };
    assert_eq!(counter.fields.len(), 2);
    assert!(counter.fields[1].type_annotation.is_none());
    let add = &counter.methods[0];
    assert_eq!(add.parameters.len(), 2);
    assert!(add.parameters[0].default_value.is_some());
    assert!(add.parameters[1].is_variadic);
    assert_eq!(
        add.return_type.as_ref().map(|annotation| annotation.name.as_str()),
        Some("Number")
    );
}

#[test]
fn parse_errors_carry_a_location() {
    let mut compiler = Compiler::new(CompileOptions::default());
    let err = compiler
        .compile(&SourceFile::anonymous("fn broken( {\n}\n"))
        .err()
        .expect("parse should fail");
    assert_eq!(err.to_string(), "Parsing failed");
    assert!(format!("{err:#}").contains("line 1, column 12"));

    let entry = &compiler.diagnostics().entries()[0];
    assert_eq!(entry.message, "expected parameter name (found '{')");
    let span = entry.span.expect("span");
    assert_eq!((span.line, span.column), (1, 12));
}

#[test]
fn missing_block_end_reports_end_of_input() {
    let mut compiler = Compiler::new(CompileOptions::default());
    let result = compiler.compile(&SourceFile::anonymous("fn open() {\n  return 1\n"));
    assert!(result.is_err());
    assert_eq!(
        compiler.diagnostics().entries()[0].message,
        "unterminated block, expected '}' (found end of input)"
    );
}

#[test]
fn lexer_errors_stop_compilation() {
    let err = Lexer::from_text("fn f() { return 1 @ 2 }")
        .tokenize()
        .expect_err("'@' is not a token");
    assert_eq!(
        err.downcast_ref::<LexerError>(),
        Some(&LexerError::UnexpectedCharacter {
            character: '@',
            line: 1,
            column: 19,
        })
    );

    let mut compiler = Compiler::new(CompileOptions::default());
    let err = compiler
        .compile(&SourceFile::anonymous("fn f() { return 1 @ 2 }"))
        .err()
        .expect("lexing should fail");
    assert_eq!(err.to_string(), "Lexing failed");
    assert_eq!(
        compiler.diagnostics().entries()[0].message,
        "unexpected character '@' at line 1, column 19"
    );
}
