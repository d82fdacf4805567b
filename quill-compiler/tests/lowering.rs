use std::collections::HashSet;

use quill_compiler::ir::{lower_function, Instruction, InstructionSet, LoweringError};
use quill_compiler::{FunctionDecl, Item, Lexer, Parser, Statement};

fn function(source: &str) -> FunctionDecl {
    let tokens = Lexer::from_text(source).tokenize().expect("tokenize");
    let module = Parser::new(tokens).parse().expect("parse");
    match module.items.into_iter().next() {
        Some(Item::Function(function)) => function,
        _ => panic!("expected a function"),
    }
}

fn lower(source: &str) -> InstructionSet {
    lower_function(&function(source)).expect("lower")
}

const BUSY: &str = r#"
fn busy(items, limit: Number) {
  var total = 0
  var i = 0
  while i < limit {
    if items[i] > 0 and i != 3 {
      total = total + items[i]
    } else if i == 5 {
      return -1
    }
    i = i + 1
  }
  print(total, "done")
}
"#;

#[test]
fn every_slot_is_written_once() {
    let set = lower(BUSY);
    let mut seen = HashSet::new();
    for instruction in set.instructions() {
        if let Some(slot) = instruction.result() {
            assert!(seen.insert(slot), "slot {slot} written twice in\n{set}");
        }
    }
}

#[test]
fn jumps_land_inside_the_body() {
    let set = lower(BUSY);
    let targets: Vec<usize> = set
        .instructions()
        .iter()
        .filter_map(Instruction::jump_target)
        .collect();
    assert!(!targets.is_empty());
    for target in targets {
        assert!(target < set.len(), "jump to {target} escapes\n{set}");
    }
}

#[test]
fn while_loops_jump_back_to_the_condition() {
    let set = lower("fn spin(n) {\n  while n > 0 {\n    n = n - 1\n  }\n}\n");
    let backward = set
        .instructions()
        .iter()
        .enumerate()
        .find_map(|(index, instruction)| match instruction {
            Instruction::Goto { target } if *target < index => Some(*target),
            _ => None,
        })
        .expect("backward jump");
    assert_eq!(backward, 0);
    assert!(matches!(set.get(0), Some(Instruction::LoadIdentifier { name, .. }) if name == "n"));
}

#[test]
fn if_else_listing() {
    let set = lower("fn pick(flag) {\n  if flag { return 1 } else { return \"one\" }\n}\n");
    let expected = "\
0000 %1 = LOAD flag
0001 GOTO_IF %1 == false -> 0005
0002 %2 = CONST 1
0003 RETURN %2
0004 GOTO 0007
0005 %3 = CONST \"one\"
0006 RETURN %3
0007 %4 = CONST nil
0008 RETURN %4
";
    assert_eq!(set.to_string(), expected);
}

#[test]
fn implicit_nil_return_only_when_needed() {
    let explicit = lower("fn one() {\n  return 1\n}\n");
    assert_eq!(explicit.to_string(), "0000 %1 = CONST 1\n0001 RETURN %1\n");

    let implicit = lower("fn shout() {\n  print(1)\n}\n");
    let tail = &implicit.instructions()[implicit.len() - 2..];
    assert!(matches!(
        tail,
        [
            Instruction::Constant { literal: quill_compiler::Literal::Nil, .. },
            Instruction::Return { value: Some(_) }
        ]
    ));

    let bare = lower("fn nothing() {\n  return\n}\n");
    assert_eq!(bare.to_string(), "0000 %1 = CONST nil\n0001 RETURN %1\n");
}

#[test]
fn expressions_map_to_their_slots() {
    let decl = function("fn sum(a, b) {\n  return a + b\n}\n");
    let Some(Statement::Return(ret)) = decl.body.statements.first() else {
        panic!("expected a return");
    };
    let expression = ret.expression.as_ref().expect("expression");
    let set = lower_function(&decl).expect("lower");

    let slot = set.slot_for(expression.span).expect("slot for a + b");
    assert!(set
        .instructions()
        .iter()
        .any(|instruction| matches!(instruction, Instruction::Binary { result, .. } if *result == slot)));
}

#[test]
fn member_assignment_is_rejected() {
    let err = lower_function(&function("fn f(p) { p.x = 1 }")).expect_err("unsupported target");
    let LoweringError::UnsupportedAssignmentTarget { span } = &err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!((span.line, span.column), (1, 11));
    assert!(err.to_string().contains("line 1, column 11"));
}
