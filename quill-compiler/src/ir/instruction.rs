use std::collections::HashMap;
use std::fmt;

use crate::ast::{BinaryOperator, Literal, SourceSpan, UnaryOperator};

/// Name of an instruction's result. Each slot is written once per method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub u32);

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Constant {
        result: Slot,
        literal: Literal,
    },
    Unary {
        result: Slot,
        operator: UnaryOperator,
        operand: Slot,
    },
    Binary {
        result: Slot,
        left: Slot,
        operator: BinaryOperator,
        right: Slot,
    },
    Goto {
        target: usize,
    },
    /// Jumps to `target` when the truthiness of `condition` equals `expected`.
    GotoIf {
        target: usize,
        condition: Slot,
        expected: bool,
    },
    Call {
        result: Slot,
        callee: Slot,
        arguments: Vec<Slot>,
    },
    LoadIdentifier {
        result: Slot,
        name: String,
    },
    LoadMember {
        result: Slot,
        target: Slot,
        name: String,
    },
    Indexer {
        result: Slot,
        target: Slot,
        index: Slot,
    },
    /// Binds a local variable on the current path.
    Store {
        name: String,
        value: Slot,
    },
    /// Without a slot, returns the top of the stack (or nil when empty).
    Return {
        value: Option<Slot>,
    },
}

impl Instruction {
    pub fn result(&self) -> Option<Slot> {
        match self {
            Instruction::Constant { result, .. }
            | Instruction::Unary { result, .. }
            | Instruction::Binary { result, .. }
            | Instruction::Call { result, .. }
            | Instruction::LoadIdentifier { result, .. }
            | Instruction::LoadMember { result, .. }
            | Instruction::Indexer { result, .. } => Some(*result),
            Instruction::Goto { .. }
            | Instruction::GotoIf { .. }
            | Instruction::Store { .. }
            | Instruction::Return { .. } => None,
        }
    }

    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Instruction::Goto { target } | Instruction::GotoIf { target, .. } => Some(*target),
            _ => None,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Instruction::Return { .. })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Constant { result, literal } => write!(f, "{result} = CONST {literal}"),
            Instruction::Unary {
                result,
                operator,
                operand,
            } => write!(f, "{result} = UNARY {operator}{operand}"),
            Instruction::Binary {
                result,
                left,
                operator,
                right,
            } => write!(f, "{result} = BINARY {left} {operator} {right}"),
            Instruction::Goto { target } => write!(f, "GOTO {target:04}"),
            Instruction::GotoIf {
                target,
                condition,
                expected,
            } => write!(f, "GOTO_IF {condition} == {expected} -> {target:04}"),
            Instruction::Call {
                result,
                callee,
                arguments,
            } => {
                let joined = arguments
                    .iter()
                    .map(Slot::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{result} = CALL {callee}({joined})")
            }
            Instruction::LoadIdentifier { result, name } => write!(f, "{result} = LOAD {name}"),
            Instruction::LoadMember {
                result,
                target,
                name,
            } => write!(f, "{result} = MEMBER {target}.{name}"),
            Instruction::Indexer {
                result,
                target,
                index,
            } => write!(f, "{result} = INDEX {target}[{index}]"),
            Instruction::Store { name, value } => write!(f, "STORE {name} = {value}"),
            Instruction::Return { value: Some(value) } => write!(f, "RETURN {value}"),
            Instruction::Return { value: None } => write!(f, "RETURN"),
        }
    }
}

/// Immutable, ordered instruction sequence of one method body or expression.
#[derive(Debug, Clone, Default)]
pub struct InstructionSet {
    instructions: Vec<Instruction>,
    spans: Vec<SourceSpan>,
    expression_slots: HashMap<SourceSpan, Slot>,
}

impl InstructionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from raw instructions with no source positions.
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        let spans = vec![SourceSpan::default(); instructions.len()];
        Self {
            instructions,
            spans,
            expression_slots: HashMap::new(),
        }
    }

    pub fn emit(&mut self, instruction: Instruction, span: SourceSpan) -> usize {
        let index = self.instructions.len();
        self.instructions.push(instruction);
        self.spans.push(span);
        index
    }

    pub(crate) fn instruction_mut(&mut self, index: usize) -> Option<&mut Instruction> {
        self.instructions.get_mut(index)
    }

    pub(crate) fn record_expression(&mut self, span: SourceSpan, slot: Slot) {
        self.expression_slots.insert(span, slot);
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn span_at(&self, index: usize) -> SourceSpan {
        self.spans.get(index).copied().unwrap_or_default()
    }

    /// Result slot of the expression that occupies exactly `span`.
    pub fn slot_for(&self, span: SourceSpan) -> Option<Slot> {
        self.expression_slots.get(&span).copied()
    }
}

impl fmt::Display for InstructionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "{index:04} {instruction}")?;
        }
        Ok(())
    }
}
