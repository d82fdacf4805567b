use thiserror::Error;

use super::instruction::{Instruction, InstructionSet, Slot};
use crate::ast::{
    Block, ConditionalStatement, Expression, ExpressionKind, FunctionDecl, Literal, SourceSpan,
    Statement, WhileStatement,
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoweringError {
    #[error("assignment to this kind of target is not supported (line {}, column {})", .span.line, .span.column)]
    UnsupportedAssignmentTarget { span: SourceSpan },
    #[error("invalid jump patch location {index}")]
    InvalidJumpPatch { index: usize },
}

impl LoweringError {
    pub fn span(&self) -> Option<SourceSpan> {
        match self {
            LoweringError::UnsupportedAssignmentTarget { span } => Some(*span),
            LoweringError::InvalidJumpPatch { .. } => None,
        }
    }
}

/// Flattens a function body into an instruction sequence. A body that can fall off
/// its end, or whose jumps land past the last instruction, gets a trailing
/// `return nil`.
pub fn lower_function(function: &FunctionDecl) -> Result<InstructionSet, LoweringError> {
    let mut lowerer = Lowerer::default();
    lowerer.lower_block(&function.body)?;
    lowerer.finish_with_implicit_return(function.span);
    Ok(lowerer.set)
}

/// Lowers a standalone expression into a set that returns its value.
pub fn lower_expression(expression: &Expression) -> Result<InstructionSet, LoweringError> {
    let mut lowerer = Lowerer::default();
    let value = lowerer.lower_expression(expression)?;
    lowerer.set.emit(
        Instruction::Return { value: Some(value) },
        expression.span,
    );
    Ok(lowerer.set)
}

#[derive(Default)]
struct Lowerer {
    set: InstructionSet,
    next_slot: u32,
}

impl Lowerer {
    fn allocate_slot(&mut self) -> Slot {
        self.next_slot += 1;
        Slot(self.next_slot)
    }

    fn finish_with_implicit_return(&mut self, span: SourceSpan) {
        let len = self.set.len();
        let ends_in_return = self
            .set
            .instructions()
            .last()
            .is_some_and(Instruction::is_return);
        let jumps_past_end = self
            .set
            .instructions()
            .iter()
            .any(|instruction| instruction.jump_target() == Some(len));
        if ends_in_return && !jumps_past_end {
            return;
        }

        let result = self.allocate_slot();
        self.set.emit(
            Instruction::Constant {
                result,
                literal: Literal::Nil,
            },
            span,
        );
        self.set
            .emit(Instruction::Return { value: Some(result) }, span);
    }

    fn lower_block(&mut self, block: &Block) -> Result<(), LoweringError> {
        for statement in &block.statements {
            self.lower_statement(statement)?;
        }
        Ok(())
    }

    fn lower_statement(&mut self, statement: &Statement) -> Result<(), LoweringError> {
        match statement {
            Statement::Var(var) => {
                let value = self.lower_expression(&var.initializer)?;
                self.set.emit(
                    Instruction::Store {
                        name: var.name.clone(),
                        value,
                    },
                    var.span,
                );
            }
            Statement::Conditional(conditional) => self.lower_conditional(conditional)?,
            Statement::While(while_statement) => self.lower_while(while_statement)?,
            Statement::Return(ret) => {
                let value = match &ret.expression {
                    Some(expression) => self.lower_expression(expression)?,
                    None => {
                        let result = self.allocate_slot();
                        self.set.emit(
                            Instruction::Constant {
                                result,
                                literal: Literal::Nil,
                            },
                            ret.span,
                        );
                        result
                    }
                };
                self.set
                    .emit(Instruction::Return { value: Some(value) }, ret.span);
            }
            Statement::Expression(expression) => {
                self.lower_expression(&expression.expression)?;
            }
        }
        Ok(())
    }

    fn lower_conditional(&mut self, statement: &ConditionalStatement) -> Result<(), LoweringError> {
        let condition = self.lower_expression(&statement.condition)?;
        let then_jump = self.set.emit(
            Instruction::GotoIf {
                target: usize::MAX,
                condition,
                expected: false,
            },
            statement.condition.span,
        );
        self.lower_block(&statement.consequent)?;

        match &statement.alternative {
            Some(alternative) => {
                let else_jump = self
                    .set
                    .emit(Instruction::Goto { target: usize::MAX }, statement.span);
                self.patch_jump(then_jump)?;
                self.lower_block(alternative)?;
                self.patch_jump(else_jump)?;
            }
            None => self.patch_jump(then_jump)?,
        }
        Ok(())
    }

    fn lower_while(&mut self, statement: &WhileStatement) -> Result<(), LoweringError> {
        let loop_start = self.set.len();
        let condition = self.lower_expression(&statement.condition)?;
        let exit_jump = self.set.emit(
            Instruction::GotoIf {
                target: usize::MAX,
                condition,
                expected: false,
            },
            statement.condition.span,
        );
        self.lower_block(&statement.body)?;
        self.set
            .emit(Instruction::Goto { target: loop_start }, statement.span);
        self.patch_jump(exit_jump)
    }

    fn patch_jump(&mut self, index: usize) -> Result<(), LoweringError> {
        let target = self.set.len();
        match self.set.instruction_mut(index) {
            Some(Instruction::Goto { target: slot }) | Some(Instruction::GotoIf { target: slot, .. }) => {
                *slot = target;
                Ok(())
            }
            _ => Err(LoweringError::InvalidJumpPatch { index }),
        }
    }

    fn lower_expression(&mut self, expression: &Expression) -> Result<Slot, LoweringError> {
        let span = expression.span;
        let slot = match &expression.kind {
            ExpressionKind::Literal(literal) => {
                let result = self.allocate_slot();
                self.set.emit(
                    Instruction::Constant {
                        result,
                        literal: literal.clone(),
                    },
                    span,
                );
                result
            }
            ExpressionKind::Identifier(identifier) => {
                let result = self.allocate_slot();
                self.set.emit(
                    Instruction::LoadIdentifier {
                        result,
                        name: identifier.name.clone(),
                    },
                    span,
                );
                result
            }
            ExpressionKind::SelfRef => {
                let result = self.allocate_slot();
                self.set.emit(
                    Instruction::LoadIdentifier {
                        result,
                        name: "self".to_string(),
                    },
                    span,
                );
                result
            }
            ExpressionKind::Unary(unary) => {
                let operand = self.lower_expression(&unary.operand)?;
                let result = self.allocate_slot();
                self.set.emit(
                    Instruction::Unary {
                        result,
                        operator: unary.operator,
                        operand,
                    },
                    span,
                );
                result
            }
            ExpressionKind::Binary(binary) => {
                let left = self.lower_expression(&binary.left)?;
                let right = self.lower_expression(&binary.right)?;
                let result = self.allocate_slot();
                self.set.emit(
                    Instruction::Binary {
                        result,
                        left,
                        operator: binary.operator,
                        right,
                    },
                    span,
                );
                result
            }
            ExpressionKind::Assignment(assignment) => {
                let ExpressionKind::Identifier(identifier) = &assignment.target.kind else {
                    return Err(LoweringError::UnsupportedAssignmentTarget {
                        span: assignment.target.span,
                    });
                };
                let value = self.lower_expression(&assignment.value)?;
                self.set.emit(
                    Instruction::Store {
                        name: identifier.name.clone(),
                        value,
                    },
                    span,
                );
                value
            }
            ExpressionKind::Call(call) => {
                let callee = self.lower_expression(&call.callee)?;
                let arguments = call
                    .arguments
                    .iter()
                    .map(|argument| self.lower_expression(argument))
                    .collect::<Result<Vec<_>, _>>()?;
                let result = self.allocate_slot();
                self.set.emit(
                    Instruction::Call {
                        result,
                        callee,
                        arguments,
                    },
                    span,
                );
                result
            }
            ExpressionKind::Member(member) => {
                let target = self.lower_expression(&member.object)?;
                let result = self.allocate_slot();
                self.set.emit(
                    Instruction::LoadMember {
                        result,
                        target,
                        name: member.property.clone(),
                    },
                    span,
                );
                result
            }
            ExpressionKind::Index(index) => {
                let target = self.lower_expression(&index.object)?;
                let index_slot = self.lower_expression(&index.index)?;
                let result = self.allocate_slot();
                self.set.emit(
                    Instruction::Indexer {
                        result,
                        target,
                        index: index_slot,
                    },
                    span,
                );
                result
            }
            ExpressionKind::Grouping(inner) => self.lower_expression(inner)?,
        };

        self.set.record_expression(span, slot);
        Ok(slot)
    }
}
