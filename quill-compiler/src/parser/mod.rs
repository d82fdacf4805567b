use anyhow::{anyhow, Result};

use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::lexer::{Keyword, Token, TokenKind};

#[derive(Copy, Clone, PartialEq, PartialOrd)]
enum Precedence {
    Lowest = 0,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
}

impl Precedence {
    fn of(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Equal => Some(Precedence::Assignment),
            TokenKind::Keyword(Keyword::Or) => Some(Precedence::Or),
            TokenKind::Keyword(Keyword::And) => Some(Precedence::And),
            TokenKind::DoubleEqual | TokenKind::BangEqual => Some(Precedence::Equality),
            TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => Some(Precedence::Comparison),
            TokenKind::Plus | TokenKind::Minus => Some(Precedence::Term),
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some(Precedence::Factor),
            _ => None,
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    diagnostics: Diagnostics,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    fn span_from_token(token: &Token) -> SourceSpan {
        let len = token.lexeme.chars().count().max(1);
        SourceSpan::new(
            token.line,
            token.column,
            token.line,
            token.column + len.saturating_sub(1),
        )
    }

    fn make_expression(span: SourceSpan, kind: ExpressionKind) -> Expression {
        Expression { span, kind }
    }

    pub fn parse(&mut self) -> Result<Module> {
        let mut items = Vec::new();

        loop {
            self.skip_separators();
            if self.is_at_end() {
                break;
            }
            items.push(self.parse_item()?);
        }

        Ok(Module::new(items))
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    /// Parses a single expression followed by end of input. Used for expression queries.
    pub fn parse_standalone_expression(&mut self) -> Result<Expression> {
        self.skip_separators();
        let expression = self.parse_expression(Precedence::Lowest)?;
        self.skip_separators();
        if !self.is_at_end() {
            let token = self.peek().clone();
            return Err(self.error_at(&token, "expected end of expression"));
        }
        Ok(expression)
    }

    fn parse_item(&mut self) -> Result<Item> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Keyword(Keyword::Fn) => {
                self.advance();
                Ok(Item::Function(self.parse_function()?))
            }
            TokenKind::Keyword(Keyword::Class) => {
                self.advance();
                Ok(Item::Class(self.parse_class()?))
            }
            TokenKind::Keyword(Keyword::Var) | TokenKind::Keyword(Keyword::Const) => {
                self.advance();
                let is_const = token.kind == TokenKind::Keyword(Keyword::Const);
                Ok(Item::Global(self.parse_global(is_const)?))
            }
            _ => Err(self.error_at(
                &token,
                "expected 'fn', 'class', 'var' or 'const' at module level",
            )),
        }
    }

    fn parse_global(&mut self, is_const: bool) -> Result<GlobalDecl> {
        let (name, span) = self.expect_identifier("expected a name after 'var'")?;
        let type_annotation = self.parse_optional_annotation()?;
        self.expect_token(TokenKind::Equal, "expected '=' in module-level binding")?;
        let initializer = self.parse_expression(Precedence::Lowest)?;
        self.expect_statement_end()?;
        Ok(GlobalDecl {
            is_const,
            name,
            span,
            type_annotation,
            initializer,
        })
    }

    fn parse_function(&mut self) -> Result<FunctionDecl> {
        let start = self.tokens[self.current.saturating_sub(1)].clone();
        let (name, name_span) = self.expect_identifier("expected function name after 'fn'")?;
        self.expect_token(TokenKind::LParen, "expected '(' after function name")?;
        let parameters = self.parse_parameters()?;
        let return_type = if matches!(self.peek_kind(), TokenKind::Arrow) {
            self.advance();
            Some(self.parse_annotation()?)
        } else {
            None
        };
        let (body, closing_span) = self.parse_block()?;
        Ok(FunctionDecl {
            name,
            name_span,
            parameters,
            return_type,
            body,
            span: SourceSpan::union(&Self::span_from_token(&start), &closing_span),
        })
    }

    fn parse_parameters(&mut self) -> Result<Vec<Parameter>> {
        let mut parameters: Vec<Parameter> = Vec::new();
        self.skip_newlines();
        if matches!(self.peek_kind(), TokenKind::RParen) {
            self.advance();
            return Ok(parameters);
        }

        loop {
            self.skip_newlines();
            let is_variadic = if matches!(self.peek_kind(), TokenKind::DotDotDot) {
                self.advance();
                true
            } else {
                false
            };
            let (name, span) = self.expect_identifier("expected parameter name")?;
            let type_annotation = self.parse_optional_annotation()?;
            let default_value = if matches!(self.peek_kind(), TokenKind::Equal) {
                self.advance();
                Some(self.parse_expression(Precedence::Assignment)?)
            } else {
                None
            };

            if parameters.iter().any(|existing| existing.is_variadic) {
                self.diagnostics.push_error_with_span(
                    format!("parameter '{name}' follows a variadic parameter"),
                    Some(span),
                );
            }
            parameters.push(Parameter {
                name,
                span,
                type_annotation,
                default_value,
                is_variadic,
            });

            self.skip_newlines();
            let token = self.advance().clone();
            match token.kind {
                TokenKind::Comma => continue,
                TokenKind::RParen => break,
                _ => return Err(self.error_at(&token, "expected ',' or ')' in parameter list")),
            }
        }

        Ok(parameters)
    }

    fn parse_class(&mut self) -> Result<ClassDecl> {
        let (name, name_span) = self.expect_identifier("expected class name after 'class'")?;
        self.expect_token(TokenKind::LBrace, "expected '{' to start class body")?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();

        loop {
            self.skip_separators();
            let token = self.peek().clone();
            match token.kind {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Keyword(Keyword::Var) => {
                    self.advance();
                    let (field_name, span) = self.expect_identifier("expected field name")?;
                    let type_annotation = self.parse_optional_annotation()?;
                    let initializer = if matches!(self.peek_kind(), TokenKind::Equal) {
                        self.advance();
                        Some(self.parse_expression(Precedence::Lowest)?)
                    } else {
                        None
                    };
                    self.expect_statement_end()?;
                    fields.push(FieldDecl {
                        name: field_name,
                        span,
                        type_annotation,
                        initializer,
                    });
                }
                TokenKind::Keyword(Keyword::Fn) => {
                    self.advance();
                    methods.push(self.parse_function()?);
                }
                TokenKind::Eof => {
                    return Err(self.error_at(&token, "unterminated class body, expected '}'"))
                }
                _ => {
                    return Err(self.error_at(&token, "expected 'var' or 'fn' inside class body"))
                }
            }
        }

        Ok(ClassDecl {
            name,
            name_span,
            fields,
            methods,
        })
    }

    fn parse_optional_annotation(&mut self) -> Result<Option<TypeAnnotation>> {
        if matches!(self.peek_kind(), TokenKind::Colon) {
            self.advance();
            Ok(Some(self.parse_annotation()?))
        } else {
            Ok(None)
        }
    }

    fn parse_annotation(&mut self) -> Result<TypeAnnotation> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Identifier => {
                self.advance();
                Ok(TypeAnnotation {
                    name: token.lexeme.clone(),
                    span: Self::span_from_token(&token),
                })
            }
            TokenKind::Keyword(Keyword::Nil) => {
                self.advance();
                Ok(TypeAnnotation {
                    name: "Nil".to_string(),
                    span: Self::span_from_token(&token),
                })
            }
            _ => Err(self.error_at(&token, "expected a type name")),
        }
    }

    fn parse_block(&mut self) -> Result<(Block, SourceSpan)> {
        self.expect_token(TokenKind::LBrace, "expected '{' to start block")?;
        let mut statements = Vec::new();

        loop {
            self.skip_separators();
            let token = self.peek().clone();
            match token.kind {
                TokenKind::RBrace => {
                    self.advance();
                    return Ok((Block { statements }, Self::span_from_token(&token)));
                }
                TokenKind::Eof => {
                    return Err(self.error_at(&token, "unterminated block, expected '}'"))
                }
                _ => statements.push(self.parse_statement()?),
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let token = self.peek().clone();
        let span = Self::span_from_token(&token);
        match token.kind {
            TokenKind::Keyword(Keyword::Var) => {
                self.advance();
                let (name, name_span) = self.expect_identifier("expected a name after 'var'")?;
                self.expect_token(TokenKind::Equal, "expected '=' after variable name")?;
                let initializer = self.parse_expression(Precedence::Lowest)?;
                self.expect_statement_end()?;
                Ok(Statement::Var(VarStatement {
                    name,
                    span: name_span,
                    initializer,
                }))
            }
            TokenKind::Keyword(Keyword::If) => {
                self.advance();
                Ok(Statement::Conditional(self.parse_conditional(span)?))
            }
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                let condition = self.parse_expression(Precedence::Lowest)?;
                let (body, closing_span) = self.parse_block()?;
                Ok(Statement::While(WhileStatement {
                    condition,
                    body,
                    span: SourceSpan::union(&span, &closing_span),
                }))
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let expression = if matches!(
                    self.peek_kind(),
                    TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(self.parse_expression(Precedence::Lowest)?)
                };
                self.expect_statement_end()?;
                let span = expression
                    .as_ref()
                    .map(|expr| SourceSpan::union(&span, &expr.span))
                    .unwrap_or(span);
                Ok(Statement::Return(ReturnStatement { expression, span }))
            }
            _ => {
                let expression = self.parse_expression(Precedence::Lowest)?;
                self.expect_statement_end()?;
                Ok(Statement::Expression(ExpressionStatement { expression }))
            }
        }
    }

    fn parse_conditional(&mut self, start: SourceSpan) -> Result<ConditionalStatement> {
        let condition = self.parse_expression(Precedence::Lowest)?;
        let (consequent, closing_span) = self.parse_block()?;
        let mut span = SourceSpan::union(&start, &closing_span);

        if self.next_significant_is(Keyword::Else) {
            self.skip_newlines();
        }
        let alternative = if self.check_keyword(Keyword::Else) {
            self.advance();
            if self.check_keyword(Keyword::If) {
                let nested_token = self.advance().clone();
                let nested = self.parse_conditional(Self::span_from_token(&nested_token))?;
                span = SourceSpan::union(&span, &nested.span);
                Some(Block {
                    statements: vec![Statement::Conditional(nested)],
                })
            } else {
                let (block, else_closing) = self.parse_block()?;
                span = SourceSpan::union(&span, &else_closing);
                Some(block)
            }
        } else {
            None
        };

        Ok(ConditionalStatement {
            condition,
            consequent,
            alternative,
            span,
        })
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression> {
        let mut left = self.parse_prefix_expression()?;

        while let Some(next) = Precedence::of(self.peek_kind()) {
            if next <= precedence {
                break;
            }
            left = self.parse_infix_expression(left, next)?;
        }

        Ok(left)
    }

    fn parse_prefix_expression(&mut self) -> Result<Expression> {
        let token = self.advance().clone();
        let span = Self::span_from_token(&token);
        let expression = match &token.kind {
            TokenKind::NumberLiteral(value) => {
                Self::make_expression(span, ExpressionKind::Literal(Literal::Number(*value)))
            }
            TokenKind::StringLiteral(value) => Self::make_expression(
                span,
                ExpressionKind::Literal(Literal::String(value.clone())),
            ),
            TokenKind::BooleanLiteral(value) => {
                Self::make_expression(span, ExpressionKind::Literal(Literal::Boolean(*value)))
            }
            TokenKind::Keyword(Keyword::Nil) => {
                Self::make_expression(span, ExpressionKind::Literal(Literal::Nil))
            }
            TokenKind::Keyword(Keyword::SelfValue) => {
                Self::make_expression(span, ExpressionKind::SelfRef)
            }
            TokenKind::Identifier => Self::make_expression(
                span,
                ExpressionKind::Identifier(Identifier {
                    name: token.lexeme.clone(),
                    span,
                }),
            ),
            TokenKind::Minus | TokenKind::Plus | TokenKind::Bang | TokenKind::Keyword(Keyword::Not) => {
                let operator = match token.kind {
                    TokenKind::Minus => UnaryOperator::Negative,
                    TokenKind::Plus => UnaryOperator::Positive,
                    _ => UnaryOperator::Not,
                };
                // the operand keeps its postfix chain, so `-a.b` negates the member access
                let operand = self.parse_prefix_expression()?;
                let full_span = SourceSpan::union(&span, &operand.span);
                Self::make_expression(
                    full_span,
                    ExpressionKind::Unary(UnaryExpression {
                        operator,
                        operand: Box::new(operand),
                    }),
                )
            }
            TokenKind::LParen => {
                self.skip_newlines();
                let inner = self.parse_expression(Precedence::Lowest)?;
                self.skip_newlines();
                let closing = self.peek().clone();
                self.expect_token(TokenKind::RParen, "expected ')' after expression")?;
                let full_span = SourceSpan::union(&span, &Self::span_from_token(&closing));
                Self::make_expression(full_span, ExpressionKind::Grouping(Box::new(inner)))
            }
            _ => return Err(self.error_at(&token, "expected an expression")),
        };

        self.parse_postfix(expression)
    }

    fn parse_postfix(&mut self, mut expression: Expression) -> Result<Expression> {
        loop {
            match self.peek_kind() {
                TokenKind::LParen => expression = self.finish_call(expression)?,
                TokenKind::Dot => expression = self.finish_member(expression)?,
                TokenKind::LBracket => expression = self.finish_index(expression)?,
                _ => return Ok(expression),
            }
        }
    }

    fn parse_infix_expression(
        &mut self,
        left: Expression,
        precedence: Precedence,
    ) -> Result<Expression> {
        let operator_token = self.advance().clone();
        self.skip_newlines();
        if operator_token.kind == TokenKind::Equal {
            // right associative
            let value = self.parse_expression(Precedence::Lowest)?;
            if !matches!(
                left.kind,
                ExpressionKind::Identifier(_) | ExpressionKind::Member(_) | ExpressionKind::Index(_)
            ) {
                self.diagnostics.push_error_with_span(
                    "invalid assignment target",
                    Some(left.span),
                );
                return Err(anyhow!(
                    "invalid assignment target at line {}, column {}",
                    left.span.line,
                    left.span.column
                ));
            }
            let span = SourceSpan::union(&left.span, &value.span);
            return Ok(Self::make_expression(
                span,
                ExpressionKind::Assignment(AssignmentExpression {
                    target: Box::new(left),
                    value: Box::new(value),
                }),
            ));
        }

        let Some(operator) = binary_operator_from_token(&operator_token.kind) else {
            return Err(self.error_at(&operator_token, "unexpected infix operator"));
        };
        let right = self.parse_expression(precedence)?;
        let span = SourceSpan::union(&left.span, &right.span);
        Ok(Self::make_expression(
            span,
            ExpressionKind::Binary(BinaryExpression {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            }),
        ))
    }

    fn finish_call(&mut self, callee: Expression) -> Result<Expression> {
        self.advance(); // '('
        let mut arguments = Vec::new();
        self.skip_newlines();
        if !matches!(self.peek_kind(), TokenKind::RParen) {
            loop {
                self.skip_newlines();
                arguments.push(self.parse_expression(Precedence::Lowest)?);
                self.skip_newlines();
                if matches!(self.peek_kind(), TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let closing = self.peek().clone();
        self.expect_token(TokenKind::RParen, "expected ')' to close argument list")?;
        let span = SourceSpan::union(&callee.span, &Self::span_from_token(&closing));
        Ok(Self::make_expression(
            span,
            ExpressionKind::Call(CallExpression {
                callee: Box::new(callee),
                arguments,
            }),
        ))
    }

    fn finish_member(&mut self, object: Expression) -> Result<Expression> {
        self.advance(); // '.'
        let (property, property_span) = self.expect_identifier("expected member name after '.'")?;
        let span = SourceSpan::union(&object.span, &property_span);
        Ok(Self::make_expression(
            span,
            ExpressionKind::Member(MemberExpression {
                object: Box::new(object),
                property,
                property_span,
            }),
        ))
    }

    fn finish_index(&mut self, object: Expression) -> Result<Expression> {
        self.advance(); // '['
        self.skip_newlines();
        let index = self.parse_expression(Precedence::Lowest)?;
        self.skip_newlines();
        let closing = self.peek().clone();
        self.expect_token(TokenKind::RBracket, "expected ']' after index")?;
        let span = SourceSpan::union(&object.span, &Self::span_from_token(&closing));
        Ok(Self::make_expression(
            span,
            ExpressionKind::Index(IndexExpression {
                object: Box::new(object),
                index: Box::new(index),
            }),
        ))
    }

    fn expect_identifier(&mut self, message: &str) -> Result<(String, SourceSpan)> {
        let token = self.peek().clone();
        if token.kind == TokenKind::Identifier {
            self.advance();
            Ok((token.lexeme.clone(), Self::span_from_token(&token)))
        } else {
            Err(self.error_at(&token, message))
        }
    }

    fn expect_token(&mut self, expected: TokenKind, message: &str) -> Result<()> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(&expected) {
            self.advance();
            Ok(())
        } else {
            let token = self.peek().clone();
            Err(self.error_at(&token, message))
        }
    }

    fn expect_statement_end(&mut self) -> Result<()> {
        match self.peek_kind() {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.skip_separators();
                Ok(())
            }
            TokenKind::Eof | TokenKind::RBrace => Ok(()),
            _ => {
                let token = self.peek().clone();
                Err(self.error_at(&token, "expected end of statement"))
            }
        }
    }

    /// Records a diagnostic at `token` and returns the error that aborts parsing.
    fn error_at(&mut self, token: &Token, message: &str) -> anyhow::Error {
        let found = if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            format!("'{}'", token.lexeme.escape_debug())
        };
        let full = format!("{message} (found {found})");
        self.diagnostics
            .push_error_with_span(full.clone(), Some(Self::span_from_token(token)));
        anyhow!(
            "{} at line {}, column {}",
            full,
            token.line,
            token.column
        )
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn next_significant_is(&self, keyword: Keyword) -> bool {
        self.tokens[self.current..]
            .iter()
            .find(|token| token.kind != TokenKind::Newline)
            .is_some_and(|token| token.kind == TokenKind::Keyword(keyword))
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == keyword)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }
}

fn binary_operator_from_token(kind: &TokenKind) -> Option<BinaryOperator> {
    let operator = match kind {
        TokenKind::Plus => BinaryOperator::Add,
        TokenKind::Minus => BinaryOperator::Subtract,
        TokenKind::Star => BinaryOperator::Multiply,
        TokenKind::Slash => BinaryOperator::Divide,
        TokenKind::Percent => BinaryOperator::Modulo,
        TokenKind::DoubleEqual => BinaryOperator::Equal,
        TokenKind::BangEqual => BinaryOperator::NotEqual,
        TokenKind::Greater => BinaryOperator::Greater,
        TokenKind::GreaterEqual => BinaryOperator::GreaterEqual,
        TokenKind::Less => BinaryOperator::Less,
        TokenKind::LessEqual => BinaryOperator::LessEqual,
        TokenKind::Keyword(Keyword::And) => BinaryOperator::And,
        TokenKind::Keyword(Keyword::Or) => BinaryOperator::Or,
        _ => return None,
    };
    Some(operator)
}
