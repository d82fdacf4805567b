use anyhow::Result;
use thiserror::Error;

use crate::source::SourceFile;

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, lexeme: String, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme,
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier,
    NumberLiteral(f64),
    StringLiteral(String),
    BooleanLiteral(bool),
    Keyword(Keyword),
    Newline,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    DotDotDot,
    Colon,
    Semicolon,
    Equal,
    DoubleEqual,
    Bang,
    BangEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Arrow, // ->
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Const,
    Fn,
    Class,
    If,
    Else,
    While,
    Return,
    And,
    Or,
    Not,
    Nil,
    SelfValue,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexerError {
    #[error("unexpected character '{character}' at line {line}, column {column}")]
    UnexpectedCharacter {
        character: char,
        line: usize,
        column: usize,
    },
    #[error("unterminated string literal starting at line {line}, column {column}")]
    UnterminatedString { line: usize, column: usize },
    #[error("invalid number literal '{lexeme}' at line {line}, column {column}")]
    InvalidNumber {
        lexeme: String,
        line: usize,
        column: usize,
    },
}

impl LexerError {
    pub fn line(&self) -> usize {
        match self {
            LexerError::UnexpectedCharacter { line, .. }
            | LexerError::UnterminatedString { line, .. }
            | LexerError::InvalidNumber { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            LexerError::UnexpectedCharacter { column, .. }
            | LexerError::UnterminatedString { column, .. }
            | LexerError::InvalidNumber { column, .. } => *column,
        }
    }
}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a SourceFile) -> Self {
        Self::from_text(&source.contents)
    }

    pub fn from_text(input: &'a str) -> Self {
        Self {
            input,
            position: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            match ch {
                ' ' | '\t' | '\r' => {
                    self.advance_char();
                }
                '\n' => {
                    let (line, column) = (self.line, self.column);
                    self.advance_char();
                    tokens.push(Token::new(TokenKind::Newline, "\n".into(), line, column));
                }
                '#' => self.skip_comment(),
                '"' => tokens.push(self.lex_string()?),
                '0'..='9' => tokens.push(self.lex_number()?),
                'a'..='z' | 'A'..='Z' | '_' => tokens.push(self.lex_identifier_or_keyword()),
                '(' => tokens.push(self.simple_token(TokenKind::LParen)),
                ')' => tokens.push(self.simple_token(TokenKind::RParen)),
                '{' => tokens.push(self.simple_token(TokenKind::LBrace)),
                '}' => tokens.push(self.simple_token(TokenKind::RBrace)),
                '[' => tokens.push(self.simple_token(TokenKind::LBracket)),
                ']' => tokens.push(self.simple_token(TokenKind::RBracket)),
                ',' => tokens.push(self.simple_token(TokenKind::Comma)),
                ':' => tokens.push(self.simple_token(TokenKind::Colon)),
                ';' => tokens.push(self.simple_token(TokenKind::Semicolon)),
                '+' => tokens.push(self.simple_token(TokenKind::Plus)),
                '*' => tokens.push(self.simple_token(TokenKind::Star)),
                '/' => tokens.push(self.simple_token(TokenKind::Slash)),
                '%' => tokens.push(self.simple_token(TokenKind::Percent)),
                '.' => {
                    if self.input[self.position..].starts_with("...") {
                        tokens.push(self.multi_char_token(TokenKind::DotDotDot, 3));
                    } else {
                        tokens.push(self.simple_token(TokenKind::Dot));
                    }
                }
                '-' => tokens.push(self.with_follower(TokenKind::Minus, '>', TokenKind::Arrow)),
                '=' => tokens.push(self.with_follower(
                    TokenKind::Equal,
                    '=',
                    TokenKind::DoubleEqual,
                )),
                '!' => tokens.push(self.with_follower(TokenKind::Bang, '=', TokenKind::BangEqual)),
                '>' => tokens.push(self.with_follower(
                    TokenKind::Greater,
                    '=',
                    TokenKind::GreaterEqual,
                )),
                '<' => tokens.push(self.with_follower(TokenKind::Less, '=', TokenKind::LessEqual)),
                other => {
                    return Err(LexerError::UnexpectedCharacter {
                        character: other,
                        line: self.line,
                        column: self.column,
                    }
                    .into());
                }
            }
        }

        tokens.push(Token::new(
            TokenKind::Eof,
            String::new(),
            self.line,
            self.column,
        ));

        Ok(tokens)
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.advance_char();
        }
    }

    fn lex_string(&mut self) -> Result<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_char(); // opening quote

        let mut value = String::new();
        while let Some(ch) = self.peek_char() {
            match ch {
                '"' => {
                    self.advance_char();
                    let lexeme = self.slice(start, self.position).to_string();
                    return Ok(Token::new(
                        TokenKind::StringLiteral(value),
                        lexeme,
                        start_line,
                        start_column,
                    ));
                }
                '\\' => {
                    self.advance_char();
                    let Some(escaped) = self.advance_char() else {
                        break;
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    });
                }
                '\n' => break,
                _ => {
                    value.push(ch);
                    self.advance_char();
                }
            }
        }

        Err(LexerError::UnterminatedString {
            line: start_line,
            column: start_column,
        }
        .into())
    }

    fn lex_number(&mut self) -> Result<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        let mut seen_dot = false;

        while let Some(ch) = self.peek_char() {
            match ch {
                '0'..='9' | '_' => {
                    self.advance_char();
                }
                '.' if !seen_dot && matches!(self.peek_next_char(), Some('0'..='9')) => {
                    seen_dot = true;
                    self.advance_char();
                }
                _ => break,
            }
        }

        let lexeme = self.slice(start, self.position).to_string();
        let value = lexeme
            .replace('_', "")
            .parse::<f64>()
            .map_err(|_| LexerError::InvalidNumber {
                lexeme: lexeme.clone(),
                line: start_line,
                column: start_column,
            })?;
        Ok(Token::new(
            TokenKind::NumberLiteral(value),
            lexeme,
            start_line,
            start_column,
        ))
    }

    fn lex_identifier_or_keyword(&mut self) -> Token {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        let lexeme = self.slice(start, self.position).to_string();
        let kind = match lexeme.as_str() {
            "true" => TokenKind::BooleanLiteral(true),
            "false" => TokenKind::BooleanLiteral(false),
            other => keyword_from_lexeme(other)
                .map(TokenKind::Keyword)
                .unwrap_or(TokenKind::Identifier),
        };
        Token::new(kind, lexeme, start_line, start_column)
    }

    /// Emits `double` when the next character after the current one is `follower`.
    fn with_follower(&mut self, single: TokenKind, follower: char, double: TokenKind) -> Token {
        if self.peek_next_char() == Some(follower) {
            self.multi_char_token(double, 2)
        } else {
            self.simple_token(single)
        }
    }

    fn simple_token(&mut self, kind: TokenKind) -> Token {
        self.multi_char_token(kind, 1)
    }

    fn multi_char_token(&mut self, kind: TokenKind, length: usize) -> Token {
        let start_line = self.line;
        let start_column = self.column;
        let start = self.position;
        for _ in 0..length {
            self.advance_char();
        }
        Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        )
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut iter = self.input[self.position..].chars();
        iter.next()?;
        iter.next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.position += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn slice(&self, start: usize, end: usize) -> &str {
        &self.input[start..end]
    }
}

fn keyword_from_lexeme(lexeme: &str) -> Option<Keyword> {
    match lexeme {
        "var" => Some(Keyword::Var),
        "const" => Some(Keyword::Const),
        "fn" => Some(Keyword::Fn),
        "class" => Some(Keyword::Class),
        "if" => Some(Keyword::If),
        "else" => Some(Keyword::Else),
        "while" => Some(Keyword::While),
        "return" => Some(Keyword::Return),
        "and" => Some(Keyword::And),
        "or" => Some(Keyword::Or),
        "not" => Some(Keyword::Not),
        "nil" => Some(Keyword::Nil),
        "self" => Some(Keyword::SelfValue),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::from_text(input)
            .tokenize()
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn lexes_keywords_and_literals() {
        assert_eq!(
            kinds("fn class self true nil 1.5"),
            vec![
                TokenKind::Keyword(Keyword::Fn),
                TokenKind::Keyword(Keyword::Class),
                TokenKind::Keyword(Keyword::SelfValue),
                TokenKind::BooleanLiteral(true),
                TokenKind::Keyword(Keyword::Nil),
                TokenKind::NumberLiteral(1.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_two_character_operators() {
        assert_eq!(
            kinds("-> == != <= >= ... - ="),
            vec![
                TokenKind::Arrow,
                TokenKind::DoubleEqual,
                TokenKind::BangEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::DotDotDot,
                TokenKind::Minus,
                TokenKind::Equal,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn member_access_on_number_is_not_a_fraction() {
        assert_eq!(
            kinds("1.x"),
            vec![
                TokenKind::NumberLiteral(1.0),
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_newlines_kept() {
        assert_eq!(
            kinds("a # note\nb"),
            vec![
                TokenKind::Identifier,
                TokenKind::Newline,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn reports_unterminated_string_position() {
        let err = Lexer::from_text("\n  \"open").tokenize().unwrap_err();
        let lexer_error = err.downcast_ref::<LexerError>().expect("lexer error");
        assert_eq!(lexer_error.line(), 2);
        assert_eq!(lexer_error.column(), 3);
    }

    #[test]
    fn string_escapes_are_decoded() {
        assert_eq!(
            kinds(r#""a\n\"b""#),
            vec![TokenKind::StringLiteral("a\n\"b".into()), TokenKind::Eof]
        );
    }
}
