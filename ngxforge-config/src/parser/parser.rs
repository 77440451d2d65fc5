//! nginx configuration parser
//!
//! Recursive descent parser that converts tokens into an AST.

use crate::parser::ast::*;
use crate::parser::lexer::{Token, TokenKind, tokenize};
use thiserror::Error;

/// Lexical or syntactic error. Parsing stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
    /// Byte offset into the source
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize, offset: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            offset,
        }
    }

    fn at(token: &Token, message: impl Into<String>) -> Self {
        Self::new(message, token.line, token.column, token.offset)
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Parser state
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Create a parser over a token stream. A missing trailing `Eof` token
    /// is supplied.
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            let (line, column, offset) = tokens
                .last()
                .map(|t| (t.line, t.column + t.text.chars().count(), t.offset + t.text.len()))
                .unwrap_or((1, 1, 0));
            tokens.push(Token {
                kind: TokenKind::Eof,
                text: String::new(),
                line,
                column,
                offset,
            });
        }
        Self { tokens, pos: 0 }
    }

    /// Parse the whole document
    pub fn parse(&mut self) -> ParseResult<Ast> {
        let nodes = self.parse_statements()?;

        // Only end of input may stop the root scope
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            return Err(ParseError::at(token, format!("unexpected {}", token)));
        }

        Ok(Ast { nodes })
    }

    // ========================================
    // Statements
    // ========================================

    /// Parse statements until `}` or end of input, leaving that token unconsumed
    fn parse_statements(&mut self) -> ParseResult<Vec<Node>> {
        let mut nodes = Vec::new();

        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Eof | TokenKind::RBrace => break,
                TokenKind::Word => nodes.push(self.parse_statement()?),
                TokenKind::Semicolon | TokenKind::LBrace => {
                    return Err(ParseError::at(
                        token,
                        format!("unexpected {}, expected a directive name", token),
                    ));
                }
            }
        }

        Ok(nodes)
    }

    fn parse_statement(&mut self) -> ParseResult<Node> {
        let name_token = self.advance();
        let name = name_token.text;
        let line = name_token.line;

        let mut args = Vec::new();
        while self.check(TokenKind::Word) {
            args.push(self.advance().text);
        }

        let token = self.peek();
        match token.kind {
            TokenKind::Semicolon => {
                self.advance();
                Ok(Node::Directive(Directive { name, args, line }))
            }
            TokenKind::LBrace => {
                self.advance();
                let children = self.parse_statements()?;
                self.expect(TokenKind::RBrace)?;
                Ok(Node::Block(Block {
                    name,
                    args,
                    children,
                    line,
                }))
            }
            _ => Err(ParseError::at(
                token,
                format!("expected ';' or '{{' after '{}', found {}", name, token),
            )),
        }
    }

    // ========================================
    // Helpers
    // ========================================

    fn peek(&self) -> &Token {
        // The stream always ends with Eof, which is never consumed
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(ParseError::at(
                token,
                format!("expected {}, found {}", kind, token),
            ))
        }
    }
}

/// Parse an nginx configuration string into an AST
pub fn parse(source: &str) -> ParseResult<Ast> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse()
}
