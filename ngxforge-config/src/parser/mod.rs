//! Parser module for nginx configuration text
//!
//! This module provides the lexer, AST, and parser. The output is a generic
//! directive/block tree; giving names meaning is the builder's job.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::*;
pub use lexer::{Token, TokenKind, tokenize};
pub use parser::{ParseError, Parser, parse};
