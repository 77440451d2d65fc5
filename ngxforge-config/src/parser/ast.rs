//! Abstract Syntax Tree for nginx configuration
//!
//! The tree is purely syntactic: a list of directives and blocks, with no
//! knowledge of what any name means.

use serde::Serialize;
use std::fmt::Write as _;

/// Root AST node: the statements of the main context
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ast {
    pub nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root-level directives in document order
    pub fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.nodes.iter().filter_map(Node::as_directive)
    }

    /// Root-level blocks in document order
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.nodes.iter().filter_map(Node::as_block)
    }
}

/// A statement: either `name args;` or `name args { children }`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Directive(Directive),
    Block(Block),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Directive(d) => &d.name,
            Node::Block(b) => &b.name,
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            Node::Directive(d) => &d.args,
            Node::Block(b) => &b.args,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Node::Directive(d) => d.line,
            Node::Block(b) => b.line,
        }
    }

    pub fn as_directive(&self) -> Option<&Directive> {
        match self {
            Node::Directive(d) => Some(d),
            Node::Block(_) => None,
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Node::Block(b) => Some(b),
            Node::Directive(_) => None,
        }
    }

    /// Render back to configuration text, indented by `depth` levels
    pub fn to_source(&self, depth: usize) -> String {
        match self {
            Node::Directive(d) => format!("{}{}", indent(depth), d.to_source()),
            Node::Block(b) => b.to_source(depth),
        }
    }
}

/// Simple directive: `name arg1 arg2;`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub line: usize,
}

impl Directive {
    pub fn new(name: impl Into<String>, args: Vec<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            args,
            line,
        }
    }

    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// `name arg1 arg2;` with arguments quoted where needed
    pub fn to_source(&self) -> String {
        let mut out = self.name.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&quote_arg(arg));
        }
        out.push(';');
        out
    }
}

/// Block statement: `name args { children }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub name: String,
    pub args: Vec<String>,
    pub children: Vec<Node>,
    pub line: usize,
}

impl Block {
    pub fn to_source(&self, depth: usize) -> String {
        let mut out = String::new();
        out.push_str(&indent(depth));
        out.push_str(&self.name);
        for arg in &self.args {
            out.push(' ');
            out.push_str(&quote_arg(arg));
        }
        out.push_str(" {\n");
        for child in &self.children {
            let _ = writeln!(out, "{}", child.to_source(depth + 1));
        }
        out.push_str(&indent(depth));
        out.push('}');
        out
    }
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Quote an argument when it would not survive re-tokenizing as a bare word
pub fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ';' | '{' | '}' | '#' | '"' | '\''));
    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
