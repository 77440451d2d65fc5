//! Lexer for nginx configuration text
//!
//! Tokenizes the directive-and-block syntax:
//! - `;` ends a directive, `{` `}` delimit blocks
//! - `#` starts a comment that runs to the end of the line
//! - `"..."` and `'...'` are single words, with backslash escapes
//! - anything else up to whitespace or a structural character is a word

use logos::Logos;
use std::fmt;

use super::ParseError;

/// Raw lexemes recognised by logos. Positions are attached afterwards.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f\v]+")]
enum Lexeme {
    #[regex(r"#[^\n]*", logos::skip)]
    Comment,

    #[token(";")]
    Semicolon,

    #[token("{")]
    BlockOpen,

    #[token("}")]
    BlockClose,

    #[regex(r#""([^"\\]|\\(.|\n))*""#, |lex| {
        let s = lex.slice();
        unescape_string(&s[1..s.len() - 1])
    })]
    #[regex(r#"'([^'\\]|\\(.|\n))*'"#, |lex| {
        let s = lex.slice();
        unescape_string(&s[1..s.len() - 1])
    })]
    Quoted(String),

    /// Everything except whitespace, structural characters, quotes, `#`
    /// and control characters
    #[regex(r#"[^ \t\r\n\f\v;{}"'#\x00-\x08\x0E-\x1F\x7F]+"#, |lex| lex.slice().to_string())]
    Word(String),
}

/// Token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Semicolon,
    LBrace,
    RBrace,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Word => write!(f, "word"),
            TokenKind::Semicolon => write!(f, "';'"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

/// A token with its position in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Word value (unescaped for quoted words), or the structural character
    pub text: String,
    /// 1-based line of the first character
    pub line: usize,
    /// 1-based column of the first character, counted in characters
    pub column: usize,
    /// Byte offset of the first character
    pub offset: usize,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Word => write!(f, "'{}'", self.text),
            kind => write!(f, "{}", kind),
        }
    }
}

/// Maps byte offsets to 1-based line/column pairs
struct LineIndex<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            line_starts,
        }
    }

    fn position(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let column = self.source[start..offset].chars().count() + 1;
        (line + 1, column)
    }
}

/// Unescape a quoted word.
///
/// `\"`, `\'` and `\\` yield the character itself and `\n`, `\r`, `\t` the
/// control character. Other escapes are kept so regex escapes like `\.`
/// survive quoting.
fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some(c @ ('\\' | '"' | '\'')) => result.push(c),
                Some(c) => {
                    result.push('\\');
                    result.push(c);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Tokenize nginx configuration text. The result always ends with an
/// [`TokenKind::Eof`] token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let index = LineIndex::new(source);
    let mut tokens = Vec::new();

    for (result, span) in Lexeme::lexer(source).spanned() {
        let (line, column) = index.position(span.start);
        let (kind, text) = match result {
            Ok(Lexeme::Semicolon) => (TokenKind::Semicolon, ";".to_string()),
            Ok(Lexeme::BlockOpen) => (TokenKind::LBrace, "{".to_string()),
            Ok(Lexeme::BlockClose) => (TokenKind::RBrace, "}".to_string()),
            Ok(Lexeme::Quoted(text)) | Ok(Lexeme::Word(text)) => (TokenKind::Word, text),
            Ok(Lexeme::Comment) => continue,
            Err(()) => {
                let rest = &source[span.start..];
                let message = match rest.chars().next() {
                    Some(quote @ ('"' | '\'')) => {
                        format!("unterminated quoted string (missing closing {})", quote)
                    }
                    Some(c) => format!("unexpected character {:?}", c),
                    None => "unexpected end of input".to_string(),
                };
                return Err(ParseError::new(message, line, column, span.start));
            }
        };
        tokens.push(Token {
            kind,
            text,
            line,
            column,
            offset: span.start,
        });
    }

    let (line, column) = index.position(source.len());
    tokens.push(Token {
        kind: TokenKind::Eof,
        text: String::new(),
        line,
        column,
        offset: source.len(),
    });

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_basic_directive() {
        let tokens = tokenize("worker_processes 4;").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Word, TokenKind::Word, TokenKind::Semicolon, TokenKind::Eof]
        );
        assert_eq!(tokens[0].text, "worker_processes");
        assert_eq!(tokens[1].text, "4");
    }

    #[test]
    fn test_block_positions() {
        let tokens = tokenize("server {\n  listen 80;\n}").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::LBrace);
        assert_eq!((tokens[1].line, tokens[1].column), (1, 8));
        assert_eq!(tokens[2].text, "listen");
        assert_eq!((tokens[2].line, tokens[2].column), (2, 3));
        assert_eq!(tokens[5].kind, TokenKind::RBrace);
        assert_eq!((tokens[5].line, tokens[5].column), (3, 1));
    }

    #[test]
    fn test_quotes_and_comments() {
        let source = r#"
            # This is a comment
            root "/var/www/my site"; # Inline comment
            add_header X-Test 'it\'s';
        "#;
        let tokens = tokenize(source).unwrap();
        let words: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(words, vec!["root", "/var/www/my site", "add_header", "X-Test", "it's"]);
        assert_eq!(tokens[0].line, 3);
    }

    #[test]
    fn test_regex_escapes_survive_quotes() {
        let tokens = tokenize(r#"location ~ "\.php$" {}"#).unwrap();
        assert_eq!(tokens[2].text, r"\.php$");
    }

    #[test]
    fn test_word_stops_at_structural_characters() {
        let tokens = tokenize("a{b;c}d#comment").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "{", "b", ";", "c", "}", "d", ""]);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("server_name \"example.com;\n").unwrap_err();
        assert_eq!((err.line, err.column), (1, 13));
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_unexpected_control_character() {
        let err = tokenize("listen 80;\nroot \u{0001};").unwrap_err();
        assert_eq!((err.line, err.column), (2, 6));
        assert!(err.message.contains("unexpected character"));
    }

    #[test]
    fn test_multibyte_columns() {
        let tokens = tokenize("# é\nroot é; index x;").unwrap();
        let index = tokens.iter().find(|t| t.text == "index").unwrap();
        assert_eq!((index.line, index.column), (2, 9));
    }
}
