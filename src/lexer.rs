//! Lexer for expression and statement blocks
//!
//! Tokenizes the character range of a single block with absolute span
//! tracking, so diagnostics can point back into the full template.

use crate::error::{ErrorCode, ParseError};
use crate::scanner::CharRange;

/// A token with its source range.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub range: CharRange,
}

impl Token {
    pub fn new(kind: TokenKind, range: CharRange) -> Self {
        Self { kind, range }
    }
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    String(String),
    Int(i64),
    Float(f64),
    Ident(String),

    // Keywords
    For,
    Endfor,
    In,
    If,
    Else,
    Elif,
    Endif,
    Or,
    And,
    Not,
    Is,
    Block,
    Endblock,
    Extends,
    Macro,
    Endmacro,
    Call,
    Endcall,
    Filter,
    Endfilter,
    Set,
    Endset,
    Include,
    Import,
    True,
    False,
    None,

    // Operators and punctuation
    Lt,       // <
    Gt,       // >
    Plus,     // +
    Minus,    // -
    Percent,  // %
    Star,     // *
    Slash,    // /
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }
    Assign,   // =
    Comma,    // ,
    Dot,      // .
    Colon,    // :
    Pipe,     // |
    Tilde,    // ~
    Eq,       // ==
    Ne,       // !=
    Le,       // <=
    Ge,       // >=
    Pow,      // **
    FloorDiv, // //

    // Block delimiters, only ever materialized for diagnostics
    CommentBegin, // {#
    CommentEnd,   // #}
    StmtBegin,    // {%
    StmtEnd,      // %}
    ExprBegin,    // {{
    ExprEnd,      // }}

    Eof,
    Unknown,
}

impl TokenKind {
    /// Keyword recognition for a lexed identifier.
    pub fn from_ident(s: &str) -> TokenKind {
        match s {
            "for" => TokenKind::For,
            "endfor" => TokenKind::Endfor,
            "in" => TokenKind::In,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "elif" => TokenKind::Elif,
            "endif" => TokenKind::Endif,
            "or" => TokenKind::Or,
            "and" => TokenKind::And,
            "not" => TokenKind::Not,
            "is" => TokenKind::Is,
            "block" => TokenKind::Block,
            "endblock" => TokenKind::Endblock,
            "extends" => TokenKind::Extends,
            "macro" => TokenKind::Macro,
            "endmacro" => TokenKind::Endmacro,
            "call" => TokenKind::Call,
            "endcall" => TokenKind::Endcall,
            "filter" => TokenKind::Filter,
            "endfilter" => TokenKind::Endfilter,
            "set" => TokenKind::Set,
            "endset" => TokenKind::Endset,
            "include" => TokenKind::Include,
            "import" => TokenKind::Import,
            "true" | "True" => TokenKind::True,
            "false" | "False" => TokenKind::False,
            "none" | "None" => TokenKind::None,
            _ => TokenKind::Ident(s.to_string()),
        }
    }

    /// The spelling used when a token is interpolated into a diagnostic.
    pub fn display(&self) -> String {
        let s = match self {
            TokenKind::String(_) => "<<String>>",
            TokenKind::Int(v) => return v.to_string(),
            TokenKind::Float(v) => return v.to_string(),
            TokenKind::Ident(name) => return name.clone(),
            TokenKind::For => "for",
            TokenKind::Endfor => "endfor",
            TokenKind::In => "in",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::Elif => "elif",
            TokenKind::Endif => "endif",
            TokenKind::Or => "or",
            TokenKind::And => "and",
            TokenKind::Not => "not",
            TokenKind::Is => "is",
            TokenKind::Block => "block",
            TokenKind::Endblock => "endblock",
            TokenKind::Extends => "extends",
            TokenKind::Macro => "macro",
            TokenKind::Endmacro => "endmacro",
            TokenKind::Call => "call",
            TokenKind::Endcall => "endcall",
            TokenKind::Filter => "filter",
            TokenKind::Endfilter => "endfilter",
            TokenKind::Set => "set",
            TokenKind::Endset => "endset",
            TokenKind::Include => "include",
            TokenKind::Import => "import",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::None => "none",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Percent => "%",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Assign => "=",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Colon => ":",
            TokenKind::Pipe => "|",
            TokenKind::Tilde => "~",
            TokenKind::Eq => "==",
            TokenKind::Ne => "!=",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::Pow => "**",
            TokenKind::FloorDiv => "//",
            TokenKind::CommentBegin => "{#",
            TokenKind::CommentEnd => "#}",
            TokenKind::StmtBegin => "{%",
            TokenKind::StmtEnd => "%}",
            TokenKind::ExprBegin => "{{",
            TokenKind::ExprEnd => "}}",
            TokenKind::Eof => "<<End of block>>",
            TokenKind::Unknown => "<<Unknown>>",
        };
        s.to_string()
    }
}

/// Collapses `\n`, `\r`, `\t` and `\\` escapes in a string literal body.
/// Any other escaped character is kept with the backslash removed.
pub fn compile_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            Option::None => break,
        }
    }
    out
}

/// Lexer over one block's range of the full template. Spans are absolute.
pub struct Lexer<'a> {
    template: &'a str,
    pos: usize,
    end: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(template: &'a str, range: CharRange) -> Self {
        Self {
            template,
            pos: range.start,
            end: range.end,
        }
    }

    /// Produces the full token sequence for the block, terminated by `Eof`.
    pub fn tokenize(template: &'a str, range: CharRange) -> Result<Vec<Token>, ParseError> {
        let mut lexer = Lexer::new(template, range);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let is_eof = matches!(token.kind, TokenKind::Eof);
            tokens.push(token);
            if is_eof {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.template[self.pos..self.end].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn two_char(&mut self) -> Option<TokenKind> {
        if self.pos + 2 > self.end {
            return None;
        }
        let kind = match self.template.get(self.pos..self.pos + 2)? {
            "==" => TokenKind::Eq,
            "!=" => TokenKind::Ne,
            "<=" => TokenKind::Le,
            ">=" => TokenKind::Ge,
            "**" => TokenKind::Pow,
            "//" => TokenKind::FloorDiv,
            _ => return None,
        };
        self.pos += 2;
        Some(kind)
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();
        let start = self.pos;

        if self.pos >= self.end {
            return Ok(Token::new(TokenKind::Eof, CharRange::new(self.end, self.end)));
        }

        if let Some(kind) = self.two_char() {
            return Ok(Token::new(kind, CharRange::new(start, self.pos)));
        }

        let c = self.peek().unwrap();
        let single = match c {
            '<' => Some(TokenKind::Lt),
            '>' => Some(TokenKind::Gt),
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '%' => Some(TokenKind::Percent),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            '{' => Some(TokenKind::LBrace),
            '}' => Some(TokenKind::RBrace),
            '=' => Some(TokenKind::Assign),
            ',' => Some(TokenKind::Comma),
            '.' => Some(TokenKind::Dot),
            ':' => Some(TokenKind::Colon),
            '|' => Some(TokenKind::Pipe),
            '~' => Some(TokenKind::Tilde),
            _ => Option::None,
        };
        if let Some(kind) = single {
            self.advance();
            return Ok(Token::new(kind, CharRange::new(start, self.pos)));
        }

        match c {
            '"' | '\'' => self.lex_string(c),
            '0'..='9' => Ok(self.lex_number()),
            c if c.is_alphabetic() || c == '_' => Ok(self.lex_ident()),
            _ => Err(ParseError::new(
                ErrorCode::Unspecified,
                Token::new(TokenKind::Unknown, CharRange::new(start, start + c.len_utf8())),
            )),
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, ParseError> {
        let start = self.pos;
        self.advance();

        let mut raw = String::new();
        loop {
            match self.advance() {
                Option::None => {
                    return Err(ParseError::new(
                        ErrorCode::Unspecified,
                        Token::new(TokenKind::Unknown, CharRange::new(start, self.pos)),
                    ));
                }
                Some(c) if c == quote => break,
                Some('\\') => {
                    raw.push('\\');
                    if let Some(c) = self.advance() {
                        raw.push(c);
                    }
                }
                Some(c) => raw.push(c),
            }
        }

        Ok(Token::new(
            TokenKind::String(compile_escapes(&raw)),
            CharRange::new(start, self.pos),
        ))
    }

    /// Integer first, falling back to a double on overflow or a fractional
    /// part.
    fn lex_number(&mut self) -> Token {
        let start = self.pos;
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == '.' && !is_float {
                // A dot is only part of the number when a digit follows;
                // otherwise it is a field access on an integer literal.
                let after_dot = self.template[self.pos + 1..self.end].chars().next();
                if after_dot.is_some_and(|c| c.is_ascii_digit()) {
                    is_float = true;
                    self.advance();
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        let text = &self.template[start..self.pos];
        let kind = if is_float {
            TokenKind::Float(text.parse().unwrap_or(0.0))
        } else {
            match text.parse::<i64>() {
                Ok(v) => TokenKind::Int(v),
                Err(_) => TokenKind::Float(text.parse().unwrap_or(0.0)),
            }
        };
        Token::new(kind, CharRange::new(start, self.pos))
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let kind = TokenKind::from_ident(&self.template[start..self.pos]);
        Token::new(kind, CharRange::new(start, self.pos))
    }
}

/// Cursor over a lexed token sequence, used by the fine parsers.
pub struct LexScanner {
    tokens: Vec<Token>,
    idx: usize,
}

impl LexScanner {
    pub fn new(tokens: Vec<Token>) -> Self {
        debug_assert!(matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)));
        Self { tokens, idx: 0 }
    }

    pub fn peek(&self) -> &Token {
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    pub fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.idx + offset).min(self.tokens.len() - 1)]
    }

    pub fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        token
    }

    /// Consumes the next token if it has the same discriminant as `kind`.
    pub fn eat_if(&mut self, kind: &TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.next())
        } else {
            Option::None
        }
    }

    pub fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    pub fn at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }
}
