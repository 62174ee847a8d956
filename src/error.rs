//! Parse errors and located diagnostics
//!
//! Parse-time failures are collected as [`ParseError`]s (an error code plus
//! the offending tokens) and converted into external-facing [`ErrorInfo`]s
//! once the line table is known. `ErrorInfo` renders the classic
//! `file:line:col` caret-underline format through `Display` and doubles as a
//! [`miette::Diagnostic`] for fancy reporting.

use crate::lexer::Token;
use crate::scanner::LineInfo;
use miette::{NamedSource, SourceSpan};
use std::fmt;
use thiserror::Error;

/// Classification of parse failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unspecified,
    UnexpectedCommentBegin,
    UnexpectedCommentEnd,
    UnexpectedExprBegin,
    UnexpectedExprEnd,
    UnexpectedStmtBegin,
    UnexpectedStmtEnd,
    ExpectedExpression,
    UnexpectedToken,
    UnexpectedStatement,
    MismatchedBlock,
    Redefinition,
    YetUnsupported,
}

/// An error found while parsing, before location resolution.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub code: ErrorCode,
    pub error_token: Token,
    pub related_tokens: Vec<Token>,
}

impl ParseError {
    pub fn new(code: ErrorCode, error_token: Token) -> Self {
        Self {
            code,
            error_token,
            related_tokens: Vec::new(),
        }
    }

    pub fn with_related(mut self, token: Token) -> Self {
        self.related_tokens.push(token);
        self
    }

    /// Re-codes an error, keeping its tokens. Statement parsers use this to
    /// turn a failed expression parse into "expected expression".
    pub fn recode(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }
}

/// A `file:line:col` source position, 1-based; `(0, 0)` means unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

/// A fully located diagnostic.
#[derive(Debug)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub location: SourceLocation,
    pub message: String,
    /// The offending source line followed by a caret underline; empty when
    /// the location is unknown.
    pub location_descr: String,
    /// Token spellings interpolated into the message, error token first.
    pub extra_params: Vec<String>,
    pub related_locs: Vec<SourceLocation>,
    src: NamedSource<String>,
    span: SourceSpan,
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: error: {}",
            self.location.file, self.location.line, self.location.col, self.message
        )?;
        if !self.location_descr.is_empty() {
            write!(f, "\n{}", self.location_descr)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {}

impl miette::Diagnostic for ErrorInfo {
    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.src)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(
            miette::LabeledSpan::new_with_span(Some(self.message.clone()), self.span),
        )))
    }
}

/// Crate-level error for the embedding surface.
#[derive(Debug, Error)]
pub enum Error {
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("failed to parse template '{name}': {count} error(s)", count = .errors.len())]
    Parse {
        name: String,
        errors: Vec<ErrorInfo>,
    },
}

const CARET_HEAD_LEN: usize = 3;
const CARET_TAIL_LEN: usize = 7;

/// Resolves [`ParseError`]s against a template's line table.
pub(crate) struct ErrorReporter<'a> {
    template: &'a str,
    name: &'a str,
    lines: &'a [LineInfo],
}

impl<'a> ErrorReporter<'a> {
    pub(crate) fn new(template: &'a str, name: &'a str, lines: &'a [LineInfo]) -> Self {
        Self {
            template,
            name,
            lines,
        }
    }

    pub(crate) fn error_infos(&self, errors: &[ParseError]) -> Vec<ErrorInfo> {
        errors.iter().map(|e| self.error_info(e)).collect()
    }

    pub(crate) fn error_info(&self, error: &ParseError) -> ErrorInfo {
        let (line, col) = self.offset_to_line_pos(error.error_token.range.start);
        let mut extra_params = vec![error.error_token.kind.display()];
        let mut related_locs = Vec::new();
        for token in &error.related_tokens {
            extra_params.push(token.kind.display());
            if token.range.start != error.error_token.range.start {
                let (rel_line, rel_col) = self.offset_to_line_pos(token.range.start);
                related_locs.push(SourceLocation {
                    file: self.name.to_string(),
                    line: rel_line,
                    col: rel_col,
                });
            }
        }

        ErrorInfo {
            code: error.code,
            location: SourceLocation {
                file: self.name.to_string(),
                line,
                col,
            },
            message: self.message(error),
            location_descr: self.location_descr(line, col),
            extra_params,
            related_locs,
            src: NamedSource::new(self.name, self.template.to_string()),
            span: SourceSpan::new(
                error.error_token.range.start.into(),
                error.error_token.range.size(),
            ),
        }
    }

    fn message(&self, error: &ParseError) -> String {
        let tok = error.error_token.kind.display();
        match error.code {
            ErrorCode::Unspecified => "Parse error".to_string(),
            ErrorCode::UnexpectedCommentBegin => "Unexpected comment block begin".to_string(),
            ErrorCode::UnexpectedCommentEnd => "Unexpected comment block end".to_string(),
            ErrorCode::UnexpectedExprBegin => "Unexpected expression block begin".to_string(),
            ErrorCode::UnexpectedExprEnd => "Unexpected expression block end".to_string(),
            ErrorCode::UnexpectedStmtBegin => "Unexpected statement block begin".to_string(),
            ErrorCode::UnexpectedStmtEnd => "Unexpected statement block end".to_string(),
            ErrorCode::ExpectedExpression => {
                format!("Expected expression, got: '{tok}'")
            }
            ErrorCode::UnexpectedToken => format!("Unexpected token: '{tok}'"),
            ErrorCode::UnexpectedStatement => format!("Unexpected statement: '{tok}'"),
            ErrorCode::MismatchedBlock => format!("Mismatched block: '{tok}'"),
            ErrorCode::Redefinition => format!("Redefinition of '{tok}'"),
            ErrorCode::YetUnsupported => "This feature is not supported yet".to_string(),
        }
    }

    /// Offset to 1-based `(line, col)`. An offset sitting exactly on the
    /// final line's end still belongs to that line; anything else out of
    /// range yields the `(0, 0)` sentinel.
    fn offset_to_line_pos(&self, offset: usize) -> (u32, u32) {
        let found = self
            .lines
            .iter()
            .find(|l| offset >= l.range.start && offset < l.range.end);
        let info = match found {
            Some(info) => info,
            None => match self.lines.last() {
                Some(last) if offset == last.range.end => last,
                _ => return (0, 0),
            },
        };
        (info.line_number + 1, (offset - info.range.start + 1) as u32)
    }

    /// The source line plus a caret underline: up to three `-` before the
    /// `^`, seven after. A column inside the line's leading whitespace gets
    /// only the caret and tail, keeping the original indentation.
    fn location_descr(&self, line: u32, col: u32) -> String {
        if line == 0 && col == 0 {
            return String::new();
        }
        let line0 = (line - 1) as usize;
        let col0 = (col - 1) as usize;

        let info = &self.lines[line0];
        let orig_line = &self.template[info.range.start..info.range.end];
        let mut out = String::from(orig_line);
        out.push('\n');

        let space_prefix: &str = &orig_line[..orig_line
            .bytes()
            .take_while(|b| b.is_ascii_whitespace())
            .count()];
        let prefix_len = space_prefix.len();

        if col0 < prefix_len {
            out.push_str(&" ".repeat(col0));
            out.push('^');
            out.push_str(&"-".repeat(CARET_TAIL_LEN));
            return out;
        }

        out.push_str(space_prefix);
        let head_len = (col0 - prefix_len).min(CARET_HEAD_LEN);
        if head_len == CARET_HEAD_LEN {
            out.push_str(&" ".repeat(col0 - head_len - prefix_len));
        }
        out.push_str(&"-".repeat(head_len));
        out.push('^');
        out.push_str(&"-".repeat(CARET_TAIL_LEN));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::TokenKind;
    use crate::scanner::CharRange;

    fn reporter_for<'a>(template: &'a str, lines: &'a mut Vec<LineInfo>) -> ErrorReporter<'a> {
        let mut start = 0;
        for (number, line) in template.split('\n').enumerate() {
            lines.push(LineInfo {
                range: CharRange::new(start, start + line.len()),
                line_number: number as u32,
            });
            start += line.len() + 1;
        }
        ErrorReporter::new(template, "noname.j2tpl", lines)
    }

    #[test]
    fn test_offset_to_line_pos() {
        let template = "abc\ndef";
        let mut lines = Vec::new();
        let reporter = reporter_for(template, &mut lines);
        assert_eq!(reporter.offset_to_line_pos(0), (1, 1));
        assert_eq!(reporter.offset_to_line_pos(5), (2, 2));
        // end of the last line still resolves
        assert_eq!(reporter.offset_to_line_pos(7), (2, 4));
        // past the end is the unknown sentinel
        assert_eq!(reporter.offset_to_line_pos(42), (0, 0));
    }

    #[test]
    fn test_caret_near_line_start() {
        let template = "{{}}";
        let mut lines = Vec::new();
        let reporter = reporter_for(template, &mut lines);
        assert_eq!(reporter.location_descr(1, 3), "{{}}\n--^-------");
        assert_eq!(reporter.location_descr(1, 1), "{{}}\n^-------");
    }

    #[test]
    fn test_caret_preserves_indentation() {
        let template = "    {% if %}";
        let mut lines = Vec::new();
        let reporter = reporter_for(template, &mut lines);
        assert_eq!(
            reporter.location_descr(1, 11),
            "    {% if %}\n       ---^-------"
        );
    }

    #[test]
    fn test_caret_with_tab_indentation() {
        let template = "\t{% if %}";
        let mut lines = Vec::new();
        let reporter = reporter_for(template, &mut lines);
        assert_eq!(reporter.location_descr(1, 8), "\t{% if %}\n\t   ---^-------");
    }

    #[test]
    fn test_caret_inside_leading_whitespace() {
        let template = "    x";
        let mut lines = Vec::new();
        let reporter = reporter_for(template, &mut lines);
        assert_eq!(reporter.location_descr(1, 3), "    x\n  ^-------");
    }

    #[test]
    fn test_related_token_gets_location() {
        let template = "ab\ncd";
        let mut lines = Vec::new();
        let reporter = reporter_for(template, &mut lines);
        let error = ParseError::new(
            ErrorCode::UnexpectedStatement,
            Token::new(TokenKind::Endif, CharRange::new(3, 5)),
        )
        .with_related(Token::new(TokenKind::If, CharRange::new(0, 2)));
        let info = reporter.error_info(&error);
        assert_eq!(info.extra_params, vec!["endif".to_string(), "if".to_string()]);
        assert_eq!(info.related_locs.len(), 1);
        assert_eq!(info.related_locs[0].line, 1);
    }
}
