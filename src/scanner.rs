//! Rough (first-pass) template scanning
//!
//! Segments raw template text into typed blocks and builds the line table
//! used for error locations. The fine parsers (expression and statement)
//! only ever see the character ranges produced here.

use crate::error::{ErrorCode, ParseError};
use crate::lexer::{Token, TokenKind};
use regex::Regex;
use std::sync::OnceLock;

/// Engine settings that influence scanning.
#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    /// Remove the first newline after a statement block.
    pub trim_blocks: bool,
    /// Strip whitespace from the start of a line to a block tag.
    pub lstrip_blocks: bool,
    /// Treat lines beginning with `#` as statements.
    pub use_line_statements: bool,
}

/// Half-open `[start, end)` byte range into the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharRange {
    pub start: usize,
    pub end: usize,
}

impl CharRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }
}

/// One source line. Line ranges never include the terminating newline.
#[derive(Debug, Clone, Copy)]
pub struct LineInfo {
    pub range: CharRange,
    /// 0-based; diagnostics add 1.
    pub line_number: u32,
}

/// Classification of a scanned block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextBlockType {
    RawText,
    Expression,
    Statement,
    Comment,
    LineStatement,
}

/// A scanned block. Delimiter characters are never part of the range.
#[derive(Debug, Clone, Copy)]
pub struct TextBlockInfo {
    pub range: CharRange,
    pub kind: TextBlockType,
}

/// Result of the rough pass over a template.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub lines: Vec<LineInfo>,
    pub blocks: Vec<TextBlockInfo>,
    pub errors: Vec<ParseError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoughKind {
    ExprBegin,
    ExprEnd,
    StmtBegin,
    StmtEnd,
    CommentBegin,
    CommentEnd,
    NewLine,
}

fn rough_tokenizer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{|\}\}|\{%|%\}|\{#|#\}|\n").unwrap())
}

fn classify(m: &str) -> RoughKind {
    match m {
        "{{" => RoughKind::ExprBegin,
        "}}" => RoughKind::ExprEnd,
        "{%" => RoughKind::StmtBegin,
        "%}" => RoughKind::StmtEnd,
        "{#" => RoughKind::CommentBegin,
        "#}" => RoughKind::CommentEnd,
        _ => RoughKind::NewLine,
    }
}

/// The rough scanner. Walks delimiter matches left to right, maintaining the
/// current block and line, and collects every error it finds instead of
/// stopping at the first.
pub struct SourceScanner<'a> {
    template: &'a str,
    settings: Settings,
    lines: Vec<LineInfo>,
    blocks: Vec<TextBlockInfo>,
    errors: Vec<ParseError>,
    cur_line: LineInfo,
    cur_block: TextBlockInfo,
}

impl<'a> SourceScanner<'a> {
    pub fn scan(template: &'a str, settings: Settings) -> ScanResult {
        let mut scanner = SourceScanner {
            template,
            settings,
            lines: Vec::new(),
            blocks: Vec::new(),
            errors: Vec::new(),
            cur_line: LineInfo {
                range: CharRange::default(),
                line_number: 0,
            },
            cur_block: TextBlockInfo {
                range: CharRange::default(),
                kind: TextBlockType::RawText,
            },
        };
        scanner.run();
        ScanResult {
            lines: scanner.lines,
            blocks: scanner.blocks,
            errors: scanner.errors,
        }
    }

    fn run(&mut self) {
        let matches: Vec<(usize, RoughKind)> = rough_tokenizer()
            .find_iter(self.template)
            .map(|m| (m.start(), classify(m.as_str())))
            .collect();

        if matches.is_empty() {
            if self.template.is_empty() {
                self.blocks.push(TextBlockInfo {
                    range: CharRange::default(),
                    kind: TextBlockType::RawText,
                });
                return;
            }
            let range = CharRange::new(0, self.template.len());
            self.lines.push(LineInfo {
                range,
                line_number: 0,
            });
            self.blocks.push(TextBlockInfo {
                range,
                kind: self.initial_block_kind(),
            });
            return;
        }

        self.cur_block.kind = self.initial_block_kind();
        for (pos, kind) in matches {
            self.rough_match(pos, kind);
        }
        self.finish_current_line(self.template.len());
        self.finish_current_block(self.template.len());
    }

    fn initial_block_kind(&self) -> TextBlockType {
        if self.settings.use_line_statements && self.template.as_bytes().first() == Some(&b'#') {
            TextBlockType::LineStatement
        } else {
            TextBlockType::RawText
        }
    }

    fn byte_at(&self, pos: usize) -> u8 {
        self.template.as_bytes()[pos]
    }

    fn rough_match(&mut self, pos: usize, kind: RoughKind) {
        match kind {
            RoughKind::NewLine => self.newline(pos),
            RoughKind::CommentBegin => {
                if self.cur_block.kind != TextBlockType::RawText {
                    self.errors.push(ParseError::new(
                        ErrorCode::UnexpectedCommentBegin,
                        Token::new(TokenKind::CommentBegin, CharRange::new(pos, pos + 2)),
                    ));
                    return;
                }
                self.finish_current_block(pos);
                self.cur_block.range.start = pos + 2;
                self.cur_block.kind = TextBlockType::Comment;
            }
            RoughKind::CommentEnd => {
                if self.cur_block.kind != TextBlockType::Comment {
                    self.errors.push(ParseError::new(
                        ErrorCode::UnexpectedCommentEnd,
                        Token::new(TokenKind::CommentEnd, CharRange::new(pos, pos + 2)),
                    ));
                    return;
                }
                self.finish_current_block(pos);
                self.cur_block.range.start = pos + 2;
            }
            RoughKind::ExprBegin => self.start_control_block(TextBlockType::Expression, pos),
            RoughKind::StmtBegin => self.start_control_block(TextBlockType::Statement, pos),
            RoughKind::ExprEnd => {
                if self.cur_block.kind == TextBlockType::RawText {
                    self.errors.push(ParseError::new(
                        ErrorCode::UnexpectedExprEnd,
                        Token::new(TokenKind::ExprEnd, CharRange::new(pos, pos + 2)),
                    ));
                    return;
                }
                if self.cur_block.kind != TextBlockType::Expression
                    || (pos > 0 && self.byte_at(pos - 1) == b'\'')
                {
                    return;
                }
                self.cur_block.range.start = self.finish_current_block(pos);
            }
            RoughKind::StmtEnd => {
                if self.cur_block.kind == TextBlockType::RawText {
                    self.errors.push(ParseError::new(
                        ErrorCode::UnexpectedStmtEnd,
                        Token::new(TokenKind::StmtEnd, CharRange::new(pos, pos + 2)),
                    ));
                    return;
                }
                if self.cur_block.kind != TextBlockType::Statement
                    || (pos > 0 && self.byte_at(pos - 1) == b'\'')
                {
                    return;
                }
                self.cur_block.range.start = self.finish_current_block(pos);
            }
        }
    }

    fn newline(&mut self, pos: usize) {
        self.finish_current_line(pos);
        let next_start = pos + 1;
        self.cur_line.range.start = next_start;

        if next_start >= self.template.len() {
            return;
        }
        if !matches!(
            self.cur_block.kind,
            TextBlockType::RawText | TextBlockType::LineStatement
        ) {
            return;
        }

        let next_is_stmt = self.settings.use_line_statements && self.byte_at(next_start) == b'#';
        match self.cur_block.kind {
            TextBlockType::LineStatement => {
                // The newline terminates the statement and belongs to neither
                // the statement block nor the following block.
                self.finish_current_block(pos);
                self.cur_block.range.start = next_start;
            }
            TextBlockType::RawText if next_is_stmt => {
                // The raw text keeps its trailing newline.
                self.finish_current_block(next_start);
                self.cur_block.range.start = next_start;
            }
            _ => {}
        }
        self.cur_block.kind = if next_is_stmt {
            TextBlockType::LineStatement
        } else {
            TextBlockType::RawText
        };
    }

    fn start_control_block(&mut self, kind: TextBlockType, pos: usize) {
        if self.cur_block.kind != TextBlockType::RawText {
            return;
        }
        let mut start = pos + 2;
        let end = self.strip_block_left(start, pos);
        self.finish_current_block(end);
        if start < self.template.len() && matches!(self.byte_at(start), b'+' | b'-') {
            start += 1;
        }
        self.cur_block.range.start = start;
        self.cur_block.kind = kind;
    }

    /// Left whitespace control: strip trailing whitespace of the raw text
    /// back to (but not past) the nearest newline.
    fn strip_block_left(&self, ctrl_char_pos: usize, end: usize) -> usize {
        let mut do_strip = self.settings.lstrip_blocks;
        if ctrl_char_pos < self.template.len() {
            do_strip = match self.byte_at(ctrl_char_pos) {
                b'+' => false,
                b'-' => true,
                _ => do_strip,
            };
        }
        if !do_strip || self.cur_block.kind != TextBlockType::RawText {
            return end;
        }
        let mut end = end;
        while end > 0 {
            let ch = self.byte_at(end - 1);
            if !ch.is_ascii_whitespace() || ch == b'\n' {
                break;
            }
            end -= 1;
        }
        end
    }

    /// Closes the current block at `position` (after applying the `+`/`-`
    /// whitespace markers), pushes it and resets to raw text. Returns the
    /// offset where the following raw text starts.
    fn finish_current_block(&mut self, position: usize) -> usize {
        let mut position = position;
        let mut do_trim =
            self.settings.trim_blocks && self.cur_block.kind == TextBlockType::Statement;
        let mut new_pos = position + 2;

        if self.cur_block.kind != TextBlockType::RawText && position != 0 {
            match self.byte_at(position - 1) {
                b'-' => {
                    do_trim = true;
                    position -= 1;
                }
                b'+' => {
                    do_trim = false;
                    position -= 1;
                }
                _ => {}
            }
        }

        if do_trim {
            while new_pos < self.template.len() {
                let ch = self.byte_at(new_pos);
                if ch == b'\n' {
                    new_pos += 1;
                    break;
                }
                if !ch.is_ascii_whitespace() {
                    break;
                }
                new_pos += 1;
            }
        }

        self.cur_block.range.end = position;
        self.blocks.push(self.cur_block);
        self.cur_block.kind = TextBlockType::RawText;
        new_pos
    }

    fn finish_current_line(&mut self, position: usize) {
        self.cur_line.range.end = position;
        self.lines.push(self.cur_line);
        self.cur_line.line_number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(tpl: &str) -> ScanResult {
        SourceScanner::scan(tpl, Settings::default())
    }

    fn block_texts<'a>(tpl: &'a str, result: &ScanResult) -> Vec<(&'a str, TextBlockType)> {
        result
            .blocks
            .iter()
            .map(|b| (&tpl[b.range.start..b.range.end], b.kind))
            .collect()
    }

    #[test]
    fn test_empty_template() {
        let result = scan("");
        assert!(result.errors.is_empty());
        assert!(result.lines.is_empty());
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].kind, TextBlockType::RawText);
        assert_eq!(result.blocks[0].range.size(), 0);
    }

    #[test]
    fn test_raw_only() {
        let result = scan("Hello");
        assert_eq!(result.lines.len(), 1);
        assert_eq!(block_texts("Hello", &result), vec![("Hello", TextBlockType::RawText)]);
    }

    #[test]
    fn test_expression_block() {
        let tpl = "a{{ x }}b";
        let result = scan(tpl);
        assert!(result.errors.is_empty());
        assert_eq!(
            block_texts(tpl, &result),
            vec![
                ("a", TextBlockType::RawText),
                (" x ", TextBlockType::Expression),
                ("b", TextBlockType::RawText),
            ]
        );
    }

    #[test]
    fn test_comment_is_discarded_range() {
        let tpl = "a{# note #}b";
        let result = scan(tpl);
        assert!(result.errors.is_empty());
        assert_eq!(
            block_texts(tpl, &result),
            vec![
                ("a", TextBlockType::RawText),
                (" note ", TextBlockType::Comment),
                ("b", TextBlockType::RawText),
            ]
        );
    }

    #[test]
    fn test_line_table_partitions_template() {
        let tpl = "one\ntwo\n\nfour";
        let result = scan(tpl);
        let lines: Vec<&str> = result
            .lines
            .iter()
            .map(|l| &tpl[l.range.start..l.range.end])
            .collect();
        assert_eq!(lines, vec!["one", "two", "", "four"]);
        assert_eq!(result.lines[3].line_number, 3);
    }

    #[test]
    fn test_only_newlines() {
        let result = scan("\n\n");
        assert_eq!(result.lines.len(), 3);
        assert_eq!(result.lines[2].range.size(), 0);
    }

    #[test]
    fn test_unexpected_expr_end() {
        let result = scan("}}");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, ErrorCode::UnexpectedExprEnd);
        assert_eq!(result.errors[0].error_token.range.start, 0);
    }

    #[test]
    fn test_unexpected_comment_end() {
        let result = scan("text #} more");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, ErrorCode::UnexpectedCommentEnd);
    }

    #[test]
    fn test_quote_keeps_block_open() {
        let tpl = "{{ '%}' }}";
        let result = scan(tpl);
        assert!(result.errors.is_empty());
        let exprs: Vec<&str> = result
            .blocks
            .iter()
            .filter(|b| b.kind == TextBlockType::Expression)
            .map(|b| &tpl[b.range.start..b.range.end])
            .collect();
        assert_eq!(exprs, vec![" '%}' "]);
    }

    #[test]
    fn test_whitespace_marker_minus_left() {
        let tpl = "a   {%- if x %}";
        let result = scan(tpl);
        assert_eq!(block_texts(tpl, &result)[0], ("a", TextBlockType::RawText));
        // marker itself is not part of the statement range
        assert_eq!(block_texts(tpl, &result)[1], (" if x ", TextBlockType::Statement));
    }

    #[test]
    fn test_whitespace_marker_plus_overrides_lstrip() {
        let tpl = "a   {%+ if x %}";
        let settings = Settings {
            lstrip_blocks: true,
            ..Settings::default()
        };
        let result = SourceScanner::scan(tpl, settings);
        assert_eq!(block_texts(tpl, &result)[0], ("a   ", TextBlockType::RawText));
    }

    #[test]
    fn test_lstrip_setting() {
        let tpl = "a\n   {% if x %}";
        let settings = Settings {
            lstrip_blocks: true,
            ..Settings::default()
        };
        let result = SourceScanner::scan(tpl, settings);
        // stripped back to the newline, which stays in the raw text
        assert_eq!(block_texts(tpl, &result)[0], ("a\n", TextBlockType::RawText));
    }

    #[test]
    fn test_trim_marker_right() {
        let tpl = "{% if x -%}   \nrest";
        let result = scan(tpl);
        let raw: Vec<&str> = result
            .blocks
            .iter()
            .filter(|b| b.kind == TextBlockType::RawText && b.range.size() > 0)
            .map(|b| &tpl[b.range.start..b.range.end])
            .collect();
        assert_eq!(raw, vec!["rest"]);
    }

    #[test]
    fn test_trim_blocks_setting() {
        let tpl = "{% if x %}\nrest";
        let settings = Settings {
            trim_blocks: true,
            ..Settings::default()
        };
        let result = SourceScanner::scan(tpl, settings);
        let raw: Vec<&str> = result
            .blocks
            .iter()
            .filter(|b| b.kind == TextBlockType::RawText && b.range.size() > 0)
            .map(|b| &tpl[b.range.start..b.range.end])
            .collect();
        assert_eq!(raw, vec!["rest"]);
    }

    #[test]
    fn test_line_statement() {
        let tpl = "# for x in xs\nbody\n# endfor";
        let settings = Settings {
            use_line_statements: true,
            ..Settings::default()
        };
        let result = SourceScanner::scan(tpl, settings);
        assert_eq!(
            block_texts(tpl, &result),
            vec![
                ("# for x in xs", TextBlockType::LineStatement),
                ("body\n", TextBlockType::RawText),
                ("# endfor", TextBlockType::LineStatement),
            ]
        );
    }

    #[test]
    fn test_blocks_and_delimiters_reconstruct_template() {
        let tpl = "x{{ a }}y{% if b %}z{% endif %}{# c #}w";
        let result = scan(tpl);
        assert!(result.errors.is_empty());
        let mut rebuilt = String::new();
        for b in &result.blocks {
            match b.kind {
                TextBlockType::RawText => rebuilt.push_str(&tpl[b.range.start..b.range.end]),
                TextBlockType::Expression => {
                    rebuilt.push_str("{{");
                    rebuilt.push_str(&tpl[b.range.start..b.range.end]);
                    rebuilt.push_str("}}");
                }
                TextBlockType::Statement => {
                    rebuilt.push_str("{%");
                    rebuilt.push_str(&tpl[b.range.start..b.range.end]);
                    rebuilt.push_str("%}");
                }
                TextBlockType::Comment => {
                    rebuilt.push_str("{#");
                    rebuilt.push_str(&tpl[b.range.start..b.range.end]);
                    rebuilt.push_str("#}");
                }
                TextBlockType::LineStatement => rebuilt.push_str(&tpl[b.range.start..b.range.end]),
            }
        }
        assert_eq!(rebuilt, tpl);
    }
}
