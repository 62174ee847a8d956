//! Statement parsing
//!
//! Consumes the token stream of a `{% ... %}` block and drives the
//! statement frame stack: openers push a frame, `elif`/`else` add a branch
//! composition to the top frame, closers pop it and attach the assembled
//! renderer to the enclosing composition. The bottom frame is always the
//! template root.

use crate::error::{ErrorCode, ParseError};
use crate::expr::{Expression, ExpressionParser};
use crate::inherit::{BlocksMap, ExtendsNode, ParentBlockNode};
use crate::lexer::{LexScanner, Token, TokenKind};
use crate::renderer::{
    BlockNode, CallNode, CompositeRenderer, ForNode, IfBranch, IfNode, MacroNode, MacroParam,
    Renderer, SetBlockNode, SetNode,
};
use crate::scanner::CharRange;
use crate::value::CallParams;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// What kind of statement a frame is for, with the payload collected from
/// its opening tag.
#[derive(Debug)]
pub enum FrameKind {
    TemplateRoot,
    If {
        /// One guard per composition; `None` marks the `else` branch.
        guards: Vec<Option<Rc<Expression>>>,
    },
    For {
        vars: Vec<String>,
        value: Rc<Expression>,
        filter: Option<Rc<Expression>>,
        recursive: bool,
        has_else: bool,
    },
    SetBlock {
        fields: Vec<String>,
    },
    Block {
        name: String,
        name_token: Token,
        scoped: bool,
        required: bool,
        /// Blocks directly inside an extends frame are override bodies;
        /// everywhere else a block plays the parent (overridable) role.
        parent_role: bool,
    },
    /// Never popped: content after `{% extends %}` outside blocks is
    /// collected here and dropped.
    Extends {
        blocks: Rc<RefCell<BlocksMap>>,
    },
    Macro {
        name: String,
        params: Vec<MacroParam>,
    },
    Call {
        macro_name: String,
        params: Vec<MacroParam>,
        call_params: CallParams,
    },
}

/// A parse-time stack frame. `compositions` carries one composite per
/// branch; the last one is the current append target.
#[derive(Debug)]
pub struct StatementFrame {
    pub kind: FrameKind,
    pub compositions: Vec<CompositeRenderer>,
    pub token: Token,
}

impl StatementFrame {
    fn new(kind: FrameKind, token: Token) -> Self {
        Self {
            kind,
            compositions: vec![CompositeRenderer::new()],
            token,
        }
    }

    pub fn current(&mut self) -> &mut CompositeRenderer {
        self.compositions.last_mut().unwrap()
    }
}

pub type StatementStack = Vec<StatementFrame>;

/// A stack with the template-root frame at the bottom.
pub fn root_stack() -> StatementStack {
    vec![StatementFrame::new(
        FrameKind::TemplateRoot,
        Token::new(TokenKind::Unknown, CharRange::default()),
    )]
}

fn expect_ident(scanner: &mut LexScanner) -> Result<(String, Token), ParseError> {
    if let TokenKind::Ident(name) = &scanner.peek().kind {
        let name = name.clone();
        Ok((name, scanner.next()))
    } else {
        Err(ParseError::new(
            ErrorCode::UnexpectedToken,
            scanner.peek().clone(),
        ))
    }
}

fn expect(scanner: &mut LexScanner, kind: &TokenKind) -> Result<Token, ParseError> {
    scanner.eat_if(kind).ok_or_else(|| {
        ParseError::new(ErrorCode::UnexpectedToken, scanner.peek().clone())
    })
}

fn expect_end(scanner: &mut LexScanner) -> Result<(), ParseError> {
    if scanner.at_end() {
        Ok(())
    } else {
        Err(ParseError::new(
            ErrorCode::UnexpectedToken,
            scanner.peek().clone(),
        ))
    }
}

/// Parses an expression clause; a token that cannot start an expression is
/// reported as "expected expression".
fn expression(scanner: &mut LexScanner, include_if: bool) -> Result<Rc<Expression>, ParseError> {
    ExpressionParser::full_expression(scanner, include_if).map_err(|e| {
        if e.code == ErrorCode::UnexpectedToken {
            e.recode(ErrorCode::ExpectedExpression)
        } else {
            e
        }
    })
}

pub struct StatementsParser;

impl StatementsParser {
    /// Dispatches on the first keyword of the block.
    pub fn parse(scanner: &mut LexScanner, stack: &mut StatementStack) -> Result<(), ParseError> {
        let token = scanner.next();
        match token.kind {
            TokenKind::For => Self::parse_for(scanner, stack, token),
            TokenKind::Endfor => Self::parse_endfor(scanner, stack, token),
            TokenKind::If => Self::parse_if(scanner, stack, token),
            TokenKind::Elif => Self::parse_elif(scanner, stack, token),
            TokenKind::Else => Self::parse_else(scanner, stack, token),
            TokenKind::Endif => Self::parse_endif(scanner, stack, token),
            TokenKind::Set => Self::parse_set(scanner, stack, token),
            TokenKind::Endset => Self::parse_endset(scanner, stack, token),
            TokenKind::Block => Self::parse_block(scanner, stack, token),
            TokenKind::Endblock => Self::parse_endblock(scanner, stack, token),
            TokenKind::Extends => Self::parse_extends(scanner, stack, token),
            TokenKind::Macro => Self::parse_macro(scanner, stack, token),
            TokenKind::Endmacro => Self::parse_endmacro(scanner, stack, token),
            TokenKind::Call => Self::parse_call(scanner, stack, token),
            TokenKind::Endcall => Self::parse_endcall(scanner, stack, token),
            TokenKind::Include
            | TokenKind::Import
            | TokenKind::Filter
            | TokenKind::Endfilter => Err(ParseError::new(ErrorCode::YetUnsupported, token)),
            _ => Err(ParseError::new(ErrorCode::UnexpectedToken, token)),
        }
    }

    /// Pops the top frame after checking it matches; a closer with no open
    /// statement, or closing the wrong one, reports both locations.
    fn pop_frame(
        stack: &mut StatementStack,
        stmt_tok: &Token,
        matches_kind: impl Fn(&FrameKind) -> bool,
    ) -> Result<StatementFrame, ParseError> {
        if stack.len() <= 1 {
            return Err(ParseError::new(
                ErrorCode::UnexpectedStatement,
                stmt_tok.clone(),
            ));
        }
        let top = stack.last().unwrap();
        if !matches_kind(&top.kind) {
            return Err(ParseError::new(ErrorCode::UnexpectedStatement, stmt_tok.clone())
                .with_related(top.token.clone()));
        }
        Ok(stack.pop().unwrap())
    }

    fn append(stack: &mut StatementStack, renderer: Renderer) {
        stack.last_mut().unwrap().current().push(renderer);
    }

    fn parse_for(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        let mut vars = vec![expect_ident(scanner)?.0];
        while scanner.eat_if(&TokenKind::Comma).is_some() {
            vars.push(expect_ident(scanner)?.0);
        }
        expect(scanner, &TokenKind::In)?;
        // The `if` clause belongs to the loop, not the value expression.
        let value = expression(scanner, false)?;
        let filter = if scanner.eat_if(&TokenKind::If).is_some() {
            Some(expression(scanner, true)?)
        } else {
            None
        };
        let mut recursive = false;
        if matches!(&scanner.peek().kind, TokenKind::Ident(n) if n == "recursive") {
            scanner.next();
            recursive = true;
        }
        expect_end(scanner)?;

        stack.push(StatementFrame::new(
            FrameKind::For {
                vars,
                value,
                filter,
                recursive,
                has_else: false,
            },
            stmt_tok,
        ));
        Ok(())
    }

    fn parse_endfor(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        expect_end(scanner)?;
        let frame = Self::pop_frame(stack, &stmt_tok, |k| matches!(k, FrameKind::For { .. }))?;
        let FrameKind::For {
            vars,
            value,
            filter,
            recursive,
            has_else,
        } = frame.kind
        else {
            unreachable!()
        };
        let mut compositions = frame.compositions.into_iter();
        let body = compositions.next().unwrap();
        let else_body = if has_else { compositions.next() } else { None };
        Self::append(
            stack,
            Renderer::For(Rc::new(ForNode {
                vars,
                value,
                filter,
                is_recursive: recursive,
                body,
                else_body,
            })),
        );
        Ok(())
    }

    fn parse_if(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        let guard = expression(scanner, true)?;
        expect_end(scanner)?;
        stack.push(StatementFrame::new(
            FrameKind::If {
                guards: vec![Some(guard)],
            },
            stmt_tok,
        ));
        Ok(())
    }

    fn parse_elif(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        let guard = expression(scanner, true)?;
        expect_end(scanner)?;

        let top_is_open_if = stack.len() > 1
            && matches!(
                &stack.last().unwrap().kind,
                FrameKind::If { guards } if !matches!(guards.last(), Some(None))
            );
        if !top_is_open_if {
            let mut error = ParseError::new(ErrorCode::UnexpectedStatement, stmt_tok);
            if stack.len() > 1 {
                error = error.with_related(stack.last().unwrap().token.clone());
            }
            return Err(error);
        }

        let top = stack.last_mut().unwrap();
        let FrameKind::If { guards } = &mut top.kind else {
            unreachable!()
        };
        guards.push(Some(guard));
        top.compositions.push(CompositeRenderer::new());
        Ok(())
    }

    fn parse_else(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        expect_end(scanner)?;

        let acceptable = stack.len() > 1
            && match &stack.last().unwrap().kind {
                FrameKind::If { guards } => !matches!(guards.last(), Some(None)),
                FrameKind::For { has_else, .. } => !has_else,
                _ => false,
            };
        if !acceptable {
            let mut error = ParseError::new(ErrorCode::UnexpectedStatement, stmt_tok);
            if stack.len() > 1 {
                error = error.with_related(stack.last().unwrap().token.clone());
            }
            return Err(error);
        }

        let top = stack.last_mut().unwrap();
        match &mut top.kind {
            FrameKind::If { guards } => guards.push(None),
            FrameKind::For { has_else, .. } => *has_else = true,
            _ => unreachable!(),
        }
        top.compositions.push(CompositeRenderer::new());
        Ok(())
    }

    fn parse_endif(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        expect_end(scanner)?;
        let frame = Self::pop_frame(stack, &stmt_tok, |k| matches!(k, FrameKind::If { .. }))?;
        let FrameKind::If { guards } = frame.kind else {
            unreachable!()
        };
        let branches = guards
            .into_iter()
            .zip(frame.compositions)
            .map(|(condition, body)| IfBranch { condition, body })
            .collect();
        Self::append(stack, Renderer::If(IfNode { branches }));
        Ok(())
    }

    fn parse_set(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        let mut fields = vec![expect_ident(scanner)?.0];
        while scanner.eat_if(&TokenKind::Comma).is_some() {
            fields.push(expect_ident(scanner)?.0);
        }
        if scanner.eat_if(&TokenKind::Assign).is_some() {
            let value = expression(scanner, true)?;
            expect_end(scanner)?;
            Self::append(stack, Renderer::Set(SetNode { fields, value }));
            return Ok(());
        }
        if scanner.at_end() {
            stack.push(StatementFrame::new(FrameKind::SetBlock { fields }, stmt_tok));
            return Ok(());
        }
        Err(ParseError::new(
            ErrorCode::UnexpectedToken,
            scanner.peek().clone(),
        ))
    }

    fn parse_endset(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        expect_end(scanner)?;
        let frame = Self::pop_frame(stack, &stmt_tok, |k| matches!(k, FrameKind::SetBlock { .. }))?;
        let FrameKind::SetBlock { fields } = frame.kind else {
            unreachable!()
        };
        let body = frame.compositions.into_iter().next().unwrap();
        Self::append(stack, Renderer::SetBlock(SetBlockNode { fields, body }));
        Ok(())
    }

    fn parse_block(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        let (name, name_token) = expect_ident(scanner)?;
        let mut scoped = false;
        let mut required = false;
        while let TokenKind::Ident(modifier) = &scanner.peek().kind {
            match modifier.as_str() {
                "scoped" => scoped = true,
                "required" => required = true,
                _ => {
                    return Err(ParseError::new(
                        ErrorCode::UnexpectedToken,
                        scanner.peek().clone(),
                    ));
                }
            }
            scanner.next();
        }
        expect_end(scanner)?;

        let parent_role = !matches!(stack.last().unwrap().kind, FrameKind::Extends { .. });
        stack.push(StatementFrame::new(
            FrameKind::Block {
                name,
                name_token,
                scoped,
                required,
                parent_role,
            },
            stmt_tok,
        ));
        Ok(())
    }

    fn parse_endblock(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        // `{% endblock name %}` may repeat the block name.
        let closing_name = if matches!(scanner.peek().kind, TokenKind::Ident(_)) {
            Some(expect_ident(scanner)?)
        } else {
            None
        };
        expect_end(scanner)?;

        let frame = Self::pop_frame(stack, &stmt_tok, |k| matches!(k, FrameKind::Block { .. }))?;
        let FrameKind::Block {
            name,
            name_token,
            scoped,
            required,
            parent_role,
        } = frame.kind
        else {
            unreachable!()
        };
        if let Some((closing, closing_token)) = closing_name {
            if closing != name {
                return Err(ParseError::new(ErrorCode::MismatchedBlock, closing_token)
                    .with_related(frame.token));
            }
        }
        let body = frame.compositions.into_iter().next().unwrap();

        if parent_role {
            Self::append(
                stack,
                Renderer::ParentBlock(Rc::new(ParentBlockNode {
                    name,
                    scoped,
                    required,
                    body,
                })),
            );
            return Ok(());
        }

        // Override body of an extends child: registered, never rendered
        // inline.
        let top = stack.last_mut().unwrap();
        let FrameKind::Extends { blocks } = &top.kind else {
            unreachable!()
        };
        let mut blocks = blocks.borrow_mut();
        if blocks.contains_key(&name) {
            return Err(ParseError::new(ErrorCode::Redefinition, name_token));
        }
        blocks.insert(name.clone(), Rc::new(BlockNode { name, body }));
        Ok(())
    }

    fn parse_extends(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        let token = scanner.next();
        let (path, is_path) = match token.kind {
            TokenKind::String(s) => (s, true),
            TokenKind::Ident(s) => (s, false),
            _ => return Err(ParseError::new(ErrorCode::UnexpectedToken, token)),
        };
        expect_end(scanner)?;

        let blocks = Rc::new(RefCell::new(HashMap::new()));
        Self::append(
            stack,
            Renderer::Extends(ExtendsNode {
                path,
                is_path,
                blocks: Rc::clone(&blocks),
            }),
        );
        stack.push(StatementFrame::new(FrameKind::Extends { blocks }, stmt_tok));
        Ok(())
    }

    fn parse_macro(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        let (name, _) = expect_ident(scanner)?;
        expect(scanner, &TokenKind::LParen)?;
        let params = Self::macro_params(scanner)?;
        expect(scanner, &TokenKind::RParen)?;
        expect_end(scanner)?;
        stack.push(StatementFrame::new(
            FrameKind::Macro { name, params },
            stmt_tok,
        ));
        Ok(())
    }

    fn parse_endmacro(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        expect_end(scanner)?;
        let frame = Self::pop_frame(stack, &stmt_tok, |k| matches!(k, FrameKind::Macro { .. }))?;
        let FrameKind::Macro { name, params } = frame.kind else {
            unreachable!()
        };
        let body = frame.compositions.into_iter().next().unwrap();
        Self::append(stack, Renderer::Macro(Rc::new(MacroNode { name, params, body })));
        Ok(())
    }

    fn parse_call(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        // `{% call [(params)] name(args) %}`
        let params = if scanner.eat_if(&TokenKind::LParen).is_some() {
            let params = Self::macro_params(scanner)?;
            expect(scanner, &TokenKind::RParen)?;
            params
        } else {
            Vec::new()
        };
        let (macro_name, _) = expect_ident(scanner)?;
        let call_params = if scanner.eat_if(&TokenKind::LParen).is_some() {
            let call_params = ExpressionParser::call_args(scanner)?;
            expect(scanner, &TokenKind::RParen)?;
            call_params
        } else {
            CallParams::default()
        };
        expect_end(scanner)?;
        stack.push(StatementFrame::new(
            FrameKind::Call {
                macro_name,
                params,
                call_params,
            },
            stmt_tok,
        ));
        Ok(())
    }

    fn parse_endcall(
        scanner: &mut LexScanner,
        stack: &mut StatementStack,
        stmt_tok: Token,
    ) -> Result<(), ParseError> {
        expect_end(scanner)?;
        let frame = Self::pop_frame(stack, &stmt_tok, |k| matches!(k, FrameKind::Call { .. }))?;
        let FrameKind::Call {
            macro_name,
            params,
            call_params,
        } = frame.kind
        else {
            unreachable!()
        };
        let body = frame.compositions.into_iter().next().unwrap();
        Self::append(
            stack,
            Renderer::MacroCall(Rc::new(CallNode {
                macro_name,
                params,
                call_params,
                body,
            })),
        );
        Ok(())
    }

    fn macro_params(scanner: &mut LexScanner) -> Result<Vec<MacroParam>, ParseError> {
        let mut params = Vec::new();
        while !scanner.check(&TokenKind::RParen) && !scanner.at_end() {
            let (name, _) = expect_ident(scanner)?;
            let default = if scanner.eat_if(&TokenKind::Assign).is_some() {
                Some(expression(scanner, true)?)
            } else {
                None
            };
            params.push(MacroParam { name, default });
            if scanner.eat_if(&TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse_stmt(src: &str, stack: &mut StatementStack) -> Result<(), ParseError> {
        let tokens = Lexer::tokenize(src, CharRange::new(0, src.len())).unwrap();
        let mut scanner = LexScanner::new(tokens);
        StatementsParser::parse(&mut scanner, stack)
    }

    #[test]
    fn test_endif_without_if() {
        let mut stack = root_stack();
        let err = parse_stmt("endif", &mut stack).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedStatement);
        assert_eq!(err.error_token.kind.display(), "endif");
        assert!(err.related_tokens.is_empty());
    }

    #[test]
    fn test_mismatched_closer_carries_opener() {
        let mut stack = root_stack();
        parse_stmt("for x in xs", &mut stack).unwrap();
        let err = parse_stmt("endif", &mut stack).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedStatement);
        assert_eq!(err.related_tokens.len(), 1);
        assert_eq!(err.related_tokens[0].kind, TokenKind::For);
    }

    #[test]
    fn test_else_after_else_is_error() {
        let mut stack = root_stack();
        parse_stmt("if x", &mut stack).unwrap();
        parse_stmt("else", &mut stack).unwrap();
        let err = parse_stmt("else", &mut stack).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedStatement);
    }

    #[test]
    fn test_unsupported_statements() {
        let mut stack = root_stack();
        let err = parse_stmt("include \"x\"", &mut stack).unwrap_err();
        assert_eq!(err.code, ErrorCode::YetUnsupported);
    }

    #[test]
    fn test_block_inside_extends_registers_override() {
        let mut stack = root_stack();
        parse_stmt("extends \"base\"", &mut stack).unwrap();
        parse_stmt("block title", &mut stack).unwrap();
        parse_stmt("endblock", &mut stack).unwrap();
        let FrameKind::Extends { blocks } = &stack.last().unwrap().kind else {
            panic!("extends frame expected on top");
        };
        assert!(blocks.borrow().contains_key("title"));
    }

    #[test]
    fn test_block_redefinition_in_extends() {
        let mut stack = root_stack();
        parse_stmt("extends \"base\"", &mut stack).unwrap();
        parse_stmt("block title", &mut stack).unwrap();
        parse_stmt("endblock", &mut stack).unwrap();
        parse_stmt("block title", &mut stack).unwrap();
        let err = parse_stmt("endblock", &mut stack).unwrap_err();
        assert_eq!(err.code, ErrorCode::Redefinition);
        assert_eq!(err.error_token.kind.display(), "title");
    }

    #[test]
    fn test_endblock_name_mismatch() {
        let mut stack = root_stack();
        parse_stmt("block title", &mut stack).unwrap();
        let err = parse_stmt("endblock other", &mut stack).unwrap_err();
        assert_eq!(err.code, ErrorCode::MismatchedBlock);
        assert_eq!(err.error_token.kind.display(), "other");
    }

    #[test]
    fn test_if_expression_error_is_expected_expression() {
        let mut stack = root_stack();
        let err = parse_stmt("if", &mut stack).unwrap_err();
        assert_eq!(err.code, ErrorCode::ExpectedExpression);
        assert_eq!(err.error_token.kind.display(), "<<End of block>>");
    }
}
