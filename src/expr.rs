//! Expression sub-language
//!
//! Precedence-climbing parser and evaluator for everything inside
//! `{{ ... }}` and statement clauses: literals, lookups, operators, filters
//! and tests. The statement parser consumes expressions through
//! [`ExpressionParser::full_expression`]; rendering only ever calls
//! [`Expression::evaluate`].

use crate::context::RenderContext;
use crate::error::{ErrorCode, ParseError};
use crate::lexer::{LexScanner, Token, TokenKind};
use crate::value::{CallParams, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

/// An evaluable expression tree. Children are reference counted so call
/// sites can hand argument expressions to callables for lazy evaluation.
#[derive(Debug)]
pub enum Expression {
    Constant(Value),
    ListLiteral(Vec<Rc<Expression>>),
    DictLiteral(Vec<(Rc<Expression>, Rc<Expression>)>),
    Var(String),
    Field {
        base: Rc<Expression>,
        name: String,
    },
    Subscript {
        base: Rc<Expression>,
        index: Rc<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Rc<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Rc<Expression>,
        right: Rc<Expression>,
    },
    Conditional {
        value: Rc<Expression>,
        condition: Rc<Expression>,
        otherwise: Rc<Expression>,
    },
    Call {
        callee: Rc<Expression>,
        params: CallParams,
    },
    Filter {
        base: Rc<Expression>,
        name: String,
        params: CallParams,
    },
    Test {
        base: Rc<Expression>,
        name: String,
        params: CallParams,
        negated: bool,
    },
}

impl Expression {
    /// Evaluates against the current context. Lookups that fail resolve to
    /// `Empty` rather than erroring.
    pub fn evaluate(&self, ctx: &mut RenderContext) -> Value {
        match self {
            Expression::Constant(v) => v.clone(),
            Expression::ListLiteral(items) => {
                Value::list(items.iter().map(|e| e.evaluate(ctx)).collect())
            }
            Expression::DictLiteral(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.evaluate(ctx).to_output_string(), value.evaluate(ctx));
                }
                Value::map(map)
            }
            Expression::Var(name) => ctx.find_value(name).unwrap_or(Value::Empty),
            Expression::Field { base, name } => base.evaluate(ctx).field(name),
            Expression::Subscript { base, index } => {
                let base = base.evaluate(ctx);
                let index = index.evaluate(ctx);
                base.index(&index)
            }
            Expression::Unary { op, operand } => eval_unary(*op, operand.evaluate(ctx)),
            Expression::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    Value::Bool(left.evaluate(ctx).is_truthy() && right.evaluate(ctx).is_truthy())
                }
                BinaryOp::Or => {
                    Value::Bool(left.evaluate(ctx).is_truthy() || right.evaluate(ctx).is_truthy())
                }
                _ => eval_binary(*op, left.evaluate(ctx), right.evaluate(ctx)),
            },
            Expression::Conditional {
                value,
                condition,
                otherwise,
            } => {
                if condition.evaluate(ctx).is_truthy() {
                    value.evaluate(ctx)
                } else {
                    otherwise.evaluate(ctx)
                }
            }
            Expression::Call { callee, params } => eval_call(callee, params, ctx),
            Expression::Filter { base, name, params } => {
                let base = base.evaluate(ctx);
                apply_filter(name, base, params, ctx)
            }
            Expression::Test {
                base,
                name,
                params,
                negated,
            } => {
                let value = base.evaluate(ctx);
                Value::Bool(apply_test(name, &value, params) != *negated)
            }
        }
    }
}

/// Invoking a callable from expression position renders it into a scratch
/// buffer; the buffer is the expression result. Calling a map invokes its
/// `operator()` entry, which is how the recursive `loop(...)` helper works.
fn eval_call(callee: &Rc<Expression>, params: &CallParams, ctx: &mut RenderContext) -> Value {
    let target = callee.evaluate(ctx);
    let callable = match target {
        Value::Callable(c) => Some(c),
        Value::Map(m) => {
            let entry = m.borrow().get("operator()").cloned();
            match entry {
                Some(Value::Callable(c)) => Some(c),
                _ => None,
            }
        }
        _ => None,
    };
    match callable {
        Some(callable) => {
            let mut buffer = String::new();
            callable.invoke(params, &mut buffer, ctx);
            Value::String(buffer)
        }
        None => Value::Empty,
    }
}

fn eval_unary(op: UnaryOp, operand: Value) -> Value {
    match op {
        UnaryOp::Not => Value::Bool(!operand.is_truthy()),
        UnaryOp::Neg => match operand {
            Value::Int(i) => Value::Int(i.wrapping_neg()),
            Value::Double(d) => Value::Double(-d),
            _ => Value::Empty,
        },
        UnaryOp::Pos => match operand {
            Value::Int(_) | Value::Double(_) => operand,
            _ => Value::Empty,
        },
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

fn value_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Empty, Value::Empty) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            let a = a.borrow();
            let b = b.borrow();
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| value_eq(x, y))
        }
        _ => match (as_f64(l), as_f64(r)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn value_ordering(l: &Value, r: &Value) -> Option<std::cmp::Ordering> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (as_f64(l), as_f64(r)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }
}

fn contains(container: &Value, item: &Value) -> bool {
    match container {
        Value::List(l) => l.borrow().iter().any(|v| value_eq(v, item)),
        Value::Map(m) => match item {
            Value::String(s) => m.borrow().contains_key(s),
            _ => false,
        },
        Value::String(s) => s.contains(&item.to_output_string()),
        _ => false,
    }
}

fn eval_binary(op: BinaryOp, l: Value, r: Value) -> Value {
    use std::cmp::Ordering;
    match op {
        BinaryOp::Add => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            (Value::String(a), Value::String(b)) => Value::String(format!("{a}{b}")),
            (Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Value::list(items)
            }
            _ => match (as_f64(&l), as_f64(&r)) {
                (Some(a), Some(b)) => Value::Double(a + b),
                _ => Value::Empty,
            },
        },
        BinaryOp::Sub => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_sub(*b)),
            _ => match (as_f64(&l), as_f64(&r)) {
                (Some(a), Some(b)) => Value::Double(a - b),
                _ => Value::Empty,
            },
        },
        BinaryOp::Mul => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_mul(*b)),
            _ => match (as_f64(&l), as_f64(&r)) {
                (Some(a), Some(b)) => Value::Double(a * b),
                _ => Value::Empty,
            },
        },
        BinaryOp::Div => match (as_f64(&l), as_f64(&r)) {
            (Some(a), Some(b)) if b != 0.0 => Value::Double(a / b),
            _ => Value::Empty,
        },
        BinaryOp::FloorDiv => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) if *b != 0 => Value::Int(a.div_euclid(*b)),
            _ => match (as_f64(&l), as_f64(&r)) {
                (Some(a), Some(b)) if b != 0.0 => Value::Double((a / b).floor()),
                _ => Value::Empty,
            },
        },
        BinaryOp::Mod => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) if *b != 0 => Value::Int(a.rem_euclid(*b)),
            _ => match (as_f64(&l), as_f64(&r)) {
                (Some(a), Some(b)) if b != 0.0 => Value::Double(a % b),
                _ => Value::Empty,
            },
        },
        BinaryOp::Pow => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) if (0..=u32::MAX as i64).contains(b) => {
                match a.checked_pow(*b as u32) {
                    Some(v) => Value::Int(v),
                    None => Value::Double((*a as f64).powf(*b as f64)),
                }
            }
            _ => match (as_f64(&l), as_f64(&r)) {
                (Some(a), Some(b)) => Value::Double(a.powf(b)),
                _ => Value::Empty,
            },
        },
        BinaryOp::Concat => Value::String(l.to_output_string() + &r.to_output_string()),
        BinaryOp::Eq => Value::Bool(value_eq(&l, &r)),
        BinaryOp::Ne => Value::Bool(!value_eq(&l, &r)),
        BinaryOp::Lt => Value::Bool(value_ordering(&l, &r) == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(
            value_ordering(&l, &r),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(value_ordering(&l, &r) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            value_ordering(&l, &r),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::In => Value::Bool(contains(&r, &l)),
        BinaryOp::NotIn => Value::Bool(!contains(&r, &l)),
        // short-circuited in evaluate
        BinaryOp::And | BinaryOp::Or => Value::Empty,
    }
}

fn apply_filter(name: &str, base: Value, params: &CallParams, ctx: &mut RenderContext) -> Value {
    match name {
        "upper" => Value::String(base.to_output_string().to_uppercase()),
        "lower" => Value::String(base.to_output_string().to_lowercase()),
        "capitalize" => {
            let s = base.to_output_string();
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => Value::String(
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                ),
                None => Value::String(String::new()),
            }
        }
        "trim" => Value::String(base.to_output_string().trim().to_string()),
        "length" | "count" => match &base {
            Value::String(s) => Value::Int(s.chars().count() as i64),
            Value::List(l) => Value::Int(l.borrow().len() as i64),
            Value::Map(m) => Value::Int(m.borrow().len() as i64),
            _ => Value::Empty,
        },
        "first" => match &base {
            Value::List(l) => l.borrow().first().cloned().unwrap_or(Value::Empty),
            Value::String(s) => s
                .chars()
                .next()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Empty),
            _ => Value::Empty,
        },
        "last" => match &base {
            Value::List(l) => l.borrow().last().cloned().unwrap_or(Value::Empty),
            Value::String(s) => s
                .chars()
                .last()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Empty),
            _ => Value::Empty,
        },
        "join" => {
            let sep = params
                .pos_params
                .first()
                .map(|e| e.evaluate(ctx).to_output_string())
                .unwrap_or_default();
            match &base {
                Value::List(l) => Value::String(
                    l.borrow()
                        .iter()
                        .map(Value::to_output_string)
                        .collect::<Vec<_>>()
                        .join(&sep),
                ),
                _ => Value::Empty,
            }
        }
        "default" => {
            if base.is_empty_value() {
                params
                    .pos_params
                    .first()
                    .map(|e| e.evaluate(ctx))
                    .unwrap_or(Value::Empty)
            } else {
                base
            }
        }
        _ => {
            tracing::debug!(filter = name, "unknown filter, yielding empty");
            Value::Empty
        }
    }
}

fn apply_test(name: &str, value: &Value, _params: &CallParams) -> bool {
    match name {
        "defined" => !value.is_empty_value(),
        "undefined" => value.is_empty_value(),
        "even" => matches!(value, Value::Int(i) if i % 2 == 0),
        "odd" => matches!(value, Value::Int(i) if i % 2 != 0),
        "string" => matches!(value, Value::String(_)),
        "number" => matches!(value, Value::Int(_) | Value::Double(_)),
        "sequence" => matches!(value, Value::List(_)),
        "mapping" => matches!(value, Value::Map(_)),
        _ => {
            tracing::debug!(test = name, "unknown test, yielding false");
            false
        }
    }
}

fn unexpected(token: &Token) -> ParseError {
    ParseError::new(ErrorCode::UnexpectedToken, token.clone())
}

fn expect(scanner: &mut LexScanner, kind: &TokenKind) -> Result<Token, ParseError> {
    if scanner.check(kind) {
        Ok(scanner.next())
    } else {
        Err(unexpected(scanner.peek()))
    }
}

fn expect_ident(scanner: &mut LexScanner) -> Result<(String, Token), ParseError> {
    if let TokenKind::Ident(name) = &scanner.peek().kind {
        let name = name.clone();
        Ok((name, scanner.next()))
    } else {
        Err(unexpected(scanner.peek()))
    }
}

/// Parser over the token stream of a single block.
pub struct ExpressionParser;

impl ExpressionParser {
    /// Parses the body of a `{{ ... }}` block: one expression followed by
    /// the end of the block.
    pub fn parse(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let expr = Self::full_expression(scanner, true)?;
        if !scanner.at_end() {
            return Err(unexpected(scanner.peek()));
        }
        Ok(expr)
    }

    /// Parses one expression. `include_if` disables the trailing
    /// `a if c else b` form, which `for` statements need so the loop's
    /// filter clause is left in the stream.
    pub fn full_expression(
        scanner: &mut LexScanner,
        include_if: bool,
    ) -> Result<Rc<Expression>, ParseError> {
        let value = Self::logical_or(scanner)?;
        if include_if && scanner.eat_if(&TokenKind::If).is_some() {
            let condition = Self::logical_or(scanner)?;
            expect(scanner, &TokenKind::Else)?;
            let otherwise = Self::full_expression(scanner, include_if)?;
            return Ok(Rc::new(Expression::Conditional {
                value,
                condition,
                otherwise,
            }));
        }
        Ok(value)
    }

    fn logical_or(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let mut left = Self::logical_and(scanner)?;
        while scanner.eat_if(&TokenKind::Or).is_some() {
            let right = Self::logical_and(scanner)?;
            left = Rc::new(Expression::Binary {
                op: BinaryOp::Or,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn logical_and(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let mut left = Self::logical_not(scanner)?;
        while scanner.eat_if(&TokenKind::And).is_some() {
            let right = Self::logical_not(scanner)?;
            left = Rc::new(Expression::Binary {
                op: BinaryOp::And,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn logical_not(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        if scanner.eat_if(&TokenKind::Not).is_some() {
            let operand = Self::logical_not(scanner)?;
            return Ok(Rc::new(Expression::Unary {
                op: UnaryOp::Not,
                operand,
            }));
        }
        Self::comparison(scanner)
    }

    fn comparison(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let mut left = Self::addition(scanner)?;
        loop {
            if scanner.eat_if(&TokenKind::Is).is_some() {
                let negated = scanner.eat_if(&TokenKind::Not).is_some();
                let (name, _) = expect_ident(scanner)?;
                let params = if scanner.eat_if(&TokenKind::LParen).is_some() {
                    let params = Self::call_args(scanner)?;
                    expect(scanner, &TokenKind::RParen)?;
                    params
                } else {
                    CallParams::default()
                };
                left = Rc::new(Expression::Test {
                    base: left,
                    name,
                    params,
                    negated,
                });
                continue;
            }

            let op = match &scanner.peek().kind {
                TokenKind::Eq => Some(BinaryOp::Eq),
                TokenKind::Ne => Some(BinaryOp::Ne),
                TokenKind::Lt => Some(BinaryOp::Lt),
                TokenKind::Le => Some(BinaryOp::Le),
                TokenKind::Gt => Some(BinaryOp::Gt),
                TokenKind::Ge => Some(BinaryOp::Ge),
                TokenKind::In => Some(BinaryOp::In),
                TokenKind::Not if matches!(scanner.peek_at(1).kind, TokenKind::In) => {
                    Some(BinaryOp::NotIn)
                }
                _ => None,
            };
            let Some(op) = op else { break };
            scanner.next();
            if op == BinaryOp::NotIn {
                // the `in` after `not`
                scanner.next();
            }
            let right = Self::addition(scanner)?;
            left = Rc::new(Expression::Binary { op, left, right });
        }
        Ok(left)
    }

    fn addition(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let mut left = Self::multiplication(scanner)?;
        loop {
            let op = match &scanner.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                TokenKind::Tilde => BinaryOp::Concat,
                _ => break,
            };
            scanner.next();
            let right = Self::multiplication(scanner)?;
            left = Rc::new(Expression::Binary { op, left, right });
        }
        Ok(left)
    }

    fn multiplication(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let mut left = Self::unary(scanner)?;
        loop {
            let op = match &scanner.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::FloorDiv => BinaryOp::FloorDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            scanner.next();
            let right = Self::unary(scanner)?;
            left = Rc::new(Expression::Binary { op, left, right });
        }
        Ok(left)
    }

    fn unary(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let op = match &scanner.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            scanner.next();
            let operand = Self::unary(scanner)?;
            return Ok(Rc::new(Expression::Unary { op, operand }));
        }
        Self::power(scanner)
    }

    fn power(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let base = Self::filtered(scanner)?;
        if scanner.eat_if(&TokenKind::Pow).is_some() {
            let exponent = Self::unary(scanner)?;
            return Ok(Rc::new(Expression::Binary {
                op: BinaryOp::Pow,
                left: base,
                right: exponent,
            }));
        }
        Ok(base)
    }

    fn filtered(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let mut expr = Self::postfix(scanner)?;
        while scanner.eat_if(&TokenKind::Pipe).is_some() {
            let (name, _) = expect_ident(scanner)?;
            let params = if scanner.eat_if(&TokenKind::LParen).is_some() {
                let params = Self::call_args(scanner)?;
                expect(scanner, &TokenKind::RParen)?;
                params
            } else {
                CallParams::default()
            };
            expr = Rc::new(Expression::Filter {
                base: expr,
                name,
                params,
            });
        }
        Ok(expr)
    }

    fn postfix(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let mut expr = Self::primary(scanner)?;
        loop {
            if scanner.eat_if(&TokenKind::Dot).is_some() {
                let (name, _) = expect_ident(scanner)?;
                expr = Rc::new(Expression::Field { base: expr, name });
            } else if scanner.eat_if(&TokenKind::LBracket).is_some() {
                let index = Self::full_expression(scanner, true)?;
                expect(scanner, &TokenKind::RBracket)?;
                expr = Rc::new(Expression::Subscript { base: expr, index });
            } else if scanner.eat_if(&TokenKind::LParen).is_some() {
                let params = Self::call_args(scanner)?;
                expect(scanner, &TokenKind::RParen)?;
                expr = Rc::new(Expression::Call {
                    callee: expr,
                    params,
                });
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(scanner: &mut LexScanner) -> Result<Rc<Expression>, ParseError> {
        let token = scanner.peek().clone();
        let expr = match token.kind {
            TokenKind::Int(v) => {
                scanner.next();
                Expression::Constant(Value::Int(v))
            }
            TokenKind::Float(v) => {
                scanner.next();
                Expression::Constant(Value::Double(v))
            }
            TokenKind::String(ref s) => {
                let s = s.clone();
                scanner.next();
                Expression::Constant(Value::String(s))
            }
            TokenKind::True => {
                scanner.next();
                Expression::Constant(Value::Bool(true))
            }
            TokenKind::False => {
                scanner.next();
                Expression::Constant(Value::Bool(false))
            }
            TokenKind::None => {
                scanner.next();
                Expression::Constant(Value::Empty)
            }
            TokenKind::Ident(ref name) => {
                let name = name.clone();
                scanner.next();
                Expression::Var(name)
            }
            TokenKind::LParen => {
                scanner.next();
                let expr = Self::full_expression(scanner, true)?;
                expect(scanner, &TokenKind::RParen)?;
                return Ok(expr);
            }
            TokenKind::LBracket => {
                scanner.next();
                let mut items = Vec::new();
                while !scanner.check(&TokenKind::RBracket) {
                    items.push(Self::full_expression(scanner, true)?);
                    if scanner.eat_if(&TokenKind::Comma).is_none() {
                        break;
                    }
                }
                expect(scanner, &TokenKind::RBracket)?;
                Expression::ListLiteral(items)
            }
            TokenKind::LBrace => {
                scanner.next();
                let mut entries = Vec::new();
                while !scanner.check(&TokenKind::RBrace) {
                    let key = Self::full_expression(scanner, true)?;
                    expect(scanner, &TokenKind::Colon)?;
                    let value = Self::full_expression(scanner, true)?;
                    entries.push((key, value));
                    if scanner.eat_if(&TokenKind::Comma).is_none() {
                        break;
                    }
                }
                expect(scanner, &TokenKind::RBrace)?;
                Expression::DictLiteral(entries)
            }
            _ => return Err(unexpected(&token)),
        };
        Ok(Rc::new(expr))
    }

    /// Parses call-site arguments after an opening parenthesis; the caller
    /// consumes the closing one. `name=value` pairs become keyword
    /// parameters, everything else stays positional.
    pub(crate) fn call_args(scanner: &mut LexScanner) -> Result<CallParams, ParseError> {
        let mut params = CallParams::default();
        while !scanner.check(&TokenKind::RParen) && !scanner.at_end() {
            let is_kwarg = matches!(scanner.peek().kind, TokenKind::Ident(_))
                && matches!(scanner.peek_at(1).kind, TokenKind::Assign);
            if is_kwarg {
                let (name, _) = expect_ident(scanner)?;
                scanner.next();
                let value = Self::full_expression(scanner, true)?;
                params.kw_params.push((name, value));
            } else {
                params.pos_params.push(Self::full_expression(scanner, true)?);
            }
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
    use crate::context::Scope;
    use crate::lexer::Lexer;
    use crate::scanner::CharRange;

    fn eval_with(src: &str, ctx: &mut RenderContext) -> Value {
        let tokens = Lexer::tokenize(src, CharRange::new(0, src.len())).unwrap();
        let mut scanner = LexScanner::new(tokens);
        let expr = ExpressionParser::parse(&mut scanner).unwrap();
        expr.evaluate(ctx)
    }

    fn eval(src: &str) -> Value {
        eval_with(src, &mut RenderContext::new(Scope::new(), None))
    }

    fn eval_str(src: &str) -> String {
        eval(src).to_output_string()
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval_str("1 + 2 * 3"), "7");
        assert_eq!(eval_str("(1 + 2) * 3"), "9");
        assert_eq!(eval_str("2 ** 3 ** 2"), "512");
        assert_eq!(eval_str("7 // 2"), "3");
        assert_eq!(eval_str("7 % 2"), "1");
        assert_eq!(eval_str("1 / 2"), "0.5");
    }

    #[test]
    fn test_unary() {
        assert_eq!(eval_str("-3 + 1"), "-2");
        assert_eq!(eval_str("not true"), "false");
        assert_eq!(eval_str("not not 1"), "true");
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval_str("1 < 2 and 2 <= 2"), "true");
        assert_eq!(eval_str("1 == 1.0"), "true");
        assert_eq!(eval_str("'a' != 'b' or false"), "true");
    }

    #[test]
    fn test_in_operator() {
        assert_eq!(eval_str("2 in [1, 2, 3]"), "true");
        assert_eq!(eval_str("5 not in [1, 2, 3]"), "true");
        assert_eq!(eval_str("'el' in 'hello'"), "true");
    }

    #[test]
    fn test_concat() {
        assert_eq!(eval_str("'a' ~ 1 ~ 'b'"), "a1b");
    }

    #[test]
    fn test_conditional_expression() {
        assert_eq!(eval_str("'yes' if 1 < 2 else 'no'"), "yes");
        assert_eq!(eval_str("'yes' if 1 > 2 else 'no'"), "no");
    }

    #[test]
    fn test_variable_and_field() {
        let mut globals = Scope::new();
        let mut user = std::collections::BTreeMap::new();
        user.insert("name".to_string(), Value::from("Bob"));
        globals.insert("user".to_string(), Value::map(user));
        let mut ctx = RenderContext::new(globals, None);
        assert_eq!(eval_with("user.name", &mut ctx).to_output_string(), "Bob");
        assert_eq!(
            eval_with("user['name']", &mut ctx).to_output_string(),
            "Bob"
        );
    }

    #[test]
    fn test_undefined_variable_is_empty() {
        assert!(eval("missing").is_empty_value());
        assert_eq!(eval_str("missing is undefined"), "true");
    }

    #[test]
    fn test_subscript_list() {
        let mut globals = Scope::new();
        globals.insert("xs".to_string(), vec![10i64, 20, 30].into());
        let mut ctx = RenderContext::new(globals, None);
        assert_eq!(eval_with("xs[1]", &mut ctx).to_output_string(), "20");
    }

    #[test]
    fn test_filters() {
        assert_eq!(eval_str("'hello' | upper"), "HELLO");
        assert_eq!(eval_str("'WORLD' | lower | capitalize"), "World");
        assert_eq!(eval_str("'  x  ' | trim"), "x");
        assert_eq!(eval_str("[1, 2, 3] | length"), "3");
        assert_eq!(eval_str("[1, 2, 3] | first"), "1");
        assert_eq!(eval_str("[1, 2, 3] | last"), "3");
        assert_eq!(eval_str("['a', 'b'] | join(', ')"), "a, b");
        assert_eq!(eval_str("missing | default('fallback')"), "fallback");
        assert_eq!(eval_str("'set' | default('fallback')"), "set");
    }

    #[test]
    fn test_tests() {
        assert_eq!(eval_str("4 is even"), "true");
        assert_eq!(eval_str("4 is not odd"), "true");
        assert_eq!(eval_str("'x' is string"), "true");
        assert_eq!(eval_str("1.5 is number"), "true");
        assert_eq!(eval_str("[1] is sequence"), "true");
        assert_eq!(eval_str("{'a': 1} is mapping"), "true");
    }

    #[test]
    fn test_list_and_dict_literals() {
        assert_eq!(eval_str("[1, 'two', 3]"), "[1, two, 3]");
        assert_eq!(eval_str("{'a': 1, 'b': 2}"), "{a: 1, b: 2}");
    }

    #[test]
    fn test_error_on_stray_paren() {
        let tokens = Lexer::tokenize(")", CharRange::new(0, 1)).unwrap();
        let mut scanner = LexScanner::new(tokens);
        let err = ExpressionParser::parse(&mut scanner).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedToken);
        assert_eq!(err.error_token.kind.display(), ")");
    }

    #[test]
    fn test_error_on_empty_block() {
        let tokens = Lexer::tokenize("", CharRange::new(0, 0)).unwrap();
        let mut scanner = LexScanner::new(tokens);
        let err = ExpressionParser::parse(&mut scanner).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedToken);
        assert_eq!(err.error_token.kind.display(), "<<End of block>>");
    }
}
