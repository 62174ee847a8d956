//! Runtime values
//!
//! The value sum type the renderer tree evaluates to, plus the callable
//! machinery shared by macros, `{% call %}`, `super` and the recursive
//! `loop` helper.

use crate::context::RenderContext;
use crate::expr::Expression;
use crate::inherit::BlocksRenderer;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

/// Shared list storage. Values are cheap to clone; lists and maps clone by
/// handle.
pub type ListRef = Rc<RefCell<Vec<Value>>>;
/// Shared map storage, keyed by string.
pub type MapRef = Rc<RefCell<BTreeMap<String, Value>>>;
/// A renderer reference carried through scopes; only ever used for the
/// parent-template chain and the overridden-block marker.
pub type RendererRef = Rc<dyn BlocksRenderer>;

/// A template runtime value.
#[derive(Clone)]
pub enum Value {
    Empty,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(ListRef),
    Map(MapRef),
    Callable(Callable),
    Renderer(RendererRef),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Value {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn is_empty_value(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Empty => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Double(d) => *d != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            Value::Callable(_) => true,
            Value::Renderer(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Callable(_) => "callable",
            Value::Renderer(_) => "renderer",
        }
    }

    /// Textual form written to the output stream.
    pub fn to_output_string(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::String(s) => s.clone(),
            Value::List(l) => {
                let items: Vec<String> =
                    l.borrow().iter().map(Value::to_output_string).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Map(m) => {
                let entries: Vec<String> = m
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.to_output_string()))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            Value::Callable(_) | Value::Renderer(_) => String::new(),
        }
    }

    /// Subscript by a field name; anything without that member is `Empty`.
    pub fn field(&self, name: &str) -> Value {
        match self {
            Value::Map(m) => m.borrow().get(name).cloned().unwrap_or(Value::Empty),
            _ => Value::Empty,
        }
    }

    /// Subscript by an arbitrary key value.
    pub fn index(&self, key: &Value) -> Value {
        match (self, key) {
            (Value::List(l), Value::Int(i)) => {
                let list = l.borrow();
                if *i >= 0 {
                    list.get(*i as usize).cloned().unwrap_or(Value::Empty)
                } else {
                    Value::Empty
                }
            }
            (Value::Map(_), Value::String(s)) => self.field(s),
            _ => Value::Empty,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "Empty"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Double(d) => write!(f, "Double({d})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(l) => write!(f, "List({:?})", l.borrow()),
            Value::Map(m) => write!(f, "Map({:?})", m.borrow()),
            Value::Callable(c) => write!(f, "Callable({:?})", c.kind()),
            Value::Renderer(_) => write!(f, "Renderer(..)"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

/// Whether a callable may be used from expressions, or only from statement
/// position (`{% call %}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    Expression,
    Statement,
}

type CallableBody = dyn Fn(&CallParams, &mut String, &mut RenderContext);

/// A type-erased invocable bound into a scope: a macro, `caller`, `super`,
/// a block under `self`, or the recursive `loop`.
#[derive(Clone)]
pub struct Callable {
    kind: CallableKind,
    body: Rc<CallableBody>,
}

impl Callable {
    pub fn statement(f: impl Fn(&CallParams, &mut String, &mut RenderContext) + 'static) -> Self {
        Self {
            kind: CallableKind::Statement,
            body: Rc::new(f),
        }
    }

    pub fn expression(f: impl Fn(&CallParams, &mut String, &mut RenderContext) + 'static) -> Self {
        Self {
            kind: CallableKind::Expression,
            body: Rc::new(f),
        }
    }

    pub fn kind(&self) -> CallableKind {
        self.kind
    }

    pub fn invoke(&self, params: &CallParams, out: &mut String, ctx: &mut RenderContext) {
        (self.body)(params, out, ctx)
    }
}

/// Call-site parameters. The callee evaluates the expressions it actually
/// consumes, in the caller's context.
#[derive(Debug, Clone, Default)]
pub struct CallParams {
    pub pos_params: Vec<Rc<Expression>>,
    pub kw_params: Vec<(String, Rc<Expression>)>,
}

/// A formal parameter of a callable, with its pre-evaluated default.
#[derive(Debug, Clone)]
pub struct ArgumentInfo {
    pub name: String,
    pub required: bool,
    pub default: Value,
}

impl ArgumentInfo {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: Value::Empty,
        }
    }

    pub fn optional(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            required: false,
            default,
        }
    }
}

/// Call-site arguments matched against a parameter list.
#[derive(Debug, Default)]
pub struct ParsedArguments {
    pub args: HashMap<String, Rc<Expression>>,
    pub extra_pos_args: Vec<Rc<Expression>>,
    pub extra_kw_args: Vec<(String, Rc<Expression>)>,
}

/// Matches positionals against the declared parameter order first, then
/// keywords. Extra positionals become `varargs`, extra keywords `kwargs`.
/// Returns `false` as the second element when a required parameter stays
/// unmatched or a parameter is given twice.
pub fn parse_call_params(
    args_info: &[ArgumentInfo],
    params: &CallParams,
) -> (ParsedArguments, bool) {
    let mut result = ParsedArguments::default();
    let mut is_succeeded = true;

    for (idx, info) in args_info.iter().enumerate() {
        if let Some(expr) = params.pos_params.get(idx) {
            result.args.insert(info.name.clone(), Rc::clone(expr));
        }
    }
    for expr in params.pos_params.iter().skip(args_info.len()) {
        result.extra_pos_args.push(Rc::clone(expr));
    }

    for (name, expr) in &params.kw_params {
        if args_info.iter().any(|info| info.name == *name) {
            if result.args.insert(name.clone(), Rc::clone(expr)).is_some() {
                is_succeeded = false;
            }
        } else {
            result.extra_kw_args.push((name.clone(), Rc::clone(expr)));
        }
    }

    for info in args_info {
        if info.required && !result.args.contains_key(&info.name) {
            is_succeeded = false;
        }
    }

    (result, is_succeeded)
}
