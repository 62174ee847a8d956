//! Renderer tree
//!
//! Parsing composes templates into a tree of renderers; rendering is a
//! synchronous walk writing text into a caller-provided buffer. Rendering
//! never fails: lookups that miss and conversions that don't apply fall back
//! silently, which is what Jinja2 does.

use crate::context::RenderContext;
use crate::expr::Expression;
use crate::inherit::{ExtendsNode, ParentBlockNode};
use crate::value::{
    parse_call_params, ArgumentInfo, CallParams, Callable, CallableKind, Value,
};
use std::collections::BTreeMap;
use std::rc::Rc;

/// A node of the renderer tree.
#[derive(Debug)]
pub enum Renderer {
    RawText(String),
    Expression(Rc<Expression>),
    Composite(CompositeRenderer),
    For(Rc<ForNode>),
    If(IfNode),
    Set(SetNode),
    SetBlock(SetBlockNode),
    Block(Rc<BlockNode>),
    ParentBlock(Rc<ParentBlockNode>),
    Extends(ExtendsNode),
    Macro(Rc<MacroNode>),
    MacroCall(Rc<CallNode>),
}

impl Renderer {
    pub fn render(&self, out: &mut String, ctx: &mut RenderContext) {
        match self {
            Renderer::RawText(text) => out.push_str(text),
            Renderer::Expression(expr) => {
                let value = expr.evaluate(ctx);
                out.push_str(&value.to_output_string());
            }
            Renderer::Composite(composite) => composite.render(out, ctx),
            Renderer::For(node) => ForNode::render(node, out, ctx),
            Renderer::If(node) => node.render(out, ctx),
            Renderer::Set(node) => node.render(ctx),
            Renderer::SetBlock(node) => node.render(ctx),
            Renderer::Block(node) => node.body.render(out, ctx),
            Renderer::ParentBlock(node) => ParentBlockNode::render(node, out, ctx),
            Renderer::Extends(node) => node.render(out, ctx),
            Renderer::Macro(node) => MacroNode::render(node, ctx),
            Renderer::MacroCall(node) => CallNode::render(node, out, ctx),
        }
    }
}

/// An ordered sequence of child renderers.
#[derive(Debug, Default)]
pub struct CompositeRenderer {
    children: Vec<Renderer>,
}

impl CompositeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, renderer: Renderer) {
        self.children.push(renderer);
    }

    pub fn render(&self, out: &mut String, ctx: &mut RenderContext) {
        for child in &self.children {
            child.render(out, ctx);
        }
    }
}

/// `{% for var[, var...] in expr [if cond] [recursive] %}`
#[derive(Debug)]
pub struct ForNode {
    pub vars: Vec<String>,
    pub value: Rc<Expression>,
    pub filter: Option<Rc<Expression>>,
    pub is_recursive: bool,
    pub body: CompositeRenderer,
    pub else_body: Option<CompositeRenderer>,
}

impl ForNode {
    pub fn render(this: &Rc<Self>, out: &mut String, ctx: &mut RenderContext) {
        let loop_val = this.value.evaluate(ctx);
        Self::render_loop(this, loop_val, out, ctx);
    }

    fn render_loop(this: &Rc<Self>, loop_val: Value, out: &mut String, ctx: &mut RenderContext) {
        ctx.enter_scope();

        let loop_map = Rc::new(std::cell::RefCell::new(BTreeMap::new()));
        ctx.set("loop", Value::Map(Rc::clone(&loop_map)));
        if this.is_recursive {
            let node = Rc::clone(this);
            loop_map.borrow_mut().insert(
                "operator()".to_string(),
                Value::Callable(Callable::statement(move |params, out, ctx| {
                    let (parsed, is_succeeded) =
                        parse_call_params(&[ArgumentInfo::required("var")], params);
                    if !is_succeeded {
                        return;
                    }
                    let Some(var) = parsed.args.get("var") else {
                        return;
                    };
                    let value = var.evaluate(ctx);
                    ForNode::render_loop(&node, value, out, ctx);
                })),
            );
        }

        let items: Vec<Value> = match &loop_val {
            Value::List(list) => list.borrow().clone(),
            _ => {
                tracing::trace!(value = loop_val.type_name(), "for target is not a list");
                if let Some(else_body) = &this.else_body {
                    else_body.render(out, ctx);
                }
                ctx.exit_scope();
                return;
            }
        };

        // The filter clause runs once per candidate in a throwaway scope;
        // kept items materialize into a new list before iteration.
        let items = match &this.filter {
            Some(filter) => {
                ctx.enter_scope();
                let mut kept = Vec::new();
                for item in &items {
                    this.bind_vars(ctx, item);
                    if filter.evaluate(ctx).is_truthy() {
                        kept.push(item.clone());
                    }
                }
                ctx.exit_scope();
                kept
            }
            None => items,
        };

        let count = items.len();
        loop_map
            .borrow_mut()
            .insert("length".to_string(), Value::Int(count as i64));

        let mut loop_rendered = false;
        for (idx, item) in items.iter().enumerate() {
            loop_rendered = true;
            {
                let mut map = loop_map.borrow_mut();
                map.insert("index".to_string(), Value::Int(idx as i64 + 1));
                map.insert("index0".to_string(), Value::Int(idx as i64));
                map.insert("first".to_string(), Value::Bool(idx == 0));
                map.insert("last".to_string(), Value::Bool(idx == count - 1));
                if idx != 0 {
                    map.insert("previtem".to_string(), items[idx - 1].clone());
                }
                if idx != count - 1 {
                    map.insert("nextitem".to_string(), items[idx + 1].clone());
                } else {
                    map.remove("nextitem");
                }
            }
            this.bind_vars(ctx, item);
            this.body.render(out, ctx);
        }

        if !loop_rendered {
            if let Some(else_body) = &this.else_body {
                else_body.render(out, ctx);
            }
        }
        ctx.exit_scope();
    }

    /// A single loop variable binds the item itself; multiple variables
    /// subscript the item by each variable name.
    fn bind_vars(&self, ctx: &mut RenderContext, item: &Value) {
        if self.vars.len() > 1 {
            for name in &self.vars {
                ctx.set(name.clone(), item.field(name));
            }
        } else {
            ctx.set(self.vars[0].clone(), item.clone());
        }
    }
}

/// One guarded branch of an `if`/`elif`/`else` chain; `else` has no guard.
#[derive(Debug)]
pub struct IfBranch {
    pub condition: Option<Rc<Expression>>,
    pub body: CompositeRenderer,
}

/// `{% if %}...{% elif %}...{% else %}...{% endif %}`
#[derive(Debug)]
pub struct IfNode {
    pub branches: Vec<IfBranch>,
}

impl IfNode {
    pub fn render(&self, out: &mut String, ctx: &mut RenderContext) {
        for branch in &self.branches {
            let matches = match &branch.condition {
                Some(condition) => condition.evaluate(ctx).is_truthy(),
                None => true,
            };
            if matches {
                branch.body.render(out, ctx);
                return;
            }
        }
    }
}

/// `{% set a[, b...] = expr %}`
#[derive(Debug)]
pub struct SetNode {
    pub fields: Vec<String>,
    pub value: Rc<Expression>,
}

impl SetNode {
    pub fn render(&self, ctx: &mut RenderContext) {
        let value = self.value.evaluate(ctx);
        if self.fields.len() == 1 {
            ctx.set(self.fields[0].clone(), value);
        } else {
            for name in &self.fields {
                ctx.set(name.clone(), value.field(name));
            }
        }
    }
}

/// `{% set name %}...{% endset %}` — renders the body to a string.
#[derive(Debug)]
pub struct SetBlockNode {
    pub fields: Vec<String>,
    pub body: CompositeRenderer,
}

impl SetBlockNode {
    pub fn render(&self, ctx: &mut RenderContext) {
        let mut rendered = String::new();
        self.body.render(&mut rendered, ctx);
        for name in &self.fields {
            ctx.set(name.clone(), Value::String(rendered.clone()));
        }
    }
}

/// A block inside an extends child: its body is the override the parent
/// chain resolves by name.
#[derive(Debug)]
pub struct BlockNode {
    pub name: String,
    pub body: CompositeRenderer,
}

/// A macro's formal parameter.
#[derive(Debug)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<Rc<Expression>>,
}

/// `{% macro name(params) %}...{% endmacro %}`
#[derive(Debug)]
pub struct MacroNode {
    pub name: String,
    pub params: Vec<MacroParam>,
    pub body: CompositeRenderer,
}

impl MacroNode {
    /// Rendering a macro definition binds a statement callable under the
    /// macro's name; parameter defaults are evaluated here, in the scope of
    /// the definition.
    pub fn render(this: &Rc<Self>, ctx: &mut RenderContext) {
        let prepared = prepare_params(&this.params, ctx);
        let node = Rc::clone(this);
        let name = this.name.clone();
        ctx.set(
            this.name.clone(),
            Value::Callable(Callable::statement(move |params, out, ctx| {
                invoke_macro_body(&name, &prepared, &node.body, params, out, ctx);
            })),
        );
    }
}

/// `{% call [(params)] name(args) %}...{% endcall %}`
#[derive(Debug)]
pub struct CallNode {
    pub macro_name: String,
    pub params: Vec<MacroParam>,
    pub call_params: CallParams,
    pub body: CompositeRenderer,
}

impl CallNode {
    pub fn render(this: &Rc<Self>, out: &mut String, ctx: &mut RenderContext) {
        let Some(value) = ctx.find_value(&this.macro_name) else {
            tracing::debug!(name = %this.macro_name, "call target not found");
            return;
        };
        let Value::Callable(callable) = value else {
            return;
        };
        if callable.kind() != CallableKind::Statement {
            return;
        }

        let prepared = prepare_params(&this.params, ctx);
        let node = Rc::clone(this);
        let name = this.macro_name.clone();
        let prev_caller = ctx.remove("caller");
        ctx.set(
            "caller",
            Value::Callable(Callable::statement(move |params, out, ctx| {
                invoke_macro_body(&name, &prepared, &node.body, params, out, ctx);
            })),
        );

        callable.invoke(&this.call_params, out, ctx);

        match prev_caller {
            Some(value) => ctx.set("caller", value),
            None => {
                ctx.remove("caller");
            }
        }
    }
}

fn prepare_params(params: &[MacroParam], ctx: &mut RenderContext) -> Vec<ArgumentInfo> {
    params
        .iter()
        .map(|p| match &p.default {
            Some(expr) => ArgumentInfo::optional(p.name.clone(), expr.evaluate(ctx)),
            None => ArgumentInfo::required(p.name.clone()),
        })
        .collect()
}

/// Shared invocation path for macros and `caller`: matches the call-site
/// arguments, evaluates them in the caller's context, then renders the body
/// in a fresh scope carrying the bound parameters plus `kwargs`, `varargs`,
/// `name`, `arguments` and `defaults`.
fn invoke_macro_body(
    name: &str,
    prepared: &[ArgumentInfo],
    body: &CompositeRenderer,
    params: &CallParams,
    out: &mut String,
    ctx: &mut RenderContext,
) {
    let (parsed, _is_succeeded) = parse_call_params(prepared, params);

    let mut bound = Vec::with_capacity(prepared.len());
    for info in prepared {
        let value = match parsed.args.get(&info.name) {
            Some(expr) => expr.evaluate(ctx),
            None => info.default.clone(),
        };
        bound.push((info.name.clone(), value));
    }
    let mut kwargs = BTreeMap::new();
    for (kw_name, expr) in &parsed.extra_kw_args {
        kwargs.insert(kw_name.clone(), expr.evaluate(ctx));
    }
    let varargs: Vec<Value> = parsed
        .extra_pos_args
        .iter()
        .map(|expr| expr.evaluate(ctx))
        .collect();

    ctx.enter_scope();
    for (bound_name, value) in bound {
        ctx.set(bound_name, value);
    }
    ctx.set("kwargs", Value::map(kwargs));
    ctx.set("varargs", Value::list(varargs));
    ctx.set("name", Value::from(name));
    ctx.set(
        "arguments",
        Value::list(prepared.iter().map(|a| Value::from(a.name.as_str())).collect()),
    );
    ctx.set(
        "defaults",
        Value::list(prepared.iter().map(|a| a.default.clone()).collect()),
    );
    body.render(out, ctx);
    ctx.exit_scope();
}
