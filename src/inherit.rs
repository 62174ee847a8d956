//! Template inheritance
//!
//! The extends/block protocol: a child's `{% extends %}` delegates rendering
//! to its parent while publishing its own block table through the
//! `$$__parent_template` scope chain. Parent-side blocks look the chain up,
//! pick the first override, and expose `super` and `self.<name>` while it
//! renders.

use crate::context::{RenderContext, PARENT_TEMPLATE_KEY, SUPER_BLOCK_KEY};
use crate::renderer::{BlockNode, CompositeRenderer};
use crate::template::Template;
use crate::value::{Callable, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

/// A child template's override table: block name to block body.
pub type BlocksMap = HashMap<String, Rc<BlockNode>>;

/// The interface a parent-template reference exposes through the scope.
pub trait BlocksRenderer {
    fn has_block(&self, name: &str) -> bool;
    fn render_block(&self, name: &str, out: &mut String, ctx: &mut RenderContext);
}

/// `{% extends "path" %}`. The blocks table is filled by the statement
/// parser as the child's blocks close.
pub struct ExtendsNode {
    pub path: String,
    /// String-literal form; the identifier form parses but renders nothing.
    pub is_path: bool,
    pub blocks: Rc<RefCell<BlocksMap>>,
}

impl fmt::Debug for ExtendsNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendsNode")
            .field("path", &self.path)
            .field("is_path", &self.is_path)
            .field("blocks", &self.blocks.borrow().keys().cloned().collect::<Vec<_>>())
            .finish()
    }
}

impl ExtendsNode {
    pub fn render(&self, out: &mut String, ctx: &mut RenderContext) {
        if !self.is_path {
            tracing::debug!(template = %self.path, "extends with a dynamic target is not supported");
            return;
        }
        let Some(env) = ctx.env().cloned() else {
            tracing::warn!(template = %self.path, "extends without a template environment");
            return;
        };
        match env.load_template(&self.path) {
            Ok(parent) => {
                let renderer = Rc::new(ParentTemplateRenderer {
                    template: parent,
                    blocks: Rc::clone(&self.blocks),
                });
                ParentTemplateRenderer::render(&renderer, out, ctx);
            }
            Err(error) => {
                tracing::warn!(template = %self.path, %error, "failed to load parent template");
            }
        }
    }
}

/// Wraps a loaded parent template together with the child's override table.
/// Rendering prepends itself to the parent chain and hands control to the
/// parent's renderer tree.
pub struct ParentTemplateRenderer {
    template: Rc<Template>,
    blocks: Rc<RefCell<BlocksMap>>,
}

impl ParentTemplateRenderer {
    pub fn render(this: &Rc<Self>, out: &mut String, ctx: &mut RenderContext) {
        let this_ref: Rc<dyn BlocksRenderer> = Rc::clone(this) as Rc<dyn BlocksRenderer>;
        let mut parents: Vec<Value> = vec![Value::Renderer(this_ref)];
        if let Some(Value::List(previous)) = ctx.find_value(PARENT_TEMPLATE_KEY) {
            parents.extend(previous.borrow().iter().cloned());
        }
        ctx.set(PARENT_TEMPLATE_KEY, Value::list(parents));
        this.template.render_root(out, ctx);
    }
}

impl BlocksRenderer for ParentTemplateRenderer {
    fn has_block(&self, name: &str) -> bool {
        self.blocks.borrow().contains_key(name)
    }

    fn render_block(&self, name: &str, out: &mut String, ctx: &mut RenderContext) {
        let block = self.blocks.borrow().get(name).cloned();
        if let Some(block) = block {
            block.body.render(out, ctx);
        }
    }
}

/// A block in parent role: overridable by any child in the extends chain.
#[derive(Debug)]
pub struct ParentBlockNode {
    pub name: String,
    pub scoped: bool,
    pub required: bool,
    pub body: CompositeRenderer,
}

impl ParentBlockNode {
    pub fn render(this: &Rc<Self>, out: &mut String, ctx: &mut RenderContext) {
        // A template rendering in isolation writes its own blocks directly.
        let Some(Value::List(chain)) = ctx.find_value(PARENT_TEMPLATE_KEY) else {
            this.body.render(out, ctx);
            return;
        };

        let parents: Vec<Rc<dyn BlocksRenderer>> = chain
            .borrow()
            .iter()
            .filter_map(|value| match value {
                Value::Renderer(renderer) => Some(Rc::clone(renderer)),
                _ => None,
            })
            .collect();
        // The first parent in the chain that defines this block wins.
        let chosen = parents.iter().find(|p| p.has_block(&this.name)).cloned();
        let Some(chosen) = chosen else {
            if this.required {
                tracing::warn!(block = %this.name, "required block was not overridden");
            }
            this.body.render(out, ctx);
            return;
        };

        let mut inner = ctx.clone_context(this.scoped);
        inner.enter_scope();
        let this_ref: Rc<dyn BlocksRenderer> = Rc::clone(this) as Rc<dyn BlocksRenderer>;
        inner.set(SUPER_BLOCK_KEY, Value::Renderer(this_ref));
        {
            let node = Rc::clone(this);
            inner.set(
                "super",
                Value::Callable(Callable::statement(move |_params, out, ctx| {
                    node.body.render(out, ctx);
                })),
            );
        }
        if !this.scoped {
            inner.set(PARENT_TEMPLATE_KEY, Value::List(Rc::clone(&chain)));
        }
        chosen.render_block(&this.name, out, &mut inner);
        inner.exit_scope();

        // Make the block reachable as self.<name>() from anywhere in the
        // chain, first definition wins.
        ctx.with_global(|global| {
            let entry = global
                .entry("self".to_string())
                .or_insert_with(|| Value::map(BTreeMap::new()));
            if let Value::Map(map) = entry {
                let mut map = map.borrow_mut();
                if !map.contains_key(&this.name) {
                    let node = Rc::clone(this);
                    map.insert(
                        this.name.clone(),
                        Value::Callable(Callable::statement(move |_params, out, ctx| {
                            ParentBlockNode::render(&node, out, ctx);
                        })),
                    );
                }
            }
        });
    }
}

impl BlocksRenderer for ParentBlockNode {
    fn has_block(&self, name: &str) -> bool {
        name == self.name
    }

    fn render_block(&self, name: &str, out: &mut String, ctx: &mut RenderContext) {
        if name == self.name {
            self.body.render(out, ctx);
        }
    }
}
