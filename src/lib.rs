//! zingiber - a Jinja2-compatible template engine with rich diagnostics
//!
//! Compiles template text into a tree of renderers and evaluates it against
//! a value context:
//!
//! ```text
//! {{ expr }}                                 - Expression interpolation
//! {% if cond %}...{% elif %}...{% endif %}   - Conditionals
//! {% for x in xs [if cond] %}...{% endfor %} - Loops with `loop` helpers
//! {% set name = expr %}                      - Assignment (and block form)
//! {% block name %}...{% endblock %}          - Overridable blocks
//! {% extends "base" %}                       - Template inheritance
//! {% macro name(args) %}...{% endmacro %}    - Macros
//! {% call name(args) %}...{% endcall %}      - Macro calls with `caller`
//! {# comment #}                              - Comments
//! ```
//!
//! Parsing happens in two passes: a rough scan segments the source into
//! typed blocks and builds the line table, then expression and statement
//! parsers turn each block into renderers. Parse errors carry exact source
//! locations with a caret-underline snippet; render-time misses fall back
//! silently, like Jinja2.
//!
//! # Example
//!
//! ```
//! use zingiber::Template;
//!
//! let tpl = Template::load("Hello, {{ name }}!").unwrap();
//! let output = tpl.render_with([("name", "World")]);
//! assert_eq!(output, "Hello, World!");
//! ```
//!
//! Inheritance goes through a [`TemplateEnv`]:
//!
//! ```
//! use zingiber::{InMemoryLoader, TemplateEnv};
//!
//! let mut loader = InMemoryLoader::new();
//! loader.add("base", "<{% block title %}default{% endblock %}>");
//! loader.add("page", r#"{% extends "base" %}{% block title %}Home{% endblock %}"#);
//!
//! let mut env = TemplateEnv::new();
//! env.add_loader("", loader);
//! let output = env.render("page", [("unused", 0i64)]).unwrap();
//! assert_eq!(output, "<Home>");
//! ```

mod context;
mod error;
pub mod expr;
mod inherit;
pub mod lexer;
mod renderer;
pub mod scanner;
mod statements;
mod template;
mod value;

pub use context::{RenderContext, Scope};
pub use error::{Error, ErrorCode, ErrorInfo, ParseError, SourceLocation};
pub use inherit::BlocksRenderer;
pub use scanner::Settings;
pub use template::{
    FileLoader, InMemoryLoader, Template, TemplateEnv, TemplateLoader, DEFAULT_TEMPLATE_NAME,
};
pub use value::{ArgumentInfo, CallParams, Callable, CallableKind, Value};
