//! Template loading and the embedding surface
//!
//! [`Template`] drives the two parsing passes and owns the resulting
//! renderer tree. [`TemplateEnv`] routes template names to loaders by
//! prefix, which is how `{% extends %}` finds its parents.

use crate::context::RenderContext;
use crate::error::{Error, ErrorCode, ErrorInfo, ErrorReporter, ParseError};
use crate::expr::ExpressionParser;
use crate::lexer::{LexScanner, Lexer};
use crate::renderer::{CompositeRenderer, Renderer};
use crate::scanner::{Settings, SourceScanner, TextBlockType};
use crate::statements::{root_stack, FrameKind, StatementsParser};
use crate::value::Value;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Name used for templates loaded from bare source.
pub const DEFAULT_TEMPLATE_NAME: &str = "noname.j2tpl";

/// Resolves a template name to its source text.
pub trait TemplateLoader {
    fn load(&self, name: &str) -> Option<String>;
}

/// A simple in-memory template loader.
#[derive(Default)]
pub struct InMemoryLoader {
    templates: HashMap<String, String>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }
}

impl TemplateLoader for InMemoryLoader {
    fn load(&self, name: &str) -> Option<String> {
        self.templates.get(name).cloned()
    }
}

/// A file-based template loader rooted at a directory.
pub struct FileLoader {
    root: Utf8PathBuf,
}

impl FileLoader {
    pub fn new(root: impl AsRef<Utf8Path>) -> Self {
        Self {
            root: root.as_ref().to_owned(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

impl TemplateLoader for FileLoader {
    fn load(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(name)).ok()
    }
}

#[derive(Clone)]
struct FsHandler {
    prefix: String,
    loader: Rc<dyn TemplateLoader>,
}

/// Template environment: shared settings plus prefix-routed loaders. The
/// first loader whose prefix matches the requested name (with the prefix
/// stripped) wins.
#[derive(Clone, Default)]
pub struct TemplateEnv {
    settings: Settings,
    handlers: Vec<FsHandler>,
}

impl TemplateEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            handlers: Vec::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registers a loader under a name prefix; the empty prefix matches
    /// everything.
    pub fn add_loader(&mut self, prefix: impl Into<String>, loader: impl TemplateLoader + 'static) {
        self.handlers.push(FsHandler {
            prefix: prefix.into(),
            loader: Rc::new(loader),
        });
    }

    /// Loads and parses a template by name.
    pub fn load_template(&self, name: &str) -> Result<Rc<Template>, Error> {
        for handler in &self.handlers {
            let Some(rest) = name.strip_prefix(&handler.prefix) else {
                continue;
            };
            let Some(source) = handler.loader.load(rest) else {
                continue;
            };
            let template = Template::parse_internal(name, source, self.settings, Some(self.clone()))
                .map_err(|errors| Error::Parse {
                    name: name.to_string(),
                    errors,
                })?;
            return Ok(Rc::new(template));
        }
        Err(Error::TemplateNotFound(name.to_string()))
    }

    /// Loads a template and renders it with the given values.
    pub fn render<I, K, V>(&self, name: &str, values: I) -> Result<String, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Ok(self.load_template(name)?.render_with(values))
    }
}

/// A compiled template: the renderer tree plus everything needed to render
/// and to locate errors. Trees are read-only once loaded.
pub struct Template {
    name: String,
    root: CompositeRenderer,
    env: Option<TemplateEnv>,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template").field("name", &self.name).finish()
    }
}

impl Template {
    /// Parses bare source under the default name and settings.
    pub fn load(source: impl Into<String>) -> Result<Self, Vec<ErrorInfo>> {
        Self::parse_internal(DEFAULT_TEMPLATE_NAME, source, Settings::default(), None)
    }

    /// Parses named source with explicit settings.
    pub fn load_named(
        name: impl Into<String>,
        source: impl Into<String>,
        settings: Settings,
    ) -> Result<Self, Vec<ErrorInfo>> {
        Self::parse_internal(name, source, settings, None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn parse_internal(
        name: impl Into<String>,
        source: impl Into<String>,
        settings: Settings,
        env: Option<TemplateEnv>,
    ) -> Result<Self, Vec<ErrorInfo>> {
        let name = name.into();
        let source = source.into();

        let scan = SourceScanner::scan(&source, settings);
        let reporter = ErrorReporter::new(&source, &name, &scan.lines);
        if !scan.errors.is_empty() {
            return Err(reporter.error_infos(&scan.errors));
        }

        let mut errors: Vec<ParseError> = Vec::new();
        let mut stack = root_stack();
        let mut prev_kind: Option<TextBlockType> = None;

        for block in &scan.blocks {
            let mut range = block.range;
            if block.kind == TextBlockType::LineStatement {
                range.start += 1;
            }
            match block.kind {
                TextBlockType::RawText => {
                    let mut start = range.start;
                    // A statement, comment or line statement eats the
                    // newline that immediately follows it.
                    if start < range.end
                        && source.as_bytes()[start] == b'\n'
                        && matches!(
                            prev_kind,
                            Some(
                                TextBlockType::Statement
                                    | TextBlockType::Comment
                                    | TextBlockType::LineStatement
                            )
                        )
                    {
                        start += 1;
                    }
                    if start < range.end {
                        stack
                            .last_mut()
                            .unwrap()
                            .current()
                            .push(Renderer::RawText(source[start..range.end].to_string()));
                    }
                }
                TextBlockType::Expression => {
                    let parsed = Lexer::tokenize(&source, range)
                        .and_then(|tokens| ExpressionParser::parse(&mut LexScanner::new(tokens)));
                    match parsed {
                        Ok(expr) => stack
                            .last_mut()
                            .unwrap()
                            .current()
                            .push(Renderer::Expression(expr)),
                        Err(error) => errors.push(error),
                    }
                }
                TextBlockType::Statement | TextBlockType::LineStatement => {
                    match Lexer::tokenize(&source, range) {
                        Ok(tokens) => {
                            let mut scanner = LexScanner::new(tokens);
                            if let Err(error) = StatementsParser::parse(&mut scanner, &mut stack) {
                                errors.push(error);
                            }
                        }
                        Err(error) => errors.push(error),
                    }
                }
                TextBlockType::Comment => {}
            }
            prev_kind = Some(block.kind);
        }

        // Openers left unclosed at the end of the template; extends frames
        // stay open by design.
        for frame in stack.iter().skip(1) {
            if !matches!(frame.kind, FrameKind::Extends { .. }) {
                errors.push(ParseError::new(
                    ErrorCode::MismatchedBlock,
                    frame.token.clone(),
                ));
            }
        }

        if !errors.is_empty() {
            return Err(reporter.error_infos(&errors));
        }

        let root = stack
            .into_iter()
            .next()
            .unwrap()
            .compositions
            .into_iter()
            .next()
            .unwrap();
        tracing::debug!(template = %name, blocks = scan.blocks.len(), "parsed template");
        Ok(Template { name, root, env })
    }

    /// Renders with an iterator of name/value pairs.
    pub fn render_with<I, K, V>(&self, values: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut globals = crate::context::Scope::new();
        for (name, value) in values {
            globals.insert(name.into(), value.into());
        }
        self.render(globals)
    }

    /// Renders against the given global values. Rendering never fails;
    /// unresolved names and failed conversions fall back silently.
    pub fn render(&self, globals: crate::context::Scope) -> String {
        let mut out = String::new();
        let mut ctx = RenderContext::new(globals, self.env.clone());
        ctx.with_global(|g| {
            g.entry("self".to_string())
                .or_insert_with(|| Value::map(BTreeMap::new()));
        });
        ctx.enter_scope();
        self.root.render(&mut out, &mut ctx);
        ctx.exit_scope();
        debug_assert_eq!(ctx.scope_depth(), 0);
        out
    }

    /// Renders the root composite into an existing context; used when a
    /// parent template takes over rendering from a child.
    pub(crate) fn render_root(&self, out: &mut String, ctx: &mut RenderContext) {
        self.root.render(out, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Scope;

    fn render(source: &str) -> String {
        Template::load(source).unwrap().render(Scope::new())
    }

    fn render_vars(source: &str, vars: Vec<(&str, Value)>) -> String {
        Template::load(source).unwrap().render_with(vars)
    }

    fn first_error(source: &str) -> String {
        let errors = Template::load(source).unwrap_err();
        errors[0].to_string()
    }

    fn env_of(templates: Vec<(&str, &str)>) -> TemplateEnv {
        let mut loader = InMemoryLoader::new();
        for (name, source) in templates {
            loader.add(name, source);
        }
        let mut env = TemplateEnv::new();
        env.add_loader("", loader);
        env
    }

    #[test]
    fn test_raw_text_only() {
        assert_eq!(render("Hello"), "Hello");
    }

    #[test]
    fn test_empty_template() {
        assert_eq!(render(""), "");
    }

    #[test]
    fn test_raw_text_round_trip() {
        let source = "line one\n  line two\nsome } and { and % text\n";
        assert_eq!(render(source), source);
    }

    #[test]
    fn test_simple_expression() {
        assert_eq!(render_vars("{{ x }}", vec![("x", "world".into())]), "world");
    }

    #[test]
    fn test_expression_with_whitespace_markers() {
        assert_eq!(render_vars("a {{- x -}} b", vec![("x", "1".into())]), "a1b");
    }

    #[test]
    fn test_comment_renders_nothing() {
        assert_eq!(render("a{# hidden #}b"), "ab");
    }

    #[test]
    fn test_if_else_chain() {
        let tpl = "{% if x == 1 %}one{% elif x == 2 %}two{% else %}many{% endif %}";
        assert_eq!(render_vars(tpl, vec![("x", 1.into())]), "one");
        assert_eq!(render_vars(tpl, vec![("x", 2.into())]), "two");
        assert_eq!(render_vars(tpl, vec![("x", 3.into())]), "many");
    }

    #[test]
    fn test_for_loop_with_loop_vars() {
        let tpl = "{% for i in xs %}{{ loop.index }}:{{ i }};{% endfor %}";
        let result = render_vars(tpl, vec![("xs", vec!["a", "b"].into())]);
        assert_eq!(result, "1:a;2:b;");
    }

    #[test]
    fn test_loop_first_last_length() {
        let tpl = "{% for i in xs %}{{ loop.first }},{{ loop.last }},{{ loop.length }};{% endfor %}";
        let result = render_vars(tpl, vec![("xs", vec![1i64, 2].into())]);
        assert_eq!(result, "true,false,2;false,true,2;");
    }

    #[test]
    fn test_loop_prev_next_items() {
        let tpl = "{% for i in xs %}[{{ loop.previtem }}<{{ i }}>{{ loop.nextitem }}]{% endfor %}";
        let result = render_vars(tpl, vec![("xs", vec![1i64, 2, 3].into())]);
        assert_eq!(result, "[<1>2][1<2>3][2<3>]");
    }

    #[test]
    fn test_for_else_on_empty() {
        let tpl = "{% for i in xs %}{{ i }}{% else %}none{% endfor %}";
        assert_eq!(render_vars(tpl, vec![("xs", Vec::<i64>::new().into())]), "none");
    }

    #[test]
    fn test_for_else_on_non_iterable() {
        let tpl = "{% for i in xs %}{{ i }}{% else %}none{% endfor %}";
        assert_eq!(render_vars(tpl, vec![("xs", 42.into())]), "none");
    }

    #[test]
    fn test_for_with_filter_clause() {
        let tpl = "{% for i in xs if i % 2 == 0 %}{{ i }},{% endfor %}";
        let result = render_vars(tpl, vec![("xs", vec![1i64, 2, 3, 4].into())]);
        assert_eq!(result, "2,4,");
    }

    #[test]
    fn test_for_filter_feeds_loop_length() {
        let tpl = "{% for i in xs if i > 1 %}{{ loop.length }}{% endfor %}";
        let result = render_vars(tpl, vec![("xs", vec![1i64, 2, 3].into())]);
        assert_eq!(result, "22");
    }

    #[test]
    fn test_for_multi_var_subscripts_by_name() {
        let mut item = BTreeMap::new();
        item.insert("k".to_string(), Value::from("a"));
        item.insert("v".to_string(), Value::from(1));
        let tpl = "{% for k, v in xs %}{{ k }}={{ v }};{% endfor %}";
        let result = render_vars(tpl, vec![("xs", Value::list(vec![Value::map(item)]))]);
        assert_eq!(result, "a=1;");
    }

    #[test]
    fn test_for_recursive() {
        let mut leaf = BTreeMap::new();
        leaf.insert("name".to_string(), Value::from("b"));
        leaf.insert("children".to_string(), Value::list(vec![]));
        let mut root = BTreeMap::new();
        root.insert("name".to_string(), Value::from("a"));
        root.insert("children".to_string(), Value::list(vec![Value::map(leaf)]));
        let tpl =
            "{% for n in tree recursive %}<{{ n.name }}>{{ loop(n.children) }}{% endfor %}";
        let result = render_vars(tpl, vec![("tree", Value::list(vec![Value::map(root)]))]);
        assert_eq!(result, "<a><b>");
    }

    #[test]
    fn test_set_expression() {
        assert_eq!(render("{% set x = 1 + 2 %}{{ x }}"), "3");
    }

    #[test]
    fn test_set_multi_target() {
        let tpl = "{% set a, b = pair %}{{ a }}/{{ b }}";
        let mut pair = BTreeMap::new();
        pair.insert("a".to_string(), Value::from(1));
        pair.insert("b".to_string(), Value::from(2));
        assert_eq!(render_vars(tpl, vec![("pair", Value::map(pair))]), "1/2");
    }

    #[test]
    fn test_set_multi_target_missing_subscript_is_empty() {
        let tpl = "{% set a, b = pair %}[{{ a }}][{{ b }}]";
        let mut pair = BTreeMap::new();
        pair.insert("a".to_string(), Value::from(1));
        assert_eq!(render_vars(tpl, vec![("pair", Value::map(pair))]), "[1][]");
    }

    #[test]
    fn test_set_block_form() {
        let tpl = "{% set greeting %}Hello, {{ who }}!{% endset %}{{ greeting }}{{ greeting }}";
        let result = render_vars(tpl, vec![("who", "World".into())]);
        assert_eq!(result, "Hello, World!Hello, World!");
    }

    #[test]
    fn test_macro_simple() {
        let tpl = r#"{% macro greet(name) %}Hello, {{ name }}!{% endmacro %}{{ greet("World") }}"#;
        assert_eq!(render(tpl), "Hello, World!");
    }

    #[test]
    fn test_macro_default_and_kwargs() {
        let tpl = r#"{% macro greet(name="Guest") %}Hi {{ name }}.{% endmacro %}{{ greet() }}{{ greet(name="Ana") }}"#;
        assert_eq!(render(tpl), "Hi Guest.Hi Ana.");
    }

    #[test]
    fn test_macro_scope_keys() {
        let tpl = r#"{% macro m(a) %}{{ name }}:{{ arguments }}:{{ varargs }}:{{ kwargs.x }}{% endmacro %}{{ m(1, 2, x=3) }}"#;
        assert_eq!(render(tpl), "m:[a]:[2]:3");
    }

    #[test]
    fn test_macro_does_not_leak_params() {
        let tpl = r#"{% macro m(a) %}{{ a }}{% endmacro %}{{ m(1) }}{{ a }}"#;
        assert_eq!(render(tpl), "1");
    }

    #[test]
    fn test_call_statement_binds_caller() {
        let tpl = concat!(
            r#"{% macro wrap() %}<{{ caller() }}>{% endmacro %}"#,
            r#"{% call wrap() %}body{% endcall %}"#
        );
        assert_eq!(render(tpl), "<body>");
    }

    #[test]
    fn test_call_with_parameters() {
        let tpl = concat!(
            r#"{% macro each(xs) %}{% for x in xs %}{{ caller(x) }}{% endfor %}{% endmacro %}"#,
            r#"{% call (item) each(items) %}[{{ item }}]{% endcall %}"#
        );
        let result = Template::load(tpl)
            .unwrap()
            .render_with(vec![("items", Value::from(vec![1i64, 2]))]);
        assert_eq!(result, "[1][2]");
    }

    #[test]
    fn test_call_undefined_macro_is_noop() {
        assert_eq!(render("a{% call missing() %}b{% endcall %}c"), "ac");
    }

    #[test]
    fn test_statement_swallows_following_newline() {
        assert_eq!(render("{% set x = 1 %}\ntext"), "text");
        assert_eq!(render("{# note #}\ntext"), "text");
    }

    #[test]
    fn test_expression_keeps_following_newline() {
        assert_eq!(render("{{ 1 }}\ntext"), "1\ntext");
    }

    #[test]
    fn test_line_statements() {
        let settings = Settings {
            use_line_statements: true,
            ..Settings::default()
        };
        let tpl = Template::load_named(
            DEFAULT_TEMPLATE_NAME,
            "# for i in xs\n{{ i }};\n# endfor",
            settings,
        )
        .unwrap();
        let result = tpl.render_with(vec![("xs", Value::from(vec![1i64, 2]))]);
        assert_eq!(result, "1;\n2;\n");
    }

    #[test]
    fn test_string_literal_with_stmt_end_inside() {
        assert_eq!(render("{{ '%}' }}"), "%}");
    }

    #[test]
    fn test_parse_twice_renders_identically() {
        let source = "{% for i in xs %}{{ i * 2 }}{% endfor %}";
        let a = Template::load(source)
            .unwrap()
            .render_with(vec![("xs", Value::from(vec![1i64, 2]))]);
        let b = Template::load(source)
            .unwrap()
            .render_with(vec![("xs", Value::from(vec![1i64, 2]))]);
        assert_eq!(a, b);
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    #[test]
    fn test_error_empty_expression_block() {
        assert_eq!(
            first_error("{{}}"),
            "noname.j2tpl:1:3: error: Unexpected token: '<<End of block>>'\n{{}}\n--^-------"
        );
    }

    #[test]
    fn test_error_stray_paren() {
        assert_eq!(
            first_error("{{ ) }}"),
            "noname.j2tpl:1:4: error: Unexpected token: ')'\n{{ ) }}\n---^-------"
        );
    }

    #[test]
    fn test_error_empty_statement_block() {
        assert_eq!(
            first_error("{% %}"),
            "noname.j2tpl:1:4: error: Unexpected token: '<<End of block>>'\n{% %}\n---^-------"
        );
    }

    #[test]
    fn test_error_if_without_condition() {
        assert_eq!(
            first_error("{% if %}"),
            "noname.j2tpl:1:7: error: Expected expression, got: '<<End of block>>'\n{% if %}\n   ---^-------"
        );
    }

    #[test]
    fn test_error_stray_endif() {
        assert_eq!(
            first_error("{% endif %}"),
            "noname.j2tpl:1:4: error: Unexpected statement: 'endif'\n{% endif %}\n---^-------"
        );
    }

    #[test]
    fn test_error_indented_if_without_condition() {
        assert_eq!(
            first_error("Hello World!\n    {% if %}"),
            "noname.j2tpl:2:11: error: Expected expression, got: '<<End of block>>'\n    {% if %}\n       ---^-------"
        );
    }

    #[test]
    fn test_error_tab_indented_if_without_condition() {
        assert_eq!(
            first_error("Hello World!\n\t{% if %}"),
            "noname.j2tpl:2:8: error: Expected expression, got: '<<End of block>>'\n\t{% if %}\n\t   ---^-------"
        );
    }

    #[test]
    fn test_error_unterminated_expression() {
        assert_eq!(
            first_error("{{"),
            "noname.j2tpl:1:3: error: Unexpected token: '<<End of block>>'\n{{\n--^-------"
        );
    }

    #[test]
    fn test_error_stray_expr_end() {
        assert_eq!(
            first_error("}}"),
            "noname.j2tpl:1:1: error: Unexpected expression block end\n}}\n^-------"
        );
    }

    #[test]
    fn test_error_unclosed_statement() {
        let errors = Template::load("{% if x %}text").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::MismatchedBlock);
        assert_eq!(errors[0].location.line, 1);
        assert_eq!(errors[0].location.col, 4);
    }

    #[test]
    fn test_errors_are_collected_not_first_only() {
        let errors = Template::load("{{ ) }}...{{ ) }}").unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_unsupported_include() {
        let errors = Template::load("{% include \"x\" %}").unwrap_err();
        assert_eq!(errors[0].code, ErrorCode::YetUnsupported);
        assert!(errors[0]
            .to_string()
            .starts_with("noname.j2tpl:1:4: error: This feature is not supported yet"));
    }

    // ------------------------------------------------------------------
    // Inheritance
    // ------------------------------------------------------------------

    #[test]
    fn test_extends_overrides_block() {
        let env = env_of(vec![
            ("base", "<{% block title %}P{% endblock %}>"),
            ("child", r#"{% extends "base" %}{% block title %}C{% endblock %}"#),
        ]);
        assert_eq!(env.render("child", Scope::new()).unwrap(), "<C>");
    }

    #[test]
    fn test_extends_keeps_default_for_unoverridden_block() {
        let env = env_of(vec![
            (
                "base",
                "[{% block a %}A{% endblock %}][{% block b %}B{% endblock %}]",
            ),
            ("child", r#"{% extends "base" %}{% block a %}X{% endblock %}"#),
        ]);
        assert_eq!(env.render("child", Scope::new()).unwrap(), "[X][B]");
    }

    #[test]
    fn test_block_renders_own_body_standalone() {
        assert_eq!(render("<{% block title %}P{% endblock %}>"), "<P>");
    }

    #[test]
    fn test_super_renders_parent_body() {
        let env = env_of(vec![
            ("base", "<{% block title %}P{% endblock %}>"),
            (
                "child",
                r#"{% extends "base" %}{% block title %}{{ super() }}+C{% endblock %}"#,
            ),
        ]);
        assert_eq!(env.render("child", Scope::new()).unwrap(), "<P+C>");
    }

    #[test]
    fn test_self_block_callable() {
        let env = env_of(vec![
            (
                "base",
                "{% block title %}T{% endblock %}|{{ self.title() }}",
            ),
            ("child", r#"{% extends "base" %}{% block title %}C{% endblock %}"#),
        ]);
        assert_eq!(env.render("child", Scope::new()).unwrap(), "C|C");
    }

    #[test]
    fn test_extends_sees_render_values() {
        let env = env_of(vec![
            ("base", "{% block title %}{% endblock %}"),
            (
                "child",
                r#"{% extends "base" %}{% block title %}{{ page }}{% endblock %}"#,
            ),
        ]);
        let result = env.render("child", vec![("page", "Home")]).unwrap();
        assert_eq!(result, "Home");
    }

    #[test]
    fn test_child_content_outside_blocks_is_dropped() {
        let env = env_of(vec![
            ("base", "A{% block b %}B{% endblock %}C"),
            (
                "child",
                r#"{% extends "base" %}ignored{% block b %}X{% endblock %}ignored"#,
            ),
        ]);
        assert_eq!(env.render("child", Scope::new()).unwrap(), "AXC");
    }

    #[test]
    fn test_two_level_extends_chain() {
        let env = env_of(vec![
            ("base", "<{% block title %}base{% endblock %}>"),
            ("mid", r#"{% extends "base" %}{% block title %}mid{% endblock %}"#),
            ("leaf", r#"{% extends "mid" %}{% block other %}x{% endblock %}"#),
        ]);
        // the nearest extends level in the chain wins
        assert_eq!(env.render("leaf", Scope::new()).unwrap(), "<mid>");
    }

    #[test]
    fn test_missing_parent_renders_nothing() {
        let env = env_of(vec![(
            "child",
            r#"{% extends "nope" %}{% block b %}X{% endblock %}"#,
        )]);
        assert_eq!(env.render("child", Scope::new()).unwrap(), "");
    }

    #[test]
    fn test_scoped_block_sees_parent_scope() {
        let env = env_of(vec![
            (
                "base",
                "{% for i in [1, 2] %}{% block item scoped %}{% endblock %}{% endfor %}",
            ),
            (
                "child",
                r#"{% extends "base" %}{% block item %}[{{ i }}]{% endblock %}"#,
            ),
        ]);
        assert_eq!(env.render("child", Scope::new()).unwrap(), "[1][2]");
    }

    #[test]
    fn test_unscoped_block_does_not_see_loop_var() {
        let env = env_of(vec![
            (
                "base",
                "{% for i in [1, 2] %}{% block item %}{% endblock %}{% endfor %}",
            ),
            (
                "child",
                r#"{% extends "base" %}{% block item %}[{{ i }}]{% endblock %}"#,
            ),
        ]);
        assert_eq!(env.render("child", Scope::new()).unwrap(), "[][]");
    }

    #[test]
    fn test_prefix_routed_loaders() {
        let mut shared = InMemoryLoader::new();
        shared.add("base", "S{% block b %}{% endblock %}");
        let mut local = InMemoryLoader::new();
        local.add("page", r#"{% extends "shared/base" %}{% block b %}L{% endblock %}"#);
        let mut env = TemplateEnv::new();
        env.add_loader("shared/", shared);
        env.add_loader("", local);
        assert_eq!(env.render("page", Scope::new()).unwrap(), "SL");
    }

    #[test]
    fn test_template_not_found() {
        let env = TemplateEnv::new();
        assert!(matches!(
            env.load_template("missing"),
            Err(Error::TemplateNotFound(_))
        ));
    }
}
