//! Resource template rendering
//!
//! Templates use `${...}` placeholders rendered by minijinja:
//! - `${id}` is the generated scenario identifier
//! - `${namespace}` is the namespace the scenario runs in
//! - `$${...}` produces a literal `${...}`
//!
//! Undefined variables are an error rather than an empty string, so a typo
//! in a fixture fails loudly at submission time.

use std::collections::BTreeMap;

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, UndefinedBehavior, Value};
use thiserror::Error;

/// Placeholder for escaped `$${` during preprocessing
const ESCAPED_PLACEHOLDER: &str = "\x00__SHIPCHECK_ESCAPED_DOLLAR_BRACE__\x00";

/// Errors that can occur while rendering a template
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Template syntax or rendering failed (including undefined variables)
    #[error("template render error: {0}")]
    Render(#[from] minijinja::Error),
    /// The renderer could not be configured
    #[error("template syntax configuration error: {0}")]
    Syntax(String),
}

/// Variables available to a resource template
#[derive(Clone, Debug, Default)]
pub struct TemplateContext {
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    /// Context for one scenario resource
    pub fn for_resource(id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::default()
            .with("id", id)
            .with("namespace", namespace)
    }

    /// Add or replace a variable
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    fn to_value(&self) -> Value {
        Value::from_serialize(&self.vars)
    }
}

/// Template renderer with `${...}` variable syntax
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create a renderer with `${...}` variables and strict undefined handling
    pub fn new() -> Result<Self, TemplateError> {
        let syntax = SyntaxConfig::builder()
            .variable_delimiters("${", "}")
            .block_delimiters("{%", "%}")
            .comment_delimiters("{#", "#}")
            .build()
            .map_err(|e| TemplateError::Syntax(e.to_string()))?;

        let mut env = Environment::new();
        env.set_syntax(syntax);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);

        Ok(Self { env })
    }

    /// Render a template string with the given context
    pub fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let preprocessed = template.replace("$${", ESCAPED_PLACEHOLDER);
        let rendered = self.env.render_str(&preprocessed, ctx.to_value())?;
        Ok(rendered.replace(ESCAPED_PLACEHOLDER, "${"))
    }
}
