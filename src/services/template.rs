//! Message rendering on top of minijinja.
//!
//! Templates may use either `{{ name }}` or the single-brace `{name}` form; the
//! latter is rewritten before rendering. Undefined placeholders are an error.

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

/// Matches existing `{{ .. }}` / `{% .. %}` blocks (kept) or a bare `{name}` (rewritten)
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{.*?\}\}|\{%.*?%\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex")
});

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to render template: {0}")]
    Template(#[from] minijinja::Error),
}

/// Named values available to a template
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    values: BTreeMap<String, Value>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Format a currency amount the way messages show it
pub fn format_amount(amount: f64) -> String {
    format!("{:.2}", amount)
}

pub struct MessageRenderer {
    env: Environment<'static>,
}

impl Default for MessageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    pub fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError> {
        let source = normalize_placeholders(template);
        self.env
            .render_str(&source, &context.values)
            .map_err(|e| {
                tracing::debug!(template, error = %e, "Template render failed");
                RenderError::Template(e)
            })
    }
}

/// Rewrite single-brace placeholders into minijinja expressions
pub fn normalize_placeholders(template: &str) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match caps.get(1) {
            Some(name) => format!("{{{{ {} }}}}", name.as_str()),
            None => caps[0].to_string(),
        })
        .into_owned()
}
