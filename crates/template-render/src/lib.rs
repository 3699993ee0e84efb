//! Template renderer for SQL transform templates.
//!
//! Templates are written in a small Jinja-like language and parsed once into
//! an expression tree ([`ast`]). [`render`] walks that tree against the bound
//! arguments and the resolved input schema and returns the SQL fragment plus
//! the output columns the template declared with `output(...)`.
//!
//! Rendering is pure: the same template, arguments and schemas always give
//! the same fragment. Output is buffered, so a failing render never hands
//! back partial SQL.

pub mod ast;
mod helpers;
mod interpreter;
pub mod parser;
pub mod value;

use indexmap::IndexMap;
use sqlchain_api::{ChainError, Result, Schema};
use tracing::debug;

pub use helpers::{cleanse_name, quote_literal};
pub use value::Value;

use ast::{MacroDef, Node};
use interpreter::Evaluator;

/// A parsed template, ready to be rendered any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    name: String,
    source: String,
    body: Vec<Node>,
    macros: IndexMap<String, MacroDef>,
}

impl Template {
    pub fn parse(name: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let source = source.into();
        let parsed = parser::parse_template(&name, &source)?;
        Ok(Self {
            name,
            source,
            body: parsed.nodes,
            macros: parsed.macros,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn body(&self) -> &[Node] {
        &self.body
    }

    pub fn macros(&self) -> &IndexMap<String, MacroDef> {
        &self.macros
    }
}

/// A dataset passed to a template as an argument, e.g. a join partner.
#[derive(Debug, Clone, PartialEq)]
pub struct SideDataset {
    /// Name used in error messages.
    pub label: String,
    pub columns: Option<Schema>,
}

/// Everything a single render can see.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Relation text the fragment selects from; exposed as `source_table`.
    pub source: &'a str,
    pub source_label: &'a str,
    /// Columns of `source`, if known.
    pub input: Option<&'a Schema>,
    /// Side datasets keyed by the relation text their argument renders as.
    pub datasets: &'a IndexMap<String, SideDataset>,
    pub arguments: &'a IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    /// Columns declared through `output`/`output_all`, `None` if none were.
    pub output: Option<Schema>,
}

pub fn render(template: &Template, ctx: &RenderContext<'_>) -> Result<Rendered> {
    let mut evaluator = Evaluator::new(template, ctx);
    let mut buffer = String::new();
    evaluator.exec(template.body(), &mut buffer)?;

    let sql = buffer.trim().to_string();
    if sql.is_empty() {
        return Err(ChainError::EmptyRender {
            template: template.name().to_string(),
        });
    }
    let output = evaluator.output.into_schema();
    debug!(
        template = template.name(),
        sql_len = sql.len(),
        output_columns = output.as_ref().map(Schema::len).unwrap_or(0),
        "Rendered template"
    );
    Ok(Rendered { sql, output })
}
