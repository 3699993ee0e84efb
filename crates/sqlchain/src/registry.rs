//! Transform template registry.
//!
//! Templates come from a manifest (`templates.yaml`) listing each template's
//! name, description, tags and parameters, plus one `<name>.sql` body per
//! template. The builtin set is compiled into the binary; extra sets can be
//! loaded from directories at startup.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sqlchain_api::{ArgValue, ChainError, Result};
use template_render::Template;
use tracing::{debug, info, warn};

const BUILTIN_MANIFEST: &str = include_str!("../templates/templates.yaml");

fn builtin_body(name: &str) -> Option<&'static str> {
    let body = match name {
        "cast" => include_str!("../templates/cast.sql"),
        "filter" => include_str!("../templates/filter.sql"),
        "drop_columns" => include_str!("../templates/drop_columns.sql"),
        "rename" => include_str!("../templates/rename.sql"),
        "concat" => include_str!("../templates/concat.sql"),
        "datetrunc" => include_str!("../templates/datetrunc.sql"),
        "dateadd" => include_str!("../templates/dateadd.sql"),
        "aggregate" => include_str!("../templates/aggregate.sql"),
        "pivot" => include_str!("../templates/pivot.sql"),
        "join" => include_str!("../templates/join.sql"),
        "order" => include_str!("../templates/order.sql"),
        "apply" => include_str!("../templates/apply.sql"),
        _ => return None,
    };
    Some(body)
}

/// Name injected into every render; templates may not declare it.
pub const SOURCE_TABLE: &str = "source_table";

/// Shape a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamShape {
    Scalar,
    List,
    Mapping,
    Dataset,
    #[default]
    Any,
}

impl ParamShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamShape::Scalar => "scalar",
            ParamShape::List => "list",
            ParamShape::Mapping => "mapping",
            ParamShape::Dataset => "dataset",
            ParamShape::Any => "any",
        }
    }

    /// Whether `value` fits this shape as supplied. Dataset parameters also
    /// take a table name string, which the binder converts.
    pub fn accepts(&self, value: &ArgValue) -> bool {
        match (self, value) {
            (ParamShape::Any, _) => true,
            (ParamShape::Scalar, ArgValue::Scalar(_)) => true,
            (ParamShape::List, ArgValue::List(_)) => true,
            (ParamShape::Mapping, ArgValue::Mapping(_)) => true,
            (ParamShape::Dataset, ArgValue::Dataset(_)) => true,
            (ParamShape::Dataset, ArgValue::Scalar(s)) => s.as_str().is_some(),
            _ => false,
        }
    }
}

impl fmt::Display for ParamShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_required() -> bool {
    true
}

/// One declared template parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub shape: ParamShape,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ArgValue>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Parameter {
    pub fn required(name: impl Into<String>, shape: ParamShape) -> Self {
        Self {
            name: name.into(),
            shape,
            required: true,
            default: None,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, shape: ParamShape, default: Option<ArgValue>) -> Self {
        Self {
            name: name.into(),
            shape,
            required: false,
            default,
            description: String::new(),
        }
    }
}

/// A named, parameterized SQL recipe. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformTemplate {
    name: String,
    description: String,
    tags: Vec<String>,
    parameters: Vec<Parameter>,
    template: Template,
}

impl TransformTemplate {
    pub fn new(name: impl Into<String>, parameters: Vec<Parameter>, body: &str) -> Result<Self> {
        let name = name.into();
        let mut seen = Vec::with_capacity(parameters.len());
        for param in &parameters {
            if param.name == SOURCE_TABLE {
                return Err(ChainError::syntax(
                    &name,
                    format!("parameter name '{}' is reserved", SOURCE_TABLE),
                ));
            }
            if seen.contains(&param.name.as_str()) {
                return Err(ChainError::syntax(
                    &name,
                    format!("parameter '{}' is declared twice", param.name),
                ));
            }
            seen.push(param.name.as_str());
        }
        let template = Template::parse(name.clone(), body)?;
        Ok(Self {
            name,
            description: String::new(),
            tags: Vec::new(),
            parameters,
            template,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn source(&self) -> &str {
        self.template.source()
    }

    /// Human-readable definition: signature, description and body.
    pub fn define(&self) -> String {
        let mut out = format!("Transform: {}\n", self.signature());
        if !self.description.is_empty() {
            out.push_str(&format!("Description: {}\n", self.description));
        }
        if !self.tags.is_empty() {
            out.push_str(&format!("Tags: {}\n", self.tags.join(", ")));
        }
        if !self.parameters.is_empty() {
            out.push_str("Arguments:\n");
            for param in &self.parameters {
                out.push_str(&format!("  {}: {}", param.name, param.shape));
                if !param.required {
                    match &param.default {
                        Some(default) => out.push_str(&format!(
                            " = {}",
                            serde_json::to_string(default).unwrap_or_default()
                        )),
                        None => out.push_str(" (optional)"),
                    }
                }
                if !param.description.is_empty() {
                    out.push_str(&format!("  # {}", param.description));
                }
                out.push('\n');
            }
        }
        out.push_str("Source:\n");
        out.push_str(self.source());
        out
    }

    /// `name(arg: shape, ...)`
    pub fn signature(&self) -> String {
        let args = self
            .parameters
            .iter()
            .map(|p| {
                let optional = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, optional, p.shape)
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, args)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    templates: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    arguments: Vec<Parameter>,
}

/// Name-indexed set of transform templates.
///
/// Built once at startup; afterwards it is shared read-only behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: IndexMap<String, Arc<TransformTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the builtin template library.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        let count = registry.load_manifest(BUILTIN_MANIFEST, |name| {
            builtin_body(name)
                .map(str::to_string)
                .ok_or_else(|| ChainError::Config(format!("no builtin body for template {}", name)))
        })?;
        debug!("Loaded {} builtin templates", count);
        Ok(registry)
    }

    pub fn register(&mut self, template: TransformTemplate) -> Result<()> {
        if self.templates.contains_key(template.name()) {
            return Err(ChainError::DuplicateTemplate {
                name: template.name().to_string(),
            });
        }
        self.templates
            .insert(template.name().to_string(), Arc::new(template));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<TransformTemplate>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| ChainError::UnknownTransform {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TransformTemplate>> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Register every template in a manifest, reading bodies through
    /// `read_body`. Returns the number of templates added.
    pub fn load_manifest<F>(&mut self, manifest: &str, read_body: F) -> Result<usize>
    where
        F: Fn(&str) -> Result<String>,
    {
        let manifest: Manifest = serde_yaml::from_str(manifest)
            .map_err(|e| ChainError::Config(format!("invalid template manifest: {}", e)))?;
        let mut count = 0;
        for entry in manifest.templates {
            let body = read_body(&entry.name)?;
            let template = TransformTemplate::new(entry.name, entry.arguments, &body)?
                .with_description(entry.description)
                .with_tags(entry.tags);
            self.register(template)?;
            count += 1;
        }
        Ok(count)
    }

    /// Load `templates.yaml` and its `<name>.sql` bodies from a directory.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let manifest_path = dir.join("templates.yaml");
        if !manifest_path.exists() {
            warn!("No templates.yaml in template directory {}", dir.display());
            return Ok(0);
        }
        let manifest = std::fs::read_to_string(&manifest_path)?;
        let count = self.load_manifest(&manifest, |name| {
            let path = dir.join(format!("{}.sql", name));
            std::fs::read_to_string(&path).map_err(|e| {
                ChainError::Config(format!("cannot read {}: {}", path.display(), e))
            })
        })?;
        info!("Loaded {} templates from {}", count, dir.display());
        Ok(count)
    }
}
