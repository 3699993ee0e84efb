//! dbt project export.
//!
//! Each chain step becomes one model named after its alias. A step reading an
//! earlier step references it with `{{ ref('<alias>') }}`; the first step
//! reads the base table through `{{ source('<schema>', '<table>') }}`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use sqlchain::{Chain, CompiledQuery, DatasetRef, QueryComposer, Schema, Upstream};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct SchemaFile {
    version: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sources: Vec<SourceEntry>,
    models: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
struct SourceEntry {
    name: String,
    database: String,
    tables: Vec<NamedEntry>,
}

#[derive(Debug, Serialize)]
struct NamedEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct ModelEntry {
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    columns: Vec<ModelColumn>,
}

#[derive(Debug, Serialize)]
struct ModelColumn {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_type: Option<String>,
}

fn model_columns(schema: Option<&Schema>) -> Vec<ModelColumn> {
    schema
        .map(|schema| {
            schema
                .iter()
                .map(|c| ModelColumn {
                    name: c.name.clone(),
                    data_type: c.data_type.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Files written by an export.
#[derive(Debug, Clone, PartialEq)]
pub struct DbtExport {
    /// Model files, upstream first.
    pub models: Vec<PathBuf>,
    pub schema_file: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct DbtExporter {
    config: IndexMap<String, String>,
}

impl DbtExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry to the `{{ config(...) }}` header of every model.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn materialized(self, materialization: impl Into<String>) -> Self {
        self.with_config("materialized", materialization)
    }

    /// Model file content for a `SELECT` body.
    pub fn model_sql(&self, body: &str) -> String {
        if self.config.is_empty() {
            return format!("{}\n", body.trim_end());
        }
        let entries = self
            .config
            .iter()
            .map(|(key, value)| format!("{}='{}'", key, value.replace('\'', "\\'")))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{{ config({}) }}}}\n\n{}\n", entries, body.trim_end())
    }

    /// One model per step plus `schema.yml`.
    pub fn export_chain(
        &self,
        composer: &QueryComposer,
        chain: &Chain,
        dir: &Path,
    ) -> Result<DbtExport> {
        let steps = composer
            .render_steps(chain, |upstream| match upstream {
                Upstream::Source(DatasetRef::Table { name, .. }) => {
                    format!("{{{{ source('{}', '{}') }}}}", name.schema, name.table)
                }
                Upstream::Source(dataset) => dataset.relation_sql(),
                Upstream::Step(alias) => format!("{{{{ ref('{}') }}}}", alias),
            })
            .with_context(|| format!("Failed to render steps of {}", chain.alias()))?;
        if steps.is_empty() {
            anyhow::bail!(
                "Chain {} has no transforms; nothing to export as dbt models",
                chain.alias()
            );
        }

        create_dir(dir)?;
        let mut models = Vec::with_capacity(steps.len());
        let mut entries = Vec::with_capacity(steps.len());
        let tip = steps.len() - 1;
        for (index, step) in steps.iter().enumerate() {
            let path = dir.join(format!("{}.sql", step.alias));
            write_file(&path, &self.model_sql(&step.sql))?;
            debug!("Wrote dbt model {}", path.display());
            models.push(path);

            let columns = if index == tip {
                model_columns(step.columns.as_ref())
            } else {
                Vec::new()
            };
            entries.push(ModelEntry {
                name: step.alias.clone(),
                description: format!("{} step", step.template),
                columns,
            });
        }

        let sources = match chain.source() {
            DatasetRef::Table { name, .. } => vec![SourceEntry {
                name: name.schema.clone(),
                database: name.database.clone(),
                tables: vec![NamedEntry {
                    name: name.table.clone(),
                }],
            }],
            DatasetRef::Query { .. } => Vec::new(),
        };

        let schema_file = self.write_schema(
            dir,
            SchemaFile {
                version: 2,
                sources,
                models: entries,
            },
        )?;
        info!("Exported {} dbt models to {}", models.len(), dir.display());
        Ok(DbtExport {
            models,
            schema_file,
        })
    }

    /// The whole compiled statement as a single model.
    pub fn export_single(
        &self,
        compiled: &CompiledQuery,
        name: &str,
        dir: &Path,
    ) -> Result<DbtExport> {
        create_dir(dir)?;
        let path = dir.join(format!("{}.sql", name));
        write_file(&path, &self.model_sql(&compiled.sql))?;

        let schema_file = self.write_schema(
            dir,
            SchemaFile {
                version: 2,
                sources: Vec::new(),
                models: vec![ModelEntry {
                    name: name.to_string(),
                    description: String::new(),
                    columns: model_columns(Some(&compiled.columns)),
                }],
            },
        )?;
        info!("Exported dbt model {} to {}", name, dir.display());
        Ok(DbtExport {
            models: vec![path],
            schema_file,
        })
    }

    fn write_schema(&self, dir: &Path, schema: SchemaFile) -> Result<PathBuf> {
        let yaml = serde_yaml::to_string(&schema).context("Failed to serialize schema.yml")?;
        let path = dir.join("schema.yml");
        write_file(&path, &yaml)?;
        Ok(path)
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
