//! Pipeline files: a base table and the transforms to apply to it.
//!
//! ```yaml
//! source: DB.PUBLIC.SALES
//! datasets:
//!   customers:
//!     source: DB.PUBLIC.CUSTOMERS
//!     steps:
//!       - transform: filter
//!         args: { filters: ["NAME IS NOT NULL"] }
//! steps:
//!   - transform: join
//!     args:
//!       join_table: "@customers"
//!       join_columns: { CUSTOMER_ID: CUSTOMER_ID }
//!   - transform: apply
//!     alias: TOTALS
//!     output_columns: [REGION, TOTAL]
//!     args:
//!       sql: SELECT REGION, SUM(AMOUNT) AS TOTAL FROM {{ source_table }} GROUP BY REGION
//! ```
//!
//! A string argument starting with `@` names one of the pipeline's
//! `datasets`, which is compiled and passed as a subquery.

use std::path::Path;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use sqlchain::{ArgValue, Arguments, Chain, Column, DatasetRef, Schema, Session, StepOptions};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    Name(String),
    Column(Column),
}

impl From<ColumnSpec> for Column {
    fn from(spec: ColumnSpec) -> Self {
        match spec {
            ColumnSpec::Name(name) => Column::new(name),
            ColumnSpec::Column(column) => column,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepSpec {
    pub transform: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub args: Arguments,
    #[serde(default)]
    pub output_columns: Option<Vec<ColumnSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    pub source: String,
    #[serde(default)]
    pub datasets: IndexMap<String, Pipeline>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl Pipeline {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse pipeline YAML")
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid pipeline file {}", path.display()))
    }

    /// Apply every step in order and return the tip.
    pub fn build(&self, session: &Session) -> Result<Chain> {
        let mut partners: IndexMap<String, DatasetRef> = IndexMap::new();
        for (name, pipeline) in &self.datasets {
            let chain = pipeline
                .build(session)
                .with_context(|| format!("Failed to build dataset '{}'", name))?;
            partners.insert(name.clone(), session.as_dataset(&chain)?);
        }

        let mut chain = session
            .dataset(&self.source)
            .with_context(|| format!("Invalid source table '{}'", self.source))?;
        for (index, step) in self.steps.iter().enumerate() {
            let args = resolve_dataset_refs(step.args.clone(), &partners)?;
            let options = StepOptions {
                alias: step.alias.clone(),
                output_columns: step
                    .output_columns
                    .clone()
                    .map(|cols| Schema::new(cols.into_iter().map(Column::from).collect())),
            };
            chain = session
                .transform_with(&chain, &step.transform, args, options)
                .with_context(|| format!("Step {} ({}) failed", index + 1, step.transform))?;
        }
        Ok(chain)
    }
}

fn resolve_dataset_refs(args: Arguments, partners: &IndexMap<String, DatasetRef>) -> Result<Arguments> {
    args.into_iter()
        .map(|(name, value)| {
            let reference = value.as_str().and_then(|s| s.strip_prefix('@'));
            match reference {
                Some(key) => match partners.get(key) {
                    Some(dataset) => Ok((name, ArgValue::Dataset(dataset.clone()))),
                    None => bail!("Argument '{}' names unknown dataset '@{}'", name, key),
                },
                None => Ok((name, value)),
            }
        })
        .collect()
}
