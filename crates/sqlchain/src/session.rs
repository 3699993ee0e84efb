//! High-level entry point tying the registry, resolver, builder and composer
//! to one warehouse connection.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlchain_api::{
    Arguments, ChainError, DatasetRef, Namespace, Result, ResultTable, TableName,
    WarehouseClient,
};
use tracing::{info, warn};

use crate::chain::{Chain, ChainBuilder, StepOptions};
use crate::composer::{CompiledQuery, QueryComposer, TableKind};
use crate::config::ChainConfig;
use crate::registry::TemplateRegistry;
use crate::resolver::SchemaResolver;

static RISKY_SQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(DELETE|TRUNCATE|DROP|ALTER|UPDATE|INSERT|MERGE)\b")
        .expect("valid risky sql regex")
});

/// What [`Session::sql`] should produce.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderMethod {
    /// The bare query.
    Select,
    /// `CREATE OR REPLACE TABLE <target> AS ...`
    Table(TableName),
    /// `CREATE OR REPLACE VIEW <target> AS ...`
    View(TableName),
    /// One view per step, each reading the previous one.
    Views,
}

pub struct Session {
    config: ChainConfig,
    client: Arc<dyn WarehouseClient>,
    builder: ChainBuilder,
    composer: QueryComposer,
}

impl Session {
    /// Session over the builtin templates plus every configured template
    /// directory.
    pub fn new(client: Arc<dyn WarehouseClient>, config: ChainConfig) -> Result<Self> {
        let mut registry = TemplateRegistry::builtin()?;
        for dir in &config.template_dirs {
            if registry.load_dir(dir)? == 0 {
                warn!("Template directory {} added no templates", dir.display());
            }
        }
        Ok(Self::with_registry(client, config, registry))
    }

    pub fn with_registry(
        client: Arc<dyn WarehouseClient>,
        config: ChainConfig,
        registry: TemplateRegistry,
    ) -> Self {
        let resolver = Arc::new(SchemaResolver::new(client.clone()));
        let builder = ChainBuilder::new(Arc::new(registry), resolver.clone())
            .with_namespace(config.default_namespace.clone())
            .with_alias_prefix(config.alias_prefix.clone());
        let composer = QueryComposer::new(resolver).with_style(config.compile_style);
        Self {
            config,
            client,
            builder,
            composer,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn builder(&self) -> &ChainBuilder {
        &self.builder
    }

    pub fn composer(&self) -> &QueryComposer {
        &self.composer
    }

    pub fn registry(&self) -> &TemplateRegistry {
        self.builder.registry()
    }

    /// Chain rooted at a warehouse table. One- and two-part names are
    /// completed from `default_namespace`.
    pub fn dataset(&self, name: &str) -> Result<Chain> {
        let table = TableName::parse_with_namespace(name, self.config.default_namespace.as_ref())?;
        Ok(self.builder.root(table))
    }

    pub fn transform(&self, chain: &Chain, name: &str, args: Arguments) -> Result<Chain> {
        self.builder.extend(chain, name, args)
    }

    pub fn transform_with(
        &self,
        chain: &Chain,
        name: &str,
        args: Arguments,
        options: StepOptions,
    ) -> Result<Chain> {
        self.builder.extend_with(chain, name, args, options)
    }

    /// Signatures of every registered transform.
    pub fn list_transforms(&self) -> Vec<String> {
        self.registry().iter().map(|t| t.signature()).collect()
    }

    pub fn define_transform(&self, name: &str) -> Result<String> {
        Ok(self.registry().lookup(name)?.define())
    }

    pub fn compile(&self, chain: &Chain) -> Result<CompiledQuery> {
        self.composer.compile(chain)
    }

    /// A chain usable as a dataset argument of another chain.
    pub fn as_dataset(&self, chain: &Chain) -> Result<DatasetRef> {
        chain.to_dataset(&self.composer)
    }

    pub fn sql(&self, chain: &Chain, method: RenderMethod) -> Result<String> {
        match method {
            RenderMethod::Select => Ok(self.compile(chain)?.sql),
            RenderMethod::Table(target) => {
                Ok(self.compile(chain)?.create_statement(TableKind::Table, &target))
            }
            RenderMethod::View(target) => {
                Ok(self.compile(chain)?.create_statement(TableKind::View, &target))
            }
            RenderMethod::Views => {
                let namespace = self.output_namespace(chain)?;
                self.composer.view_chain(chain, &namespace)
            }
        }
    }

    /// Default save target: the tip's alias in the output namespace.
    pub fn output_table(&self, chain: &Chain) -> Result<TableName> {
        Ok(self.output_namespace(chain)?.table(chain.alias()))
    }

    fn output_namespace(&self, chain: &Chain) -> Result<Namespace> {
        if let Some(namespace) = &self.config.default_namespace {
            return Ok(namespace.clone());
        }
        match chain.source() {
            DatasetRef::Table { name, .. } => Ok(name.namespace()),
            DatasetRef::Query { alias, .. } => Err(ChainError::Config(format!(
                "no default_namespace configured to place the output of {}",
                alias
            ))),
        }
    }

    /// Run the chain with a row limit.
    pub fn preview(&self, chain: &Chain) -> Result<ResultTable> {
        let compiled = self.compile(chain)?;
        let sql = format!("{}\nLIMIT {}", compiled.sql, self.config.preview_limit);
        self.client.execute(&sql)
    }

    /// Materialize the chain and return where it went.
    pub fn save(&self, chain: &Chain, target: Option<TableName>, kind: TableKind) -> Result<TableName> {
        let compiled = self.compile(chain)?;
        let target = match target {
            Some(target) => target,
            None => self.output_table(chain)?,
        };
        match kind {
            TableKind::View => self.client.create_view(&target, &compiled.sql)?,
            TableKind::Table => {
                self.client
                    .execute(&compiled.create_statement(TableKind::Table, &target))?;
            }
        }
        info!("Saved {} as {} {}", chain.alias(), kind, target);
        Ok(target)
    }

    /// Run arbitrary SQL. Data-modifying statements need `acknowledge_risk`.
    pub fn query(&self, sql: &str, acknowledge_risk: bool) -> Result<ResultTable> {
        if !acknowledge_risk {
            if let Some(found) = RISKY_SQL.find(sql) {
                return Err(ChainError::RiskySql {
                    keyword: found.as_str().to_ascii_uppercase(),
                });
            }
        }
        info!("Executing query ({} bytes)", sql.len());
        self.client.execute(sql)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("transforms", &self.registry().len())
            .finish()
    }
}
