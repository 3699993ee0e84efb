//! Query composition: turn a chain into one SQL statement.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlchain_api::{ChainError, DatasetRef, Namespace, Result, Schema, TableName};
use tracing::{debug, instrument};

use crate::chain::Chain;
use crate::resolver::SchemaResolver;

/// How the steps of a chain are stitched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileStyle {
    /// `WITH STEP_1 AS (...), STEP_2 AS (...) SELECT ... FROM STEP_2`
    #[default]
    Cte,
    /// `SELECT ... FROM (SELECT ... FROM (...))`
    Nested,
}

impl std::str::FromStr for CompileStyle {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cte" => Ok(CompileStyle::Cte),
            "nested" => Ok(CompileStyle::Nested),
            other => Err(ChainError::Config(format!(
                "unknown compile style '{}', expected cte or nested",
                other
            ))),
        }
    }
}

/// Kind of object a compiled query is saved as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    #[default]
    View,
    Table,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::View => f.write_str("VIEW"),
            TableKind::Table => f.write_str("TABLE"),
        }
    }
}

/// What a step reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum Upstream {
    /// The chain's base dataset.
    Source(DatasetRef),
    /// An earlier step, by alias.
    Step(String),
}

/// One step of a compiled chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFragment {
    pub alias: String,
    pub template: String,
    /// A complete `SELECT` for this step.
    pub sql: String,
    pub upstream: Upstream,
    pub columns: Option<Schema>,
}

/// Result of compiling a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    /// Columns of the final projection, in order.
    pub columns: Schema,
    pub style: CompileStyle,
    /// Per-step fragments, first transform first.
    pub steps: Vec<StepFragment>,
}

impl CompiledQuery {
    /// `CREATE OR REPLACE <kind> <target> AS` followed by the query.
    pub fn create_statement(&self, kind: TableKind, target: &TableName) -> String {
        format!("CREATE OR REPLACE {} {} AS\n{}", kind, target, self.sql)
    }
}

fn final_select(columns: &Schema, relation: &str) -> String {
    format!("SELECT {}\nFROM {}", columns.names().join(", "), relation)
}

fn subquery(sql: &str) -> String {
    format!("(\n{}\n)", sql)
}

/// Walks a chain from root to tip and emits SQL.
///
/// Compilation is read-only and deterministic: the same chain always yields
/// byte-identical SQL, and every call starts from a fresh set of names.
#[derive(Debug, Clone)]
pub struct QueryComposer {
    resolver: Arc<SchemaResolver>,
    style: CompileStyle,
}

impl QueryComposer {
    pub fn new(resolver: Arc<SchemaResolver>) -> Self {
        Self {
            resolver,
            style: CompileStyle::default(),
        }
    }

    pub fn with_style(mut self, style: CompileStyle) -> Self {
        self.style = style;
        self
    }

    pub fn style(&self) -> CompileStyle {
        self.style
    }

    pub fn compile(&self, chain: &Chain) -> Result<CompiledQuery> {
        self.compile_with(chain, self.style)
    }

    #[instrument(skip(self, chain), fields(tip = %chain.alias(), depth = chain.depth()))]
    pub fn compile_with(&self, chain: &Chain, style: CompileStyle) -> Result<CompiledQuery> {
        let columns = self.output_columns(chain)?;

        if chain.is_root() {
            let sql = final_select(&columns, &chain.source().relation_sql());
            return Ok(CompiledQuery {
                sql,
                columns,
                style,
                steps: Vec::new(),
            });
        }

        let (sql, steps) = match style {
            CompileStyle::Cte => {
                let steps = self.cte_fragments(chain);
                let ctes = steps
                    .iter()
                    .map(|step| format!("{} AS (\n{}\n)", step.alias, step.sql))
                    .collect::<Vec<_>>()
                    .join(",\n");
                let sql = format!("WITH {}\n{}", ctes, final_select(&columns, chain.alias()));
                (sql, steps)
            }
            CompileStyle::Nested => {
                let steps = self.render_steps(chain, |upstream| match upstream {
                    Upstream::Source(dataset) => dataset.relation_sql(),
                    Upstream::Step(_) => String::new(),
                })?;
                let tip = steps.last().map(|s| s.sql.as_str()).unwrap_or_default();
                let sql = final_select(&columns, &subquery(tip));
                (sql, steps)
            }
        };

        debug!(
            "Compiled {} steps into {} bytes of SQL",
            steps.len(),
            sql.len()
        );
        Ok(CompiledQuery {
            sql,
            columns,
            style,
            steps,
        })
    }

    /// Columns the chain's tip produces.
    pub fn output_columns(&self, chain: &Chain) -> Result<Schema> {
        match chain.step() {
            None => self.resolver.columns_of(chain.source()),
            Some(step) => step.output().cloned().ok_or_else(|| {
                ChainError::schema_unavailable(
                    chain.alias(),
                    format!(
                        "transform {} declares no output columns; pass output_columns",
                        step.template().name()
                    ),
                )
            }),
        }
    }

    fn cte_fragments(&self, chain: &Chain) -> Vec<StepFragment> {
        chain
            .lineage()
            .iter()
            .filter_map(|node| {
                let step = node.step()?;
                let upstream = upstream_of(node);
                Some(StepFragment {
                    alias: node.alias().to_string(),
                    template: step.template().name().to_string(),
                    sql: step.fragment().to_string(),
                    upstream,
                    columns: step.output().cloned(),
                })
            })
            .collect()
    }

    /// Re-render every step with its source given by `reference`.
    ///
    /// `reference` maps the upstream of each step to relation text. A step
    /// whose upstream is an earlier step gets that step's nested SQL when the
    /// closure returns an empty string, which is how the nested style is
    /// built; exporters return `ref(...)`-style text instead.
    pub fn render_steps<F>(&self, chain: &Chain, reference: F) -> Result<Vec<StepFragment>>
    where
        F: Fn(&Upstream) -> String,
    {
        let mut fragments: Vec<StepFragment> = Vec::with_capacity(chain.depth());
        for node in chain.lineage() {
            let Some(step) = node.step() else {
                continue;
            };
            let upstream = upstream_of(&node);
            let mut source = reference(&upstream);
            if source.is_empty() {
                source = match fragments.last() {
                    Some(previous) => subquery(&previous.sql),
                    None => chain.source().relation_sql(),
                };
            }
            let label = match &upstream {
                Upstream::Source(dataset) => dataset.label(),
                Upstream::Step(alias) => alias.clone(),
            };
            let rendered = step.render_from(&source, &label)?;
            fragments.push(StepFragment {
                alias: node.alias().to_string(),
                template: step.template().name().to_string(),
                sql: rendered.sql,
                upstream,
                columns: step.output().cloned(),
            });
        }
        Ok(fragments)
    }

    /// One `CREATE OR REPLACE VIEW` per step, each reading the previous view.
    pub fn view_chain(&self, chain: &Chain, namespace: &Namespace) -> Result<String> {
        let steps = self.render_steps(chain, |upstream| match upstream {
            Upstream::Source(dataset) => dataset.relation_sql(),
            Upstream::Step(alias) => namespace.table(alias.clone()).to_string(),
        })?;
        Ok(steps
            .iter()
            .map(|step| {
                format!(
                    "CREATE OR REPLACE VIEW {} AS\n{};",
                    namespace.table(step.alias.clone()),
                    step.sql
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

fn upstream_of(node: &Chain) -> Upstream {
    match node.parent() {
        Some(parent) if !parent.is_root() => Upstream::Step(parent.alias().to_string()),
        _ => Upstream::Source(node.source().clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainBuilder;
    use crate::registry::TemplateRegistry;
    use crate::warehouse::StaticWarehouse;
    use sqlchain_api::{ArgValue, Arguments, Column};

    fn setup() -> (ChainBuilder, QueryComposer, Chain) {
        let table = TableName::new("DB", "PUBLIC", "ORDERS");
        let warehouse = StaticWarehouse::new().with_table(
            table.clone(),
            vec![Column::new("ID"), Column::new("AMOUNT"), Column::new("DATE")],
        );
        let resolver = Arc::new(SchemaResolver::new(Arc::new(warehouse)));
        let builder = ChainBuilder::new(
            Arc::new(TemplateRegistry::builtin().unwrap()),
            resolver.clone(),
        );
        let root = builder.root(table);
        (builder, QueryComposer::new(resolver), root)
    }

    fn two_steps(builder: &ChainBuilder, root: &Chain) -> Chain {
        let first = builder
            .extend(
                root,
                "drop_columns",
                Arguments::new().with("exclude_cols", vec!["DATE"]),
            )
            .unwrap();
        builder
            .extend(
                &first,
                "order",
                Arguments::new().with("order_by", ArgValue::mapping([("AMOUNT", "desc")])),
            )
            .unwrap()
    }

    #[test]
    fn test_root_only_chain_selects_table_columns() {
        let (_, composer, root) = setup();
        let compiled = composer.compile(&root).unwrap();
        assert_eq!(compiled.sql, "SELECT ID, AMOUNT, DATE\nFROM DB.PUBLIC.ORDERS");
        assert!(compiled.steps.is_empty());
    }

    #[test]
    fn test_cte_style() {
        let (builder, composer, root) = setup();
        let chain = two_steps(&builder, &root);
        let compiled = composer.compile(&chain).unwrap();

        let expected = "WITH STEP_1_DROP_COLUMNS AS (\n\
                        SELECT\n  ID,\n  AMOUNT\nFROM DB.PUBLIC.ORDERS\n\
                        ),\n\
                        STEP_2_ORDER AS (\n\
                        SELECT\n  ID,\n  AMOUNT\nFROM STEP_1_DROP_COLUMNS\nORDER BY AMOUNT DESC\n\
                        )\n\
                        SELECT ID, AMOUNT\nFROM STEP_2_ORDER";
        assert_eq!(compiled.sql, expected);
        assert_eq!(compiled.columns.names(), vec!["ID", "AMOUNT"]);
        assert_eq!(compiled.steps.len(), 2);
        assert_eq!(
            compiled.steps[0].upstream,
            Upstream::Source(DatasetRef::table(TableName::new("DB", "PUBLIC", "ORDERS")))
        );
        assert_eq!(
            compiled.steps[1].upstream,
            Upstream::Step("STEP_1_DROP_COLUMNS".to_string())
        );
    }

    #[test]
    fn test_nested_style() {
        let (builder, composer, root) = setup();
        let chain = two_steps(&builder, &root);
        let compiled = composer.compile_with(&chain, CompileStyle::Nested).unwrap();

        let expected = "SELECT ID, AMOUNT\nFROM (\n\
                        SELECT\n  ID,\n  AMOUNT\nFROM (\n\
                        SELECT\n  ID,\n  AMOUNT\nFROM DB.PUBLIC.ORDERS\n\
                        )\nORDER BY AMOUNT DESC\n\
                        )";
        assert_eq!(compiled.sql, expected);
        assert!(!compiled.sql.contains("STEP_1_DROP_COLUMNS"));
    }

    #[test]
    fn test_view_chain() {
        let (builder, composer, root) = setup();
        let chain = two_steps(&builder, &root);
        let views = composer
            .view_chain(&chain, &Namespace::new("DB", "VIEWS"))
            .unwrap();
        assert!(views.starts_with("CREATE OR REPLACE VIEW DB.VIEWS.STEP_1_DROP_COLUMNS AS\nSELECT"));
        assert!(views.contains("FROM DB.VIEWS.STEP_1_DROP_COLUMNS\nORDER BY"));
        assert_eq!(views.matches("CREATE OR REPLACE VIEW").count(), 2);
    }

    #[test]
    fn test_create_statement() {
        let (_, composer, root) = setup();
        let compiled = composer.compile(&root).unwrap();
        let target = TableName::new("DB", "OUT", "ORDERS_COPY");
        assert!(compiled
            .create_statement(TableKind::Table, &target)
            .starts_with("CREATE OR REPLACE TABLE DB.OUT.ORDERS_COPY AS\nSELECT ID"));
    }

    #[test]
    fn test_tip_without_declared_columns_cannot_compile() {
        let (builder, composer, root) = setup();
        let chain = builder
            .extend(
                &root,
                "apply",
                Arguments::new().with("sql", "SELECT COUNT(*) AS N FROM {{ source_table }}"),
            )
            .unwrap();
        assert!(matches!(
            composer.compile(&chain),
            Err(ChainError::SchemaUnavailable { .. })
        ));
    }
}
