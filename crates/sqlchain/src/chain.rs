//! Persistent transform chains.
//!
//! A [`Chain`] is a cheap handle to an immutable [`ChainNode`]. Extending a
//! chain never touches the parent: the new node points at it, so two
//! extensions of the same chain share the common prefix and stay independent.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use sqlchain_api::{
    Arguments, ChainError, DatasetRef, Namespace, Result, Schema, TableName,
};
use template_render::{cleanse_name, render, RenderContext, Rendered, SideDataset, Value};
use tracing::{debug, instrument};

use crate::binding::{bind, BoundArguments};
use crate::composer::QueryComposer;
use crate::registry::{TemplateRegistry, TransformTemplate};
use crate::resolver::SchemaResolver;

pub const DEFAULT_ALIAS_PREFIX: &str = "STEP";

/// Per-step options for [`ChainBuilder::extend_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOptions {
    /// Name of the step's CTE/view; generated when absent.
    pub alias: Option<String>,
    /// Output columns to use instead of whatever the template declares.
    pub output_columns: Option<Schema>,
}

impl StepOptions {
    pub fn alias(alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            ..Self::default()
        }
    }

    pub fn with_output_columns(mut self, columns: Schema) -> Self {
        self.output_columns = Some(columns);
        self
    }
}

/// One applied transform.
#[derive(Debug)]
pub struct Step {
    template: Arc<TransformTemplate>,
    arguments: BoundArguments,
    input: Option<Schema>,
    datasets: IndexMap<String, SideDataset>,
    values: IndexMap<String, Value>,
    fragment: String,
    output: Option<Schema>,
}

impl Step {
    pub fn template(&self) -> &Arc<TransformTemplate> {
        &self.template
    }

    pub fn arguments(&self) -> &BoundArguments {
        &self.arguments
    }

    /// Columns the step read, if they were known.
    pub fn input(&self) -> Option<&Schema> {
        self.input.as_ref()
    }

    /// SQL selecting from the parent step's alias, or from the root table.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn output(&self) -> Option<&Schema> {
        self.output.as_ref()
    }

    /// Render this step again against another source relation.
    ///
    /// Rendering is pure, so the result differs from [`fragment`](Self::fragment)
    /// only where the template prints `source_table`.
    pub fn render_from(&self, source: &str, source_label: &str) -> Result<Rendered> {
        let ctx = RenderContext {
            source,
            source_label,
            input: self.input.as_ref(),
            datasets: &self.datasets,
            arguments: &self.values,
        };
        render(self.template.template(), &ctx)
    }
}

#[derive(Debug)]
enum NodeKind {
    Root(DatasetRef),
    Step { parent: Chain, step: Step },
}

#[derive(Debug)]
pub struct ChainNode {
    depth: usize,
    alias: String,
    kind: NodeKind,
}

/// Handle to the tip of a transform chain.
#[derive(Clone)]
pub struct Chain(Arc<ChainNode>);

impl Chain {
    fn from_node(node: ChainNode) -> Self {
        Chain(Arc::new(node))
    }

    /// Chain consisting of just a base dataset.
    pub fn root(dataset: DatasetRef) -> Self {
        Self::from_node(ChainNode {
            depth: 0,
            alias: dataset.label(),
            kind: NodeKind::Root(dataset),
        })
    }

    /// CTE/view name of this node; for the root, the dataset's label.
    pub fn alias(&self) -> &str {
        &self.0.alias
    }

    /// Number of transforms applied on top of the base dataset.
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn is_root(&self) -> bool {
        matches!(self.0.kind, NodeKind::Root(_))
    }

    pub fn parent(&self) -> Option<&Chain> {
        match &self.0.kind {
            NodeKind::Step { parent, .. } => Some(parent),
            NodeKind::Root(_) => None,
        }
    }

    pub fn step(&self) -> Option<&Step> {
        match &self.0.kind {
            NodeKind::Step { step, .. } => Some(step),
            NodeKind::Root(_) => None,
        }
    }

    /// The base dataset the chain starts from.
    pub fn source(&self) -> &DatasetRef {
        let mut node = self;
        loop {
            match &node.0.kind {
                NodeKind::Root(dataset) => return dataset,
                NodeKind::Step { parent, .. } => node = parent,
            }
        }
    }

    /// Step nodes from the first transform to this one.
    pub fn lineage(&self) -> Vec<Chain> {
        let mut nodes = Vec::with_capacity(self.depth());
        let mut node = Some(self);
        while let Some(current) = node {
            if !current.is_root() {
                nodes.push(current.clone());
            }
            node = current.parent();
        }
        nodes.reverse();
        nodes
    }

    /// Relation text a child step selects from.
    pub(crate) fn relation(&self) -> String {
        match &self.0.kind {
            NodeKind::Root(dataset) => dataset.relation_sql(),
            NodeKind::Step { .. } => self.0.alias.clone(),
        }
    }

    /// Columns known for this node without asking the warehouse.
    pub fn declared_columns(&self) -> Option<&Schema> {
        match &self.0.kind {
            NodeKind::Root(dataset) => dataset.known_columns(),
            NodeKind::Step { step, .. } => step.output(),
        }
    }

    fn has_alias_upstream(&self, alias: &str) -> bool {
        let mut node = Some(self);
        while let Some(current) = node {
            if !current.is_root() && current.alias().eq_ignore_ascii_case(alias) {
                return true;
            }
            node = current.parent();
        }
        false
    }

    /// Whether both handles point at the same node.
    pub fn ptr_eq(&self, other: &Chain) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// This chain as a dataset usable as another chain's argument, e.g. a
    /// join partner. The compiled query is inlined as a subquery.
    pub fn to_dataset(&self, composer: &QueryComposer) -> Result<DatasetRef> {
        let compiled = composer.compile(self)?;
        Ok(DatasetRef::query(
            self.alias(),
            compiled.sql,
            Some(compiled.columns),
        ))
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .lineage()
            .iter()
            .map(|node| node.alias().to_string())
            .collect();
        f.debug_struct("Chain")
            .field("source", &self.source().label())
            .field("steps", &names)
            .finish()
    }
}

/// Turns "apply template X with arguments Y" into new chain nodes.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    registry: Arc<TemplateRegistry>,
    resolver: Arc<SchemaResolver>,
    namespace: Option<Namespace>,
    alias_prefix: String,
}

impl ChainBuilder {
    pub fn new(registry: Arc<TemplateRegistry>, resolver: Arc<SchemaResolver>) -> Self {
        Self {
            registry,
            resolver,
            namespace: None,
            alias_prefix: DEFAULT_ALIAS_PREFIX.to_string(),
        }
    }

    /// Namespace completing partial table names passed as dataset arguments.
    pub fn with_namespace(mut self, namespace: Option<Namespace>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_alias_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.alias_prefix = prefix.into();
        self
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn root(&self, table: TableName) -> Chain {
        Chain::root(DatasetRef::table(table))
    }

    pub fn extend(&self, chain: &Chain, template: &str, args: Arguments) -> Result<Chain> {
        self.extend_with(chain, template, args, StepOptions::default())
    }

    #[instrument(skip(self, chain, args, options), fields(parent = %chain.alias(), depth = chain.depth() + 1))]
    pub fn extend_with(
        &self,
        chain: &Chain,
        template: &str,
        args: Arguments,
        options: StepOptions,
    ) -> Result<Chain> {
        let template = self.registry.lookup(template)?;
        let input = self.input_schema(chain)?;
        let arguments = bind(&template, args, self.namespace.as_ref())?;

        let mut datasets = IndexMap::new();
        for (_, dataset) in arguments.datasets() {
            let columns = self.lenient(self.resolver.columns_of(dataset))?;
            datasets.insert(
                dataset.relation_sql(),
                SideDataset {
                    label: dataset.label(),
                    columns,
                },
            );
        }

        let depth = chain.depth() + 1;
        let alias = self.step_alias(chain, depth, template.name(), options.alias)?;
        let values = arguments.to_values();
        let source = chain.relation();
        let source_label = chain.alias().to_string();

        let mut step = Step {
            template,
            arguments,
            input,
            datasets,
            values,
            fragment: String::new(),
            output: None,
        };
        let rendered = step.render_from(&source, &source_label)?;
        step.fragment = rendered.sql;
        step.output = options.output_columns.or(rendered.output);

        debug!(
            "Applied {} as {} ({} output columns)",
            step.template.name(),
            alias,
            step.output.as_ref().map(Schema::len).unwrap_or(0)
        );

        Ok(Chain::from_node(ChainNode {
            depth,
            alias,
            kind: NodeKind::Step {
                parent: chain.clone(),
                step,
            },
        }))
    }

    fn input_schema(&self, chain: &Chain) -> Result<Option<Schema>> {
        match &chain.0.kind {
            NodeKind::Root(dataset) => self.lenient(self.resolver.columns_of(dataset)),
            NodeKind::Step { step, .. } => Ok(step.output.clone()),
        }
    }

    /// An unavailable schema is only an error once a template asks for it.
    fn lenient(&self, schema: Result<Schema>) -> Result<Option<Schema>> {
        match schema {
            Ok(schema) => Ok(Some(schema)),
            Err(ChainError::SchemaUnavailable { dataset, reason }) => {
                debug!("Columns of {} unavailable: {}", dataset, reason);
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    fn step_alias(
        &self,
        parent: &Chain,
        depth: usize,
        template: &str,
        requested: Option<String>,
    ) -> Result<String> {
        if let Some(alias) = requested {
            if !is_identifier(&alias) {
                return Err(ChainError::InvalidAlias { alias });
            }
            if parent.has_alias_upstream(&alias) {
                return Err(ChainError::AliasConflict { alias });
            }
            return Ok(alias);
        }

        let base = cleanse_name(&format!("{}_{}_{}", self.alias_prefix, depth, template));
        let mut alias = base.clone();
        let mut suffix = 2;
        while parent.has_alias_upstream(&alias) {
            alias = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        Ok(alias)
    }
}

/// Unquoted SQL identifier: a letter or underscore, then letters, digits or underscores.
fn is_identifier(alias: &str) -> bool {
    let mut chars = alias.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
