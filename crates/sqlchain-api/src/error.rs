use thiserror::Error;

/// Every failure the chain compiler can report.
///
/// Variants carry the template, argument or column name that caused them so a
/// caller can pinpoint the failing step without replaying the chain. The same
/// enum is used by the renderer, the registry and the composer, which lets
/// errors cross crate boundaries without being re-wrapped.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Unknown transform: {name}")]
    UnknownTransform { name: String },

    #[error("Transform template already registered: {name}")]
    DuplicateTemplate { name: String },

    #[error("Transform {template} is missing required argument '{argument}'")]
    MissingArgument { template: String, argument: String },

    #[error("Transform {template} does not accept argument '{argument}'")]
    UnexpectedArgument { template: String, argument: String },

    #[error("Argument '{argument}' of transform {template} must be a {expected}, got {found}")]
    ArgumentShape {
        template: String,
        argument: String,
        expected: String,
        found: String,
    },

    #[error("Transform {template} cannot take both '{first}' and '{second}'")]
    MutuallyExclusiveArguments {
        template: String,
        first: String,
        second: String,
    },

    #[error("Schema unavailable for {dataset}: {reason}")]
    SchemaUnavailable { dataset: String, reason: String },

    #[error("Transform {template} produces column {column} more than once")]
    DuplicateColumn { template: String, column: String },

    #[error("Transform {template} references column {column}, which is not in {dataset}")]
    InvalidColumnReference {
        template: String,
        column: String,
        dataset: String,
    },

    #[error("Syntax error in template {template}: {message}")]
    TemplateSyntax { template: String, message: String },

    #[error("Error evaluating template {template}: {message}")]
    TemplateEvaluation { template: String, message: String },

    #[error("Transform {template} aborted: {message}")]
    TemplateAborted { template: String, message: String },

    #[error("Rendering transform {template} produced no SQL; check its arguments")]
    EmptyRender { template: String },

    #[error("Step alias {alias} is already used earlier in this chain")]
    AliasConflict { alias: String },

    #[error("Step alias '{alias}' is not a valid identifier")]
    InvalidAlias { alias: String },

    #[error("Invalid table name '{name}': {reason}")]
    InvalidTableName { name: String, reason: String },

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Refusing to run SQL containing {keyword} without acknowledge_risk")]
    RiskySql { keyword: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChainError {
    pub fn syntax(template: impl Into<String>, message: impl Into<String>) -> Self {
        ChainError::TemplateSyntax {
            template: template.into(),
            message: message.into(),
        }
    }

    pub fn evaluation(template: impl Into<String>, message: impl Into<String>) -> Self {
        ChainError::TemplateEvaluation {
            template: template.into(),
            message: message.into(),
        }
    }

    pub fn schema_unavailable(dataset: impl Into<String>, reason: impl Into<String>) -> Self {
        ChainError::SchemaUnavailable {
            dataset: dataset.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
