//! Compile chains of parameterized SQL transform templates into a single
//! warehouse query.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqlchain::{ArgValue, Arguments, ChainConfig, Session, StaticWarehouse};
//!
//! # fn main() -> sqlchain::Result<()> {
//! let warehouse = Arc::new(StaticWarehouse::load_from_file("schemas.yaml")?);
//! let session = Session::new(warehouse, ChainConfig::default())?;
//! let orders = session.dataset("DB.PUBLIC.ORDERS")?;
//! let cast = session.transform(
//!     &orders,
//!     "cast",
//!     Arguments::new().with("casts", ArgValue::mapping([("AMOUNT", "STRING")])),
//! )?;
//! println!("{}", session.compile(&cast)?.sql);
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod chain;
pub mod composer;
pub mod config;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod warehouse;

pub use binding::{bind, BoundArguments};
pub use chain::{Chain, ChainBuilder, Step, StepOptions};
pub use composer::{CompileStyle, CompiledQuery, QueryComposer, StepFragment, TableKind, Upstream};
pub use config::ChainConfig;
pub use registry::{ParamShape, Parameter, TemplateRegistry, TransformTemplate};
pub use resolver::SchemaResolver;
pub use session::{RenderMethod, Session};
pub use warehouse::StaticWarehouse;

pub use sqlchain_api::{
    ArgValue, Arguments, ChainError, Column, DatasetRef, Namespace, Result, ResultTable, Scalar,
    Schema, TableName, WarehouseClient,
};
