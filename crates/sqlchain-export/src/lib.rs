//! Sinks for compiled chains: a runnable SQL file, or dbt models.

pub mod dbt;

use std::path::Path;

use anyhow::{Context, Result};
use sqlchain::CompiledQuery;
use tracing::info;

pub use dbt::{DbtExporter, DbtExport};

/// Write the compiled statement as a single runnable file.
pub fn write_sql_file(compiled: &CompiledQuery, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut content = compiled.sql.trim_end().to_string();
    content.push_str(";\n");
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write SQL file {}", path.display()))?;
    info!("Wrote compiled SQL to {}", path.display());
    Ok(())
}
