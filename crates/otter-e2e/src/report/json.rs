//! JSON run summary (`summary.json` at the output root)

use std::path::{Path, PathBuf};

use crate::config::OutputFolder;
use crate::error::ReportError;
use crate::report::RunReport;
use crate::results::ResultsTree;

/// File name of the summary inside the output root
pub const SUMMARY_FILE: &str = "summary.json";

/// Write the summary under `root` and return its path
pub async fn write_to(results: &ResultsTree, root: &Path) -> Result<PathBuf, ReportError> {
    let json = RunReport::from_results(results).to_json()?;
    let path = root.join(SUMMARY_FILE);

    tokio::fs::create_dir_all(root)
        .await
        .map_err(|source| ReportError::Io {
            path: root.to_path_buf(),
            source,
        })?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;

    Ok(path)
}

/// Write the summary, or nothing when output is disabled
pub async fn write(results: &ResultsTree, output: &OutputFolder) -> Result<(), ReportError> {
    if let Some(root) = output.path() {
        write_to(results, root).await?;
    }
    Ok(())
}

/// Load a summary written by an earlier run
pub fn load(path: &Path) -> Result<RunReport, ReportError> {
    let content = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}
