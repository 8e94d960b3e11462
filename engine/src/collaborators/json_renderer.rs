//! JSON report renderer
//!
//! Writes a report descriptor as pretty JSON into an output directory. Stands
//! in for a document renderer wherever a file artifact is enough.

use async_trait::async_trait;
use sdk::collaborators::{Artifact, ReportRenderer};
use sdk::errors::EngineError;
use sdk::types::ReportDescriptor;
use std::path::PathBuf;
use tracing::info;

pub struct JsonFileRenderer {
    output: PathBuf,
}

impl JsonFileRenderer {
    /// Render into `output`. A path ending in `.json` is used as the file
    /// itself; anything else is treated as a directory.
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    fn target(&self, report: &ReportDescriptor) -> PathBuf {
        if self.output.extension().is_some_and(|e| e == "json") {
            return self.output.clone();
        }
        self.output.join(format!("{}.json", slug(&report.title)))
    }
}

/// Lowercase file-name-safe form of a title
fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "report".to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl ReportRenderer for JsonFileRenderer {
    fn name(&self) -> &str {
        "json_renderer"
    }

    async fn render(&self, report: &ReportDescriptor) -> Result<Artifact, EngineError> {
        let path = self.target(report);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, body).await?;
        info!("Rendered report '{}' to {}", report.title, path.display());

        Ok(Artifact {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "report.json".to_string()),
            media_type: "application/json".to_string(),
            location: path.display().to_string(),
        })
    }
}
