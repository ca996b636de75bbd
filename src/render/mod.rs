//! Local file renderer: writes the render payload into an output directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::GenerationError;
use crate::service::{FileRenderer, RenderData, RenderOptions, RenderStatus, RenderedFile};

/// Renders into `<out_dir>/<id>.json` and hands back a `file://` URL.
pub struct LocalRenderer {
    out_dir: PathBuf,
}

#[derive(Serialize)]
struct RenderDocument<'a> {
    id: &'a str,
    template_id: &'a str,
    options: &'a RenderOptions,
    data: &'a RenderData,
}

impl LocalRenderer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

#[async_trait]
impl FileRenderer for LocalRenderer {
    async fn render(
        &self,
        template_id: &str,
        data: &RenderData,
        options: &RenderOptions,
    ) -> Result<RenderedFile, GenerationError> {
        let id = Uuid::new_v4().to_string();
        let doc = RenderDocument {
            id: &id,
            template_id,
            options,
            data,
        };
        let body = serde_json::to_vec_pretty(&doc)
            .map_err(|e| GenerationError::new(format!("serialize render payload: {e}")))?;

        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| GenerationError::new(format!("create output dir: {e}")))?;
        let path = self.out_dir.join(format!("{id}.json"));
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| GenerationError::new(format!("write rendered file: {e}")))?;

        let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        debug!(render_id = %id, path = %path.display(), "file rendered");

        Ok(RenderedFile {
            id,
            status: RenderStatus::Completed,
            download_url: Some(format!("file://{}", path.display())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::request::tests::valid_request;

    #[tokio::test]
    async fn writes_payload_and_returns_file_url() {
        let dir = std::env::temp_dir()
            .join("docq-render-test")
            .join(Uuid::new_v4().to_string());
        let renderer = LocalRenderer::new(&dir);
        assert_eq!(renderer.out_dir(), dir.as_path());
        let req = valid_request();
        let data = RenderData {
            company: req.company.clone(),
            project: req.project.clone(),
            expenses: req.expenses.clone(),
            total_expenses: req.expenses.total(),
            narrative: Some("narrative text".into()),
            compliance_report: None,
        };

        let file = renderer
            .render("form-6765", &data, &RenderOptions::default())
            .await
            .unwrap();

        assert_eq!(file.status, RenderStatus::Completed);
        let url = file.download_url.unwrap();
        assert!(url.starts_with("file://"));
        let written =
            std::fs::read_to_string(renderer.out_dir().join(format!("{}.json", file.id))).unwrap();
        assert!(written.contains("narrative text"));
        assert!(written.contains("form-6765"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
