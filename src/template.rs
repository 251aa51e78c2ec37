use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::{SubscriberId, SubscriberName};

#[derive(thiserror::Error, Debug)]
pub enum TemplateError {
    #[error("Failed to read template {path:?}.")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to render template {path:?}.")]
    Render {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },
}

/// Values available to the template as `first_name`, `last_name` and `url`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TemplateData {
    pub first_name: String,
    pub last_name: String,
    pub url: String,
}

/// Fills the HTML template on disk. The file is read and parsed again on
/// every call.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    template_path: PathBuf,
    tracking_base: String,
}

impl TemplateRenderer {
    pub fn new(template_path: impl Into<PathBuf>, public_host: &str, public_port: u16) -> Self {
        Self {
            template_path: template_path.into(),
            tracking_base: format!("{}:{}", public_host.trim_end_matches('/'), public_port),
        }
    }

    pub fn tracking_url(&self, id: &SubscriberId) -> String {
        format!("{}/{}", self.tracking_base, id)
    }

    pub async fn render_for(
        &self,
        first_name: &SubscriberName,
        last_name: &SubscriberName,
        id: &SubscriberId,
    ) -> Result<Vec<u8>, TemplateError> {
        let data = TemplateData {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            url: self.tracking_url(id),
        };
        render(&self.template_path, &data).await
    }
}

#[tracing::instrument(name = "Render template", skip(data), fields(url = %data.url))]
pub async fn render(path: &Path, data: &TemplateData) -> Result<Vec<u8>, TemplateError> {
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let render_error = |source| TemplateError::Render {
        path: path.to_path_buf(),
        source,
    };
    let context = tera::Context::from_serialize(data).map_err(render_error)?;
    let html = tera::Tera::one_off(&source, &context, true).map_err(render_error)?;
    Ok(html.into_bytes())
}
