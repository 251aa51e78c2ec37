use std::path::Path;
use std::sync::Arc;

/// Transparent 1x1 GIF served when no image is configured.
const TRANSPARENT_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Image returned by the open-tracking endpoint. Loaded once at startup.
#[derive(Debug, Clone)]
pub struct TrackingImage {
    bytes: Arc<[u8]>,
    content_type: &'static str,
}

impl TrackingImage {
    pub fn transparent_gif() -> Self {
        Self {
            bytes: Arc::from(TRANSPARENT_GIF),
            content_type: "image/gif",
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self {
            bytes: Arc::from(bytes),
            content_type: content_type_for(path),
        })
    }

    /// The configured file when there is one, the built-in pixel otherwise.
    pub async fn load(path: Option<&Path>) -> std::io::Result<Self> {
        match path {
            Some(path) => Self::from_path(path).await,
            None => Ok(Self::transparent_gif()),
        }
    }

    pub fn bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/gif",
    }
}
