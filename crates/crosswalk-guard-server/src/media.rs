//! Capture archival boundary.
//!
//! Classified frames can optionally be kept for future training. Uploads
//! are a fire-and-forget side effect of classification: they run on a
//! detached task and failures only log. Captures arrive as browser data
//! URLs; parsing normalizes the mime type to a file extension and
//! tolerates bare base64 payloads.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;
use uuid::Uuid;

use crosswalk_guard_core::unix_millis;

/// Errors from capture decoding and archival.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CaptureError {
    /// The payload was not valid base64.
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The capture could not be written.
    #[error("capture store unavailable: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded capture ready for classification or archival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCapture {
    /// Raw image bytes
    pub bytes: Vec<u8>,
    /// Normalized mime type
    pub mime: String,
    /// File extension matching the mime type
    pub extension: &'static str,
}

/// Decode a browser data URL (`data:<mime>;base64,<payload>`).
///
/// Payloads without the `data:` envelope are accepted as bare base64 and
/// treated as JPEG, matching what older clients send.
pub fn parse_data_url(data_url: &str) -> Result<DecodedCapture, CaptureError> {
    let (mime, payload) = match data_url.strip_prefix("data:") {
        Some(rest) => match rest.split_once(";base64,") {
            Some((mime, payload)) => (mime, payload),
            None => ("image/jpeg", rest.split_once(',').map_or(rest, |(_, p)| p)),
        },
        None => (
            "image/jpeg",
            data_url.split_once(',').map_or(data_url, |(_, p)| p),
        ),
    };

    let bytes = BASE64.decode(payload)?;
    let (mime, extension) = normalize_mime(mime);
    Ok(DecodedCapture {
        bytes,
        mime: mime.to_owned(),
        extension,
    })
}

fn normalize_mime(mime: &str) -> (&str, &'static str) {
    if mime.contains("/png") {
        (mime, "png")
    } else if mime.contains("/webp") {
        (mime, "webp")
    } else if mime.contains("/gif") {
        (mime, "gif")
    } else {
        ("image/jpeg", "jpg")
    }
}

/// Blob archive for classified captures.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// Persist a capture, returning the stored object name.
    async fn store_capture(
        &self,
        capture: &DecodedCapture,
        is_crosswalk: bool,
    ) -> Result<String, CaptureError>;
}

/// Filesystem-backed capture store.
///
/// Objects are named `<prefix><unix-millis>_<uuid>.<ext>` under the
/// configured root, with positive and negative frames in separate
/// prefixes so they land pre-sorted for training.
pub struct FsCaptureStore {
    root: PathBuf,
    crosswalk_prefix: String,
    no_crosswalk_prefix: String,
}

impl FsCaptureStore {
    /// Create a store rooted at `root` with the default prefixes.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            crosswalk_prefix: "crosswalk/".to_owned(),
            no_crosswalk_prefix: "no_crosswalk/".to_owned(),
        }
    }

    fn object_name(&self, capture: &DecodedCapture, is_crosswalk: bool) -> String {
        let prefix = if is_crosswalk {
            &self.crosswalk_prefix
        } else {
            &self.no_crosswalk_prefix
        };
        format!(
            "{prefix}{}_{}.{}",
            unix_millis(),
            Uuid::new_v4(),
            capture.extension
        )
    }
}

#[async_trait]
impl CaptureStore for FsCaptureStore {
    async fn store_capture(
        &self,
        capture: &DecodedCapture,
        is_crosswalk: bool,
    ) -> Result<String, CaptureError> {
        let name = self.object_name(capture, is_crosswalk);
        let path = self.root.join(&name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &capture.bytes).await?;
        tracing::info!(object = %name, bytes = capture.bytes.len(), "capture archived");
        Ok(name)
    }
}
