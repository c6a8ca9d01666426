use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

const FALLBACK_MIME: &str = "application/octet-stream";

/// A screenshot held in memory as a `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    data_uri: String,
}

impl UploadedImage {
    /// Encodes raw file bytes. The MIME type is taken from the declared
    /// content type, then guessed from the file name.
    pub fn from_bytes(bytes: &[u8], content_type: Option<&str>, file_name: Option<&str>) -> Self {
        let mime = resolve_mime(content_type, file_name);
        Self {
            data_uri: format!("data:{};base64,{}", mime, BASE64.encode(bytes)),
        }
    }

    /// Same as [`UploadedImage::from_bytes`] but runs the encoding off the
    /// async executor, screenshots can be several megabytes.
    pub async fn encode(
        bytes: Vec<u8>,
        content_type: Option<String>,
        file_name: Option<String>,
    ) -> Result<Self, tokio::task::JoinError> {
        tokio::task::spawn_blocking(move || {
            Self::from_bytes(&bytes, content_type.as_deref(), file_name.as_deref())
        })
        .await
    }

    #[cfg(test)]
    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }

    /// The base64 payload with the `data:<mime>;base64,` prefix removed.
    pub fn base64_payload(&self) -> &str {
        strip_data_uri_prefix(&self.data_uri)
    }
}

pub fn strip_data_uri_prefix(value: &str) -> &str {
    match value.split_once(',') {
        Some((_, payload)) => payload,
        None => value,
    }
}

fn resolve_mime(content_type: Option<&str>, file_name: Option<&str>) -> String {
    if let Some(ct) = content_type.map(str::trim).filter(|ct| !ct.is_empty()) {
        return ct.to_string();
    }
    file_name
        .and_then(|name| mime_guess::from_path(name).first())
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_bytes_with_declared_content_type() {
        let image = UploadedImage::from_bytes(b"abc", Some("image/png"), Some("shot.jpg"));
        assert_eq!(image.data_uri(), "data:image/png;base64,YWJj");
        assert_eq!(image.base64_payload(), "YWJj");
    }

    #[test]
    fn guesses_mime_from_file_name_when_undeclared() {
        let image = UploadedImage::from_bytes(b"abc", None, Some("receipt.jpeg"));
        assert!(image.data_uri().starts_with("data:image/jpeg;base64,"));

        let unknown = UploadedImage::from_bytes(b"abc", Some(""), None);
        assert!(unknown.data_uri().starts_with("data:application/octet-stream;base64,"));
    }

    #[test]
    fn strip_prefix_passes_through_bare_payloads() {
        assert_eq!(strip_data_uri_prefix("data:image/jpeg;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri_prefix("QUJD"), "QUJD");
    }

    #[tokio::test]
    async fn encode_runs_off_the_executor() {
        let image = UploadedImage::encode(vec![0xff, 0xd8], Some("image/jpeg".into()), None)
            .await
            .unwrap();
        assert_eq!(image.base64_payload(), "/9g=");
    }
}
