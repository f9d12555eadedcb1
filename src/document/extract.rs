use super::DocumentError;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Document formats the loader can turn into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Portable Document Format.
    Pdf,
    /// UTF-8 text of any flavor (plain, markdown, HTML source).
    Text,
}

impl DocumentKind {
    /// Detect the format from magic bytes first, then content type, then file extension.
    pub fn detect(bytes: &[u8], content_type: Option<&str>, name_hint: Option<&str>) -> Self {
        if bytes.starts_with(PDF_MAGIC) {
            return Self::Pdf;
        }
        let declared_pdf = content_type
            .map(|value| value.to_ascii_lowercase().starts_with("application/pdf"))
            .unwrap_or(false);
        let named_pdf = name_hint
            .map(|name| name.to_ascii_lowercase().ends_with(".pdf"))
            .unwrap_or(false);
        if declared_pdf || named_pdf {
            Self::Pdf
        } else {
            Self::Text
        }
    }
}

/// Extract text from raw bytes. PDF parsing runs on the blocking pool.
pub async fn extract_text(kind: DocumentKind, bytes: Vec<u8>) -> Result<String, DocumentError> {
    match kind {
        DocumentKind::Pdf => tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|error| DocumentError::Pdf(error.to_string()))
        })
        .await
        .map_err(|error| DocumentError::Pdf(format!("extraction task failed: {error}")))?,
        DocumentKind::Text => String::from_utf8(bytes).map_err(|_| {
            DocumentError::UnsupportedFormat("content is neither PDF nor UTF-8 text".into())
        }),
    }
}
