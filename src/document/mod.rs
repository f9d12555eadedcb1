//! Document loading: resolve a reference, fetch its bytes, and extract plain text.
//!
//! References beginning with `http://` or `https://` are downloaded; `file://` URLs and bare
//! paths are read from local storage only when enabled and inside the configured root. Uploaded bytes skip the
//! fetch step. Extraction picks PDF or UTF-8 text based on magic bytes, content type, and
//! file extension.

mod extract;
mod fetch;

use crate::config::Config;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use extract::{DocumentKind, extract_text};

/// Errors produced while resolving, fetching, or parsing a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The reference was empty or used an unsupported scheme.
    #[error("invalid document reference: {0}")]
    InvalidReference(String),
    /// Local document loading is disabled, has no root, or the path escapes the root.
    #[error("local document access denied: {0}")]
    LocalAccessDenied(String),
    /// The document could not be downloaded.
    #[error("failed to fetch document from {url}: {reason}")]
    Fetch {
        /// Remote URL that failed.
        url: String,
        /// Transport error or status description.
        reason: String,
    },
    /// The local file could not be read.
    #[error("failed to read document {path}: {source}")]
    Io {
        /// Local path that failed.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The document exceeded the configured size limit.
    #[error("document exceeds the {limit} byte limit")]
    TooLarge {
        /// Configured byte limit.
        limit: u64,
    },
    /// PDF text extraction failed.
    #[error("PDF parsing failed: {0}")]
    Pdf(String),
    /// Content was neither PDF nor UTF-8 text.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),
    /// Extraction succeeded but produced no text.
    #[error("document contains no extractable text")]
    Empty,
}

/// Where a document reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// HTTP(S) URL fetched with the shared client.
    Remote(reqwest::Url),
    /// Path on local storage.
    Local(PathBuf),
}

impl DocumentSource {
    /// Classify a caller-supplied reference.
    pub fn parse(reference: &str) -> Result<Self, DocumentError> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(DocumentError::InvalidReference(
                "document reference is empty".into(),
            ));
        }

        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = reqwest::Url::parse(trimmed)
                .map_err(|error| DocumentError::InvalidReference(error.to_string()))?;
            return Ok(Self::Remote(url));
        }
        if lower.starts_with("file://") {
            let url = reqwest::Url::parse(trimmed)
                .map_err(|error| DocumentError::InvalidReference(error.to_string()))?;
            let path = url.to_file_path().map_err(|()| {
                DocumentError::InvalidReference(format!("not a local file URL: {trimmed}"))
            })?;
            return Ok(Self::Local(path));
        }
        if let Some((scheme, _)) = trimmed.split_once("://") {
            return Err(DocumentError::InvalidReference(format!(
                "unsupported scheme '{scheme}'"
            )));
        }
        Ok(Self::Local(PathBuf::from(trimmed)))
    }

    /// Human-readable description stored with indexed chunks.
    pub fn describe(&self) -> String {
        match self {
            Self::Remote(url) => url.to_string(),
            Self::Local(path) => path.display().to_string(),
        }
    }
}

/// Document supplied with a request.
#[derive(Debug, Clone)]
pub enum DocumentInput {
    /// Reference resolved by [`DocumentSource::parse`].
    Reference(String),
    /// File uploaded through the multipart endpoint.
    Upload {
        /// Client-supplied filename, used for format detection.
        filename: Option<String>,
        /// Declared content type of the part.
        content_type: Option<String>,
        /// Raw file bytes.
        bytes: Vec<u8>,
    },
}

/// Text extracted from a document together with its provenance.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Description of where the text came from.
    pub source: String,
    /// Detected document format.
    pub kind: DocumentKind,
    /// Extracted plain text, guaranteed non-blank.
    pub text: String,
}

/// Fetches and extracts documents under the configured limits.
pub struct DocumentLoader {
    http: Client,
    max_bytes: u64,
    allow_local: bool,
    local_root: Option<PathBuf>,
}

impl DocumentLoader {
    /// Build a loader from configuration.
    pub fn new(config: &Config) -> Result<Self, DocumentError> {
        let http = Client::builder()
            .user_agent("docqa/loader")
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|error| DocumentError::Fetch {
                url: String::new(),
                reason: error.to_string(),
            })?;
        Ok(Self {
            http,
            max_bytes: config.document_max_bytes,
            allow_local: config.document_allow_local,
            local_root: config.document_local_root.clone(),
        })
    }

    /// Resolve, fetch, and extract the text of a document.
    pub async fn load(&self, input: DocumentInput) -> Result<LoadedDocument, DocumentError> {
        let (source, fetched) = match input {
            DocumentInput::Reference(reference) => {
                let source = DocumentSource::parse(&reference)?;
                let fetched = match &source {
                    DocumentSource::Remote(url) => {
                        fetch::fetch_remote(&self.http, url, self.max_bytes).await?
                    }
                    DocumentSource::Local(path) => {
                        let path = self.authorize_local(path).await?;
                        fetch::read_local(&path, self.max_bytes).await?
                    }
                };
                (source.describe(), fetched)
            }
            DocumentInput::Upload {
                filename,
                content_type,
                bytes,
            } => {
                if bytes.len() as u64 > self.max_bytes {
                    return Err(DocumentError::TooLarge {
                        limit: self.max_bytes,
                    });
                }
                let source = filename
                    .clone()
                    .map(|name| format!("upload:{name}"))
                    .unwrap_or_else(|| "upload".to_string());
                (
                    source,
                    fetch::Fetched {
                        bytes,
                        content_type,
                        name_hint: filename,
                    },
                )
            }
        };

        let kind = DocumentKind::detect(
            &fetched.bytes,
            fetched.content_type.as_deref(),
            fetched.name_hint.as_deref(),
        );
        let text = extract_text(kind, fetched.bytes).await?;
        if text.trim().is_empty() {
            return Err(DocumentError::Empty);
        }
        tracing::debug!(
            source = %source,
            kind = ?kind,
            characters = text.chars().count(),
            "Document loaded"
        );
        Ok(LoadedDocument { source, kind, text })
    }

    async fn authorize_local(&self, path: &Path) -> Result<PathBuf, DocumentError> {
        if !self.allow_local {
            return Err(DocumentError::LocalAccessDenied(
                "local documents are disabled".into(),
            ));
        }
        let Some(root) = &self.local_root else {
            return Err(DocumentError::LocalAccessDenied(
                "no local document root is configured".into(),
            ));
        };
        let canonical =
            tokio::fs::canonicalize(path)
                .await
                .map_err(|source| DocumentError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|source| DocumentError::Io {
                path: root.display().to_string(),
                source,
            })?;
        if !canonical.starts_with(&root) {
            return Err(DocumentError::LocalAccessDenied(format!(
                "{} is outside {}",
                canonical.display(),
                root.display()
            )));
        }
        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};
    use std::io::Write;

    fn loader(max_bytes: u64, allow_local: bool, local_root: Option<PathBuf>) -> DocumentLoader {
        DocumentLoader {
            http: Client::builder()
                .user_agent("docqa-test")
                .build()
                .expect("client"),
            max_bytes,
            allow_local,
            local_root,
        }
    }

    #[test]
    fn parse_classifies_references() {
        assert!(matches!(
            DocumentSource::parse("https://example.org/policy.pdf?sv=1"),
            Ok(DocumentSource::Remote(_))
        ));
        assert_eq!(
            DocumentSource::parse("docs/policy.txt").expect("local"),
            DocumentSource::Local(PathBuf::from("docs/policy.txt"))
        );
        assert!(matches!(
            DocumentSource::parse("   "),
            Err(DocumentError::InvalidReference(_))
        ));
        assert!(matches!(
            DocumentSource::parse("ftp://example.org/file"),
            Err(DocumentError::InvalidReference(_))
        ));
    }

    #[tokio::test]
    async fn loads_remote_text_document() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/policy.txt");
                then.status(200)
                    .header("content-type", "text/plain; charset=utf-8")
                    .body("Grace period is thirty days.");
            })
            .await;

        let document = loader(1024, false, None)
            .load(DocumentInput::Reference(server.url("/policy.txt")))
            .await
            .expect("document");

        mock.assert();
        assert_eq!(document.kind, DocumentKind::Text);
        assert_eq!(document.text, "Grace period is thirty days.");
        assert!(document.source.ends_with("/policy.txt"));
    }

    #[tokio::test]
    async fn remote_error_status_is_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.pdf");
                then.status(404);
            })
            .await;

        let error = loader(1024, false, None)
            .load(DocumentInput::Reference(server.url("/missing.pdf")))
            .await
            .expect_err("missing document");
        assert!(matches!(error, DocumentError::Fetch { .. }));
    }

    #[tokio::test]
    async fn remote_body_over_limit_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/big.txt");
                then.status(200).body("x".repeat(64));
            })
            .await;

        let error = loader(16, false, None)
            .load(DocumentInput::Reference(server.url("/big.txt")))
            .await
            .expect_err("too large");
        assert!(matches!(error, DocumentError::TooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn local_documents_respect_toggle_and_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.md");
        let mut file = std::fs::File::create(&path).expect("file");
        writeln!(file, "# Notes\nMaternity is covered after 24 months.").expect("write");

        let reference = path.display().to_string();

        let disabled = loader(1024, false, None)
            .load(DocumentInput::Reference(reference.clone()))
            .await
            .expect_err("local disabled");
        assert!(matches!(disabled, DocumentError::LocalAccessDenied(_)));

        let unrooted = loader(1024, true, None)
            .load(DocumentInput::Reference(reference.clone()))
            .await
            .expect_err("no root configured");
        assert!(matches!(unrooted, DocumentError::LocalAccessDenied(_)));

        let other_root = tempfile::tempdir().expect("other root");
        let escaped = loader(1024, true, Some(other_root.path().to_path_buf()))
            .load(DocumentInput::Reference(reference.clone()))
            .await
            .expect_err("outside root");
        assert!(matches!(escaped, DocumentError::LocalAccessDenied(_)));

        let document = loader(1024, true, Some(dir.path().to_path_buf()))
            .load(DocumentInput::Reference(reference))
            .await
            .expect("local document");
        assert!(document.text.contains("24 months"));
    }

    #[tokio::test]
    async fn uploaded_pdf_is_extracted() {
        let document = loader(1024 * 1024, false, None)
            .load(DocumentInput::Upload {
                filename: Some("policy.pdf".into()),
                content_type: Some("application/pdf".into()),
                bytes: extract::tests::GRACE_PERIOD_PDF.to_vec(),
            })
            .await
            .expect("pdf upload");
        assert_eq!(document.kind, DocumentKind::Pdf);
        assert_eq!(document.source, "upload:policy.pdf");
        assert!(
            extract::tests::collapse_whitespace(&document.text)
                .contains("Grace period is thirty days.")
        );
    }

    #[tokio::test]
    async fn blank_upload_is_empty_error() {
        let error = loader(1024, false, None)
            .load(DocumentInput::Upload {
                filename: Some("blank.txt".into()),
                content_type: Some("text/plain".into()),
                bytes: b"   \n\t".to_vec(),
            })
            .await
            .expect_err("blank");
        assert!(matches!(error, DocumentError::Empty));
    }
}
