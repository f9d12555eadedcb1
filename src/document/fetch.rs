use super::DocumentError;
use reqwest::{Client, Url, header::CONTENT_TYPE};
use std::path::Path;

/// Raw bytes plus the hints used for format detection.
pub(crate) struct Fetched {
    pub(crate) bytes: Vec<u8>,
    pub(crate) content_type: Option<String>,
    pub(crate) name_hint: Option<String>,
}

/// Download a remote document, streaming the body so the byte cap is enforced early.
pub(crate) async fn fetch_remote(
    http: &Client,
    url: &Url,
    max_bytes: u64,
) -> Result<Fetched, DocumentError> {
    let fetch_error = |reason: String| DocumentError::Fetch {
        url: url.to_string(),
        reason,
    };

    let mut response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|error| fetch_error(error.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(url = %url, %status, "Document fetch returned error status");
        return Err(fetch_error(format!("server responded with {status}")));
    }

    if let Some(length) = response.content_length()
        && length > max_bytes
    {
        return Err(DocumentError::TooLarge { limit: max_bytes });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut bytes = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|error| fetch_error(error.to_string()))?
    {
        if (bytes.len() + chunk.len()) as u64 > max_bytes {
            return Err(DocumentError::TooLarge { limit: max_bytes });
        }
        bytes.extend_from_slice(&chunk);
    }

    let name_hint = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string);

    tracing::debug!(url = %url, bytes = bytes.len(), "Document fetched");
    Ok(Fetched {
        bytes,
        content_type,
        name_hint,
    })
}

/// Read a local document after checking its size.
pub(crate) async fn read_local(path: &Path, max_bytes: u64) -> Result<Fetched, DocumentError> {
    let io_error = |source| DocumentError::Io {
        path: path.display().to_string(),
        source,
    };

    let metadata = tokio::fs::metadata(path).await.map_err(io_error)?;
    if metadata.len() > max_bytes {
        return Err(DocumentError::TooLarge { limit: max_bytes });
    }
    let bytes = tokio::fs::read(path).await.map_err(io_error)?;

    Ok(Fetched {
        bytes,
        content_type: None,
        name_hint: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
    })
}
