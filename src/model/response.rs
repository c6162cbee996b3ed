use crate::model::Request;
use std::borrow::Cow;
use std::path::PathBuf;

/// A response body, either buffered or spilled to disk
///
/// Bodies larger than the configured spill threshold are streamed to a temp
/// file by the fetcher so binaries never sit fully in memory. The `File`
/// variant owns its spill file: dropping the body deletes it, so consumers
/// that need the bytes past the response's lifetime must copy them first
/// (the download stage ingests into the content store before the response
/// is dropped).
#[derive(Debug)]
pub enum Body {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl Drop for Body {
    fn drop(&mut self) {
        if let Body::File(path) = self {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %e, "spill file cleanup failed");
            }
        }
    }
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Bytes(b) => b.len() as u64,
            Body::File(p) => std::fs::metadata(p).map(|m| m.len()).unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the body bytes, reading the spill file when necessary
    ///
    /// Adapters decoding small structured payloads use this; the download
    /// stage works on the spill file directly and never calls it.
    pub fn bytes(&self) -> std::io::Result<Cow<'_, [u8]>> {
        match self {
            Body::Bytes(b) => Ok(Cow::Borrowed(b)),
            Body::File(p) => Ok(Cow::Owned(std::fs::read(p)?)),
        }
    }
}

/// A fetched HTTP response, routed back to the adapter that requested it
#[derive(Debug)]
pub struct Response {
    pub status: u16,

    /// Response headers in arrival order; names lowercased
    pub headers: Vec<(String, String)>,

    pub body: Body,

    /// URL after redirects
    pub final_url: String,

    /// The request that produced this response, with its callback payload
    pub request: Request,
}

impl Response {
    /// First header value with the given name, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
