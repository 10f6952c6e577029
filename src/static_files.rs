//! Static file responder
//!
//! Resolves a request path to a file under the static root and returns its
//! bytes with a content type picked from the extension.

use crate::response::{bytes_response, text_response, ResponseBody};
use hyper::{Response, StatusCode};
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Lookup key used for `/`
pub const INDEX_DOCUMENT: &str = "/index.html";

#[derive(Debug, Error)]
pub enum StaticError {
    #[error("file not found")]
    NotFound,

    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Get the Content-Type for a file extension
pub fn content_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") => "text/html",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") => "image/jpg",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// Serves files from one directory
#[derive(Debug, Clone)]
pub struct StaticResponder {
    root: PathBuf,
}

impl StaticResponder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a request path onto the static root.
    ///
    /// Only plain path segments are accepted, so `..` can never leave the root.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        let mut resolved = self.root.clone();

        for component in relative.components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                Component::CurDir => {}
                _ => return None,
            }
        }

        Some(resolved)
    }

    /// Read the file behind `request_path`
    pub async fn load(&self, request_path: &str) -> Result<(Vec<u8>, &'static str), StaticError> {
        let path = self.resolve(request_path).ok_or(StaticError::NotFound)?;
        let extension = path.extension().and_then(|ext| ext.to_str());
        let content_type = content_type(extension);

        match tokio::fs::read(&path).await {
            Ok(content) => Ok((content, content_type)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StaticError::NotFound),
            Err(e) => Err(StaticError::Io(e)),
        }
    }

    /// Serve `request_path`, mapping filesystem errors to status codes
    pub async fn serve(&self, request_path: &str) -> Response<ResponseBody> {
        match self.load(request_path).await {
            Ok((content, content_type)) => bytes_response(StatusCode::OK, content_type, content),
            Err(StaticError::NotFound) => {
                debug!("Static file not found: {}", request_path);
                text_response(StatusCode::NOT_FOUND, "File not found")
            }
            Err(StaticError::Io(e)) => {
                warn!("Failed to read static file {}: {}", request_path, e);
                text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Server Error: {:?}", e.kind()),
                )
            }
        }
    }
}
