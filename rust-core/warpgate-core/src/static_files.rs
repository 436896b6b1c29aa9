//! # Static Files
//!
//! Development-mode file serving: `GET /static/<file>` is answered from
//! `<document_root>/static/<file>` when no registered route matches.

use crate::context;
use crate::error::{Error, Result};
use crate::response::{Bytes, Reply};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// URL prefix served from the document root
pub const STATIC_PREFIX: &str = "/static/";

/// File server rooted at the application's document root
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    /// Serve files below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Document root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` is a static file URL
    #[must_use]
    pub fn handles(path: &str) -> bool {
        path.len() > STATIC_PREFIX.len() && path.starts_with(STATIC_PREFIX)
    }

    /// Content type for a file name
    #[must_use]
    pub fn content_type(path: &Path) -> String {
        mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string()
    }

    /// Read the file behind a decoded request path
    ///
    /// Sets the response content type from the file extension.
    ///
    /// # Errors
    ///
    /// - `Error::Http { status: 404 }` if the path escapes the root or is not
    ///   a regular file
    /// - `Error::Io` if the file cannot be read
    pub async fn serve(&self, path: &str) -> Result<Reply> {
        let full_path = self.root.join(sanitize(path)?);
        match fs::metadata(&full_path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(Error::not_found()),
        }

        let content = fs::read(&full_path).await?;
        debug!(path = %full_path.display(), size = content.len(), "static file");
        let content_type = Self::content_type(&full_path);
        context::with_response(|r| r.set_content_type(&content_type))?;
        Ok(Reply::Bytes(Bytes::from(content)))
    }
}

/// Relative file path for a request path, rejecting directory traversal
fn sanitize(path: &str) -> Result<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    if relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Ok(relative.to_path_buf())
    } else {
        Err(Error::not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::request::{RawRequest, RequestView};
    use std::sync::Arc;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize("/static/css/site.css").unwrap(),
            PathBuf::from("static/css/site.css")
        );
        assert!(sanitize("/static/../../etc/passwd").is_err());
        assert!(sanitize("/static/a/../../secret").is_err());
    }

    #[test]
    fn test_handles_prefix_only() {
        assert!(StaticFiles::handles("/static/app.js"));
        assert!(!StaticFiles::handles("/static/"));
        assert!(!StaticFiles::handles("/staticfile"));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(StaticFiles::content_type(Path::new("a.css")), "text/css");
        assert_eq!(StaticFiles::content_type(Path::new("a.png")), "image/png");
        assert_eq!(
            StaticFiles::content_type(Path::new("a.unknownext")),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_serve_reads_file_and_sets_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("static")).unwrap();
        std::fs::write(dir.path().join("static/site.css"), "body{}").unwrap();
        let files = StaticFiles::new(dir.path());

        let ctx = Arc::new(RequestContext::new(RequestView::from_raw(RawRequest::new(
            "GET",
            "/static/site.css",
        ))));
        let (reply, content_type) = Arc::clone(&ctx)
            .scope(async {
                let reply = files.serve("/static/site.css").await;
                let content_type =
                    context::with_response(|r| r.content_type().map(ToString::to_string));
                (reply, content_type)
            })
            .await;

        match reply.unwrap() {
            Reply::Bytes(body) => assert_eq!(&body[..], b"body{}"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(content_type.unwrap().as_deref(), Some("text/css"));
    }

    #[tokio::test]
    async fn test_missing_file_and_directory_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("static")).unwrap();
        let files = StaticFiles::new(dir.path());

        assert!(matches!(
            files.serve("/static/nope.js").await,
            Err(Error::Http { status: 404 })
        ));
        assert!(matches!(
            files.serve("/static/").await,
            Err(Error::Http { status: 404 })
        ));
    }
}
