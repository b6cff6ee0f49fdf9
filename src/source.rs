//! Image sources and the fetcher that turns them into raw bytes
//!
//! A request names exactly one source: an uploaded file or a remote URL. The
//! fetcher enforces the byte bound on both and maps every transport failure
//! to a [`CleanerError`].

use crate::error::{CleanerError, Result};
use reqwest::header::{ACCEPT, REFERER};
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
const MAX_REDIRECTS: usize = 10;

/// Where a payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Upload,
    Url,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Url => write!(f, "url"),
        }
    }
}

/// A file received in the request body
#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

/// Exactly one image source
#[derive(Debug, Clone)]
pub enum ImageSource {
    Upload(UploadedFile),
    RemoteUrl(String),
}

impl ImageSource {
    /// Build a source from the optional parts of a request
    ///
    /// An empty or whitespace-only URL counts as absent.
    ///
    /// # Errors
    /// - [`CleanerError::ConflictingSources`] when both are present
    /// - [`CleanerError::MissingSource`] when neither is
    pub fn from_parts(upload: Option<UploadedFile>, url: Option<String>) -> Result<Self> {
        let url = url.filter(|u| !u.trim().is_empty());
        match (upload, url) {
            (Some(_), Some(_)) => Err(CleanerError::ConflictingSources),
            (Some(file), None) => Ok(Self::Upload(file)),
            (None, Some(url)) => Ok(Self::RemoteUrl(url.trim().to_string())),
            (None, None) => Err(CleanerError::MissingSource),
        }
    }

    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Upload(_) => SourceKind::Upload,
            Self::RemoteUrl(_) => SourceKind::Url,
        }
    }
}

/// Reject declared content types that are not `image/*`
///
/// A missing content type is accepted; the decoder has the final say.
///
/// # Errors
/// - [`CleanerError::WrongContentType`]
pub fn check_declared_content_type(content_type: Option<&str>) -> Result<()> {
    match content_type {
        Some(declared) if !declared.trim().to_ascii_lowercase().starts_with("image/") => {
            Err(CleanerError::WrongContentType(declared.to_string()))
        },
        _ => Ok(()),
    }
}

/// Parse a caller-supplied URL, allowing only `http` and `https`
///
/// # Errors
/// - [`CleanerError::InvalidUrl`]
pub fn parse_image_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| CleanerError::invalid_url(raw, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {},
        other => {
            return Err(CleanerError::invalid_url(
                raw,
                format!("unsupported scheme '{other}'"),
            ))
        },
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(CleanerError::invalid_url(raw, "missing host"));
    }
    Ok(url)
}

/// Bytes obtained from a source
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub bytes: Vec<u8>,
    pub kind: SourceKind,
}

/// Obtains raw bytes from an [`ImageSource`]
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: Client,
    max_bytes: usize,
}

impl SourceFetcher {
    /// # Errors
    /// - HTTP client construction fails (TLS backend initialization)
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CleanerError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, max_bytes })
    }

    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Resolve a source to bytes
    ///
    /// # Errors
    /// - [`CleanerError::EmptyInput`] for empty uploads or bodies
    /// - [`CleanerError::InputTooLarge`] past the byte bound
    /// - [`CleanerError::WrongContentType`] for non-image uploads
    /// - [`CleanerError::InvalidUrl`], [`CleanerError::UpstreamRejected`] and
    ///   [`CleanerError::NetworkFailure`] for remote sources
    pub async fn fetch(&self, source: ImageSource) -> Result<RawPayload> {
        match source {
            ImageSource::Upload(file) => self.accept_upload(file),
            ImageSource::RemoteUrl(url) => self.fetch_remote(&url).await,
        }
    }

    fn accept_upload(&self, file: UploadedFile) -> Result<RawPayload> {
        check_declared_content_type(file.content_type.as_deref())?;
        if file.bytes.is_empty() {
            return Err(CleanerError::EmptyInput("upload"));
        }
        if file.bytes.len() > self.max_bytes {
            return Err(CleanerError::InputTooLarge {
                limit: self.max_bytes,
            });
        }
        debug!(
            bytes = file.bytes.len(),
            filename = file.filename.as_deref().unwrap_or("-"),
            "Accepted upload"
        );
        Ok(RawPayload {
            bytes: file.bytes,
            kind: SourceKind::Upload,
        })
    }

    #[instrument(skip(self), fields(bytes))]
    async fn fetch_remote(&self, raw_url: &str) -> Result<RawPayload> {
        let url = parse_image_url(raw_url)?;

        let mut response = self
            .client
            .get(url.clone())
            .header(ACCEPT, IMAGE_ACCEPT)
            .header(REFERER, url.as_str())
            .send()
            .await
            .map_err(|e| CleanerError::network_failure(raw_url, e))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            warn!(status = status.as_u16(), "Upstream rejected image request");
            return Err(CleanerError::UpstreamRejected {
                url: raw_url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(length) = response.content_length() {
            if usize::try_from(length).map_or(true, |len| len > self.max_bytes) {
                return Err(CleanerError::InputTooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CleanerError::network_failure(raw_url, e))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(CleanerError::InputTooLarge {
                    limit: self.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(CleanerError::EmptyInput("image_url"));
        }

        tracing::Span::current().record("bytes", bytes.len());
        debug!(final_url = %response.url(), "Fetched remote image");

        Ok(RawPayload {
            bytes,
            kind: SourceKind::Url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FETCH_TIMEOUT;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Redirect};
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn test_router() -> Router {
        Router::new()
            .route("/pixel.png", get(|| async { vec![1u8; 64] }))
            .route("/empty", get(|| async { Vec::<u8>::new() }))
            .route("/big", get(|| async { vec![0u8; 4096] }))
            .route(
                "/forbidden",
                get(|| async { (StatusCode::FORBIDDEN, "no hotlinking") }),
            )
            .route("/moved", get(|| async { Redirect::temporary("/pixel.png") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    vec![1u8; 64]
                }),
            )
            .route(
                "/echo-headers",
                get(|headers: HeaderMap| async move {
                    let referer = headers
                        .get(header::REFERER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let accept = headers
                        .get(header::ACCEPT)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    format!("{referer}|{accept}").into_response()
                }),
            )
    }

    fn fetcher(max_bytes: usize) -> SourceFetcher {
        SourceFetcher::new(DEFAULT_FETCH_TIMEOUT, max_bytes).unwrap()
    }

    #[test]
    fn test_from_parts() {
        let file = UploadedFile {
            bytes: vec![1, 2, 3],
            ..UploadedFile::default()
        };

        assert!(matches!(
            ImageSource::from_parts(Some(file.clone()), Some("https://a/b.png".into())),
            Err(CleanerError::ConflictingSources)
        ));
        assert!(matches!(
            ImageSource::from_parts(None, None),
            Err(CleanerError::MissingSource)
        ));
        assert!(matches!(
            ImageSource::from_parts(None, Some("  ".into())),
            Err(CleanerError::MissingSource)
        ));
        assert_eq!(
            ImageSource::from_parts(Some(file.clone()), Some(String::new()))
                .unwrap()
                .kind(),
            SourceKind::Upload
        );
        assert_eq!(
            ImageSource::from_parts(None, Some("https://a/b.png".into()))
                .unwrap()
                .kind(),
            SourceKind::Url
        );
    }

    #[test]
    fn test_declared_content_type() {
        assert!(check_declared_content_type(None).is_ok());
        assert!(check_declared_content_type(Some("image/png")).is_ok());
        assert!(check_declared_content_type(Some("IMAGE/JPEG")).is_ok());
        assert!(matches!(
            check_declared_content_type(Some("text/plain")),
            Err(CleanerError::WrongContentType(_))
        ));
    }

    #[test]
    fn test_parse_image_url() {
        assert!(parse_image_url("https://example.com/a.png").is_ok());
        assert!(parse_image_url("http://127.0.0.1:8080/a").is_ok());
        for bad in ["ftp://example.com/a.png", "file:///etc/passwd", "not a url", ""] {
            assert!(
                matches!(parse_image_url(bad), Err(CleanerError::InvalidUrl { .. })),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn test_upload_checks() {
        let fetcher = fetcher(8);

        let ok = fetcher
            .fetch(ImageSource::Upload(UploadedFile {
                bytes: vec![7; 8],
                content_type: Some("image/png".into()),
                filename: Some("a.png".into()),
            }))
            .await
            .unwrap();
        assert_eq!(ok.kind, SourceKind::Upload);
        assert_eq!(ok.bytes.len(), 8);

        let empty = fetcher
            .fetch(ImageSource::Upload(UploadedFile::default()))
            .await;
        assert!(matches!(empty, Err(CleanerError::EmptyInput(_))));

        let too_big = fetcher
            .fetch(ImageSource::Upload(UploadedFile {
                bytes: vec![7; 9],
                ..UploadedFile::default()
            }))
            .await;
        assert!(matches!(too_big, Err(CleanerError::InputTooLarge { limit: 8 })));

        let wrong_type = fetcher
            .fetch(ImageSource::Upload(UploadedFile {
                bytes: vec![7; 4],
                content_type: Some("application/pdf".into()),
                filename: None,
            }))
            .await;
        assert!(matches!(wrong_type, Err(CleanerError::WrongContentType(_))));
    }

    #[tokio::test]
    async fn test_fetch_remote_success_and_redirect() {
        let addr = serve(test_router()).await;
        let fetcher = fetcher(1024);

        let payload = fetcher
            .fetch(ImageSource::RemoteUrl(format!("http://{addr}/pixel.png")))
            .await
            .unwrap();
        assert_eq!(payload.kind, SourceKind::Url);
        assert_eq!(payload.bytes, vec![1u8; 64]);

        let redirected = fetcher
            .fetch(ImageSource::RemoteUrl(format!("http://{addr}/moved")))
            .await
            .unwrap();
        assert_eq!(redirected.bytes.len(), 64);
    }

    #[tokio::test]
    async fn test_fetch_sends_referer_and_accept() {
        let addr = serve(test_router()).await;
        let url = format!("http://{addr}/echo-headers");

        let payload = fetcher(1024)
            .fetch(ImageSource::RemoteUrl(url.clone()))
            .await
            .unwrap();
        let body = String::from_utf8(payload.bytes).unwrap();
        let (referer, accept) = body.split_once('|').unwrap();
        assert_eq!(referer, url);
        assert!(accept.starts_with("image/"));
    }

    #[tokio::test]
    async fn test_fetch_remote_failures() {
        let addr = serve(test_router()).await;
        let fetcher = fetcher(1024);

        let rejected = fetcher
            .fetch(ImageSource::RemoteUrl(format!("http://{addr}/forbidden")))
            .await
            .unwrap_err();
        assert_eq!(rejected.upstream_status(), Some(403));

        let missing = fetcher
            .fetch(ImageSource::RemoteUrl(format!("http://{addr}/nope")))
            .await
            .unwrap_err();
        assert_eq!(missing.upstream_status(), Some(404));

        let empty = fetcher
            .fetch(ImageSource::RemoteUrl(format!("http://{addr}/empty")))
            .await;
        assert!(matches!(empty, Err(CleanerError::EmptyInput(_))));

        let big = fetcher
            .fetch(ImageSource::RemoteUrl(format!("http://{addr}/big")))
            .await;
        assert!(matches!(big, Err(CleanerError::InputTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_failure() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher(1024)
            .fetch(ImageSource::RemoteUrl(format!("http://{addr}/a.png")))
            .await
            .unwrap_err();
        assert!(matches!(err, CleanerError::NetworkFailure { .. }));
        assert_eq!(err.upstream_status(), None);
    }

    #[tokio::test]
    async fn test_slow_host_times_out_as_network_failure() {
        let addr = serve(test_router()).await;
        let fetcher = SourceFetcher::new(Duration::from_millis(200), 1024).unwrap();

        let start = std::time::Instant::now();
        let err = fetcher
            .fetch(ImageSource::RemoteUrl(format!("http://{addr}/slow")))
            .await
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(4));

        let CleanerError::NetworkFailure { source, .. } = &err else {
            panic!("expected NetworkFailure, got {err:?}");
        };
        assert!(source.is_timeout());
        assert_eq!(err.kind(), crate::error::ErrorKind::UpstreamFetchFailure);
        assert_eq!(err.reason(), "failed to fetch image_url");
        assert_eq!(err.upstream_status(), None);
    }
}
