//! HTTP tile provider.
//!
//! Fetches the URL carried by each [`TileRequest`]. URL construction is up to
//! the caller; this provider only performs the transfer and plumbs the
//! cancellation token through to the in-flight HTTP request, which is aborted
//! by dropping its future.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BoxFuture, TileProvider};
use crate::error::FetchError;
use crate::request::{Tile, TileRequest};
use crate::response::TileOutcome;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Trait for HTTP client operations.
///
/// This abstraction allows mock HTTP clients in tests.
pub trait HttpClient: Send + Sync + 'static {
    /// Performs an HTTP GET request and returns the response body.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>>;
}

/// Real HTTP client implementation using reqwest.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a new client with the default timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a new client with a custom timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::Network(format!("Request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(FetchError::Http {
                    status: response.status().as_u16(),
                    url: url.to_string(),
                });
            }

            response
                .bytes()
                .await
                .map_err(|e| FetchError::Network(format!("Failed to read response: {}", e)))
        })
    }
}

/// Tile provider fetching tiles over HTTP.
pub struct HttpTileProvider<C: HttpClient> {
    http_client: C,
    tile_type: String,
    concurrency: usize,
}

impl<C: HttpClient> HttpTileProvider<C> {
    /// Creates a new HTTP tile provider.
    ///
    /// # Arguments
    ///
    /// * `http_client` - Client performing the requests
    /// * `tile_type` - Scheduling domain shared with same-type providers
    /// * `concurrency` - Maximum in-flight requests for this provider
    pub fn new(http_client: C, tile_type: impl Into<String>, concurrency: usize) -> Self {
        Self {
            http_client,
            tile_type: tile_type.into(),
            concurrency,
        }
    }
}

impl<C: HttpClient> TileProvider for HttpTileProvider<C> {
    fn tile_type(&self) -> &str {
        &self.tile_type
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn load_tile(
        &self,
        request: TileRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, TileOutcome> {
        Box::pin(async move {
            let url = request
                .url
                .as_deref()
                .ok_or_else(|| FetchError::MissingUrl(request.id.clone()))?;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(request_id = %request.id, url, "HTTP fetch aborted");
                    Err(FetchError::Provider("cancelled".to_string()))
                }

                result = self.http_client.get(url) => {
                    result.map(|data| Tile::new(request.coord, data))
                }
            }
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::request::TileCoord;

    /// Mock HTTP client for testing.
    pub struct MockHttpClient {
        pub response: Result<Bytes, FetchError>,
        pub delay: Duration,
    }

    impl MockHttpClient {
        pub fn ok(data: &'static [u8]) -> Self {
            Self {
                response: Ok(Bytes::from_static(data)),
                delay: Duration::ZERO,
            }
        }
    }

    impl HttpClient for MockHttpClient {
        fn get<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>> {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.response.clone()
            })
        }
    }

    fn request() -> TileRequest {
        TileRequest::new("r1", TileCoord::new(1, 2, 3)).with_url("http://example.com/3/1/2.png")
    }

    #[tokio::test]
    async fn test_load_tile_success() {
        let provider = HttpTileProvider::new(MockHttpClient::ok(b"png"), "osm", 2);
        let tile = provider
            .load_tile(request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(tile.coord, TileCoord::new(1, 2, 3));
        assert_eq!(&tile.data[..], b"png");
    }

    #[tokio::test]
    async fn test_load_tile_http_error() {
        let client = MockHttpClient {
            response: Err(FetchError::Http {
                status: 503,
                url: "http://example.com".to_string(),
            }),
            delay: Duration::ZERO,
        };
        let provider = HttpTileProvider::new(client, "osm", 2);
        let result = provider.load_tile(request(), CancellationToken::new()).await;
        assert!(matches!(result, Err(FetchError::Http { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_load_tile_requires_url() {
        let provider = HttpTileProvider::new(MockHttpClient::ok(b"png"), "osm", 2);
        let request = TileRequest::new("no-url", TileCoord::new(0, 0, 0));
        let result = provider.load_tile(request, CancellationToken::new()).await;
        assert_eq!(result, Err(FetchError::MissingUrl("no-url".into())));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_fetch() {
        let client = MockHttpClient {
            response: Ok(Bytes::from_static(b"late")),
            delay: Duration::from_secs(60),
        };
        let provider = HttpTileProvider::new(client, "osm", 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            provider.load_tile(request(), cancel),
        )
        .await
        .expect("cancelled fetch should return promptly");
        assert!(result.is_err());
    }

    #[test]
    fn test_provider_descriptor() {
        let provider = HttpTileProvider::new(MockHttpClient::ok(b""), "satellite", 8);
        assert_eq!(provider.tile_type(), "satellite");
        assert_eq!(provider.concurrency(), 8);
    }
}
