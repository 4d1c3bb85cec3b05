//! HTTP client for fetching state vectors from the OpenSky Network.

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL},
    Client, StatusCode,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server returned error status: {status}")]
    ServerError { status: StatusCode },
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Authentication failed")]
    AuthError,
    #[error("Invalid bounding box: {0}")]
    Bounds(#[from] BoundsError),
}

/// Rule a bounding box broke. Rules are checked in declaration order.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundsError {
    #[error("min longitude must be less than max longitude (min: {min}, max: {max})")]
    LongitudeOrder { min: f64, max: f64 },
    #[error("min latitude is greater than max latitude (min: {min}, max: {max})")]
    LatitudeOrder { min: f64, max: f64 },
    #[error("longitude is out of range [-180, 180] (min: {min}, max: {max})")]
    LongitudeRange { min: f64, max: f64 },
    #[error("latitude is out of range [-90, 90] (min: {min}, max: {max})")]
    LatitudeRange { min: f64, max: f64 },
}

/// Bounding box for geographic queries, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    /// Global bounding box covering the entire world.
    pub const GLOBAL: Self = Self {
        min_latitude: -90.0,
        max_latitude: 90.0,
        min_longitude: -180.0,
        max_longitude: 180.0,
    };

    /// Create a bounding box from coordinates. Call [`validate`](Self::validate)
    /// before querying with it.
    pub fn new(
        min_latitude: f64,
        max_latitude: f64,
        min_longitude: f64,
        max_longitude: f64,
    ) -> Self {
        Self {
            min_latitude,
            max_latitude,
            min_longitude,
            max_longitude,
        }
    }

    /// Check that the box is well ordered and lies on the globe.
    ///
    /// Longitudes must be strictly ordered, latitudes may be equal. NaN
    /// coordinates are rejected.
    pub fn validate(&self) -> Result<(), BoundsError> {
        let lon = (self.min_longitude, self.max_longitude);
        let lat = (self.min_latitude, self.max_latitude);

        if !(lon.0 < lon.1) {
            return Err(BoundsError::LongitudeOrder { min: lon.0, max: lon.1 });
        }
        if !(lat.0 <= lat.1) {
            return Err(BoundsError::LatitudeOrder { min: lat.0, max: lat.1 });
        }
        if !in_range(lon, 180.0) {
            return Err(BoundsError::LongitudeRange { min: lon.0, max: lon.1 });
        }
        if !in_range(lat, 90.0) {
            return Err(BoundsError::LatitudeRange { min: lat.0, max: lat.1 });
        }

        Ok(())
    }

    fn to_query_string(&self) -> String {
        format!(
            "lamin={:.4}&lomin={:.4}&lamax={:.4}&lomax={:.4}",
            self.min_latitude, self.min_longitude, self.max_latitude, self.max_longitude
        )
    }
}

fn in_range((min, max): (f64, f64), limit: f64) -> bool {
    let range = -limit..=limit;
    range.contains(&min) && range.contains(&max)
}

/// OpenSky account used for authenticated requests.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Configuration for the OpenSky client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, without a trailing slash
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Anonymous access when unset
    pub credentials: Option<Credentials>,
}

impl ClientConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://opensky-network.org/api";

    pub fn new() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            credentials: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.credentials = Some(Credentials { username, password });
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Client for fetching state vectors.
pub struct OpenSkyClient {
    client: Client,
    config: ClientConfig,
}

impl OpenSkyClient {
    /// Create a new OpenSky client.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();

        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("skywatch/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self { client, config })
    }

    fn states_url(&self, bbox: &BoundingBox) -> String {
        format!("{}/states/all?{}", self.config.base_url, bbox.to_query_string())
    }

    /// Fetch the raw `/states/all` body for a bounding box.
    ///
    /// The box is validated before any request is made.
    pub async fn fetch(&self, bbox: BoundingBox) -> Result<Vec<u8>, ClientError> {
        bbox.validate()?;

        let url = self.states_url(&bbox);
        tracing::debug!("Fetching: {}", url);

        let mut request = self.client.get(&url);
        if let Some(ref creds) = self.config.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await?;

        match response.status() {
            StatusCode::OK => {
                let bytes = response.bytes().await?;
                Ok(bytes.to_vec())
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("x-rate-limit-retry-after-seconds")
                    .or_else(|| response.headers().get("retry-after"))
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);

                Err(ClientError::RateLimited { retry_after })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::AuthError),
            status => Err(ClientError::ServerError { status }),
        }
    }

    /// Fetch state vectors for the whole world.
    pub async fn fetch_global(&self) -> Result<Vec<u8>, ClientError> {
        self.fetch(BoundingBox::GLOBAL).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn victoria() -> BoundingBox {
        BoundingBox::new(-40.110403, -24.267845, 139.147805, 154.590532)
    }

    #[test]
    fn test_bounding_box_query() {
        assert_eq!(
            victoria().to_query_string(),
            "lamin=-40.1104&lomin=139.1478&lamax=-24.2678&lomax=154.5905"
        );
    }

    #[test]
    fn test_global_bbox() {
        assert_eq!(
            BoundingBox::GLOBAL.to_query_string(),
            "lamin=-90.0000&lomin=-180.0000&lamax=90.0000&lomax=180.0000"
        );
        assert!(BoundingBox::GLOBAL.validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_legal_boxes() {
        assert!(victoria().validate().is_ok());
        // Equal latitudes are a degenerate but legal strip
        assert!(BoundingBox::new(10.0, 10.0, 0.0, 1.0).validate().is_ok());
        assert!(BoundingBox::new(-90.0, -90.0, -180.0, -179.0).validate().is_ok());
    }

    #[test]
    fn test_validate_longitude_order() {
        let err = BoundingBox::new(-40.0, -24.0, 160.0, 154.0).validate().unwrap_err();
        assert_eq!(err, BoundsError::LongitudeOrder { min: 160.0, max: 154.0 });

        let err = BoundingBox::new(-40.0, -24.0, 154.0, 154.0).validate().unwrap_err();
        assert!(matches!(err, BoundsError::LongitudeOrder { .. }));
    }

    #[test]
    fn test_validate_latitude_order() {
        let err = BoundingBox::new(-20.0, -24.0, 139.0, 154.0).validate().unwrap_err();
        assert_eq!(err, BoundsError::LatitudeOrder { min: -20.0, max: -24.0 });
    }

    #[test]
    fn test_validate_ranges() {
        let err = BoundingBox::new(-40.0, -24.0, -200.0, 154.0).validate().unwrap_err();
        assert!(matches!(err, BoundsError::LongitudeRange { .. }));

        let err = BoundingBox::new(-95.0, -24.0, 139.0, 154.0).validate().unwrap_err();
        assert!(matches!(err, BoundsError::LatitudeRange { .. }));
    }

    #[test]
    fn test_validate_rule_order() {
        // Breaks every rule; the longitude ordering is reported first
        let err = BoundingBox::new(200.0, -200.0, 300.0, -300.0).validate().unwrap_err();
        assert!(matches!(err, BoundsError::LongitudeOrder { .. }));

        // Out of range min latitude above max: ordering beats range
        let err = BoundingBox::new(200.110403, -24.267845, 139.147805, 154.590532)
            .validate()
            .unwrap_err();
        assert!(matches!(err, BoundsError::LatitudeOrder { .. }));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let err = BoundingBox::new(-40.0, -24.0, f64::NAN, 154.0).validate().unwrap_err();
        assert!(matches!(err, BoundsError::LongitudeOrder { .. }));

        let err = BoundingBox::new(f64::NAN, -24.0, 139.0, 154.0).validate().unwrap_err();
        assert!(matches!(err, BoundsError::LatitudeOrder { .. }));
    }

    #[test]
    fn test_validate_message() {
        let err = BoundingBox::new(-40.0, -24.0, 160.5, 154.0).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "min longitude must be less than max longitude (min: 160.5, max: 154)"
        );
    }

    #[test]
    fn test_states_url() {
        let client = OpenSkyClient::new(
            ClientConfig::new().with_base_url("http://localhost:8080/api/".to_string()),
        )
        .unwrap();
        assert_eq!(
            client.states_url(&BoundingBox::new(1.0, 2.0, 3.0, 4.0)),
            "http://localhost:8080/api/states/all?lamin=1.0000&lomin=3.0000&lamax=2.0000&lomax=4.0000"
        );
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_bbox() {
        let client = OpenSkyClient::new(ClientConfig::default()).unwrap();
        let err = client
            .fetch(BoundingBox::new(0.0, 1.0, 5.0, 5.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Bounds(BoundsError::LongitudeOrder { .. })));
    }
}
