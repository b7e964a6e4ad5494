//! Client for the OSRM `match` and `route` services.
//!
//! Both endpoints are asked for `overview=full&geometries=geojson`, so every
//! geometry arrives as a plain array of `[lon, lat]` pairs.

use std::future::Future;
use std::time::Duration;

use geo::Coord;
use itertools::Itertools;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ShapeConfig;

const GEOMETRY_QUERY: &str = "overview=full&geometries=geojson";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    Status(StatusCode),
    #[error("service answered with code '{code}': {message}")]
    Rejected { code: String, message: String },
    #[error("response did not contain {0}")]
    MissingGeometry(&'static str),
    #[error("could not decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ServiceError {
    /// Short label separating an unreachable service from one that answered
    /// with something unusable. Used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Transport(_) | ServiceError::Status(_) => "service_unavailable",
            ServiceError::Rejected { .. }
            | ServiceError::MissingGeometry(_)
            | ServiceError::Decode(_) => "malformed_response",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ServiceError::Transport(e) if e.is_timeout())
    }
}

/// The two geometry operations shape resolution depends on.
pub trait GeometryService {
    /// Snaps an ordered trace onto the network. On success returns every
    /// matching's geometry, in trace order.
    fn match_trace(
        &self,
        trace: &[Coord<f64>],
    ) -> impl Future<Output = Result<Vec<Vec<Coord<f64>>>, ServiceError>> + Send;

    /// Fastest route between exactly two points.
    fn route_between(
        &self,
        from: Coord<f64>,
        to: Coord<f64>,
    ) -> impl Future<Output = Result<Vec<Coord<f64>>, ServiceError>> + Send;
}

#[derive(Deserialize, Debug)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    matchings: Option<Vec<OsrmPath>>,
    #[serde(default)]
    routes: Option<Vec<OsrmPath>>,
}

#[derive(Deserialize, Debug)]
struct OsrmPath {
    geometry: OsrmGeometry,
}

#[derive(Deserialize, Debug)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

impl OsrmPath {
    fn into_coords(self) -> Vec<Coord<f64>> {
        self.geometry
            .coordinates
            .into_iter()
            .map(|[lon, lat]| Coord { x: lon, y: lat })
            .collect()
    }
}

fn decode_ok(status: StatusCode, body: &[u8]) -> Result<OsrmResponse, ServiceError> {
    if status != StatusCode::OK {
        return Err(ServiceError::Status(status));
    }

    let response: OsrmResponse = serde_json::from_slice(body)?;

    if response.code != "Ok" {
        return Err(ServiceError::Rejected {
            code: response.code,
            message: response.message.unwrap_or_default(),
        });
    }

    Ok(response)
}

/// Interprets a `/match` reply. Matchings without any coordinates count as a
/// malformed reply rather than being dropped silently.
pub fn decode_match_response(
    status: StatusCode,
    body: &[u8],
) -> Result<Vec<Vec<Coord<f64>>>, ServiceError> {
    let matchings = decode_ok(status, body)?
        .matchings
        .filter(|matchings| !matchings.is_empty())
        .ok_or(ServiceError::MissingGeometry("matchings"))?;

    let geometries: Vec<Vec<Coord<f64>>> =
        matchings.into_iter().map(OsrmPath::into_coords).collect();

    if geometries.iter().any(|geometry| geometry.is_empty()) {
        return Err(ServiceError::MissingGeometry("matching coordinates"));
    }

    Ok(geometries)
}

/// Interprets a `/route` reply, keeping only the first route.
pub fn decode_route_response(
    status: StatusCode,
    body: &[u8],
) -> Result<Vec<Coord<f64>>, ServiceError> {
    let route = decode_ok(status, body)?
        .routes
        .and_then(|routes| routes.into_iter().next())
        .ok_or(ServiceError::MissingGeometry("routes"))?;

    Ok(route.into_coords())
}

/// `lon,lat;lon,lat;...`, the coordinate list of an OSRM request path.
pub fn encode_coordinates(coords: &[Coord<f64>]) -> String {
    coords
        .iter()
        .map(|coord| format!("{},{}", coord.x, coord.y))
        .join(";")
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    client: reqwest::Client,
    base_url: String,
    profile: String,
}

fn make_reqwest_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .user_agent("ivy shape enrichment")
        .timeout(timeout)
        .deflate(true)
        .gzip(true)
        .brotli(true)
        .build()
}

impl OsrmClient {
    pub fn new(base_url: &str, profile: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: make_reqwest_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            profile: profile.to_string(),
        })
    }

    pub fn from_config(config: &ShapeConfig) -> Result<Self, ServiceError> {
        Self::new(&config.osrm_url, &config.profile, config.request_timeout)
    }

    pub fn match_url(&self, trace: &[Coord<f64>]) -> String {
        self.service_url("match", trace)
    }

    pub fn route_url(&self, from: Coord<f64>, to: Coord<f64>) -> String {
        self.service_url("route", &[from, to])
    }

    fn service_url(&self, service: &str, coords: &[Coord<f64>]) -> String {
        format!(
            "{}/{}/v1/{}/{}?{}",
            self.base_url,
            service,
            self.profile,
            encode_coordinates(coords),
            GEOMETRY_QUERY
        )
    }

    async fn fetch(&self, url: &str) -> Result<(StatusCode, Vec<u8>), ServiceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        Ok((status, body.to_vec()))
    }
}

impl GeometryService for OsrmClient {
    async fn match_trace(
        &self,
        trace: &[Coord<f64>],
    ) -> Result<Vec<Vec<Coord<f64>>>, ServiceError> {
        let (status, body) = self.fetch(&self.match_url(trace)).await?;
        decode_match_response(status, &body)
    }

    async fn route_between(
        &self,
        from: Coord<f64>,
        to: Coord<f64>,
    ) -> Result<Vec<Coord<f64>>, ServiceError> {
        let (status, body) = self.fetch(&self.route_url(from, to)).await?;
        decode_route_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn c(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    /// Serves exactly one canned http response and reports the request line.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let request = String::from_utf8_lossy(&request).to_string();
            let request_line = request.lines().next().unwrap_or_default().to_string();
            let _ = tx.send(request_line);

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        (format!("http://{}", addr), rx)
    }

    #[test]
    fn encodes_lon_before_lat() {
        let encoded = encode_coordinates(&[c(13.405, 52.52), c(-0.1276, 51.5072)]);
        assert_eq!(encoded, "13.405,52.52;-0.1276,51.5072");
    }

    #[test]
    fn builds_request_urls() {
        let client =
            OsrmClient::new("http://localhost:5000/", "train", Duration::from_secs(5)).unwrap();

        assert_eq!(
            client.match_url(&[c(1.0, 2.0), c(3.0, 4.0), c(5.0, 6.0)]),
            "http://localhost:5000/match/v1/train/1,2;3,4;5,6?overview=full&geometries=geojson"
        );
        assert_eq!(
            client.route_url(c(1.5, 2.5), c(3.0, 4.0)),
            "http://localhost:5000/route/v1/train/1.5,2.5;3,4?overview=full&geometries=geojson"
        );
    }

    #[test]
    fn decodes_all_matchings_in_order() {
        let body = br#"{
            "code": "Ok",
            "matchings": [
                {"geometry": {"type": "LineString", "coordinates": [[1.0, 2.0], [1.5, 2.5]]}, "confidence": 0.9},
                {"geometry": {"type": "LineString", "coordinates": [[3.0, 4.0], [5.0, 6.0]]}, "confidence": 0.4}
            ],
            "tracepoints": []
        }"#;

        let matchings = decode_match_response(StatusCode::OK, body).unwrap();
        assert_eq!(
            matchings,
            vec![
                vec![c(1.0, 2.0), c(1.5, 2.5)],
                vec![c(3.0, 4.0), c(5.0, 6.0)]
            ]
        );
    }

    #[test]
    fn match_failures_are_classified() {
        let err = decode_match_response(StatusCode::INTERNAL_SERVER_ERROR, b"").unwrap_err();
        assert!(matches!(err, ServiceError::Status(_)));
        assert_eq!(err.kind(), "service_unavailable");

        let err = decode_match_response(
            StatusCode::OK,
            br#"{"code": "NoMatch", "message": "Could not match the trace."}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::Rejected { ref code, .. } if code == "NoMatch"));
        assert_eq!(err.kind(), "malformed_response");

        let err = decode_match_response(StatusCode::OK, br#"{"code": "Ok"}"#).unwrap_err();
        assert!(matches!(err, ServiceError::MissingGeometry("matchings")));

        let err =
            decode_match_response(StatusCode::OK, br#"{"code": "Ok", "matchings": []}"#).unwrap_err();
        assert!(matches!(err, ServiceError::MissingGeometry("matchings")));

        let err = decode_match_response(StatusCode::OK, b"<html>").unwrap_err();
        assert!(matches!(err, ServiceError::Decode(_)));
        assert_eq!(err.kind(), "malformed_response");
    }

    #[test]
    fn route_uses_first_route_only() {
        let body = br#"{
            "code": "Ok",
            "routes": [
                {"geometry": {"coordinates": [[1.0, 1.0], [2.0, 2.0]]}},
                {"geometry": {"coordinates": [[9.0, 9.0]]}}
            ]
        }"#;

        let route = decode_route_response(StatusCode::OK, body).unwrap();
        assert_eq!(route, vec![c(1.0, 1.0), c(2.0, 2.0)]);

        let err =
            decode_route_response(StatusCode::OK, br#"{"code": "Ok", "routes": []}"#).unwrap_err();
        assert!(matches!(err, ServiceError::MissingGeometry("routes")));
    }

    #[tokio::test]
    async fn client_requests_match_geometry() {
        let (base, request_line) = serve_once(
            "200 OK",
            r#"{"code":"Ok","matchings":[{"geometry":{"coordinates":[[1.0,2.0],[5.0,6.0]]}}]}"#,
        )
        .await;
        let client = OsrmClient::new(&base, "train", Duration::from_secs(5)).unwrap();

        let matchings = client
            .match_trace(&[c(1.0, 2.0), c(3.0, 4.0), c(5.0, 6.0)])
            .await
            .unwrap();

        assert_eq!(matchings, vec![vec![c(1.0, 2.0), c(5.0, 6.0)]]);
        assert_eq!(
            request_line.await.unwrap(),
            "GET /match/v1/train/1,2;3,4;5,6?overview=full&geometries=geojson HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn client_reports_server_errors() {
        let (base, _request_line) = serve_once("500 Internal Server Error", "{}").await;
        let client = OsrmClient::new(&base, "train", Duration::from_secs(5)).unwrap();

        let err = client
            .route_between(c(1.0, 2.0), c(3.0, 4.0))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServiceError::Status(status) if status == StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[tokio::test]
    async fn client_gives_up_after_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        // accept and hold the connection without ever answering
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = OsrmClient::new(&base, "train", Duration::from_millis(200)).unwrap();
        let err = client
            .route_between(c(1.0, 2.0), c(3.0, 4.0))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.kind(), "service_unavailable");
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = OsrmClient::new(&base, "train", Duration::from_secs(2)).unwrap();
        let err = client
            .match_trace(&[c(1.0, 2.0), c(3.0, 4.0), c(5.0, 6.0)])
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Transport(_)));
    }
}
