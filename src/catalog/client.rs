//! `EngineCatalog` trait and its HTTP implementation.
//!
//! The backend wraps every payload in a `{ code, message, data }` envelope.
//! A missing `code`, `0` or `200` means success; anything else carries a
//! human-readable `message`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::catalog::types::{EngineDescriptor, EngineParamDescriptor};
use crate::config::ServerConfig;

// ---------------------------------------------------------------------------
// CatalogError
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to the engine catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// HTTP transport or connection error.
    #[error("engine catalog request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("engine catalog request timed out")]
    Timeout,

    /// The server answered with a non-success HTTP status.
    #[error("engine catalog returned HTTP {0}")]
    Status(u16),

    /// The envelope carried a failure code.
    #[error("engine catalog error: {0}")]
    Api(String),

    /// The body was not the expected JSON.
    #[error("failed to parse engine catalog response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CatalogError::Timeout
        } else if e.is_decode() {
            CatalogError::Parse(e.to_string())
        } else {
            CatalogError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// EngineCatalog trait
// ---------------------------------------------------------------------------

/// Source of ASR engine descriptors and parameter schemas.
#[async_trait]
pub trait EngineCatalog: Send + Sync {
    /// Every engine the backend knows, streaming or not.
    async fn list_engines(&self) -> Result<Vec<EngineDescriptor>, CatalogError>;

    /// Ordered parameter schema of `engine`.
    async fn engine_params(&self, engine: &str) -> Result<Vec<EngineParamDescriptor>, CatalogError>;
}

// ---------------------------------------------------------------------------
// HttpEngineCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: Option<i64>,
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, CatalogError> {
        if let Some(code) = self.code {
            if code != 0 && code != 200 {
                return Err(CatalogError::Api(
                    self.message.unwrap_or_else(|| format!("code {code}")),
                ));
            }
        }
        self.data
            .ok_or_else(|| CatalogError::Parse("response has no `data` field".into()))
    }
}

/// Engine catalog served by the backend over plain HTTP GETs.
pub struct HttpEngineCatalog {
    client: reqwest::Client,
    list_url: String,
}

impl HttpEngineCatalog {
    /// Build a catalog client from the server section of the config.
    ///
    /// The HTTP client carries the per-request timeout from
    /// `config.timeout_secs`; a default client is used if the builder fails.
    pub fn from_config(config: &ServerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            list_url: config.engine_list_url(),
        }
    }

    fn params_url(&self, engine: &str) -> String {
        format!("{}/{}", self.list_url, engine)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, CatalogError> {
        log::debug!("catalog: GET {url}");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        let envelope: Envelope<T> = response.json().await?;
        envelope.into_data()
    }
}

#[async_trait]
impl EngineCatalog for HttpEngineCatalog {
    async fn list_engines(&self) -> Result<Vec<EngineDescriptor>, CatalogError> {
        self.get(&self.list_url).await
    }

    async fn engine_params(&self, engine: &str) -> Result<Vec<EngineParamDescriptor>, CatalogError> {
        self.get(&self.params_url(engine)).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::{InferType, ParamValue};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP response and hand back the request line.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut read = 0;
            loop {
                let n = socket.read(&mut buf[read..]).await.unwrap();
                read += n;
                if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let request = String::from_utf8_lossy(&buf[..read]).to_string();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request.lines().next().unwrap_or_default().to_string()
        });

        (format!("http://{addr}"), handle)
    }

    fn catalog_for(base_url: String) -> HttpEngineCatalog {
        HttpEngineCatalog::from_config(&ServerConfig {
            base_url,
            ..ServerConfig::default()
        })
    }

    #[test]
    fn params_url_appends_engine_name() {
        let catalog = catalog_for("http://localhost:8880".into());
        assert_eq!(
            catalog.params_url("funasrStreaming"),
            "http://localhost:8880/adh/asr/v0/engine/funasrStreaming"
        );
    }

    #[test]
    fn envelope_failure_code_becomes_api_error() {
        let envelope: Envelope<Vec<EngineDescriptor>> =
            serde_json::from_str(r#"{"code": 500, "message": "engine registry offline"}"#).unwrap();
        match envelope.into_data() {
            Err(CatalogError::Api(msg)) => assert_eq!(msg, "engine registry offline"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn envelope_without_code_is_success() {
        let envelope: Envelope<Vec<EngineParamDescriptor>> =
            serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(envelope.into_data().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_engines_reads_envelope_data() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"code":0,"message":"ok","data":[{"name":"funasrStreaming","desc":"FunASR","infer_type":"stream","meta":{}}]}"#,
        )
        .await;

        let engines = catalog_for(base).list_engines().await.expect("list");
        assert_eq!(engines.len(), 1);
        assert_eq!(engines[0].infer_type, InferType::Stream);

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /adh/asr/v0/engine "), "{request_line}");
    }

    #[tokio::test]
    async fn engine_params_hits_engine_path() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"code":200,"data":[{"name":"mode","default":"2pass"}]}"#,
        )
        .await;

        let params = catalog_for(base).engine_params("wakeword").await.expect("params");
        assert_eq!(params[0].default, Some(ParamValue::Text("2pass".into())));

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /adh/asr/v0/engine/wakeword "), "{request_line}");
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let (base, server) = serve_once("503 Service Unavailable", "{}").await;
        let err = catalog_for(base).list_engines().await.unwrap_err();
        assert!(matches!(err, CatalogError::Status(503)), "{err:?}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let (base, server) = serve_once("200 OK", "not json").await;
        let err = catalog_for(base).list_engines().await.unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)), "{err:?}");
        server.await.unwrap();
    }
}
