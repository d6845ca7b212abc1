const BASE_DELAY: u64 = 500;

use crate::config::GatewayConfig;
use crate::context::RequestContext;
use crate::errors::GatewayError;
use crate::metrics_defs::{GATEWAY_READ_RETRIES, GATEWAY_REQUEST_DURATION};
use crate::request::{ApiRequest, Gateway};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use shared::{counter, histogram};
use std::time::Instant;
use tokio::time::{Duration, sleep};
use url::Url;

const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
    StatusCode::TOO_MANY_REQUESTS,     // 429
    StatusCode::INTERNAL_SERVER_ERROR, // 500
    StatusCode::BAD_GATEWAY,           // 502
    StatusCode::SERVICE_UNAVAILABLE,   // 503
    StatusCode::GATEWAY_TIMEOUT,       // 504
];

fn backoff_millis(retries: u32) -> u64 {
    BASE_DELAY.saturating_mul(2_u64.saturating_pow(retries))
}

/// Gateway talking JSON over HTTP to the console's REST API.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    context: RequestContext,
    read_retries: u32,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig, context: RequestContext) -> Result<Self, GatewayError> {
        if config.base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(config.base_url.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(HttpGateway {
            client,
            base_url: config.base_url.clone(),
            context,
            read_retries: config.read_retries,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(&request.segments);
        Ok(url)
    }

    async fn send_once(
        &self,
        request: &ApiRequest,
        url: Url,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut builder = self.client.request(request.method.clone(), url);

        if let Some(token) = self.context.bearer() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn execute(&self, request: ApiRequest) -> Result<Option<Value>, GatewayError> {
        let url = self.url_for(&request)?;
        let method = request.method.to_string();
        let started = Instant::now();
        let mut retries = 0;

        let response = loop {
            let response = self.send_once(&request, url.clone()).await?;
            let status = response.status();

            if !status.is_success()
                && request.is_read()
                && RETRIABLE_STATUS_CODES.contains(&status)
                && retries < self.read_retries
            {
                // Backoff between retries
                let retry_millis = backoff_millis(retries);
                tracing::debug!(
                    path = %request.path(),
                    status = status.as_u16(),
                    retry_millis,
                    "Retrying read"
                );
                counter!(GATEWAY_READ_RETRIES).increment(1);
                sleep(Duration::from_millis(retry_millis)).await;
                retries += 1;
                continue;
            }

            break response;
        };

        let status = response.status();
        histogram!(GATEWAY_REQUEST_DURATION, "method" => method, "status" => status.as_str().to_owned())
            .record(started.elapsed().as_secs_f64());

        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !status.is_success() {
            let err = GatewayError::from_error_body(status, &body);
            tracing::debug!(path = %request.path(), error = %err, "Request rejected");
            return Err(err);
        }

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;
    use crate::request::GatewayExt;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioExecutor;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    struct SeenRequest {
        method: String,
        path: String,
        authorization: Option<String>,
        body: Vec<u8>,
    }

    type Responder = dyn Fn(&SeenRequest, usize) -> (u16, String) + Send + Sync;

    /// Start a mock HTTP server. The responder receives the request and how
    /// many requests were seen before it.
    async fn start_mock_server<F>(responder: F) -> (u16, Arc<Mutex<Vec<SeenRequest>>>)
    where
        F: Fn(&SeenRequest, usize) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let responder: Arc<Responder> = Arc::new(responder);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = hyper_util::rt::TokioIo::new(stream);
                let responder = responder.clone();
                let seen = seen_clone.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let responder = responder.clone();
                        let seen = seen.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body.collect().await.unwrap().to_bytes().to_vec();
                            let request = SeenRequest {
                                method: parts.method.to_string(),
                                path: parts.uri.path().to_string(),
                                authorization: parts
                                    .headers
                                    .get("authorization")
                                    .map(|v| v.to_str().unwrap().to_string()),
                                body,
                            };
                            let count = {
                                let mut seen = seen.lock();
                                seen.push(request.clone());
                                seen.len() - 1
                            };
                            let (status, body) = responder(&request, count);
                            let response = Response::builder()
                                .status(status)
                                .body(Full::new(Bytes::from(body)))
                                .unwrap();
                            Ok::<_, Infallible>(response)
                        }
                    });

                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        (port, seen)
    }

    fn test_gateway(port: u16, token: Option<&str>, read_retries: u32) -> HttpGateway {
        let config = GatewayConfig {
            base_url: Url::parse(&format!("http://127.0.0.1:{port}/api/")).unwrap(),
            timeout_secs: 5,
            read_retries,
        };
        let context = token
            .map(RequestContext::with_bearer)
            .unwrap_or_else(RequestContext::anonymous);
        HttpGateway::new(&config, context).unwrap()
    }

    #[tokio::test]
    async fn test_list_with_bearer() {
        let (port, seen) = start_mock_server(|_, _| {
            (200, json!([{"_id": "g1"}, {"_id": "g2"}]).to_string())
        })
        .await;
        let gateway = test_gateway(port, Some("token-1"), 0);

        let value: Vec<Value> = gateway.fetch(ApiRequest::list("guardians")).await.unwrap();
        assert_eq!(value.len(), 2);

        let seen = seen.lock();
        assert_eq!(seen[0].method, "GET");
        assert_eq!(seen[0].path, "/api/guardians");
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer token-1"));
    }

    #[tokio::test]
    async fn test_assign_sends_json_body() {
        let (port, seen) = start_mock_server(|_, _| (204, String::new())).await;
        let gateway = test_gateway(port, None, 0);

        let result = gateway
            .execute(ApiRequest::assign_related(
                "guardians",
                "g1",
                "children",
                json!({"childIds": ["c1", "c2"]}),
            ))
            .await
            .unwrap();
        assert_eq!(result, None);

        let seen = seen.lock();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].path, "/api/guardians/g1/children");
        assert_eq!(seen[0].authorization, None);
        let body: Value = serde_json::from_slice(&seen[0].body).unwrap();
        assert_eq!(body, json!({"childIds": ["c1", "c2"]}));
    }

    #[tokio::test]
    async fn test_rejection_is_normalized() {
        let (port, _) = start_mock_server(|_, _| {
            (400, json!({"message": "Guardian not found"}).to_string())
        })
        .await;
        let gateway = test_gateway(port, None, 3);

        let err = gateway
            .send(ApiRequest::delete("guardians", "missing"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected {
                status: 400,
                message: Some("Guardian not found".into())
            }
        );
        assert_eq!(err.kind(), FailureKind::ServerRejection);
    }

    #[tokio::test]
    async fn test_mutations_are_not_retried() {
        let (port, seen) = start_mock_server(|_, _| (503, String::new())).await;
        let gateway = test_gateway(port, None, 3);

        let err = gateway
            .send(ApiRequest::mark_as_read("admin/notifications", "n1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected {
                status: 503,
                message: None
            }
        );
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_reads_are_retried() {
        let (port, seen) = start_mock_server(|_, count| {
            if count == 0 {
                (503, String::new())
            } else {
                (200, "[]".to_string())
            }
        })
        .await;
        let gateway = test_gateway(port, None, 1);

        let value: Vec<Value> = gateway
            .fetch(ApiRequest::list("admin/children"))
            .await
            .unwrap();
        assert!(value.is_empty());
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(backoff_millis(0), 500);
        assert_eq!(backoff_millis(3), 4000);
        assert_eq!(backoff_millis(64), u64::MAX);
    }

    #[tokio::test]
    async fn test_network_failure() {
        // Nothing listens on port 1
        let gateway = test_gateway(1, None, 0);
        let err = gateway
            .execute(ApiRequest::list("guardians"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Network(_)));
        assert_eq!(err.kind(), FailureKind::NetworkFailure);
    }

    #[tokio::test]
    async fn test_invalid_success_body() {
        let (port, _) = start_mock_server(|_, _| (200, "not json".to_string())).await;
        let gateway = test_gateway(port, None, 0);

        let err = gateway
            .execute(ApiRequest::list("guardians"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }
}
