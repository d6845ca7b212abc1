use crate::entity::{Entity, ViewFilter, any_field_contains};
use crate::source::CollectionSource;
use async_trait::async_trait;
use gateway::{ApiRequest, Gateway, GatewayError, GatewayExt};
use http::Method;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Minimal entity for exercising the generic machinery.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub kind: String,
    pub tags: Vec<String>,
}

impl Item {
    pub fn new(id: &str, title: &str, kind: &str) -> Self {
        Item {
            id: id.to_string(),
            title: title.to_string(),
            kind: kind.to_string(),
            tags: Vec::new(),
        }
    }
}

impl Entity for Item {
    type Related = Vec<String>;

    fn id(&self) -> &str {
        &self.id
    }

    fn related(&self) -> &Vec<String> {
        &self.tags
    }

    fn set_related(&mut self, related: Vec<String>) {
        self.tags = related;
    }

    fn matches_search(&self, needle: &str) -> bool {
        any_field_contains([Some(self.title.as_str())], needle)
    }

    fn kind(&self) -> Option<&str> {
        Some(&self.kind)
    }
}

/// `GET items`, optionally joined with `GET items/:id/tags`.
pub struct ItemSource {
    gateway: Arc<MockGateway>,
    joins: bool,
}

impl ItemSource {
    pub fn flat(gateway: Arc<MockGateway>) -> Self {
        ItemSource {
            gateway,
            joins: false,
        }
    }

    pub fn joining(gateway: Arc<MockGateway>) -> Self {
        ItemSource {
            gateway,
            joins: true,
        }
    }
}

#[async_trait]
impl CollectionSource<Item> for ItemSource {
    fn name(&self) -> &'static str {
        "items"
    }

    async fn list(&self, _filter: &ViewFilter) -> Result<Vec<Item>, GatewayError> {
        self.gateway.fetch(ApiRequest::list("items")).await
    }

    fn joins(&self) -> bool {
        self.joins
    }

    async fn related(&self, id: &str) -> Result<Vec<String>, GatewayError> {
        self.gateway
            .fetch(ApiRequest::list_related("items", id, "tags"))
            .await
    }
}

struct Reply {
    result: Result<Option<Value>, GatewayError>,
    gate: Option<oneshot::Receiver<()>>,
}

/// Scriptable in-memory gateway.
///
/// Replies are queued per method and path. The last ungated reply on a route
/// is sticky and answers every further call. A route with nothing queued
/// answers 404.
#[derive(Default)]
pub struct MockGateway {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn respond(&self, method: Method, path: &str, result: Result<Option<Value>, GatewayError>) {
        self.push(method, path, Reply { result, gate: None });
    }

    /// Queues a reply that is held back until the returned sender fires (or
    /// is dropped).
    pub fn respond_gated(
        &self,
        method: Method,
        path: &str,
        result: Result<Option<Value>, GatewayError>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.push(
            method,
            path,
            Reply {
                result,
                gate: Some(rx),
            },
        );
        tx
    }

    pub fn reject(&self, method: Method, path: &str, status: u16, message: Option<&str>) {
        self.respond(
            method,
            path,
            Err(GatewayError::Rejected {
                status,
                message: message.map(String::from),
            }),
        );
    }

    pub fn ok(&self, method: Method, path: &str) {
        self.respond(method, path, Ok(None));
    }

    pub fn reset(&self, method: Method, path: &str) {
        self.routes.lock().remove(&(method, path.to_string()));
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, method: &Method, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == *method && call.path() == path)
            .count()
    }

    pub fn bodies(&self, method: &Method, path: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == *method && call.path() == path)
            .map(|call| call.body.clone().unwrap_or_else(|| json!(null)))
            .collect()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn execute(&self, request: ApiRequest) -> Result<Option<Value>, GatewayError> {
        let key = (request.method.clone(), request.path());
        self.calls.lock().push(request);

        let reply = {
            let mut routes = self.routes.lock();
            match routes.get_mut(&key) {
                Some(queue) if queue.len() == 1 && queue[0].gate.is_none() => {
                    Some((queue[0].result.clone(), None))
                }
                Some(queue) => queue.pop_front().map(|reply| (reply.result, reply.gate)),
                None => None,
            }
        };

        match reply {
            Some((result, gate)) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                result
            }
            None => Err(GatewayError::Rejected {
                status: 404,
                message: Some(format!("no route for {} {}", key.0, key.1)),
            }),
        }
    }
}

/// Yields until the gateway has seen at least `count` calls on a route.
pub async fn wait_for_calls(gateway: &MockGateway, method: Method, path: &str, count: usize) {
    for _ in 0..10_000 {
        if gateway.call_count(&method, path) >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("timed out waiting for {count} calls to {method} {path}");
}
