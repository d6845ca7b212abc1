use crate::errors::GatewayError;
use async_trait::async_trait;
use http::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A single call against a named resource, relative to the gateway's base URL.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    /// `resource` may be nested, e.g. `admin/notifications`.
    pub fn new(method: Method, resource: &str) -> Self {
        ApiRequest {
            method,
            segments: resource
                .split('/')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            body: None,
        }
    }

    pub fn segment<S: Into<String>>(mut self, segment: S) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// `GET /resource`
    pub fn list(resource: &str) -> Self {
        Self::new(Method::GET, resource)
    }

    /// `GET /resource/:id/subresource`
    pub fn list_related(resource: &str, id: &str, sub: &str) -> Self {
        Self::new(Method::GET, resource).segment(id).segment(sub)
    }

    /// `POST /resource/:id/subresource`, a bulk relationship assignment.
    pub fn assign_related(resource: &str, id: &str, sub: &str, body: Value) -> Self {
        Self::new(Method::POST, resource)
            .segment(id)
            .segment(sub)
            .with_body(body)
    }

    /// `DELETE /resource/:id/subresource/:subId`
    pub fn remove_related(resource: &str, id: &str, sub: &str, sub_id: &str) -> Self {
        Self::new(Method::DELETE, resource)
            .segment(id)
            .segment(sub)
            .segment(sub_id)
    }

    /// `POST /resource`
    pub fn create(resource: &str, body: Value) -> Self {
        Self::new(Method::POST, resource).with_body(body)
    }

    /// `PUT /resource/:id`
    pub fn update(resource: &str, id: &str, body: Value) -> Self {
        Self::new(Method::PUT, resource).segment(id).with_body(body)
    }

    /// `DELETE /resource/:id`
    pub fn delete(resource: &str, id: &str) -> Self {
        Self::new(Method::DELETE, resource).segment(id)
    }

    /// `PUT /resource/:id/mark-as-read`
    pub fn mark_as_read(resource: &str, id: &str) -> Self {
        Self::new(Method::PUT, resource)
            .segment(id)
            .segment("mark-as-read")
            .with_body(Value::Object(Default::default()))
    }

    /// `POST /resource/:id/:action`
    pub fn action(resource: &str, id: &str, action: &str) -> Self {
        Self::new(Method::POST, resource)
            .segment(id)
            .segment(action)
            .with_body(Value::Object(Default::default()))
    }

    pub fn path(&self) -> String {
        self.segments.join("/")
    }

    /// Reads are safe to retry, mutations never are.
    pub fn is_read(&self) -> bool {
        self.method == Method::GET
    }
}

/// The remote collection gateway consumed by the synchronization layer.
///
/// A successful call yields the decoded JSON body, or `None` when the server
/// answered with an empty body.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<Option<Value>, GatewayError>;
}

/// Typed helpers on top of [`Gateway::execute`].
#[async_trait]
pub trait GatewayExt: Gateway {
    /// Executes the request and decodes a body that must be present.
    async fn fetch<T>(&self, request: ApiRequest) -> Result<T, GatewayError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let path = request.path();
        match self.execute(request).await? {
            Some(value) => decode(value),
            None => Err(GatewayError::InvalidResponse(format!(
                "empty response body from {path}"
            ))),
        }
    }

    /// Executes the request and decodes the body if the server sent one.
    async fn fetch_optional<T>(&self, request: ApiRequest) -> Result<Option<T>, GatewayError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.execute(request).await?.map(decode).transpose()
    }

    /// Executes the request, ignoring any response body.
    async fn send(&self, request: ApiRequest) -> Result<(), GatewayError> {
        self.execute(request).await.map(|_| ())
    }
}

impl<G: Gateway + ?Sized> GatewayExt for G {}

pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paths() {
        assert_eq!(ApiRequest::list("guardians").path(), "guardians");
        assert_eq!(
            ApiRequest::list("/admin/notifications/sent").path(),
            "admin/notifications/sent"
        );
        assert_eq!(
            ApiRequest::list_related("guardians", "g1", "children").path(),
            "guardians/g1/children"
        );
        assert_eq!(
            ApiRequest::remove_related("guardians", "g1", "children", "c2").path(),
            "guardians/g1/children/c2"
        );
        assert_eq!(
            ApiRequest::mark_as_read("admin/notifications", "n1").path(),
            "admin/notifications/n1/mark-as-read"
        );
    }

    #[test]
    fn test_methods_and_bodies() {
        let assign =
            ApiRequest::assign_related("guardians", "g1", "children", json!({"childIds": ["a"]}));
        assert_eq!(assign.method, Method::POST);
        assert_eq!(assign.body, Some(json!({"childIds": ["a"]})));
        assert!(!assign.is_read());

        let mark = ApiRequest::mark_as_read("admin/notifications", "n1");
        assert_eq!(mark.method, Method::PUT);
        assert_eq!(mark.body, Some(json!({})));

        assert_eq!(ApiRequest::delete("guardians", "g1").method, Method::DELETE);
        assert!(ApiRequest::list("guardians").is_read());
    }

    #[test]
    fn test_decode_error() {
        let result: Result<Vec<String>, _> = decode(json!({"not": "a list"}));
        assert!(matches!(result, Err(GatewayError::InvalidResponse(_))));
    }
}
