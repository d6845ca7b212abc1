use std::fmt;

/// Per-session request context injected into a gateway.
///
/// Credentials travel with the gateway instead of being read from ambient
/// session storage at each call site.
#[derive(Clone, Default, PartialEq)]
pub struct RequestContext {
    bearer: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        RequestContext { bearer: None }
    }

    pub fn with_bearer<T: Into<String>>(token: T) -> Self {
        RequestContext {
            bearer: Some(token.into()),
        }
    }

    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let context = RequestContext::with_bearer("secret-token");
        assert_eq!(context.bearer(), Some("secret-token"));
        assert!(!format!("{context:?}").contains("secret-token"));
        assert_eq!(RequestContext::anonymous().bearer(), None);
    }
}
