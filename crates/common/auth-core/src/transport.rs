use http::HeaderMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Grpc,
}

/// What the auth pipeline knows about the inbound call, independent of the
/// server framework that received it.
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub kind: TransportKind,
    /// HTTP path, or the full gRPC method (`/package.Service/Method`).
    pub operation: String,
    /// HTTP verb, or the trailing segment of the gRPC method.
    pub method: String,
    pub headers: HeaderMap,
    pub query: Option<String>,
}

impl TransportInfo {
    pub fn http(method: impl Into<String>, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            kind: TransportKind::Http,
            operation: path.into(),
            method: method.into(),
            headers,
            query: None,
        }
    }

    pub fn grpc(full_method: impl Into<String>, headers: HeaderMap) -> Self {
        let operation = full_method.into();
        let method = operation
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            kind: TransportKind::Grpc,
            operation,
            method,
            headers,
            query: None,
        }
    }

    pub fn with_query(mut self, query: Option<&str>) -> Self {
        self.query = query.filter(|q| !q.is_empty()).map(str::to_owned);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name && !value.is_empty()).then_some(value)
        })
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|line| line.split(';'))
            .find_map(|pair| {
                let (key, value) = pair.trim().split_once('=')?;
                (key == name && !value.is_empty()).then_some(value)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn grpc_method_is_trailing_segment() {
        let info = TransportInfo::grpc("/admin.v1.UserService/ListUsers", HeaderMap::new());
        assert_eq!(info.method, "ListUsers");
        assert_eq!(info.operation, "/admin.v1.UserService/ListUsers");
        assert_eq!(info.kind, TransportKind::Grpc);
    }

    #[test]
    fn reads_query_and_cookie_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_static("theme=dark; token=abc123"),
        );
        let info = TransportInfo::http("GET", "/users", headers).with_query(Some("page=2&token=q1"));

        assert_eq!(info.cookie("token"), Some("abc123"));
        assert_eq!(info.cookie("missing"), None);
        assert_eq!(info.query_param("token"), Some("q1"));
        assert_eq!(info.query_param("page"), Some("2"));
        assert_eq!(info.query_param("nope"), None);
    }
}
