use std::collections::HashSet;

use auth_core::{TransportInfo, TransportKind};
use percent_encoding::percent_decode_str;

/// Requests that bypass every auth stage.
///
/// HTTP paths match exactly or by prefix after normalization. gRPC calls
/// match by fully qualified service (`pkg.Service`) or full method
/// (`pkg.Service/Method`, leading slash optional).
#[derive(Debug, Clone, Default)]
pub struct SkipRules {
    exact: HashSet<String>,
    prefixes: Vec<String>,
    grpc_services: HashSet<String>,
    grpc_methods: HashSet<String>,
}

impl SkipRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<str>) -> Self {
        self.exact.insert(normalize_path(path.as_ref()));
        self
    }

    /// `"/public/"` skips `/public/a` but not `/public`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    pub fn grpc_service(mut self, service: impl Into<String>) -> Self {
        self.grpc_services.insert(service.into());
        self
    }

    pub fn grpc_method(mut self, full_method: impl AsRef<str>) -> Self {
        let method = full_method.as_ref().trim_start_matches('/');
        self.grpc_methods.insert(method.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
            && self.prefixes.is_empty()
            && self.grpc_services.is_empty()
            && self.grpc_methods.is_empty()
    }

    /// The path is normalized before checking to prevent traversal-based bypasses.
    pub fn skips_path(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        self.exact.contains(&normalized)
            || self
                .prefixes
                .iter()
                .any(|prefix| normalized.starts_with(prefix.as_str()))
    }

    pub fn skips_grpc(&self, full_method: &str) -> bool {
        let Some((service, method)) = parse_grpc_path(full_method) else {
            return false;
        };
        self.grpc_services.contains(service)
            || self.grpc_methods.contains(&format!("{service}/{method}"))
    }

    pub fn skips(&self, info: &TransportInfo) -> bool {
        match info.kind {
            TransportKind::Http => self.skips_path(&info.operation),
            TransportKind::Grpc => self.skips_grpc(&info.operation),
        }
    }
}

/// Normalize a URL path by stripping the query string / fragment, percent-
/// decoding each segment, and resolving `.` and `..` so `%2e%2e` cannot climb
/// out of a skipped prefix.
pub fn normalize_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let path = path.split('#').next().unwrap_or(path);

    let mut segments: Vec<String> = Vec::new();
    for seg in path.split('/') {
        let decoded = percent_decode_str(seg).decode_utf8_lossy();
        match decoded.as_ref() {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s.to_owned()),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Splits `/pkg.Service/Method` into service and method.
pub fn parse_grpc_path(path: &str) -> Option<(&str, &str)> {
    let path = path.strip_prefix('/')?;
    let (service, method) = path.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}
