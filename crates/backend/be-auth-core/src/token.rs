use auth_core::TransportInfo;

use crate::error::{AuthnError, AuthnResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Header(String),
    Query(String),
    Cookie(String),
}

/// Where to find the bearer credential on an inbound call.
///
/// Parsed from a lookup string such as
/// `"header:Authorization,query:token,cookie:token"`; sources are tried in
/// order and the first non-empty value wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLookup {
    sources: Vec<Source>,
    scheme: String,
}

impl TokenLookup {
    pub fn parse(lookup: &str, scheme: &str) -> AuthnResult<Self> {
        let mut sources = Vec::new();
        for part in lookup.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (kind, name) = part.split_once(':').ok_or_else(|| {
                AuthnError::invalid_options(format!("token lookup entry {part:?} is not kind:name"))
            })?;
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AuthnError::invalid_options(format!(
                    "token lookup entry {part:?} has no name"
                )));
            }
            let source = match kind.trim().to_ascii_lowercase().as_str() {
                "header" => Source::Header(name),
                "query" => Source::Query(name),
                "cookie" => Source::Cookie(name),
                other => {
                    return Err(AuthnError::invalid_options(format!(
                        "unknown token lookup source {other:?}"
                    )));
                }
            };
            sources.push(source);
        }
        if sources.is_empty() {
            return Err(AuthnError::invalid_options("token lookup is empty"));
        }
        Ok(Self {
            sources,
            scheme: scheme.trim().to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn extract(&self, info: &TransportInfo) -> AuthnResult<String> {
        self.sources
            .iter()
            .find_map(|source| match source {
                Source::Header(name) => info
                    .header(name)
                    .and_then(|value| strip_scheme(value, &self.scheme)),
                Source::Query(name) => info.query_param(name).map(str::to_owned),
                Source::Cookie(name) => info.cookie(name).map(str::to_owned),
            })
            .ok_or_else(AuthnError::missing_token)
    }
}

impl Default for TokenLookup {
    fn default() -> Self {
        Self {
            sources: vec![Source::Header("Authorization".to_string())],
            scheme: crate::options::DEFAULT_TOKEN_HEAD.to_string(),
        }
    }
}

/// Header values must carry the configured scheme (compared case-insensitively).
/// An empty scheme takes the raw header value.
pub fn strip_scheme(value: &str, scheme: &str) -> Option<String> {
    let value = value.trim();
    if scheme.is_empty() {
        return (!value.is_empty()).then(|| value.to_string());
    }
    let (head, token) = value.split_once(' ')?;
    if !head.eq_ignore_ascii_case(scheme) {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthnErrorCode;
    use http::{HeaderMap, HeaderValue, header};

    fn info_with_auth(value: &'static str) -> TransportInfo {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        TransportInfo::http("GET", "/", headers)
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let lookup = TokenLookup::default();
        assert_eq!(lookup.extract(&info_with_auth("bearer abc")).unwrap(), "abc");
        assert_eq!(lookup.extract(&info_with_auth("BEARER  abc ")).unwrap(), "abc");
    }

    #[test]
    fn wrong_scheme_is_missing_token() {
        let lookup = TokenLookup::default();
        let err = lookup.extract(&info_with_auth("Basic abc")).unwrap_err();
        assert_eq!(err.code(), AuthnErrorCode::MissingToken);
        let err = lookup.extract(&info_with_auth("Bearer")).unwrap_err();
        assert_eq!(err.code(), AuthnErrorCode::MissingToken);
    }

    #[test]
    fn falls_through_sources_in_order() {
        let lookup =
            TokenLookup::parse("header:Authorization,query:token,cookie:session", "Bearer").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session=from-cookie"));
        let info = TransportInfo::http("GET", "/", headers.clone());
        assert_eq!(lookup.extract(&info).unwrap(), "from-cookie");

        let info = TransportInfo::http("GET", "/", headers).with_query(Some("token=from-query"));
        assert_eq!(lookup.extract(&info).unwrap(), "from-query");
    }

    #[test]
    fn rejects_bad_lookup_strings() {
        assert!(TokenLookup::parse("", "Bearer").is_err());
        assert!(TokenLookup::parse("header", "Bearer").is_err());
        assert!(TokenLookup::parse("body:token", "Bearer").is_err());
    }
}
