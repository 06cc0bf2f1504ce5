use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use auth_core::Lifecycle;
use parking_lot::Mutex;
use regorus::{Engine, Value};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::authorizer::{Authorizer, check_batch_lengths};
use crate::error::{AuthzError, AuthzResult};
use crate::options::{AuthorizerKind, AuthorizerOptions, OpaMode};
use crate::policy::Policy;

const PROVIDER: &str = "opa";
const POLICY_FILE: &str = "authz.rego";

#[derive(Debug, Serialize)]
struct Input<'a> {
    subject: &'a str,
    object: &'a str,
    action: &'a str,
    domain: &'a str,
}

/// `/allow` answers with `result`; some gateways in front of OPA answer with `allowed`.
#[derive(Debug, Deserialize)]
struct Decision {
    result: Option<bool>,
    allowed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct BatchDecision {
    results: Vec<bool>,
}

#[derive(Debug, Deserialize)]
struct Mutation {
    #[serde(default)]
    result: bool,
}

#[derive(Debug, Deserialize)]
struct Entities {
    #[serde(default)]
    subjects: Vec<String>,
    #[serde(default)]
    objects: Vec<String>,
    #[serde(default)]
    actions: Vec<String>,
    #[serde(default)]
    domains: Vec<String>,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DataDocument<T> {
    result: Option<T>,
}

/// Rego compiled in-process. Each evaluation works on a clone of the loaded
/// engine so concurrent checks never share input.
struct LocalEngine {
    engine: Mutex<Engine>,
    query: String,
}

impl LocalEngine {
    fn compile(rego: String, query: String) -> AuthzResult<Self> {
        let mut engine = Engine::new();
        engine
            .add_policy(POLICY_FILE.to_string(), rego)
            .map(|_| ())
            .map_err(|e| AuthzError::invalid_policy(format!("rego policy rejected: {e}")))?;
        Ok(Self {
            engine: Mutex::new(engine),
            query,
        })
    }

    async fn evaluate(&self, input: &Input<'_>) -> AuthzResult<bool> {
        let input = serde_json::to_string(input)
            .map_err(|e| AuthzError::internal("failed to encode opa input").with_source(e))?;
        let mut engine = self.engine.lock().clone();
        let query = self.query.clone();

        tokio::task::spawn_blocking(move || {
            let input = Value::from_json_str(&input)
                .map_err(|e| AuthzError::engine(format!("invalid rego input: {e}")))?;
            engine.set_input(input);
            let results = engine
                .eval_query(query, false)
                .map_err(|e| AuthzError::engine(format!("rego evaluation failed: {e}")))?;
            // An undefined result is a denial.
            Ok(results
                .result
                .first()
                .and_then(|r| r.expressions.first())
                .is_some_and(|expr| expr.value == Value::Bool(true)))
        })
        .await
        .map_err(|e| AuthzError::internal(format!("rego evaluation task failed: {e}")))?
    }
}

/// Client for an OPA-compatible policy service.
struct RemoteClient {
    http: Client,
    base_url: String,
}

impl RemoteClient {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> AuthzResult<T> {
        let status = response.status();
        if status != StatusCode::OK {
            return Err(AuthzError::remote(format!(
                "policy service answered {status} for {}",
                response.url().path()
            )));
        }
        response.json::<T>().await.map_err(AuthzError::from_http)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AuthzResult<T> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(AuthzError::from_http)?;
        Self::read(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> AuthzResult<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(AuthzError::from_http)?;
        let document: DataDocument<T> = Self::read(response).await?;
        document
            .result
            .ok_or_else(|| AuthzError::remote(format!("{path} returned an undefined document")))
    }

    async fn allow(&self, input: &Input<'_>) -> AuthzResult<bool> {
        let decision: Decision = self.post("/allow", &json!({ "input": input })).await?;
        Ok(decision.result.or(decision.allowed).unwrap_or(false))
    }

    async fn policies(&self, operation: &str, policies: &[Policy]) -> AuthzResult<bool> {
        let body = json!({ "operation": operation, "policies": policies });
        let mutation: Mutation = self.post("/policies", &body).await?;
        Ok(mutation.result)
    }

    async fn role(&self, operation: &str, user: &str, role: &str, domain: &str) -> AuthzResult<bool> {
        let body = json!({
            "operation": operation,
            "user": user,
            "role": role,
            "domain": domain,
        });
        let mutation: Mutation = self.post("/roles", &body).await?;
        Ok(mutation.result)
    }

    async fn entities(&self) -> AuthzResult<Entities> {
        self.get("/v1/data/authz/entities").await
    }

    async fn lookup(&self, document: &str, key: &str) -> AuthzResult<Vec<String>> {
        let mut index: HashMap<String, Vec<String>> =
            self.get(&format!("/v1/data/authz/{document}")).await?;
        Ok(index.remove(key).unwrap_or_default())
    }
}

enum OpaState {
    Local(LocalEngine),
    Remote(RemoteClient),
}

impl OpaState {
    fn remote(&self, operation: &str) -> AuthzResult<&RemoteClient> {
        match self {
            Self::Remote(client) => Ok(client),
            Self::Local(_) => Err(AuthzError::unsupported("local opa", operation)),
        }
    }
}

/// Open Policy Agent, either embedded (Rego evaluated in-process) or remote.
#[derive(Default)]
pub struct OpaAuthorizer {
    state: Lifecycle<OpaState>,
}

impl OpaAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AuthzResult<Arc<OpaState>> {
        self.state
            .get()
            .map_err(|e| AuthzError::lifecycle(PROVIDER, e))
    }

    async fn local(options: &AuthorizerOptions) -> AuthzResult<LocalEngine> {
        let opa = &options.opa;
        let rego = match (&opa.policy, &opa.policy_path) {
            (Some(policy), _) => policy.clone(),
            (None, Some(path)) => tokio::fs::read_to_string(path).await.map_err(|e| {
                AuthzError::invalid_options(format!("failed to read rego policy {path}"))
                    .with_source(e)
            })?,
            (None, None) => {
                return Err(AuthzError::invalid_options(
                    "local opa mode needs a rego policy or policy path",
                ));
            }
        };
        LocalEngine::compile(rego, opa.query.clone())
    }

    fn remote(options: &AuthorizerOptions) -> AuthzResult<RemoteClient> {
        let url = options
            .opa
            .url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AuthzError::invalid_options("remote opa mode needs a url"))?;
        reqwest::Url::parse(url).map_err(|e| {
            AuthzError::invalid_options(format!("invalid opa url {url:?}")).with_source(e)
        })?;
        let http = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| AuthzError::internal("failed to build http client").with_source(e))?;
        Ok(RemoteClient {
            http,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Authorizer for OpaAuthorizer {
    async fn init(&self, options: AuthorizerOptions) -> AuthzResult<()> {
        options.ensure_enabled(AuthorizerKind::Opa)?;
        let state = match options.opa.mode {
            OpaMode::Local => OpaState::Local(Self::local(&options).await?),
            OpaMode::Remote => OpaState::Remote(Self::remote(&options)?),
        };
        info!(
            provider = PROVIDER,
            mode = ?options.opa.mode,
            query = %options.opa.query,
            "Initialized authorizer"
        );
        self.state
            .initialize(state)
            .map_err(|e| AuthzError::lifecycle(PROVIDER, e))
    }

    async fn check(
        &self,
        subject: &str,
        object: &str,
        action: &str,
        domain: &str,
    ) -> AuthzResult<bool> {
        let input = Input {
            subject,
            object,
            action,
            domain,
        };
        let allowed = match &*self.state()? {
            OpaState::Local(engine) => engine.evaluate(&input).await?,
            OpaState::Remote(client) => client.allow(&input).await?,
        };
        debug!(provider = PROVIDER, subject, object, action, domain, allowed, "decision");
        Ok(allowed)
    }

    async fn batch_enforce(
        &self,
        subjects: &[String],
        objects: &[String],
        actions: &[String],
        domains: &[String],
    ) -> AuthzResult<Vec<bool>> {
        check_batch_lengths(subjects, objects, actions, domains)?;
        let inputs: Vec<Input<'_>> = subjects
            .iter()
            .zip(objects)
            .zip(actions)
            .zip(domains)
            .map(|(((subject, object), action), domain)| Input {
                subject,
                object,
                action,
                domain,
            })
            .collect();

        match &*self.state()? {
            OpaState::Local(engine) => {
                let mut results = Vec::with_capacity(inputs.len());
                for input in &inputs {
                    results.push(engine.evaluate(input).await?);
                }
                Ok(results)
            }
            OpaState::Remote(client) => {
                let batch: BatchDecision =
                    client.post("/batch", &json!({ "inputs": inputs })).await?;
                if batch.results.len() != inputs.len() {
                    return Err(AuthzError::remote(format!(
                        "batch returned {} decisions for {} inputs",
                        batch.results.len(),
                        inputs.len()
                    )));
                }
                Ok(batch.results)
            }
        }
    }

    async fn add_policy(&self, policy: &Policy) -> AuthzResult<bool> {
        policy.validate()?;
        let state = self.state()?;
        state
            .remote("add_policy")?
            .policies("add", std::slice::from_ref(policy))
            .await
    }

    async fn remove_policy(&self, policy: &Policy) -> AuthzResult<bool> {
        let state = self.state()?;
        state
            .remote("remove_policy")?
            .policies("remove", std::slice::from_ref(policy))
            .await
    }

    async fn add_policies(&self, policies: &[Policy]) -> AuthzResult<bool> {
        policies.iter().try_for_each(Policy::validate)?;
        let state = self.state()?;
        state.remote("add_policies")?.policies("add", policies).await
    }

    async fn remove_policies(&self, policies: &[Policy]) -> AuthzResult<bool> {
        let state = self.state()?;
        state
            .remote("remove_policies")?
            .policies("remove", policies)
            .await
    }

    async fn get_all_subjects(&self) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        Ok(state.remote("get_all_subjects")?.entities().await?.subjects)
    }

    async fn get_all_objects(&self) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        Ok(state.remote("get_all_objects")?.entities().await?.objects)
    }

    async fn get_all_actions(&self) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        Ok(state.remote("get_all_actions")?.entities().await?.actions)
    }

    async fn get_all_domains(&self) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        Ok(state.remote("get_all_domains")?.entities().await?.domains)
    }

    async fn get_all_roles(&self) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        Ok(state.remote("get_all_roles")?.entities().await?.roles)
    }

    async fn get_roles_for_user(&self, user: &str, _domain: &str) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        state
            .remote("get_roles_for_user")?
            .lookup("user_roles", user)
            .await
    }

    async fn get_users_for_role(&self, role: &str, _domain: &str) -> AuthzResult<Vec<String>> {
        let state = self.state()?;
        state
            .remote("get_users_for_role")?
            .lookup("role_users", role)
            .await
    }

    async fn has_role_for_user(&self, user: &str, role: &str, domain: &str) -> AuthzResult<bool> {
        let roles = self.get_roles_for_user(user, domain).await?;
        Ok(roles.iter().any(|r| r == role))
    }

    async fn add_role_for_user(&self, user: &str, role: &str, domain: &str) -> AuthzResult<bool> {
        let state = self.state()?;
        state
            .remote("add_role_for_user")?
            .role("add", user, role, domain)
            .await
    }

    async fn delete_role_for_user(
        &self,
        user: &str,
        role: &str,
        domain: &str,
    ) -> AuthzResult<bool> {
        let state = self.state()?;
        state
            .remote("delete_role_for_user")?
            .role("remove", user, role, domain)
            .await
    }

    async fn close(&self) -> AuthzResult<()> {
        if self.state.close().is_some() {
            info!(provider = PROVIDER, "Closed authorizer");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::extract::Json;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{get, post};
    use axum::Router;
    use serde_json::Value as JsonValue;

    use super::*;
    use crate::error::AuthzErrorCode;
    use crate::options::OpaOptions;

    const REGO: &str = r#"
package authz

import rego.v1

default allow := false

allow if {
    input.subject == "alice"
    input.action == "read"
}

allow if {
    input.domain == "admin"
}
"#;

    async fn local() -> OpaAuthorizer {
        let authz = OpaAuthorizer::new();
        authz
            .init(
                AuthorizerOptions::builder()
                    .opa(OpaOptions::builder().policy(REGO).build())
                    .build(),
            )
            .await
            .unwrap();
        authz
    }

    fn decide(input: &JsonValue) -> bool {
        input["subject"] == "alice" && input["action"] == "read"
    }

    async fn spawn_policy_service() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route(
                "/allow",
                post(|Json(body): Json<JsonValue>| async move {
                    Json(json!({ "result": decide(&body["input"]) }))
                }),
            )
            .route(
                "/batch",
                post(|Json(body): Json<JsonValue>| async move {
                    let results: Vec<bool> = body["inputs"]
                        .as_array()
                        .map(|inputs| inputs.iter().map(decide).collect())
                        .unwrap_or_default();
                    Json(json!({ "results": results }))
                }),
            )
            .route(
                "/policies",
                post(|Json(body): Json<JsonValue>| async move {
                    Json(json!({ "result": body["operation"] == "add" }))
                }),
            )
            .route(
                "/roles",
                post(|| async { HttpStatus::INTERNAL_SERVER_ERROR }),
            )
            .route(
                "/v1/data/authz/entities",
                get(|| async {
                    Json(json!({ "result": {
                        "subjects": ["alice", "bob"],
                        "roles": ["admin"],
                    }}))
                }),
            )
            .route(
                "/v1/data/authz/user_roles",
                get(|| async { Json(json!({ "result": { "alice": ["admin", "auditor"] } })) }),
            )
            .route(
                "/v1/data/authz/role_users",
                get(|| async { Json(json!({ "result": { "admin": ["alice"] } })) }),
            )
            .route(
                "/slow/allow",
                post(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Json(json!({ "result": true }))
                }),
            );

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn remote(url: String, timeout: Duration) -> OpaAuthorizer {
        let authz = OpaAuthorizer::new();
        authz
            .init(
                AuthorizerOptions::builder()
                    .engine(crate::options::AuthorizerKind::Opa)
                    .opa(OpaOptions::builder().mode(OpaMode::Remote).url(url).build())
                    .request_timeout(timeout)
                    .build(),
            )
            .await
            .unwrap();
        authz
    }

    #[tokio::test]
    async fn local_policy_decides() {
        let authz = local().await;
        assert!(authz.check("alice", "doc1", "read", "d1").await.unwrap());
        assert!(!authz.check("alice", "doc1", "write", "d1").await.unwrap());
        assert!(authz.check("bob", "doc1", "write", "admin").await.unwrap());

        let err = authz.enforce("bob", "doc1", "read", "d1").await.unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn local_undefined_query_denies() {
        let authz = OpaAuthorizer::new();
        authz
            .init(
                AuthorizerOptions::builder()
                    .opa(
                        OpaOptions::builder()
                            .policy("package authz\nimport rego.v1\n\nallow if { input.subject == \"root\" }\n")
                            .build(),
                    )
                    .build(),
            )
            .await
            .unwrap();
        assert!(!authz.check("alice", "doc1", "read", "").await.unwrap());
        assert!(authz.check("root", "doc1", "read", "").await.unwrap());
    }

    #[tokio::test]
    async fn local_rejects_bad_policy_and_mutation() {
        let authz = OpaAuthorizer::new();
        let err = authz
            .init(
                AuthorizerOptions::builder()
                    .opa(OpaOptions::builder().policy("package authz\nimport rego.v1\nallow if {").build())
                    .build(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::InvalidPolicy);

        let err = OpaAuthorizer::new()
            .init(AuthorizerOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::InvalidOptions);

        let authz = local().await;
        let err = authz
            .add_policy(&Policy::allow("bob", "doc1", "read", ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::UnsupportedOperation);
        let err = authz.get_all_roles().await.unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::UnsupportedOperation);
    }

    #[tokio::test]
    async fn local_batch_keeps_order() {
        let authz = local().await;
        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        let results = authz
            .batch_enforce(
                &s(&["bob", "alice", "alice"]),
                &s(&["doc", "doc", "doc"]),
                &s(&["read", "read", "write"]),
                &s(&["", "", ""]),
            )
            .await
            .unwrap();
        assert_eq!(results, vec![false, true, false]);
    }

    #[tokio::test]
    async fn remote_decisions_and_batch() {
        let authz = remote(spawn_policy_service().await, Duration::from_secs(5)).await;
        assert!(authz.check("alice", "doc1", "read", "d1").await.unwrap());
        assert!(!authz.check("bob", "doc1", "read", "d1").await.unwrap());

        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        let results = authz
            .batch_enforce(
                &s(&["alice", "bob"]),
                &s(&["doc", "doc"]),
                &s(&["read", "read"]),
                &s(&["d1", "d1"]),
            )
            .await
            .unwrap();
        assert_eq!(results, vec![true, false]);

        let err = authz
            .batch_enforce(&s(&["alice"]), &s(&[]), &s(&["read"]), &s(&["d1"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn remote_management_and_introspection() {
        let authz = remote(spawn_policy_service().await, Duration::from_secs(5)).await;
        let policy = Policy::allow("bob", "doc1", "read", "d1");
        assert!(authz.add_policy(&policy).await.unwrap());
        assert!(!authz.remove_policy(&policy).await.unwrap());

        assert_eq!(authz.get_all_subjects().await.unwrap(), vec!["alice", "bob"]);
        assert!(authz.get_all_objects().await.unwrap().is_empty());
        assert_eq!(
            authz.get_roles_for_user("alice", "d1").await.unwrap(),
            vec!["admin", "auditor"]
        );
        assert!(authz.get_roles_for_user("carol", "d1").await.unwrap().is_empty());
        assert!(authz.has_role_for_user("alice", "auditor", "d1").await.unwrap());
        assert_eq!(authz.get_users_for_role("admin", "d1").await.unwrap(), vec!["alice"]);

        let err = authz
            .add_role_for_user("bob", "admin", "d1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::RemoteCall);
    }

    #[tokio::test]
    async fn remote_timeout_and_config() {
        let url = spawn_policy_service().await;
        let authz = remote(format!("{url}/slow"), Duration::from_millis(100)).await;
        let err = authz.check("alice", "doc1", "read", "d1").await.unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::Timeout);

        let err = OpaAuthorizer::new()
            .init(
                AuthorizerOptions::builder()
                    .opa(OpaOptions::builder().mode(OpaMode::Remote).build())
                    .build(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::InvalidOptions);
    }

    #[tokio::test]
    async fn lifecycle() {
        let authz = OpaAuthorizer::new();
        let err = authz.check("alice", "doc", "read", "").await.unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::NotInitialized);

        let authz = local().await;
        authz.close().await.unwrap();
        let err = authz.check("alice", "doc", "read", "").await.unwrap_err();
        assert_eq!(err.code(), AuthzErrorCode::Closed);
    }
}
