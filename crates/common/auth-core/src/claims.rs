use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CLAIM_DOMAIN, CLAIM_SCOPE};

/// Claims bag produced by token validation.
///
/// The registered JWT claims live in typed fields; anything a provider adds
/// (`scope`, `refresh_exp`, `roles`, `email`, ...) is kept in [`AuthClaims::extra`]
/// and flattened back onto the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "audience")]
    pub aud: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "numeric_date")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "numeric_date")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "numeric_date")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subject(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    pub fn with_issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    pub fn with_audience<I, S>(mut self, aud: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aud = aud.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_domain(mut self, dom: impl Into<String>) -> Self {
        self.dom = Some(dom.into());
        self
    }

    pub fn with_expiration(mut self, exp: i64) -> Self {
        self.exp = Some(exp);
        self
    }

    pub fn with_claim(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value.into());
        self
    }

    pub fn subject(&self) -> Option<&str> {
        self.sub.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.iss.as_deref()
    }

    pub fn audience(&self) -> &[String] {
        &self.aud
    }

    pub fn domain(&self) -> Option<&str> {
        self.dom.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.jti.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.nbf.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// A bag without `exp` never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp.is_some_and(|exp| now.timestamp() > exp)
    }

    /// Looks up any claim, registered or custom, as a JSON value.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "sub" => self.sub.clone().map(Value::from),
            "iss" => self.iss.clone().map(Value::from),
            "aud" if self.aud.is_empty() => None,
            "aud" => Some(Value::from(self.aud.clone())),
            "exp" => self.exp.map(Value::from),
            "nbf" => self.nbf.map(Value::from),
            "iat" => self.iat.map(Value::from),
            "jti" => self.jti.clone().map(Value::from),
            CLAIM_DOMAIN => self.dom.clone().map(Value::from),
            _ => self.extra.get(key).cloned(),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match key {
            "sub" => self.subject(),
            "iss" => self.issuer(),
            "jti" => self.id(),
            CLAIM_DOMAIN => self.domain(),
            _ => self.extra.get(key).and_then(Value::as_str),
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match key {
            "exp" => self.exp,
            "nbf" => self.nbf,
            "iat" => self.iat,
            _ => self.extra.get(key).and_then(numeric_date::value_as_secs),
        }
    }

    /// Sets a claim, routing registered names into their typed fields.
    ///
    /// Values of the wrong type for a registered claim are dropped.
    pub fn set(&mut self, key: &str, value: Value) {
        match key {
            "sub" => self.sub = value.as_str().map(str::to_owned),
            "iss" => self.iss = value.as_str().map(str::to_owned),
            "aud" => self.aud = audience::from_value(&value),
            "exp" => self.exp = numeric_date::value_as_secs(&value),
            "nbf" => self.nbf = numeric_date::value_as_secs(&value),
            "iat" => self.iat = numeric_date::value_as_secs(&value),
            "jti" => self.jti = value.as_str().map(str::to_owned),
            CLAIM_DOMAIN => self.dom = value.as_str().map(str::to_owned),
            _ => {
                self.extra.insert(key.to_owned(), value);
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let previous = self.get(key);
        match key {
            "sub" => self.sub = None,
            "iss" => self.iss = None,
            "aud" => self.aud.clear(),
            "exp" => self.exp = None,
            "nbf" => self.nbf = None,
            "iat" => self.iat = None,
            "jti" => self.jti = None,
            CLAIM_DOMAIN => self.dom = None,
            _ => {
                self.extra.remove(key);
            }
        }
        previous
    }

    /// Fills every claim that is unset here from `template`.
    pub fn merge_missing(&mut self, template: &AuthClaims) {
        fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }

        fill(&mut self.sub, &template.sub);
        fill(&mut self.iss, &template.iss);
        fill(&mut self.exp, &template.exp);
        fill(&mut self.nbf, &template.nbf);
        fill(&mut self.iat, &template.iat);
        fill(&mut self.jti, &template.jti);
        fill(&mut self.dom, &template.dom);
        if self.aud.is_empty() {
            self.aud.clone_from(&template.aud);
        }
        for (key, value) in &template.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Roles from a `roles` array or a single `role` string claim.
    pub fn roles(&self) -> Vec<String> {
        if let Some(Value::Array(values)) = self.extra.get("roles") {
            return values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect();
        }
        self.extra
            .get("role")
            .and_then(Value::as_str)
            .map(|role| vec![role.to_owned()])
            .unwrap_or_default()
    }

    pub fn scopes(&self) -> Vec<&str> {
        self.extra
            .get(CLAIM_SCOPE)
            .and_then(Value::as_str)
            .map(|scope| scope.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn standard(&self) -> StandardClaims {
        StandardClaims {
            subject: self.sub.clone(),
            issuer: self.iss.clone(),
            audience: self.aud.clone(),
            expires_at: self.exp,
            not_before: self.nbf,
            issued_at: self.iat,
            id: self.jti.clone(),
        }
    }
}

/// The registered-claim subset of an [`AuthClaims`] bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardClaims {
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub expires_at: Option<i64>,
    pub not_before: Option<i64>,
    pub issued_at: Option<i64>,
    pub id: Option<String>,
}

impl StandardClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now().timestamp() > exp)
    }
}

/// `aud` is a string when it names a single audience and an array otherwise.
mod audience {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(aud: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        match aud {
            [single] => serializer.serialize_str(single),
            many => serializer.collect_seq(many),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(from_value(&value))
    }

    pub fn from_value(value: &Value) -> Vec<String> {
        match value {
            Value::String(single) => vec![single.clone()],
            Value::Array(many) => many
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// NumericDate values may arrive as floats from some issuers.
mod numeric_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(secs: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match secs {
            Some(secs) => serializer.serialize_i64(*secs),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value_as_secs(&value)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom("expected a numeric date")),
        }
    }

    pub fn value_as_secs(value: &Value) -> Option<i64> {
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|secs| secs.trunc() as i64))
    }
}
