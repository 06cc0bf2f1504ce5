use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AuthzError, AuthzResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(AuthzError::invalid_policy(format!("unknown effect {other:?}"))),
        }
    }
}

/// One permission rule: `subject` may (or may not) `action` on `object` in `domain`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Policy {
    pub subject: String,
    pub object: String,
    pub action: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub effect: Effect,
}

impl Policy {
    pub fn allow(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
            domain: domain.into(),
            effect: Effect::Allow,
        }
    }

    pub fn deny(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::allow(subject, object, action, domain)
        }
    }

    pub fn validate(&self) -> AuthzResult<()> {
        if self.subject.is_empty() || self.object.is_empty() || self.action.is_empty() {
            return Err(AuthzError::invalid_policy(
                "policy subject, object and action are required",
            ));
        }
        Ok(())
    }
}

/// A role grant `user -> role` scoped to a domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleBinding {
    pub user: String,
    pub role: String,
    #[serde(default)]
    pub domain: String,
}

impl RoleBinding {
    pub fn new(user: impl Into<String>, role: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            domain: domain.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn effect_defaults_to_allow_on_the_wire() {
        let policy: Policy =
            serde_json::from_value(json!({"subject": "a", "object": "o", "action": "read"})).unwrap();
        assert_eq!(policy.effect, Effect::Allow);
        assert_eq!(policy.domain, "");

        let value = serde_json::to_value(Policy::deny("a", "o", "read", "d")).unwrap();
        assert_eq!(value["effect"], "deny");
    }

    #[test]
    fn validate_requires_core_fields() {
        assert!(Policy::allow("a", "o", "read", "").validate().is_ok());
        assert!(Policy::allow("", "o", "read", "").validate().is_err());
    }
}
