//! Tenant and model tier tables.
//!
//! These resolve a request into the `limit` handed to the decider. The
//! decider itself knows nothing about tiers.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Billing tier of the calling tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantTier {
    Free,
    Pro,
    Enterprise,
}

impl TenantTier {
    /// Admissions per window granted to this tier.
    pub fn limit(&self) -> u64 {
        match self {
            TenantTier::Free => 100,
            TenantTier::Pro => 1_000,
            TenantTier::Enterprise => 10_000,
        }
    }
}

impl FromStr for TenantTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(TenantTier::Free),
            "pro" => Ok(TenantTier::Pro),
            "enterprise" => Ok(TenantTier::Enterprise),
            other => Err(format!("unknown tenant tier: {}", other)),
        }
    }
}

impl fmt::Display for TenantTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TenantTier::Free => "free",
            TenantTier::Pro => "pro",
            TenantTier::Enterprise => "enterprise",
        };
        f.write_str(name)
    }
}

/// Cost class of a served model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Heavy,
    Standard,
    Light,
}

impl ModelTier {
    /// Admissions per window allowed against models of this tier.
    pub fn limit(&self) -> u64 {
        match self {
            ModelTier::Heavy => 50,
            ModelTier::Standard => 200,
            ModelTier::Light => 1_000,
        }
    }

    /// Tier of a known model id.
    pub fn for_model(model_id: &str) -> Option<Self> {
        match model_id {
            "gpt-4" | "gpt-4-turbo" | "claude-3-opus" => Some(ModelTier::Heavy),
            "gpt-3.5-turbo" | "claude-3-sonnet" => Some(ModelTier::Standard),
            "text-embedding-ada" | "text-embedding-3-small" => Some(ModelTier::Light),
            _ => None,
        }
    }
}

/// Effective limit for a request: the most restrictive of the known tier
/// limits, or `default` when neither tier is known.
pub fn resolve_limit(tenant: Option<TenantTier>, model_id: Option<&str>, default: u64) -> u64 {
    let tenant_limit = tenant.map(|t| t.limit());
    let model_limit = model_id.and_then(ModelTier::for_model).map(|m| m.limit());

    match (tenant_limit, model_limit) {
        (Some(t), Some(m)) => t.min(m),
        (Some(limit), None) | (None, Some(limit)) => limit,
        (None, None) => default,
    }
}

/// Subject key for a `(user, model)` pair.
///
/// The first unescaped `:` separates the parts: `\` and `:` inside the
/// user id are backslash-escaped, so distinct pairs never share a key.
/// Model ids are kept verbatim (`llama3:8b` is a common model name).
pub fn subject_key(user_id: &str, model_id: &str) -> String {
    format!("{}:{}", escape_separator(user_id), model_id)
}

fn escape_separator(part: &str) -> Cow<'_, str> {
    if !part.contains([':', '\\']) {
        return Cow::Borrowed(part);
    }
    let mut escaped = String::with_capacity(part.len() + 2);
    for c in part.chars() {
        if c == ':' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_restrictive_wins() {
        assert_eq!(resolve_limit(Some(TenantTier::Enterprise), Some("gpt-4"), 100), 50);
        assert_eq!(resolve_limit(Some(TenantTier::Free), Some("text-embedding-ada"), 100), 100);
        assert_eq!(resolve_limit(Some(TenantTier::Pro), Some("claude-3-sonnet"), 100), 200);
    }

    #[test]
    fn test_single_known_tier() {
        assert_eq!(resolve_limit(Some(TenantTier::Pro), None, 100), 1_000);
        assert_eq!(resolve_limit(Some(TenantTier::Pro), Some("unknown-model"), 100), 1_000);
        assert_eq!(resolve_limit(None, Some("gpt-3.5-turbo"), 100), 200);
    }

    #[test]
    fn test_default_when_nothing_known() {
        assert_eq!(resolve_limit(None, None, 42), 42);
        assert_eq!(resolve_limit(None, Some("llama-3"), 42), 42);
    }

    #[test]
    fn test_tenant_tier_parsing() {
        assert_eq!("enterprise".parse::<TenantTier>(), Ok(TenantTier::Enterprise));
        assert!("platinum".parse::<TenantTier>().is_err());
        assert_eq!(TenantTier::Pro.to_string(), "pro");
    }

    #[test]
    fn test_subject_key() {
        assert_eq!(subject_key("user1", "gpt-4"), "user1:gpt-4");
        assert_eq!(subject_key("user1", "llama3:8b"), "user1:llama3:8b");
    }

    #[test]
    fn test_subject_key_separates_colons_in_user_id() {
        assert_eq!(subject_key("a:b", "c"), r"a\:b:c");
        assert_ne!(subject_key("a:b", "c"), subject_key("a", "b:c"));
        assert_ne!(subject_key(r"a\", ":b"), subject_key(r"a\:", "b"));
        assert_ne!(subject_key(r"a\", "b"), subject_key("a", r"\b"));
    }
}
