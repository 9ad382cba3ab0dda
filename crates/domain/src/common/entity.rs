use serde::{Deserialize, Serialize};

/// Rule identifier: non-empty, `[A-Za-z0-9_.-]` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

impl RuleId {
    /// Validate the identifier. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.0.is_empty() {
            return Err("rule id must not be empty".to_string());
        }
        if self.0.len() > 128 {
            return Err(format!("rule id too long ({} > 128)", self.0.len()));
        }
        if let Some(c) = self
            .0
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '_' | '.' | '-'))
        {
            return Err(format!("rule id contains invalid character '{c}'"));
        }
        Ok(())
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
