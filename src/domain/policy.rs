use std::fmt;

use serde::{Deserialize, Serialize};

use super::InboundEvent;

/// Which events share a score counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    Global,      // one counter for the whole deployment
    #[default]
    PerIdentity, // one counter per originating account
}

pub const GLOBAL_SCOPE: &str = "global";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ScopeMode {
    pub fn scope_of(self, event: &InboundEvent) -> ScopeId {
        match self {
            ScopeMode::Global => ScopeId::new(GLOBAL_SCOPE),
            ScopeMode::PerIdentity if event.scope_id.trim().is_empty() => {
                ScopeId::new(GLOBAL_SCOPE)
            }
            ScopeMode::PerIdentity => ScopeId::new(event.scope_id.trim()),
        }
    }
}

/// Deterministic key names in the shared store.
#[derive(Clone, Debug)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn counter(&self, scope: &ScopeId) -> String {
        format!("{}:score:{}", self.prefix, scope)
    }

    pub fn lock(&self, scope: &ScopeId) -> String {
        format!("{}:lock:{}", self.prefix, scope)
    }

    pub fn batch(&self, scope: &ScopeId) -> String {
        format!("{}:batch:{}", self.prefix, scope)
    }

    pub fn processed(&self, event_id: &str) -> String {
        format!("{}:seen:{}", self.prefix, event_id)
    }

    pub fn outbox(&self) -> String {
        format!("{}:outbox", self.prefix)
    }

    /// Held by whichever instance is currently relaying the outbox.
    pub fn relay_lease(&self) -> String {
        format!("{}:relay", self.prefix)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("inboxpulse")
    }
}
