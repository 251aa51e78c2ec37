use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Registry key assigned at registration. Never supplied by the caller.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| format!("{s} is not a valid subscriber identifier. {e}"))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<Uuid> for SubscriberId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
