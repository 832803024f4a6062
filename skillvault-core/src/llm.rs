//! External language-model boundary.
//!
//! The transport (HTTP client, retries, model choice) lives outside the
//! core; the core decides what text crosses this boundary and wraps every
//! call in a bounded timeout.

use async_trait::async_trait;
use std::fmt;

/// Failure of the external polish call. Timeouts are mapped by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolishError(pub String);

impl fmt::Display for PolishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "polish failed: {}", self.0)
    }
}

impl std::error::Error for PolishError {}

/// External LLM contract: returns the first text block of the reply, or an
/// empty string.
#[async_trait]
pub trait Polisher: Send + Sync {
    async fn polish(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        api_key: &str,
    ) -> Result<String, PolishError>;
}

/// Canned polisher (tests and offline embedding).
pub struct StaticPolisher {
    reply: String,
}

impl StaticPolisher {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl Polisher for StaticPolisher {
    async fn polish(
        &self,
        _system: &str,
        _user: &str,
        _max_tokens: u32,
        _api_key: &str,
    ) -> Result<String, PolishError> {
        Ok(self.reply.clone())
    }
}
