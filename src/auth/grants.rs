//! Permission grants carried by signed tokens

use serde::{Deserialize, Serialize};
use std::fmt;

/// The wildcard subject matching every subject
pub const FULL_WILDCARD: &str = ">";

/// Publish/subscribe subject patterns a connection may use.
///
/// Patterns are kept as opaque strings in the order the issuer wrote them;
/// matching them against subjects is the data plane's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub publish: Vec<String>,
    #[serde(default)]
    pub subscribe: Vec<String>,
}

impl Permissions {
    pub fn new(publish: Vec<String>, subscribe: Vec<String>) -> Self {
        Self { publish, subscribe }
    }

    /// Publish and subscribe on everything
    pub fn allow_all() -> Self {
        Self::new(vec![FULL_WILDCARD.to_string()], vec![FULL_WILDCARD.to_string()])
    }

    /// Add a publish pattern, skipping duplicates
    pub fn add_publish(&mut self, pattern: impl Into<String>) {
        push_unique(&mut self.publish, pattern.into());
    }

    /// Add a subscribe pattern, skipping duplicates
    pub fn add_subscribe(&mut self, pattern: impl Into<String>) {
        push_unique(&mut self.subscribe, pattern.into());
    }

    /// True when neither list holds a pattern
    pub fn is_empty(&self) -> bool {
        self.publish.is_empty() && self.subscribe.is_empty()
    }
}

fn push_unique(patterns: &mut Vec<String>, pattern: String) {
    if !patterns.iter().any(|p| p == &pattern) {
        patterns.push(pattern);
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "publish=[{}] subscribe=[{}]",
            self.publish.join(","),
            self.subscribe.join(",")
        )
    }
}
