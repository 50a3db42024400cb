use serde::{Deserialize, Serialize};

/// Environment variable read by [`RuntimeConfig::from_env`].
pub const DEBUG_ENV_VAR: &str = "TETHER_PROMISE_DEBUG";

/// Options shared by every promise created from one [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Log scheduler and executor failures before they become rejections.
    pub debug: bool,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn from_env() -> Self {
        let debug = std::env::var(DEBUG_ENV_VAR)
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        Self { debug }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
