//! Shared HTTP client construction.

use std::time::Duration;

/// HTTP client used by all HTTP-backed providers: 30s connect timeout,
/// 60s request timeout, rustls TLS, `lodestone/{version}` user-agent.
#[must_use]
pub fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(60))
        .user_agent(concat!("lodestone/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("default HTTP client construction must not fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_without_panicking() {
        let _client = default_client();
    }
}
