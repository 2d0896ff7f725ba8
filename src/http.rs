use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("buildlist-api-rs/", env!("CARGO_PKG_VERSION"));

pub fn build_client() -> Client {
    let timeout = env_secs("HTTP_TIMEOUT_SECS").unwrap_or(15);
    let connect = env_secs("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5);
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
}
