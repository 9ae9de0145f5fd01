//! Test configuration helpers

use airwall_bundler::Config;
use airwall_bundler::config::RetryConfig;
use std::path::Path;
use std::time::Duration;

/// Client id sent by every test collector
pub const TEST_CLIENT_ID: &str = "test-client";

/// API token sent by every test collector
pub const TEST_API_TOKEN: &str = "test-token";

/// Configuration pointing at a mock controller, storing bundles in `download_path`
///
/// Polling and retries are shortened so a cycle finishes in milliseconds.
pub fn test_config(controller_uri: &str, download_path: &Path, ids: &[&str]) -> Config {
    let mut config = Config {
        interval: Duration::from_secs(60),
        rollover: Duration::from_secs(60),
        download_path: download_path.to_path_buf(),
        airwall_ids: ids.iter().map(|id| id.to_string()).collect(),
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..Default::default()
    };
    config.connection.conductor_url = controller_uri.to_string();
    config.connection.client_id = TEST_CLIENT_ID.to_string();
    config.connection.api_token = TEST_API_TOKEN.to_string();
    config.connection.request_timeout = Duration::from_secs(5);
    config.polling.poll_interval = Duration::from_millis(20);
    config.polling.job_timeout = Duration::from_secs(10);
    config
}
