/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 *
 * This program is free software: you can redistribute it
 * and/or modify it under the terms of the GNU Affero
 * General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your
 * option) any later version.
 *
 * This program is distributed in the hope that it will be
 * useful, but WITHOUT ANY WARRANTY; without even the
 * implied warranty of MERCHANTABILITY or FITNESS FOR A
 * PARTICULAR PURPOSE. See the GNU Affero General Public
 * License for more details.
 *
 * You should have received a copy of the GNU Affero General
 * Public License along with this program. If not, see
 * <https://www.gnu.org/licenses/>.
 */

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use serde::Deserialize;

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub chat_server: ChatServerConfig,
    #[serde(default)]
    pub lambda: LambdaConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

// --- HTTP front ---

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Name of the env var holding the shared key the chat-server front sends.
    #[serde(default = "default_api_key_name")]
    pub api_key_name: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            api_key_name: default_api_key_name(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            request_deadline_ms: default_request_deadline_ms(),
        }
    }
}

fn default_server_port() -> u16 {
    3320
}
fn default_api_key_name() -> String {
    "APPSGATE_API_KEY".to_string()
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}
fn default_request_deadline_ms() -> u64 {
    10_000
}

// --- Proxy engine ---

#[derive(Deserialize, Clone, Debug)]
pub struct ProxyConfig {
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default = "default_plugin_path")]
    pub plugin_path: String,
    #[serde(default)]
    pub developer_mode: bool,
    #[serde(default = "default_locale")]
    pub default_locale: String,
    #[serde(default = "default_bindings_concurrency")]
    pub bindings_concurrency: usize,
    #[serde(default = "default_notify_concurrency")]
    pub notify_concurrency: usize,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_half_open_secs")]
    pub breaker_half_open_secs: u64,
    /// Whether user and team email addresses count as public at summary level.
    #[serde(default)]
    pub show_email: bool,
    #[serde(default)]
    pub show_full_name: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
            plugin_path: default_plugin_path(),
            developer_mode: false,
            default_locale: default_locale(),
            bindings_concurrency: default_bindings_concurrency(),
            notify_concurrency: default_notify_concurrency(),
            call_timeout_ms: default_call_timeout_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_half_open_secs: default_breaker_half_open_secs(),
            show_email: false,
            show_full_name: false,
        }
    }
}

fn default_site_url() -> String {
    "http://localhost:8065".to_string()
}
fn default_plugin_path() -> String {
    "/plugins/com.mattermost.apps".to_string()
}
fn default_locale() -> String {
    "en".to_string()
}
fn default_bindings_concurrency() -> usize {
    8
}
fn default_notify_concurrency() -> usize {
    16
}
fn default_call_timeout_ms() -> u64 {
    5_000
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_half_open_secs() -> u64 {
    30
}

// --- Chat server REST API ---

#[derive(Deserialize, Clone, Debug)]
pub struct ChatServerConfig {
    #[serde(default = "default_site_url")]
    pub url: String,
    /// Name of the env var holding the chat-server bot token.
    #[serde(default = "default_chat_token_name")]
    pub token_name: String,
    #[serde(default = "default_chat_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ChatServerConfig {
    fn default() -> Self {
        Self {
            url: default_site_url(),
            token_name: default_chat_token_name(),
            timeout_ms: default_chat_timeout_ms(),
        }
    }
}

fn default_chat_token_name() -> String {
    "APPSGATE_CHAT_TOKEN".to_string()
}
fn default_chat_timeout_ms() -> u64 {
    3_000
}

// --- AWS Lambda upstream ---

#[derive(Deserialize, Clone, Debug, Default)]
pub struct LambdaConfig {
    /// Base URL of a Lambda Invoke API compatible endpoint. Lambda apps are
    /// rejected when unset.
    #[serde(default)]
    pub invoke_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

// --- Telemetry ---

#[derive(Deserialize, Clone, Debug)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            sample_rate: default_sample_rate(),
            log_level: default_log_level(),
        }
    }
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}
fn default_sample_rate() -> f64 {
    1.0
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the file named by `APPSGATE_CONFIG`,
    /// with `APPSGATE_*` environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns `config::ConfigError` if the config file is missing or malformed.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("APPSGATE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&config_path))
            .add_source(
                config::Environment::with_prefix("APPSGATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Config::load reads process-wide env vars.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn minimal_toml() -> String {
        r#"
[proxy]
site_url = "https://chat.example.com"
developer_mode = true

[server]
port = 4000
cors_origins = ["https://chat.example.com"]
"#
        .to_string()
    }

    #[test]
    fn test_load_valid_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, minimal_toml()).unwrap();

        std::env::set_var("APPSGATE_CONFIG", config_path.to_str().unwrap());
        let cfg = Config::load().unwrap();

        assert_eq!(cfg.proxy.site_url, "https://chat.example.com");
        assert!(cfg.proxy.developer_mode);
        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.server.cors_origins, vec!["https://chat.example.com"]);

        std::env::remove_var("APPSGATE_CONFIG");
    }

    #[test]
    fn test_load_missing_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("APPSGATE_CONFIG", "/tmp/appsgate_nonexistent_config_98765.toml");

        let result = Config::load();
        assert!(result.is_err(), "loading a nonexistent file should return an error");

        std::env::remove_var("APPSGATE_CONFIG");
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, minimal_toml()).unwrap();

        std::env::set_var("APPSGATE_CONFIG", config_path.to_str().unwrap());
        let cfg = Config::load().unwrap();

        assert_eq!(cfg.proxy.plugin_path, "/plugins/com.mattermost.apps");
        assert_eq!(cfg.proxy.default_locale, "en");
        assert_eq!(cfg.proxy.bindings_concurrency, 8);
        assert_eq!(cfg.proxy.call_timeout_ms, 5_000);
        assert_eq!(cfg.proxy.breaker_threshold, 5);
        assert!(!cfg.proxy.show_email, "emails are private by default");
        assert_eq!(cfg.server.api_key_name, "APPSGATE_API_KEY");
        assert_eq!(cfg.server.request_deadline_ms, 10_000);
        assert_eq!(cfg.chat_server.token_name, "APPSGATE_CHAT_TOKEN");
        assert!(cfg.lambda.invoke_url.is_none());
        assert!(!cfg.telemetry.enabled);
        assert_eq!(cfg.telemetry.log_level, "info");

        std::env::remove_var("APPSGATE_CONFIG");
    }

    #[test]
    fn test_env_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, minimal_toml()).unwrap();

        std::env::set_var("APPSGATE_CONFIG", config_path.to_str().unwrap());
        std::env::set_var("APPSGATE_PROXY__CALL_TIMEOUT_MS", "1234");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.proxy.call_timeout_ms, 1234);

        std::env::remove_var("APPSGATE_PROXY__CALL_TIMEOUT_MS");
        std::env::remove_var("APPSGATE_CONFIG");
    }

    #[test]
    fn test_proxy_section_from_toml() {
        let toml_str = r#"
site_url = "https://chat.local"
bindings_concurrency = 2
show_email = true
"#;
        let proxy: ProxyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(proxy.site_url, "https://chat.local");
        assert_eq!(proxy.bindings_concurrency, 2);
        assert!(proxy.show_email);
        assert!(!proxy.show_full_name);
        assert_eq!(proxy.notify_concurrency, 16);
    }
}
