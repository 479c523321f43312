use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::ChannelError;

/// Placeholder substituted with the user identity in the endpoint template
pub const USER_ID_PLACEHOLDER: &str = "{user_id}";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How a close carrying one of `auth_failure_close_codes` is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthFailurePolicy {
    /// Reconnect like any other unexpected close
    #[default]
    Retry,
    /// Stop reconnecting and report the channel as exhausted
    Terminal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Endpoint address template, `{user_id}` is replaced by the identity
    #[serde(default = "default_endpoint_template")]
    pub endpoint_template: String,
    /// Fixed delay before each reconnect attempt in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Consecutive failed attempts allowed since the last successful open
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Jitter factor applied to the reconnect delay (0.0 to 1.0)
    #[serde(default)]
    pub reconnect_jitter: f64,
    /// Keep-alive interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub auth_failure_policy: AuthFailurePolicy,
    #[serde(default = "default_auth_failure_close_codes")]
    pub auth_failure_close_codes: Vec<u16>,
    /// Outbound frames buffered per connection before sends are dropped
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Upper bound for delivering the close frame on disconnect
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_endpoint_template() -> String {
    "ws://localhost:8000/ws/{user_id}".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_auth_failure_close_codes() -> Vec<u16> {
    // policy violation, plus the application range codes the API uses for 401/403
    vec![1008, 4001, 4003]
}

fn default_outbound_buffer() -> usize {
    32
}

fn default_close_timeout_ms() -> u64 {
    1000
}

impl ChannelConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Whether a close code counts as an authentication rejection
    pub fn is_auth_failure(&self, code: u16) -> bool {
        self.auth_failure_close_codes.contains(&code)
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        if !self.endpoint_template.contains(USER_ID_PLACEHOLDER) {
            return Err(ChannelError::Validation(format!(
                "endpoint_template must contain {}",
                USER_ID_PLACEHOLDER
            )));
        }
        if !(self.endpoint_template.starts_with("ws://")
            || self.endpoint_template.starts_with("wss://"))
        {
            return Err(ChannelError::Validation(
                "endpoint_template must use the ws or wss scheme".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ChannelError::Validation(
                "heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return Err(ChannelError::Validation(
                "reconnect_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.outbound_buffer == 0 {
            return Err(ChannelError::Validation(
                "outbound_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identity used by the binary when no interactive login is involved
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "lifecare-realtime".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("channel.endpoint_template", default_endpoint_template())?
            .set_default("channel.reconnect_delay_ms", default_reconnect_delay_ms() as i64)?
            .set_default(
                "channel.max_reconnect_attempts",
                default_max_reconnect_attempts() as i64,
            )?
            .set_default(
                "channel.heartbeat_interval_ms",
                default_heartbeat_interval_ms() as i64,
            )?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // LIFECARE_CHANNEL__RECONNECT_DELAY_MS, LIFECARE_SESSION__TOKEN, ...
            .add_source(
                Environment::with_prefix("LIFECARE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("channel.auth_failure_close_codes"),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint_template: default_endpoint_template(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_jitter: 0.0,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            auth_failure_policy: AuthFailurePolicy::default(),
            auth_failure_close_codes: default_auth_failure_close_codes(),
            outbound_buffer: default_outbound_buffer(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
