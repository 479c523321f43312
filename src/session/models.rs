use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Alert severity as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Alert record carried in the `data` member of an `alert` message.
///
/// Every field is optional so partial records from the server still reach
/// the feed. Unknown members are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertNotice {
    #[serde(default)]
    pub id: Option<i64>,
    /// e.g. "anomaly", "critical", "warning"
    #[serde(default)]
    pub alert_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Option<AlertSeverity>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Vital readings carried in the `data` member of a `health_update` message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VitalsUpdate {
    #[serde(default)]
    pub heart_rate: Option<f64>,
    #[serde(default)]
    pub blood_oxygen: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub blood_pressure_systolic: Option<f64>,
    #[serde(default)]
    pub blood_pressure_diastolic: Option<f64>,
    #[serde(default)]
    pub activity_level: Option<String>,
    #[serde(default)]
    pub anomaly_score: Option<f64>,
    #[serde(default)]
    pub is_anomaly: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Connection status as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connection lost, a reconnect is scheduled
    Reconnecting,
    /// Reconnection gave up
    Offline,
}
