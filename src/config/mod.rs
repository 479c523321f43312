mod settings;

pub use settings::{
    AuthFailurePolicy, ChannelConfig, LogFormat, LoggingConfig, OtelConfig, SessionConfig,
    Settings, USER_ID_PLACEHOLDER,
};
