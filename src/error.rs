use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("{0}")]
    Context(String),

    #[error("MQTT client error: {0} ({1})")]
    ApiError(String, String),

    #[error("Publisher channel closed")]
    ChannelClosed,

    #[error("Broker closed the connection")]
    Disconnected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Invalid window position: '{0}'")]
    InvalidPosition(String),

    #[error("Invalid operating mode: '{0}'")]
    InvalidMode(String),

    #[error("Invalid time of day: '{0}'")]
    InvalidTime(String),

    #[error("Invalid number: '{0}'")]
    InvalidNumber(String),

    #[error("Invalid boolean: '{0}'")]
    InvalidBool(String),

    #[error("Payload is not valid UTF-8")]
    NotUtf8,
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("{0}")]
    Context(String),

    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    #[error("Invalid uplink JSON")]
    InvalidJson(#[from] serde_json::Error),
}
