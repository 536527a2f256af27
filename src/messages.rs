use crate::settings::SettingUpdate;
use crate::window_state::{OperatingMode, Position};

/// A topic/payload pair ready to go to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn new(topic: &str, payload: impl ToString, retain: bool) -> Self {
        OutboundMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToMqttPublisherMessage {
    Publish(OutboundMessage),
    Subscribe(String),
    Unsubscribe(String),
}

/// Broker traffic decoded once, at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    WindowPosition(Position),
    Mode(OperatingMode),
    Setting(SettingUpdate),
}
