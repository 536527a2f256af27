use log::debug;
use std::sync::Arc;

use crate::context::WindowContext;
use crate::error::PayloadError;
use crate::messages::{OutboundMessage, ToMqttPublisherMessage};
use crate::topics;
use crate::window_state::{OperatingMode, Position};

/// A user intent for the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Position(Position),
    Mode(OperatingMode),
}

impl Command {
    /// Only the exact text `auto` or `manual` selects the mode, anything
    /// else must be a percentage.
    pub fn from_payload(payload: &str) -> Result<Command, PayloadError> {
        match payload {
            "auto" => Ok(Command::Mode(OperatingMode::Auto)),
            "manual" => Ok(Command::Mode(OperatingMode::Manual)),
            _ => Ok(Command::Position(payload.parse()?)),
        }
    }

    pub fn to_outbound(self) -> OutboundMessage {
        match self {
            Command::Mode(mode) => OutboundMessage::new(topics::MODE, mode, true),
            Command::Position(position) => {
                OutboundMessage::new(topics::WINDOW_COMMAND, position, false)
            }
        }
    }
}

/// Fire-and-forget publication of commands. The outcome of the broker round
/// trip is only logged by the publisher session.
#[derive(Clone)]
pub struct CommandPublisher {
    context: Arc<WindowContext>,
}

impl CommandPublisher {
    pub fn new(context: Arc<WindowContext>) -> Self {
        CommandPublisher { context }
    }

    pub fn publish(&self, command: Command) {
        let message = command.to_outbound();
        debug!("Publishing {} = {}", message.topic, message.payload);
        self.context.enqueue(ToMqttPublisherMessage::Publish(message));
    }

    pub fn set_position(&self, position: Position) {
        self.publish(Command::Position(position))
    }

    pub fn set_mode(&self, mode: OperatingMode) {
        self.publish(Command::Mode(mode))
    }

    pub fn open(&self) {
        self.set_position(Position::OPEN)
    }

    pub fn close(&self) {
        self.set_position(Position::CLOSED)
    }
}
