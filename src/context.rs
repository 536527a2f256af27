use async_channel::{Sender, TrySendError};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::environment::EnvironmentReadings;
use crate::messages::{InboundMessage, ToMqttPublisherMessage};
use crate::observable::{Observable, Registry, Subscription};
use crate::settings::SettingUpdate;
use crate::topics;
use crate::window_state::{OperatingMode, Position};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    ConnectionError(String),
    Disconnected,
    Offline,
}

/// Readiness of the single broker connection.
#[derive(Default)]
pub struct ConnectionState {
    connected: AtomicBool,
    events: Registry<ConnectionEvent>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(callback)
    }

    pub fn notify(&self, event: ConnectionEvent) {
        self.connected
            .store(event == ConnectionEvent::Connected, Ordering::Release);
        self.events.broadcast(&event);
    }
}

/// Everything the screens share, owned by the application root.
pub struct WindowContext {
    pub window: Observable<Position>,
    pub mode: Observable<OperatingMode>,
    pub settings: Registry<SettingUpdate>,
    pub readings: Observable<EnvironmentReadings>,
    pub connection: ConnectionState,
    extra_filters: Mutex<BTreeSet<String>>,
    to_mqtt_publisher_tx: Sender<ToMqttPublisherMessage>,
}

impl WindowContext {
    pub fn new(to_mqtt_publisher_tx: Sender<ToMqttPublisherMessage>) -> Self {
        WindowContext {
            window: Observable::new(),
            mode: Observable::new(),
            settings: Registry::new(),
            readings: Observable::with_value(EnvironmentReadings::default()),
            connection: ConnectionState::default(),
            extra_filters: Mutex::new(BTreeSet::new()),
            to_mqtt_publisher_tx,
        }
    }

    pub fn last_window_state(&self) -> Option<Position> {
        self.window.last()
    }

    pub fn last_mode(&self) -> Option<OperatingMode> {
        self.mode.last()
    }

    pub fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::WindowPosition(position) => {
                self.window.record_and_broadcast(position)
            }
            InboundMessage::Mode(mode) => self.mode.record_and_broadcast(mode),
            InboundMessage::Setting(update) => self.settings.broadcast(&update),
        }
    }

    /// Entry point for every PUBLISH received from the broker.
    pub fn handle_publish(&self, topic: &str, payload: &[u8]) {
        match topics::decode(topic, payload) {
            Ok(Some(message)) => {
                debug!("Received {topic}: {message:?}");
                self.dispatch(message);
            }
            Ok(None) => debug!("Ignoring message on topic {topic}"),
            Err(e) => warn!("Dropping malformed message on topic {topic}: {e}"),
        }
    }

    /// Hands a request to the publisher session. Returns false when it was
    /// dropped because the broker is not connected or the queue is full.
    pub fn enqueue(&self, message: ToMqttPublisherMessage) -> bool {
        if !self.connection.is_connected() {
            warn!("MQTT not connected, dropping {message:?}");
            return false;
        }

        match self.to_mqtt_publisher_tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!("MQTT publisher queue full, dropping {message:?}");
                false
            }
            Err(TrySendError::Closed(message)) => {
                warn!("MQTT publisher queue closed, dropping {message:?}");
                false
            }
        }
    }

    /// Adds a topic filter to the ones subscribed on every (re)connect and
    /// subscribes right away when connected.
    pub fn request_subscription(&self, filter: &str) {
        let added = self
            .extra_filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(filter.to_string());

        if added && self.connection.is_connected() {
            self.enqueue(ToMqttPublisherMessage::Subscribe(filter.to_string()));
        }
    }

    pub fn release_subscription(&self, filter: &str) {
        let removed = self
            .extra_filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(filter);

        if removed && self.connection.is_connected() {
            self.enqueue(ToMqttPublisherMessage::Unsubscribe(filter.to_string()));
        }
    }

    pub fn subscription_filters(&self) -> Vec<String> {
        let extra = self
            .extra_filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        topics::BASELINE
            .iter()
            .map(|topic| topic.to_string())
            .chain(extra.iter().cloned())
            .collect()
    }
}
