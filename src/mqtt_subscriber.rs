use error_stack::{Report, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use log::{debug, error, info, warn};

use rumqttc::{self, AsyncClient, Event, Packet, QoS};

use crate::context::{ConnectionEvent, WindowContext};
use crate::error::MqttError;

#[derive(Debug, PartialEq, Eq)]
enum SessionStep {
    Continue,
    Subscribe(Vec<String>),
    Disconnected,
}

fn handle_event(event: &Event, context: &WindowContext) -> SessionStep {
    match event {
        Event::Incoming(Packet::ConnAck(connack)) => {
            info!("MQTT connected ({:?})", connack.code);
            context.connection.notify(ConnectionEvent::Connected);
            SessionStep::Subscribe(context.subscription_filters())
        }

        Event::Incoming(Packet::Publish(publish_packet)) => {
            debug!(
                "Received MQTT message on {}: {:?}",
                publish_packet.topic, publish_packet.payload
            );
            context.handle_publish(&publish_packet.topic, &publish_packet.payload);
            SessionStep::Continue
        }

        Event::Incoming(Packet::SubAck(suback)) => {
            debug!("Subscription acknowledged: {:?}", suback.return_codes);
            SessionStep::Continue
        }

        Event::Incoming(Packet::Disconnect) => {
            warn!("Broker disconnected the client");
            context.connection.notify(ConnectionEvent::Disconnected);
            SessionStep::Disconnected
        }

        _ => SessionStep::Continue,
    }
}

/// Drives the event loop: connection state, baseline subscriptions and
/// inbound messages. Ends on the first connection error or disconnect.
pub async fn mqtt_subscriber_session(
    mut mqtt_event_loop: rumqttc::EventLoop,
    mqtt_client: AsyncClient,
    context: Arc<WindowContext>,
    cancel_token: CancellationToken,
) -> Result<(), MqttError> {
    loop {
        let notification = tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("MQTT subscriber session cancelled");
                return Ok(());
            }

            notification = mqtt_event_loop.poll() => notification,
        };

        match notification {
            Ok(event) => match handle_event(&event, &context) {
                SessionStep::Continue => {}
                SessionStep::Subscribe(filters) => {
                    for filter in filters {
                        // The event loop is not polled while we are here, so don't wait
                        if let Err(e) = mqtt_client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                            error!("Error subscribing to {filter}: {e}");
                        }
                    }
                }
                SessionStep::Disconnected => return Err(Report::new(MqttError::Disconnected)),
            },

            Err(error) => {
                error!("MQTT connection error: {:?}", error);
                context
                    .connection
                    .notify(ConnectionEvent::ConnectionError(error.to_string()));
                return Err(Report::new(MqttError::ApiError(
                    error.to_string(),
                    "Polling MQTT event loop".to_owned(),
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics;
    use crate::window_state::{OperatingMode, Position};
    use rumqttc::{ConnAck, ConnectReturnCode, Publish};

    fn context() -> WindowContext {
        let (tx, _rx) = async_channel::bounded(4);
        WindowContext::new(tx)
    }

    fn publish(topic: &str, payload: &str) -> Event {
        Event::Incoming(Packet::Publish(Publish::new(
            topic,
            QoS::AtMostOnce,
            payload.as_bytes().to_vec(),
        )))
    }

    #[test]
    fn test_connack_marks_connected_and_subscribes() {
        let context = context();
        context.request_subscription(topics::SETTINGS_WILDCARD);

        let step = handle_event(
            &Event::Incoming(Packet::ConnAck(ConnAck {
                session_present: false,
                code: ConnectReturnCode::Success,
            })),
            &context,
        );

        assert!(context.connection.is_connected());
        assert_eq!(
            step,
            SessionStep::Subscribe(vec![
                topics::WINDOW_STATE.to_string(),
                topics::MODE_STATE.to_string(),
                topics::MODE.to_string(),
                topics::SETTINGS_WILDCARD.to_string(),
            ])
        );
    }

    #[test]
    fn test_publish_updates_cache() {
        let context = context();

        assert_eq!(handle_event(&publish(topics::WINDOW_STATE, "42"), &context), SessionStep::Continue);
        assert_eq!(handle_event(&publish(topics::MODE_STATE, "auto"), &context), SessionStep::Continue);

        assert_eq!(context.last_window_state(), Position::new(42));
        assert_eq!(context.last_mode(), Some(OperatingMode::Auto));
    }

    #[test]
    fn test_disconnect_ends_session() {
        let context = context();
        context.connection.notify(ConnectionEvent::Connected);

        let step = handle_event(&Event::Incoming(Packet::Disconnect), &context);
        assert_eq!(step, SessionStep::Disconnected);
        assert!(!context.connection.is_connected());
    }
}
