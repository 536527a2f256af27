use async_channel::Receiver;
use error_stack::{Result, ResultExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

use log::{debug, error, info};
use rumqttc::{AsyncClient, QoS};

use crate::error::MqttError;
use crate::messages::{OutboundMessage, ToMqttPublisherMessage};

/// The outgoing half of a broker connection.
pub trait MqttSink {
    fn publish_message(
        &self,
        message: &OutboundMessage,
    ) -> impl Future<Output = Result<(), MqttError>> + Send;

    fn subscribe_filter(&self, filter: &str) -> impl Future<Output = Result<(), MqttError>> + Send;

    fn unsubscribe_filter(&self, filter: &str)
        -> impl Future<Output = Result<(), MqttError>> + Send;
}

impl MqttSink for AsyncClient {
    async fn publish_message(&self, message: &OutboundMessage) -> Result<(), MqttError> {
        self.publish(
            message.topic.clone(),
            QoS::AtMostOnce,
            message.retain,
            message.payload.clone().into_bytes(),
        )
        .await
        .map_err(|e| MqttError::ApiError(e.to_string(), format!("Publish to {}", message.topic)).into())
    }

    async fn subscribe_filter(&self, filter: &str) -> Result<(), MqttError> {
        self.subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|e| MqttError::ApiError(e.to_string(), format!("Subscribe to {filter}")).into())
    }

    async fn unsubscribe_filter(&self, filter: &str) -> Result<(), MqttError> {
        self.unsubscribe(filter)
            .await
            .map_err(|e| MqttError::ApiError(e.to_string(), format!("Unsubscribe from {filter}")).into())
    }
}

pub struct MqttPublisher<S> {
    mqtt_client: S,
    to_mqtt_publisher_channel: Receiver<ToMqttPublisherMessage>,
}

impl<S: MqttSink> MqttPublisher<S> {
    pub async fn mqtt_publisher_session(
        mqtt_client: S,
        to_mqtt_publisher_channel: Receiver<ToMqttPublisherMessage>,
        cancel_token: CancellationToken,
    ) -> Result<(), MqttError> {
        let mqtt_publisher = MqttPublisher::new(mqtt_client, to_mqtt_publisher_channel);

        mqtt_publisher.run_session(cancel_token).await
    }

    fn new(mqtt_client: S, to_mqtt_publisher_channel: Receiver<ToMqttPublisherMessage>) -> Self {
        MqttPublisher {
            mqtt_client,
            to_mqtt_publisher_channel,
        }
    }

    async fn run_session(&self, cancel_token: CancellationToken) -> Result<(), MqttError> {
        let into_context = || MqttError::Context("MQTT Publisher session".to_string());

        loop {
            let message = tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("MQTT publisher session cancelled");
                    return Ok(());
                }

                message = self.to_mqtt_publisher_channel.recv() => {
                    message
                        .map_err(|_| MqttError::ChannelClosed)
                        .change_context_lazy(into_context)?
                }
            };

            self.handle_message(message).await;
        }
    }

    /// Broker failures are logged and never retried.
    async fn handle_message(&self, message: ToMqttPublisherMessage) {
        match message {
            ToMqttPublisherMessage::Publish(message) => {
                debug!(
                    "Publishing to topic {} payload: {} (retain: {})",
                    message.topic, message.payload, message.retain
                );

                match self.mqtt_client.publish_message(&message).await {
                    Ok(()) => debug!("Published to {}", message.topic),
                    Err(e) => error!("Error publishing to {}: {:?}", message.topic, e),
                }
            }

            ToMqttPublisherMessage::Subscribe(filter) => {
                match self.mqtt_client.subscribe_filter(&filter).await {
                    Ok(()) => info!("Subscribed to {filter}"),
                    Err(e) => error!("Error subscribing to {filter}: {:?}", e),
                }
            }

            ToMqttPublisherMessage::Unsubscribe(filter) => {
                match self.mqtt_client.unsubscribe_filter(&filter).await {
                    Ok(()) => info!("Unsubscribed from {filter}"),
                    Err(e) => error!("Error unsubscribing from {filter}: {:?}", e),
                }
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub calls: Arc<Mutex<Vec<ToMqttPublisherMessage>>>,
        pub failing: bool,
    }

    impl RecordingSink {
        fn record(&self, call: ToMqttPublisherMessage) -> Result<(), MqttError> {
            self.calls.lock().unwrap().push(call);
            if self.failing {
                Err(MqttError::ApiError("request channel closed".to_string(), "test".to_string()).into())
            } else {
                Ok(())
            }
        }
    }

    impl MqttSink for RecordingSink {
        async fn publish_message(&self, message: &OutboundMessage) -> Result<(), MqttError> {
            self.record(ToMqttPublisherMessage::Publish(message.clone()))
        }

        async fn subscribe_filter(&self, filter: &str) -> Result<(), MqttError> {
            self.record(ToMqttPublisherMessage::Subscribe(filter.to_string()))
        }

        async fn unsubscribe_filter(&self, filter: &str) -> Result<(), MqttError> {
            self.record(ToMqttPublisherMessage::Unsubscribe(filter.to_string()))
        }
    }

    fn queued() -> Vec<ToMqttPublisherMessage> {
        vec![
            ToMqttPublisherMessage::Subscribe("casa/ventana/#".to_string()),
            ToMqttPublisherMessage::Publish(OutboundMessage::new("casa/ventana/cmd", 40, false)),
            ToMqttPublisherMessage::Publish(OutboundMessage::new("casa/ventana/modo", "auto", true)),
            ToMqttPublisherMessage::Unsubscribe("casa/ventana/#".to_string()),
        ]
    }

    #[tokio::test]
    async fn test_publisher_forwards_in_order_until_channel_closes() {
        let sink = RecordingSink::default();
        let (tx, rx) = async_channel::bounded(10);
        for message in queued() {
            tx.send(message).await.unwrap();
        }
        drop(tx);

        let result =
            MqttPublisher::mqtt_publisher_session(sink.clone(), rx, CancellationToken::new()).await;

        assert!(result.is_err());
        assert_eq!(*sink.calls.lock().unwrap(), queued());
    }

    #[tokio::test]
    async fn test_publish_errors_do_not_end_session() {
        let sink = RecordingSink {
            failing: true,
            ..Default::default()
        };
        let (tx, rx) = async_channel::bounded(10);
        for message in queued() {
            tx.send(message).await.unwrap();
        }
        drop(tx);

        let _ = MqttPublisher::mqtt_publisher_session(sink.clone(), rx, CancellationToken::new()).await;
        assert_eq!(sink.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_ends_session() {
        let sink = RecordingSink::default();
        let (_tx, rx) = async_channel::bounded(10);
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(MqttPublisher::mqtt_publisher_session(
            sink.clone(),
            rx,
            cancel_token.clone(),
        ));
        cancel_token.cancel();

        assert!(handle.await.unwrap().is_ok());
        assert!(sink.calls.lock().unwrap().is_empty());
    }
}
