use async_channel::Receiver;
use error_stack::{Result, ResultExt};
use log::{error, info, warn};
use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS, Transport};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::{task::JoinSet, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    context::{ConnectionEvent, WindowContext},
    environment::{EnvironmentClient, EnvironmentConfig},
    error::MqttError,
    get_version,
    messages::ToMqttPublisherMessage,
    mqtt_publisher::MqttPublisher,
    mqtt_subscriber, polling, topics,
};

pub struct Started {}
pub struct Stopped {}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub client_id: String,
    pub broker_address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
}

pub struct ServiceConfig {
    pub mqtt: MqttConfig,
    pub environment: EnvironmentConfig,
    pub polling_period: Duration,
}

pub struct Service<Status = Stopped> {
    config: ServiceConfig,
    context: Arc<WindowContext>,
    to_mqtt_publisher_rx: Receiver<ToMqttPublisherMessage>,

    workers: JoinSet<()>,
    _status: PhantomData<Status>,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Service<Stopped> {
        let (to_mqtt_publisher_tx, to_mqtt_publisher_rx) = async_channel::bounded(32);

        Service {
            config,
            context: Arc::new(WindowContext::new(to_mqtt_publisher_tx)),
            to_mqtt_publisher_rx,
            workers: JoinSet::new(),
            _status: PhantomData,
        }
    }

    fn mqtt_options(config: &MqttConfig) -> MqttOptions {
        let mut mqtt_options =
            MqttOptions::new(&config.client_id, &config.broker_address, config.port);
        let last_will = LastWill::new(topics::PANEL_ONLINE, "false".as_bytes(), QoS::AtLeastOnce, true);
        mqtt_options
            .set_keep_alive(config.keep_alive)
            .set_last_will(last_will);

        if let Some(username) = &config.username {
            mqtt_options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        if config.tls {
            mqtt_options.set_transport(Transport::tls_with_default_config());
        }

        mqtt_options
    }

    async fn connect_to_mqtt_broker(config: &MqttConfig) -> Result<(AsyncClient, EventLoop), MqttError> {
        let into_context = || {
            MqttError::Context(format!(
                "Connecting to MQTT broker '{}:{}'",
                config.broker_address, config.port
            ))
        };

        let (mqtt_client, event_loop) = AsyncClient::new(Self::mqtt_options(config), 10);

        // Publish active state
        mqtt_client
            .publish(topics::PANEL_ONLINE, QoS::AtLeastOnce, true, "true".as_bytes())
            .await
            .change_context_lazy(into_context)?;

        let version = get_version();
        mqtt_client
            .publish(topics::PANEL_VERSION, QoS::AtLeastOnce, true, version.as_bytes())
            .await
            .change_context_lazy(into_context)?;

        Ok((mqtt_client, event_loop))
    }

    async fn mqtt_session(
        config: &MqttConfig,
        context: Arc<WindowContext>,
        to_mqtt_publisher_rx: Receiver<ToMqttPublisherMessage>,
    ) {
        let publisher_cancel_token = CancellationToken::new();
        let subscriber_cancel_token = publisher_cancel_token.clone();
        // Both sessions stop if this worker is aborted
        let _cancel_on_drop = publisher_cancel_token.clone().drop_guard();

        let (mqtt_client, event_loop) = match Service::connect_to_mqtt_broker(config).await {
            Ok((mqtt_client, event_loop)) => (mqtt_client, event_loop),
            Err(e) => {
                info!("Error connecting to MQTT broker: {:?}", e);
                return;
            }
        };

        let publisher_client = mqtt_client.clone();
        let publish_handle = tokio::spawn(async move {
            match MqttPublisher::mqtt_publisher_session(
                publisher_client,
                to_mqtt_publisher_rx,
                publisher_cancel_token.clone(),
            )
            .await
            {
                Ok(_) => info!("MQTT publisher session finished"),
                Err(e) => info!("MQTT publisher session finished with error: {:?}", e),
            }

            // This should ensure that the subscriber session is also cancelled
            publisher_cancel_token.cancel();
        });

        let subscriber_handle = tokio::spawn(async move {
            match mqtt_subscriber::mqtt_subscriber_session(
                event_loop,
                mqtt_client,
                context,
                subscriber_cancel_token.clone(),
            )
            .await
            {
                Ok(_) => info!("MQTT subscriber session finished"),
                Err(e) => info!("MQTT subscriber session finished with error: {:?}", e),
            }

            // This should ensure that the publisher session is cancelled
            subscriber_cancel_token.cancel();
        });

        if let Err(e) = publish_handle.await {
            error!("MQTT publisher task failed: {e}");
        }
        if let Err(e) = subscriber_handle.await {
            error!("MQTT subscriber task failed: {e}");
        }
    }

    /// Throws away whatever was queued for a session that no longer exists,
    /// so nothing reaches the broker after a reconnect.
    fn discard_pending(to_mqtt_publisher_rx: &Receiver<ToMqttPublisherMessage>) -> usize {
        let mut discarded = 0;
        while to_mqtt_publisher_rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    /// Keeps one broker session alive for the lifetime of the process,
    /// waiting a fixed delay between attempts.
    async fn mqtt_worker(
        config: MqttConfig,
        context: Arc<WindowContext>,
        to_mqtt_publisher_rx: Receiver<ToMqttPublisherMessage>,
    ) {
        loop {
            info!("Starting MQTT session with {}", config.broker_address);
            Service::mqtt_session(&config, context.clone(), to_mqtt_publisher_rx.clone()).await;
            context.connection.notify(ConnectionEvent::Offline);

            let discarded = Service::discard_pending(&to_mqtt_publisher_rx);
            if discarded > 0 {
                warn!("Dropped {discarded} messages queued while the broker session was down");
            }

            info!(
                "MQTT terminated, waiting {} seconds before reconnecting",
                config.reconnect_delay.as_secs_f32()
            );
            tokio::time::sleep(config.reconnect_delay).await;
        }
    }
}

impl<Status> Service<Status> {
    pub fn context(&self) -> Arc<WindowContext> {
        self.context.clone()
    }
}

impl Service<Stopped> {
    pub async fn start(mut self) -> Service<Started> {
        // Create mqtt worker
        let mqtt_config = self.config.mqtt.clone();
        let context = self.context.clone();
        let to_mqtt_publisher_rx = self.to_mqtt_publisher_rx.clone();

        self.workers.spawn(async move {
            Self::mqtt_worker(mqtt_config, context, to_mqtt_publisher_rx).await
        });

        // Create polling worker
        let environment = EnvironmentClient::new(self.config.environment.clone());
        let polling_period = self.config.polling_period;
        let context = self.context.clone();
        self.workers.spawn(async move {
            polling::polling_worker(polling_period, environment, context).await;
        });

        info!("Service started");
        Service {
            config: self.config,
            context: self.context,
            to_mqtt_publisher_rx: self.to_mqtt_publisher_rx,
            workers: self.workers,
            _status: PhantomData,
        }
    }
}

impl Service<Started> {
    pub async fn stop(mut self) -> Service<Stopped> {
        self.workers.shutdown().await;
        self.context.connection.notify(ConnectionEvent::Offline);
        info!("Service stopped");

        Service {
            config: self.config,
            context: self.context,
            to_mqtt_publisher_rx: self.to_mqtt_publisher_rx,
            workers: self.workers,
            _status: PhantomData,
        }
    }
}
