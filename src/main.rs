mod command;
mod console;
mod context;
mod environment;
mod error;
mod messages;
mod mqtt_publisher;
mod mqtt_subscriber;
mod observable;
mod panel;
mod polling;
mod service;
mod settings;
mod topics;
mod window_state;

use log::{error, info};
use rustop::opts;
use service::{MqttConfig, ServiceConfig};
use tokio::io::BufReader;
use tokio::time::Duration;

use environment::EnvironmentConfig;

#[allow(dead_code)]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn get_version() -> String {
    format!("{} ({})", built_info::PKG_VERSION, built_info::BUILT_TIME_UTC)
}

fn default_client_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("window-panel-{millis}")
}

#[tokio::main]
async fn main() {
    let (args, _) = opts! {
        synopsis "MQTT window control panel";
        param mqtt:String, desc: "MQTT broker to connect";
        opt port:u16=1883, desc: "MQTT broker port";
        opt tls:bool, desc: "Connect to the broker using TLS";
        opt username:Option<String>, desc: "MQTT user name";
        opt password:Option<String>, desc: "MQTT password";
        opt client_id:Option<String>, desc: "MQTT client id";
        opt keep_alive:u64=60, desc: "MQTT keep alive (in seconds)";
        opt reconnect:u64=2, desc: "Delay between reconnection attempts (in seconds)";
        opt polling:u64=300, desc: "Environmental readings polling period (in seconds)";
        opt weather_url:Option<String>, desc: "Weather station uplink storage URL";
        opt weather_token:Option<String>, desc: "Bearer token for the weather station URL";
        opt co2_url:Option<String>, desc: "Indoor CO2 reading URL";
        opt temperature_url:Option<String>, desc: "Indoor temperature reading URL";
    }.parse_or_exit();

    env_logger::init();

    let config = ServiceConfig {
        mqtt: MqttConfig {
            client_id: args.client_id.unwrap_or_else(default_client_id),
            broker_address: args.mqtt,
            port: args.port,
            username: args.username,
            password: args.password,
            tls: args.tls,
            keep_alive: Duration::from_secs(args.keep_alive),
            reconnect_delay: Duration::from_secs(args.reconnect),
        },
        environment: EnvironmentConfig {
            uplink_url: args.weather_url,
            uplink_token: args.weather_token,
            co2_url: args.co2_url,
            temperature_url: args.temperature_url,
        },
        polling_period: Duration::from_secs(args.polling),
    };

    info!("Window panel {}", get_version());
    let service = service::Service::new(config);
    let context = service.context();

    let service = service.start().await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Error waiting for Ctrl-C: {e}");
            }
        }

        _ = console::run_console(context, BufReader::new(tokio::io::stdin())) => {}
    }

    let _ = service.stop().await;
}

