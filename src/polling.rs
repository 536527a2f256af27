use std::sync::Arc;
use tokio::time::Duration;

use log::{debug, error};

use crate::context::WindowContext;
use crate::environment::EnvironmentClient;

/// Refreshes the environmental readings now and then every `poll_period`.
/// Each fetch runs on its own task; a slow fetch may still be in flight
/// when the next round starts, whichever finishes last wins.
pub async fn polling_worker(
    poll_period: Duration,
    environment: EnvironmentClient,
    context: Arc<WindowContext>,
) {
    loop {
        debug!("Polling environmental readings");

        let (client, ctx) = (environment.clone(), context.clone());
        tokio::spawn(async move {
            if let Err(e) = client.refresh_weather(&ctx.readings).await {
                error!("Error fetching weather station data: {:?}", e);
            }
        });

        let (client, ctx) = (environment.clone(), context.clone());
        tokio::spawn(async move {
            if let Err(e) = client.refresh_co2(&ctx.readings).await {
                error!("Error fetching CO2 reading: {:?}", e);
            }
        });

        let (client, ctx) = (environment.clone(), context.clone());
        tokio::spawn(async move {
            if let Err(e) = client.refresh_indoor_temperature(&ctx.readings).await {
                error!("Error fetching indoor temperature: {:?}", e);
            }
        });

        tokio::time::sleep(poll_period).await;
    }
}
