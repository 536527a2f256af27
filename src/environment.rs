use error_stack::{Result, ResultExt};
use log::debug;
use serde::Deserialize;

use crate::error::EnvironmentError;
use crate::observable::Observable;

/// Display-only readings, refreshed from the HTTP collaborators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentReadings {
    pub indoor_temperature: f64,
    pub outdoor_temperature: f64,
    pub co2_ppm: i64,
    pub wind_speed: f64,
    pub rainfall: f64,
    pub humidity: f64,
}

impl Default for EnvironmentReadings {
    fn default() -> Self {
        EnvironmentReadings {
            indoor_temperature: 22.5,
            outdoor_temperature: 0.0,
            co2_ppm: 650,
            wind_speed: 0.0,
            rainfall: 0.0,
            humidity: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StoredUplink {
    result: Option<UplinkResult>,
}

#[derive(Debug, Deserialize)]
struct UplinkResult {
    uplink_message: Option<UplinkMessage>,
}

#[derive(Debug, Deserialize)]
struct UplinkMessage {
    decoded_payload: Option<WeatherPayload>,
}

/// Weather station fields; a missing or null value reads as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct WeatherPayload {
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    windspeed: Option<f64>,
    #[serde(default, rename = "LLuvia")]
    rain: Option<f64>,
}

impl WeatherPayload {
    pub fn apply(&self, readings: &mut EnvironmentReadings) {
        readings.outdoor_temperature = self.temperature.unwrap_or_default();
        readings.humidity = self.humidity.unwrap_or_default();
        readings.wind_speed = self.windspeed.unwrap_or_default();
        readings.rainfall = self.rain.unwrap_or_default();
    }
}

/// The storage API answers with JSON objects laid end to end. Only the last
/// one matters.
pub fn parse_stored_uplinks(body: &str) -> Result<Option<WeatherPayload>, EnvironmentError> {
    let mut last = None;

    for uplink in serde_json::Deserializer::from_str(body).into_iter::<StoredUplink>() {
        last = Some(
            uplink
                .map_err(EnvironmentError::InvalidJson)
                .attach_printable("Parsing stored uplink messages")?,
        );
    }

    Ok(last
        .and_then(|uplink| uplink.result)
        .and_then(|result| result.uplink_message)
        .and_then(|message| message.decoded_payload))
}

fn leading_number(text: &str, allow_fraction: bool) -> &str {
    let text = text.trim_start();
    let mut seen_dot = false;
    let end = text
        .char_indices()
        .find(|&(index, c)| {
            let accepted = match c {
                '0'..='9' => true,
                '-' | '+' => index == 0,
                '.' if allow_fraction && !seen_dot => {
                    seen_dot = true;
                    true
                }
                _ => false,
            };
            !accepted
        })
        .map(|(index, _)| index)
        .unwrap_or(text.len());

    &text[..end]
}

/// Integer at the start of a plaintext reading, e.g. `"812 ppm"`.
pub fn parse_integer_reading(text: &str) -> Option<i64> {
    leading_number(text, false).parse().ok()
}

/// Decimal at the start of a plaintext reading, e.g. `"21.4\n"`.
pub fn parse_decimal_reading(text: &str) -> Option<f64> {
    leading_number(text, true).parse().ok()
}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentConfig {
    pub uplink_url: Option<String>,
    pub uplink_token: Option<String>,
    pub co2_url: Option<String>,
    pub temperature_url: Option<String>,
}

#[derive(Clone)]
pub struct EnvironmentClient {
    http: reqwest::Client,
    config: EnvironmentConfig,
}

impl EnvironmentClient {
    pub fn new(config: EnvironmentConfig) -> Self {
        EnvironmentClient {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn get_text(&self, request: reqwest::RequestBuilder, url: &str) -> Result<String, EnvironmentError> {
        let into_context = || EnvironmentError::Context(format!("Fetching '{url}'"));

        request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(EnvironmentError::Http)
            .change_context_lazy(into_context)?
            .text()
            .await
            .map_err(EnvironmentError::Http)
            .change_context_lazy(into_context)
    }

    /// Weather station readings. Leaves `readings` unchanged when the body
    /// carries no decoded payload.
    pub async fn refresh_weather(
        &self,
        readings: &Observable<EnvironmentReadings>,
    ) -> Result<(), EnvironmentError> {
        let Some(url) = &self.config.uplink_url else {
            return Ok(());
        };

        let mut request = self.http.get(url).header(reqwest::header::ACCEPT, "text/plain");
        if let Some(token) = &self.config.uplink_token {
            request = request.bearer_auth(token);
        }

        let body = self.get_text(request, url).await?;
        match parse_stored_uplinks(&body)? {
            Some(weather) => {
                debug!("Weather station: {weather:?}");
                readings.update(|r| weather.apply(r));
            }
            None => debug!("Weather station returned no decoded payload"),
        }

        Ok(())
    }

    pub async fn refresh_co2(&self, readings: &Observable<EnvironmentReadings>) -> Result<(), EnvironmentError> {
        let Some(url) = &self.config.co2_url else {
            return Ok(());
        };

        let body = self.get_text(self.http.get(url), url).await?;
        match parse_integer_reading(&body) {
            Some(co2) => readings.update(|r| r.co2_ppm = co2),
            None => debug!("Ignoring CO2 reading '{}'", body.trim()),
        }

        Ok(())
    }

    pub async fn refresh_indoor_temperature(
        &self,
        readings: &Observable<EnvironmentReadings>,
    ) -> Result<(), EnvironmentError> {
        let Some(url) = &self.config.temperature_url else {
            return Ok(());
        };

        let body = self.get_text(self.http.get(url), url).await?;
        match parse_decimal_reading(&body) {
            Some(temperature) => readings.update(|r| r.indoor_temperature = temperature),
            None => debug!("Ignoring temperature reading '{}'", body.trim()),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORED: &str = r#"{"result":{"uplink_message":{"decoded_payload":{"temperature":11.5,"humidity":80,"windspeed":3.2,"LLuvia":0.4}}}}
{"result":{"uplink_message":{"decoded_payload":{"temperature":12.25,"humidity":78,"LLuvia":null}}}}"#;

    #[test]
    fn test_parse_stored_uplinks_takes_last() {
        let weather = parse_stored_uplinks(STORED).unwrap().unwrap();
        let mut readings = EnvironmentReadings::default();
        weather.apply(&mut readings);

        assert_eq!(readings.outdoor_temperature, 12.25);
        assert_eq!(readings.humidity, 78.0);
        assert_eq!(readings.wind_speed, 0.0);
        assert_eq!(readings.rainfall, 0.0);
        assert_eq!(readings.co2_ppm, 650);
    }

    #[test]
    fn test_parse_stored_uplinks_without_separator() {
        let body = r#"{"result":{}}{"result":{"uplink_message":{"decoded_payload":{"temperature":9}}}}"#;
        let weather = parse_stored_uplinks(body).unwrap().unwrap();
        let mut readings = EnvironmentReadings::default();
        weather.apply(&mut readings);
        assert_eq!(readings.outdoor_temperature, 9.0);
    }

    #[test]
    fn test_parse_stored_uplinks_empty_or_missing_payload() {
        assert_eq!(parse_stored_uplinks("").unwrap(), None);
        assert_eq!(parse_stored_uplinks("  \n").unwrap(), None);
        assert_eq!(parse_stored_uplinks(r#"{"result":{"uplink_message":{}}}"#).unwrap(), None);
        assert!(parse_stored_uplinks(r#"{"result": "#).is_err());
    }

    #[test]
    fn test_plaintext_readings() {
        assert_eq!(parse_integer_reading("812"), Some(812));
        assert_eq!(parse_integer_reading(" 812 ppm\n"), Some(812));
        assert_eq!(parse_integer_reading("812.7"), Some(812));
        assert_eq!(parse_integer_reading("n/a"), None);
        assert_eq!(parse_integer_reading(""), None);

        assert_eq!(parse_decimal_reading("21.4\n"), Some(21.4));
        assert_eq!(parse_decimal_reading("-3.5C"), Some(-3.5));
        assert_eq!(parse_decimal_reading("1.2.3"), Some(1.2));
        assert_eq!(parse_decimal_reading("error"), None);
    }

    #[tokio::test]
    async fn test_unconfigured_endpoints_are_skipped() {
        let client = EnvironmentClient::new(EnvironmentConfig::default());
        let readings = Observable::with_value(EnvironmentReadings::default());

        client.refresh_weather(&readings).await.unwrap();
        client.refresh_co2(&readings).await.unwrap();
        client.refresh_indoor_temperature(&readings).await.unwrap();

        assert_eq!(readings.last(), Some(EnvironmentReadings::default()));
    }
}
