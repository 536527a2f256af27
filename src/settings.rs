use chrono::NaiveTime;
use log::{info, warn};
use std::sync::{Arc, Mutex, PoisonError};

use crate::context::WindowContext;
use crate::error::PayloadError;
use crate::messages::{OutboundMessage, ToMqttPublisherMessage};
use crate::observable::Subscription;
use crate::topics;
use crate::window_state::{encode_clock_time, parse_clock_time, OperatingMode};

/// Automatic mode configuration, edited on the settings screen and stored on
/// the broker as one retained value per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub auto_mode: OperatingMode,
    pub schedule_enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub temperature_weight: u32,
    pub co2_weight: u32,
    pub energy_weight: u32,
    pub evaluation_interval_secs: u32,
    pub post_action_delay_secs: u32,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        ScheduleSettings {
            auto_mode: OperatingMode::Manual,
            schedule_enabled: false,
            start: NaiveTime::default(),
            end: NaiveTime::default(),
            temperature_weight: 50,
            co2_weight: 30,
            energy_weight: 20,
            evaluation_interval_secs: 30,
            post_action_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingField {
    AutoMode,
    ScheduleEnabled,
    Start,
    End,
    TemperatureWeight,
    Co2Weight,
    EnergyWeight,
    EvaluationInterval,
    PostActionDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingUpdate {
    AutoMode(OperatingMode),
    ScheduleEnabled(bool),
    Start(NaiveTime),
    End(NaiveTime),
    TemperatureWeight(u32),
    Co2Weight(u32),
    EnergyWeight(u32),
    EvaluationInterval(u32),
    PostActionDelay(u32),
}

impl SettingField {
    /// Publication order on save.
    pub const ALL: [SettingField; 9] = [
        SettingField::AutoMode,
        SettingField::ScheduleEnabled,
        SettingField::Start,
        SettingField::End,
        SettingField::TemperatureWeight,
        SettingField::Co2Weight,
        SettingField::EnergyWeight,
        SettingField::EvaluationInterval,
        SettingField::PostActionDelay,
    ];

    pub fn topic(self) -> &'static str {
        match self {
            SettingField::AutoMode => topics::MODE_STATE,
            SettingField::ScheduleEnabled => topics::SCHEDULE_ENABLED,
            SettingField::Start => topics::SCHEDULE_START,
            SettingField::End => topics::SCHEDULE_END,
            SettingField::TemperatureWeight => topics::WEIGHT_TEMPERATURE,
            SettingField::Co2Weight => topics::WEIGHT_CO2,
            SettingField::EnergyWeight => topics::WEIGHT_ENERGY,
            SettingField::EvaluationInterval => topics::EVALUATION_INTERVAL,
            SettingField::PostActionDelay => topics::POST_ACTION_DELAY,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SettingField::AutoMode => "mode",
            SettingField::ScheduleEnabled => "schedule",
            SettingField::Start => "start",
            SettingField::End => "end",
            SettingField::TemperatureWeight => "temperature-weight",
            SettingField::Co2Weight => "co2-weight",
            SettingField::EnergyWeight => "energy-weight",
            SettingField::EvaluationInterval => "interval",
            SettingField::PostActionDelay => "delay",
        }
    }

    pub fn from_topic(topic: &str) -> Option<SettingField> {
        SettingField::ALL.into_iter().find(|f| f.topic() == topic)
    }

    pub fn from_name(name: &str) -> Option<SettingField> {
        SettingField::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn parse(self, payload: &str) -> Result<SettingUpdate, PayloadError> {
        let payload = payload.trim();
        let number = || {
            payload
                .parse::<u32>()
                .map_err(|_| PayloadError::InvalidNumber(payload.to_string()))
        };

        Ok(match self {
            SettingField::AutoMode => SettingUpdate::AutoMode(payload.parse()?),
            SettingField::ScheduleEnabled => SettingUpdate::ScheduleEnabled(match payload {
                "true" => true,
                "false" => false,
                _ => return Err(PayloadError::InvalidBool(payload.to_string())),
            }),
            SettingField::Start => SettingUpdate::Start(parse_clock_time(payload)?),
            SettingField::End => SettingUpdate::End(parse_clock_time(payload)?),
            SettingField::TemperatureWeight => SettingUpdate::TemperatureWeight(number()?),
            SettingField::Co2Weight => SettingUpdate::Co2Weight(number()?),
            SettingField::EnergyWeight => SettingUpdate::EnergyWeight(number()?),
            SettingField::EvaluationInterval => SettingUpdate::EvaluationInterval(number()?),
            SettingField::PostActionDelay => SettingUpdate::PostActionDelay(number()?),
        })
    }
}

impl SettingUpdate {
    /// `Ok(None)` when the topic is not one of the settings topics.
    pub fn decode(topic: &str, payload: &str) -> Result<Option<SettingUpdate>, PayloadError> {
        SettingField::from_topic(topic)
            .map(|field| field.parse(payload))
            .transpose()
    }
}

impl ScheduleSettings {
    pub fn apply(&mut self, update: SettingUpdate) {
        match update {
            SettingUpdate::AutoMode(mode) => self.auto_mode = mode,
            SettingUpdate::ScheduleEnabled(enabled) => self.schedule_enabled = enabled,
            SettingUpdate::Start(time) => self.start = time,
            SettingUpdate::End(time) => self.end = time,
            SettingUpdate::TemperatureWeight(weight) => self.temperature_weight = weight,
            SettingUpdate::Co2Weight(weight) => self.co2_weight = weight,
            SettingUpdate::EnergyWeight(weight) => self.energy_weight = weight,
            SettingUpdate::EvaluationInterval(secs) => self.evaluation_interval_secs = secs,
            SettingUpdate::PostActionDelay(secs) => self.post_action_delay_secs = secs,
        }
    }

    pub fn encode(&self, field: SettingField) -> String {
        match field {
            SettingField::AutoMode => self.auto_mode.to_string(),
            SettingField::ScheduleEnabled => self.schedule_enabled.to_string(),
            SettingField::Start => encode_clock_time(self.start),
            SettingField::End => encode_clock_time(self.end),
            SettingField::TemperatureWeight => self.temperature_weight.to_string(),
            SettingField::Co2Weight => self.co2_weight.to_string(),
            SettingField::EnergyWeight => self.energy_weight.to_string(),
            SettingField::EvaluationInterval => self.evaluation_interval_secs.to_string(),
            SettingField::PostActionDelay => self.post_action_delay_secs.to_string(),
        }
    }

    /// One message per field, whether or not it changed. Only the mode is
    /// retained.
    pub fn to_messages(&self) -> Vec<OutboundMessage> {
        SettingField::ALL
            .into_iter()
            .map(|field| {
                OutboundMessage::new(
                    field.topic(),
                    self.encode(field),
                    field == SettingField::AutoMode,
                )
            })
            .collect()
    }
}

/// The settings screen while it is mounted.
pub struct SettingsSession {
    context: Arc<WindowContext>,
    form: Arc<Mutex<ScheduleSettings>>,
    subscriptions: Vec<Subscription>,
}

impl SettingsSession {
    pub fn mount(context: Arc<WindowContext>) -> SettingsSession {
        let form = Arc::new(Mutex::new(ScheduleSettings::default()));

        let settings_form = form.clone();
        let settings_subscription = context.settings.subscribe(move |update| {
            settings_form
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .apply(*update);
        });

        let mode_form = form.clone();
        let mode_subscription = context.mode.subscribe(move |mode| {
            mode_form
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .apply(SettingUpdate::AutoMode(*mode));
        });

        if let Some(mode) = context.last_mode() {
            form.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .apply(SettingUpdate::AutoMode(mode));
        }

        context.request_subscription(topics::SETTINGS_WILDCARD);

        SettingsSession {
            context,
            form,
            subscriptions: vec![settings_subscription, mode_subscription],
        }
    }

    pub fn form(&self) -> ScheduleSettings {
        self.form
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn edit(&self, update: SettingUpdate) {
        self.form
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(update);
    }

    /// Publishes every field as its own message. Returns how many were
    /// handed to the publisher.
    pub fn save(&self) -> usize {
        if !self.context.connection.is_connected() {
            warn!("MQTT not connected, settings not saved");
            return 0;
        }

        let queued = self
            .form()
            .to_messages()
            .into_iter()
            .filter(|message| {
                self.context
                    .enqueue(ToMqttPublisherMessage::Publish(message.clone()))
            })
            .count();

        info!("Settings published ({queued} of {} fields)", SettingField::ALL.len());
        queued
    }

    pub fn unmount(self) {
        self.context.release_subscription(topics::SETTINGS_WILDCARD);
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}
