use crate::error::PayloadError;
use crate::messages::InboundMessage;
use crate::settings::SettingUpdate;

pub const WINDOW_STATE: &str = "casa/ventana/estado";
pub const WINDOW_COMMAND: &str = "casa/ventana/cmd";
pub const MODE_STATE: &str = "casa/ventana/modo/estado";
pub const MODE: &str = "casa/ventana/modo";

pub const SCHEDULE_ENABLED: &str = "casa/ventana/horario/enabled";
pub const SCHEDULE_START: &str = "casa/ventana/horario/inicio";
pub const SCHEDULE_END: &str = "casa/ventana/horario/fin";
pub const WEIGHT_TEMPERATURE: &str = "casa/ventana/peso/temperatura";
pub const WEIGHT_CO2: &str = "casa/ventana/peso/co2";
pub const WEIGHT_ENERGY: &str = "casa/ventana/peso/energia";
pub const EVALUATION_INTERVAL: &str = "casa/ventana/intervalo/evaluacion";
pub const POST_ACTION_DELAY: &str = "casa/ventana/retardo/postaccion";

/// Everything under the window, used by the settings screen.
pub const SETTINGS_WILDCARD: &str = "casa/ventana/#";

pub const PANEL_ONLINE: &str = "casa/ventana/panel/online";
pub const PANEL_VERSION: &str = "casa/ventana/panel/version";

/// Subscribed on every successful connect.
pub const BASELINE: [&str; 3] = [WINDOW_STATE, MODE_STATE, MODE];

pub fn decode(topic: &str, payload: &[u8]) -> Result<Option<InboundMessage>, PayloadError> {
    let payload = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;

    let message = match topic {
        WINDOW_STATE => InboundMessage::WindowPosition(payload.parse()?),
        MODE_STATE | MODE => InboundMessage::Mode(payload.parse()?),
        _ => match SettingUpdate::decode(topic, payload)? {
            Some(update) => InboundMessage::Setting(update),
            None => return Ok(None),
        },
    };

    Ok(Some(message))
}
