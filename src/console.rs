use std::sync::Arc;

use log::error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_stream::{wrappers::LinesStream, StreamExt};

use crate::context::WindowContext;
use crate::panel::{ControlPanel, QUICK_POSITIONS};
use crate::settings::{SettingField, SettingsSession};
use crate::window_state::{OperatingMode, DISPLAY_TIME_FORMAT};

const HELP: &str = "\
commands:
  open | close | <0-100>      move the window
  auto | manual | toggle      operating mode
  status                      show window, mode and readings
  settings                    show the automatic mode settings
  set <field> <value>         edit a setting (fields: mode schedule start end
                              temperature-weight co2-weight energy-weight
                              interval delay)
  save                        publish all settings
  done                        leave the settings screen
  quit";

#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Silent,
    Quit,
}

/// Line oriented stand-in for the two screens.
pub struct Console {
    context: Arc<WindowContext>,
    panel: ControlPanel,
    settings: Option<SettingsSession>,
}

impl Console {
    pub fn new(context: Arc<WindowContext>) -> Self {
        Console {
            panel: ControlPanel::mount(context.clone()),
            context,
            settings: None,
        }
    }

    fn settings(&mut self) -> &SettingsSession {
        let context = &self.context;
        self.settings
            .get_or_insert_with(|| SettingsSession::mount(context.clone()))
    }

    fn status(&self) -> String {
        let view = self.panel.view();
        let readings = self.context.readings.last().unwrap_or_default();
        let connection = if self.context.connection.is_connected() {
            "connected"
        } else {
            "offline"
        };

        let reported = match (self.context.last_window_state(), self.context.last_mode()) {
            (Some(position), Some(mode)) => format!("{position}% {mode}"),
            (Some(position), None) => format!("{position}%"),
            (None, Some(mode)) => mode.to_string(),
            (None, None) => "nothing yet".to_string(),
        };

        format!(
            "broker: {connection}{}\nwindow: {}% open, mode: {} (device reported: {reported})\nindoor {:.1}°C, outdoor {:.1}°C, CO2 {} ppm, wind {:.1}, rain {:.1}, humidity {:.0}%",
            if view.ready { "" } else { " (waiting)" },
            view.position,
            OperatingMode::from_auto_flag(view.auto_mode),
            readings.indoor_temperature,
            readings.outdoor_temperature,
            readings.co2_ppm,
            readings.wind_speed,
            readings.rainfall,
            readings.humidity,
        )
    }

    fn show_settings(&mut self) -> String {
        let form = self.settings().form();
        SettingField::ALL
            .iter()
            .map(|field| match field {
                SettingField::Start => format!("{:<20}{}", field.name(), form.start.format(DISPLAY_TIME_FORMAT)),
                SettingField::End => format!("{:<20}{}", field.name(), form.end.format(DISPLAY_TIME_FORMAT)),
                _ => format!("{:<20}{}", field.name(), form.encode(*field)),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn set(&mut self, field: &str, value: &str) -> Reply {
        let Some(field) = SettingField::from_name(field) else {
            return Reply::Text(format!("unknown setting '{field}'"));
        };

        match field.parse(value) {
            Ok(update) => {
                self.settings().edit(update);
                Reply::Silent
            }
            Err(e) => Reply::Text(e.to_string()),
        }
    }

    pub fn handle_line(&mut self, line: &str) -> Reply {
        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            [] => Reply::Silent,
            ["quit" | "exit"] => Reply::Quit,
            ["help"] => Reply::Text(HELP.to_string()),
            ["open"] => {
                self.panel.open();
                Reply::Silent
            }
            ["close"] => {
                self.panel.close();
                Reply::Silent
            }
            ["toggle"] => {
                self.panel.toggle_auto();
                Reply::Silent
            }
            ["status"] => Reply::Text(self.status()),
            ["settings"] => Reply::Text(self.show_settings()),
            ["set", field, value] => self.set(field, value),
            ["save"] => {
                let published = self.settings().save();
                Reply::Text(format!("{published} settings published"))
            }
            ["done"] => {
                if let Some(settings) = self.settings.take() {
                    settings.unmount();
                }
                Reply::Silent
            }
            [word] => match self.panel.send(word) {
                Ok(()) => Reply::Silent,
                Err(_) => Reply::Text(format!(
                    "unknown command '{word}', try 'help' (quick positions: {QUICK_POSITIONS:?})"
                )),
            },
            _ => Reply::Text(format!("unknown command '{line}', try 'help'")),
        }
    }

    pub fn close(self) {
        if let Some(settings) = self.settings {
            settings.unmount();
        }
        self.panel.unmount();
    }
}

/// Runs until `quit` or end of input.
pub async fn run_console(context: Arc<WindowContext>, input: impl AsyncBufRead + Unpin) {
    let mut console = Console::new(context);
    let mut lines = LinesStream::new(input.lines());

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Error reading console input: {e}");
                break;
            }
        };

        match console.handle_line(&line) {
            Reply::Text(text) => println!("{text}"),
            Reply::Silent => {}
            Reply::Quit => break,
        }
    }

    console.close();
}
