use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::info;

use crate::command::{Command, CommandPublisher};
use crate::context::{ConnectionEvent, WindowContext};
use crate::error::PayloadError;
use crate::observable::{Observable, Subscription};
use crate::window_state::{OperatingMode, Position};

pub const QUICK_POSITIONS: [u8; 5] = [10, 25, 50, 75, 90];

/// What the control screen shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelView {
    pub ready: bool,
    pub position: Position,
    pub auto_mode: bool,
}

impl Default for PanelView {
    fn default() -> Self {
        PanelView {
            ready: false,
            position: Position::CLOSED,
            auto_mode: false,
        }
    }
}

fn lock(view: &Mutex<PanelView>) -> MutexGuard<'_, PanelView> {
    view.lock().unwrap_or_else(PoisonError::into_inner)
}

fn init_from_cache(
    view: &Mutex<PanelView>,
    window: &Observable<Position>,
    mode: &Observable<OperatingMode>,
) {
    let mut view = lock(view);
    if let Some(position) = window.last() {
        view.position = position;
    }
    if let Some(mode) = mode.last() {
        view.auto_mode = mode.is_auto();
    }
    view.ready = true;
}

/// State behind the control screen. Local changes are predictions that the
/// next message from the broker overwrites.
pub struct ControlPanel {
    commands: CommandPublisher,
    view: Arc<Mutex<PanelView>>,
    subscriptions: Vec<Subscription>,
}

impl ControlPanel {
    pub fn mount(context: Arc<WindowContext>) -> ControlPanel {
        let view = Arc::new(Mutex::new(PanelView::default()));
        let mut subscriptions = Vec::new();

        if context.connection.is_connected() {
            init_from_cache(&view, &context.window, &context.mode);
        } else {
            let (pending_view, window, mode) =
                (view.clone(), context.window.clone(), context.mode.clone());
            subscriptions.push(context.connection.subscribe(move |event| {
                if *event != ConnectionEvent::Connected {
                    return;
                }
                let ready = lock(&pending_view).ready;
                if !ready {
                    init_from_cache(&pending_view, &window, &mode);
                }
            }));
        }

        let window_view = view.clone();
        subscriptions.push(context.window.subscribe(move |position| {
            lock(&window_view).position = *position;
        }));

        let mode_view = view.clone();
        subscriptions.push(context.mode.subscribe(move |mode| {
            lock(&mode_view).auto_mode = mode.is_auto();
        }));

        ControlPanel {
            commands: CommandPublisher::new(context),
            view,
            subscriptions,
        }
    }

    pub fn view(&self) -> PanelView {
        lock(&self.view).clone()
    }

    fn predict(&self, position: Position) {
        let mut view = lock(&self.view);
        view.position = position;
        view.auto_mode = false;
    }

    pub fn open(&self) {
        self.predict(Position::OPEN);
        self.commands.open();
    }

    pub fn close(&self) {
        self.predict(Position::CLOSED);
        self.commands.close();
    }

    pub fn quick_position(&self, position: Position) {
        self.predict(position);
        self.commands.set_position(position);
    }

    pub fn toggle_auto(&self) {
        let mode = {
            let mut view = lock(&self.view);
            let mode = OperatingMode::from_auto_flag(view.auto_mode).toggled();
            view.auto_mode = mode.is_auto();
            mode
        };
        info!("Switching to {mode} mode");
        self.commands.set_mode(mode);
    }

    /// Textual entry: `auto`, `manual` or a percentage.
    pub fn send(&self, payload: &str) -> Result<(), PayloadError> {
        match Command::from_payload(payload)? {
            Command::Position(position) => self.quick_position(position),
            Command::Mode(mode) => self.set_mode(mode),
        }
        Ok(())
    }

    pub fn set_mode(&self, mode: OperatingMode) {
        lock(&self.view).auto_mode = mode.is_auto();
        self.commands.set_mode(mode);
    }

    pub fn unmount(self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{OutboundMessage, ToMqttPublisherMessage};
    use crate::topics;
    use async_channel::Receiver;

    fn context() -> (Arc<WindowContext>, Receiver<ToMqttPublisherMessage>) {
        let (tx, rx) = async_channel::bounded(16);
        (Arc::new(WindowContext::new(tx)), rx)
    }

    #[test]
    fn test_not_ready_until_connected() {
        let (context, _rx) = context();
        context.handle_publish(topics::WINDOW_STATE, b"30");
        context.handle_publish(topics::MODE_STATE, b"auto");

        let panel = ControlPanel::mount(context.clone());
        assert!(!panel.view().ready);

        context.connection.notify(ConnectionEvent::Connected);
        assert_eq!(
            panel.view(),
            PanelView {
                ready: true,
                position: Position::new(30).unwrap(),
                auto_mode: true,
            }
        );
    }

    #[test]
    fn test_mount_when_connected_reads_cache() {
        let (context, _rx) = context();
        context.connection.notify(ConnectionEvent::Connected);
        context.handle_publish(topics::WINDOW_STATE, b"42");

        let panel = ControlPanel::mount(context);
        let view = panel.view();
        assert!(view.ready);
        assert_eq!(view.position.to_string(), "42");
        assert!(!view.auto_mode);
    }

    #[test]
    fn test_prediction_overwritten_by_broker() {
        let (context, rx) = context();
        context.connection.notify(ConnectionEvent::Connected);
        let panel = ControlPanel::mount(context.clone());

        panel.quick_position(Position::new(75).unwrap());
        assert_eq!(panel.view().position, Position::new(75).unwrap());
        assert_eq!(
            rx.try_recv(),
            Ok(ToMqttPublisherMessage::Publish(OutboundMessage::new(
                topics::WINDOW_COMMAND,
                75,
                false
            )))
        );

        context.handle_publish(topics::WINDOW_STATE, b"60");
        assert_eq!(panel.view().position, Position::new(60).unwrap());
    }

    #[test]
    fn test_toggle_auto_publishes_mode() {
        let (context, rx) = context();
        context.connection.notify(ConnectionEvent::Connected);
        let panel = ControlPanel::mount(context);

        panel.toggle_auto();
        assert!(panel.view().auto_mode);
        panel.toggle_auto();
        assert!(!panel.view().auto_mode);

        let payloads: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| match m {
                ToMqttPublisherMessage::Publish(m) => (m.topic, m.payload, m.retain),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            payloads,
            vec![
                (topics::MODE.to_string(), "auto".to_string(), true),
                (topics::MODE.to_string(), "manual".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_open_clears_auto_locally() {
        let (context, _rx) = context();
        context.connection.notify(ConnectionEvent::Connected);
        context.handle_publish(topics::MODE, b"auto");
        let panel = ControlPanel::mount(context);
        assert!(panel.view().auto_mode);

        panel.open();
        assert_eq!(panel.view().position, Position::OPEN);
        assert!(!panel.view().auto_mode);
    }

    #[test]
    fn test_unmount_releases_registrations() {
        let (context, _rx) = context();
        let panel = ControlPanel::mount(context.clone());
        assert_eq!(context.window.subscriber_count(), 1);

        panel.unmount();
        assert_eq!(context.window.subscriber_count(), 0);
        assert_eq!(context.mode.subscriber_count(), 0);
    }
}
