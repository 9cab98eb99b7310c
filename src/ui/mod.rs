//! Operator panel
//!
//! Immediate-mode egui window over a [`ControllerHandle`]. Every frame it reads the
//! session state and speed from the handle's watch channels and turns button clicks into
//! requests. It never decides the connection state itself: clicking "Connect" only asks
//! the engine to open a session, and the indicator changes once the session reports it.

pub mod common;

use std::time::Duration;

use eframe::egui::{self, Button, RichText, Ui};
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, warn};

use crate::controller::controller_handle::CommandReply;
use crate::controller::ControllerHandle;
use crate::mqtt::{CommandIntent, Rejected, SessionState};
use common::{create_frame, state_color, UiColors};

const REPAINT_INTERVAL: Duration = Duration::from_millis(100);

pub struct OperatorPanel {
    controller: ControllerHandle,
    pending: Vec<(CommandIntent, CommandReply)>,
    last_outcome: Option<String>,
}

impl OperatorPanel {
    pub fn new(cc: &eframe::CreationContext<'_>, controller: ControllerHandle) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());
        Self::with_controller(controller)
    }

    pub fn with_controller(controller: ControllerHandle) -> Self {
        Self {
            controller,
            pending: Vec::new(),
            last_outcome: None,
        }
    }

    pub fn last_outcome(&self) -> Option<&str> {
        self.last_outcome.as_deref()
    }

    /// Collects answers for commands sent on earlier frames.
    pub fn poll_replies(&mut self) {
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for (intent, mut reply) in self.pending.drain(..) {
            match reply.try_recv() {
                Ok(Ok(sent)) => {
                    self.last_outcome = Some(format!(
                        "Sent {} to {}",
                        sent.command.payload, sent.command.topic
                    ));
                }
                Ok(Err(rejected)) => {
                    self.last_outcome = Some(format!("{} rejected: {}", intent, rejected));
                }
                Err(TryRecvError::Empty) => still_pending.push((intent, reply)),
                Err(TryRecvError::Closed) => {
                    self.last_outcome =
                        Some(format!("{} rejected: {}", intent, Rejected::NotConnected));
                }
            }
        }
        self.pending = still_pending;
    }

    pub fn request_command(&mut self, intent: CommandIntent) {
        match self.controller.try_command(intent) {
            Ok(reply) => self.pending.push((intent, reply)),
            Err(e) => {
                warn!("Command {} not submitted: {}", intent, e);
                self.last_outcome = Some(format!("{} rejected: {}", intent, e));
            }
        }
    }

    fn toggle_connection(&mut self, state: SessionState) {
        let result = if state.is_active() && state != SessionState::Disconnecting {
            self.controller.try_disconnect()
        } else {
            self.controller.try_connect()
        };
        if let Err(e) = result {
            warn!("Connection request not submitted: {}", e);
            self.last_outcome = Some(e.to_string());
        }
    }

    fn connection_row(&mut self, ui: &mut Ui, state: SessionState) {
        ui.horizontal(|ui| {
            ui.colored_label(state_color(state), "\u{2B24}");
            ui.label(state.to_string());

            let label = match state {
                SessionState::Connecting | SessionState::Connected => "Disconnect",
                SessionState::Disconnecting => "Disconnecting…",
                _ => "Connect to MQTT",
            };
            let enabled = state != SessionState::Disconnecting;
            if ui.add_enabled(enabled, Button::new(label)).clicked() {
                debug!("Connection button clicked in state {}", state);
                self.toggle_connection(state);
            }
        });
    }

    fn command_pair(
        &mut self,
        ui: &mut Ui,
        heading: &str,
        on: (CommandIntent, &str),
        off: (CommandIntent, &str),
        enabled: bool,
    ) {
        ui.heading(heading);
        ui.horizontal(|ui| {
            for ((intent, label), fill) in [(on, UiColors::ON), (off, UiColors::OFF)] {
                let button = Button::new(RichText::new(label).color(egui::Color32::WHITE)).fill(fill);
                if ui.add_enabled(enabled, button).clicked() {
                    self.request_command(intent);
                }
            }
        });
    }

    fn speed_readout(&self, ui: &mut Ui, speed: i64) {
        ui.heading("Speed");
        create_frame(UiColors::INNER_BG, UiColors::BORDER).show(ui, |ui| {
            ui.label(
                RichText::new(format!("{} RPM", speed))
                    .size(24.0)
                    .strong()
                    .color(UiColors::READOUT_TEXT),
            );
        });
    }
}

impl eframe::App for OperatorPanel {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_replies();

        let state = self.controller.session_state();
        let speed = self.controller.telemetry();
        let connected = state == SessionState::Connected;

        egui::CentralPanel::default()
            .frame(create_frame(UiColors::MAIN_BG, UiColors::BORDER))
            .show(ctx, |ui| {
                ui.vertical_centered(|ui| {
                    ui.heading("MQTT Car Controller");
                    self.connection_row(ui, state);
                    ui.separator();

                    self.command_pair(
                        ui,
                        "LED Control",
                        (CommandIntent::ActuatorOn, "Turn LED On"),
                        (CommandIntent::ActuatorOff, "Turn LED Off"),
                        connected,
                    );
                    self.command_pair(
                        ui,
                        "Buzzer Control",
                        (CommandIntent::AlertOn, "Turn Buzzer On"),
                        (CommandIntent::AlertOff, "Turn Buzzer Off"),
                        connected,
                    );
                    ui.separator();

                    self.speed_readout(ui, speed);

                    if let Some(outcome) = &self.last_outcome {
                        ui.label(outcome.as_str());
                    }
                });
            });

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerSettings;
    use crate::mqtt::config::MqttConfig;
    use crate::mqtt::fake::FakeTransport;

    #[tokio::test]
    async fn rejected_command_is_reported_to_the_operator() {
        let settings = ControllerSettings {
            endpoint: "ws://broker.test/mqtt".parse().unwrap(),
            mqtt: MqttConfig::default(),
            auto_connect: false,
        };
        let fake = FakeTransport::new();
        let (controller, task) =
            ControllerHandle::spawn_with_transport(settings, move |_| Box::new(fake));
        let mut panel = OperatorPanel::with_controller(controller.clone());

        panel.request_command(CommandIntent::AlertOn);
        for _ in 0..50 {
            tokio::task::yield_now().await;
            panel.poll_replies();
            if panel.last_outcome().is_some() {
                break;
            }
        }

        assert_eq!(
            panel.last_outcome(),
            Some("alert-on rejected: Not connected to the broker")
        );
        controller.shutdown();
        task.await.unwrap();
    }
}
