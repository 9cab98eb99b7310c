//! # UI Common Components
//!
//! Color palette and small helpers shared by the operator panel.

use eframe::egui::{Color32, Frame, Stroke};

use crate::mqtt::SessionState;

/// Centralized color palette for the dark operator panel.
///
/// ## Color Hierarchy
/// - **Background Colors**: INNER_BG → MAIN_BG (darkest to lightest)
/// - **Status Colors**: ACTIVE (green) when connected, PENDING (amber) while the session
///   is changing, INACTIVE (red) otherwise
/// - **Command Colors**: ON and OFF for the paired command buttons
pub struct UiColors;

impl UiColors {
    /// Primary background color for main content areas (RGB: 30, 30, 30)
    pub const MAIN_BG: Color32 = Color32::from_rgb(30, 30, 30);

    /// Secondary background color for nested components (RGB: 25, 25, 25)
    pub const INNER_BG: Color32 = Color32::from_rgb(25, 25, 25);

    /// Border color for component separation (RGB: 60, 60, 60)
    pub const BORDER: Color32 = Color32::from_rgb(60, 60, 60);

    pub const ACTIVE: Color32 = Color32::from_rgb(50, 200, 20);

    pub const PENDING: Color32 = Color32::from_rgb(220, 170, 30);

    pub const INACTIVE: Color32 = Color32::from_rgb(200, 50, 20);

    pub const ON: Color32 = Color32::from_rgb(0, 123, 0);

    pub const OFF: Color32 = Color32::from_rgb(255, 50, 69);

    pub const READOUT_TEXT: Color32 = Color32::from_rgb(226, 226, 226);
}

/// Indicator color for a session state.
pub fn state_color(state: SessionState) -> Color32 {
    match state {
        SessionState::Connected => UiColors::ACTIVE,
        SessionState::Connecting | SessionState::Disconnecting => UiColors::PENDING,
        SessionState::Idle | SessionState::Closed | SessionState::Errored => UiColors::INACTIVE,
    }
}

/// Creates a styled frame with consistent visual parameters.
pub fn create_frame(bg_color: Color32, border_color: Color32) -> Frame {
    Frame::new()
        .stroke(Stroke::new(1.0, border_color))
        .fill(bg_color)
        .inner_margin(8)
        .outer_margin(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_is_green() {
        assert_eq!(state_color(SessionState::Connected), UiColors::ACTIVE);
        assert_eq!(state_color(SessionState::Connecting), UiColors::PENDING);
        assert_eq!(state_color(SessionState::Errored), UiColors::INACTIVE);
        assert_eq!(state_color(SessionState::Idle), UiColors::INACTIVE);
    }
}
