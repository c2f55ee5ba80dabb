//! Inline-keyboard model: semantic actions, transport-agnostic layout, and the
//! [`ButtonState`] → layout mapping.
//!
//! The delivery engine works with [`ButtonLayout`] only; the teloxide adapter
//! converts a layout into an `InlineKeyboardMarkup` when sending.

use crate::types::ButtonState;
use serde::{Deserialize, Serialize};

/// Semantic action behind a button; `callback_data` identifies it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonAction {
    Stop,
    Retry,
    PrevVersion,
    NextVersion,
}

impl ButtonAction {
    /// Stable callback-data string for this action.
    pub fn callback_data(&self) -> &'static str {
        match self {
            ButtonAction::Stop => "stop",
            ButtonAction::Retry => "retry",
            ButtonAction::PrevVersion => "prev",
            ButtonAction::NextVersion => "next",
        }
    }
}

/// One button: visible label plus its action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn new(label: impl Into<String>, action: ButtonAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// Rows of buttons, transport-agnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonLayout {
    pub rows: Vec<Vec<Button>>,
}

impl ButtonLayout {
    pub fn single_row(buttons: Vec<Button>) -> Self {
        Self {
            rows: vec![buttons],
        }
    }
}

/// Builds the keyboard for a [`ButtonState`].
///
/// `current` and `total` are the 1-based displayed version and the version
/// count; only used for `HasVersions`. Returns `None` when no keyboard should
/// be attached.
pub fn keyboard_for(state: ButtonState, current: usize, total: usize) -> Option<ButtonLayout> {
    match state {
        ButtonState::None => None,
        ButtonState::Processing => Some(ButtonLayout::single_row(vec![Button::new(
            "⏹ Stop",
            ButtonAction::Stop,
        )])),
        ButtonState::RetryOnly => Some(ButtonLayout::single_row(vec![Button::new(
            "🔄 Retry",
            ButtonAction::Retry,
        )])),
        ButtonState::HasVersions => Some(ButtonLayout::single_row(vec![
            Button::new("⬅️", ButtonAction::PrevVersion),
            Button::new(format!("🔄 {}/{}", current, total), ButtonAction::Retry),
            Button::new("➡️", ButtonAction::NextVersion),
        ])),
        ButtonState::EditDetected => Some(ButtonLayout::single_row(vec![Button::new(
            "🔄 Message edited — regenerate",
            ButtonAction::Retry,
        )])),
    }
}
