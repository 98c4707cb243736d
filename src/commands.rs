//! The `display/*` command surface. Payloads are validated before anything
//! is touched; a bad one is logged and the last good state stays.

use std::sync::Arc;
use std::time::Duration;

use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::Size;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::rotation_interval;
use crate::constants::MAX_MESSAGE_LEN;
use crate::error::DisplayError;
use crate::manager::DisplayManager;
use crate::panels::{MessageBoard, MessageColors, MessagePanel};
use crate::queue::{DisplayItem, ItemHandle, RotationMode};

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayCommand {
    SetMode(RotationMode),
    /// `true` rotates automatically, `false` only on taps.
    SetRotation(bool),
    SetInterval(Duration),
    /// Empty text clears the message and drops it from rotation.
    SetMessage(String),
    SetMessageColors(MessageColors),
}

#[derive(Debug, Deserialize)]
struct ColorsPayload {
    fg: String,
    bg: String,
}

/// `#RRGGBB` (the `#` is optional).
pub fn parse_hex_color(s: &str) -> Result<Rgb888, String> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("`{s}` is not a #RRGGBB colour"));
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
    Ok(Rgb888::new(channel(0)?, channel(2)?, channel(4)?))
}

fn parse_switch(payload: &str) -> Result<bool, String> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "enable" | "enabled" => Ok(true),
        "off" | "false" | "0" | "disable" | "disabled" => Ok(false),
        other => Err(format!("expected on or off, got `{other}`")),
    }
}

fn parse_message(payload: &str) -> Result<String, String> {
    let text = payload.trim();
    if text.chars().count() > MAX_MESSAGE_LEN {
        return Err(format!("message is longer than {MAX_MESSAGE_LEN} characters"));
    }
    if text.chars().any(char::is_control) {
        return Err("message contains control characters".into());
    }
    Ok(text.to_string())
}

/// Parse a command for a topic ending in `display/<key>`.
pub fn parse_command(topic: &str, payload: &str) -> Result<DisplayCommand, DisplayError> {
    let mut segments = topic.trim_end_matches('/').rsplit('/');
    let key = segments.next().unwrap_or_default();
    if segments.next() != Some("display") {
        return Err(DisplayError::config(topic, "not a display topic"));
    }
    let invalid = |reason: String| DisplayError::config(topic, reason);

    match key {
        "mode" => payload.parse().map(DisplayCommand::SetMode).map_err(invalid),
        "rotation" => parse_switch(payload).map(DisplayCommand::SetRotation).map_err(invalid),
        "interval" => {
            let secs: f64 = payload
                .trim()
                .parse()
                .map_err(|_| invalid(format!("`{}` is not a number", payload.trim())))?;
            rotation_interval(secs).map(DisplayCommand::SetInterval).map_err(invalid)
        }
        "message" => parse_message(payload).map(DisplayCommand::SetMessage).map_err(invalid),
        "message_colors" => {
            let colors: ColorsPayload = serde_json::from_str(payload).map_err(|e| invalid(e.to_string()))?;
            Ok(DisplayCommand::SetMessageColors(MessageColors {
                fg: parse_hex_color(&colors.fg).map_err(invalid)?,
                bg: parse_hex_color(&colors.bg).map_err(invalid)?,
            }))
        }
        other => Err(invalid(format!("unknown display command `{other}`"))),
    }
}

/// Applies validated commands to a [`DisplayManager`] and owns the custom
/// message panel's place in the rotation.
pub struct CommandHandler {
    board: Arc<MessageBoard>,
    message_item: Option<ItemHandle>,
    size: Size,
}

impl CommandHandler {
    pub fn new(board: Arc<MessageBoard>, size: Size) -> Self {
        Self {
            board,
            message_item: None,
            size,
        }
    }

    pub fn message_item(&self) -> Option<ItemHandle> {
        self.message_item
    }

    pub fn handle(&mut self, manager: &DisplayManager, topic: &str, payload: &str) -> Result<DisplayCommand, DisplayError> {
        let command = parse_command(topic, payload).inspect_err(|e| warn!(error = %e, "ignoring display command"))?;
        self.apply(manager, &command);
        Ok(command)
    }

    fn apply(&mut self, manager: &DisplayManager, command: &DisplayCommand) {
        match command {
            DisplayCommand::SetMode(mode) => manager.set_mode(*mode),
            DisplayCommand::SetRotation(on) => {
                manager.set_mode(if *on { RotationMode::Auto } else { RotationMode::Manual })
            }
            DisplayCommand::SetInterval(interval) => manager.set_rotation_interval(*interval),
            DisplayCommand::SetMessage(text) if text.is_empty() => {
                self.board.set_text("");
                if let Some(handle) = self.message_item.take() {
                    manager.dequeue(handle);
                }
            }
            DisplayCommand::SetMessage(text) => {
                self.board.set_text(text.as_str());
                if self.message_item.is_none() {
                    let panel = MessagePanel::new(self.board.clone(), self.size);
                    self.message_item = Some(manager.enqueue(DisplayItem::new(Arc::new(panel))));
                }
            }
            DisplayCommand::SetMessageColors(colors) => self.board.set_colors(*colors),
        }
        info!(command = ?command, "display command applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisplayConfig;
    use crate::sink::NullSink;

    fn disabled_manager() -> DisplayManager {
        let config = DisplayConfig {
            enabled: false,
            ..DisplayConfig::default()
        };
        DisplayManager::start(config, Box::new(NullSink::new()))
    }

    #[test]
    fn test_parse_mode_and_rotation() {
        assert_eq!(
            parse_command("enviroplus/display/mode", "manual").unwrap(),
            DisplayCommand::SetMode(RotationMode::Manual)
        );
        assert_eq!(parse_command("display/rotation", "OFF").unwrap(), DisplayCommand::SetRotation(false));
        assert!(parse_command("display/mode", "sideways").is_err());
        assert!(parse_command("enviroplus/sensors/mode", "auto").is_err());
    }

    #[test]
    fn test_parse_interval_bounds() {
        assert_eq!(
            parse_command("display/interval", " 7.5 ").unwrap(),
            DisplayCommand::SetInterval(Duration::from_millis(7500))
        );
        assert!(parse_command("display/interval", "0").is_err());
        assert!(parse_command("display/interval", "soon").is_err());
    }

    #[test]
    fn test_parse_message_validation() {
        assert_eq!(
            parse_command("display/message", "Hello kitchen\n").unwrap(),
            DisplayCommand::SetMessage("Hello kitchen".into())
        );
        assert!(parse_command("display/message", "bell\u{7}").is_err());
        assert!(parse_command("display/message", &"x".repeat(MAX_MESSAGE_LEN + 1)).is_err());
    }

    #[test]
    fn test_parse_message_colors() {
        let cmd = parse_command("display/message_colors", r##"{"fg":"#FFFFFF","bg":"0000ff"}"##).unwrap();
        assert_eq!(
            cmd,
            DisplayCommand::SetMessageColors(MessageColors {
                fg: Rgb888::new(255, 255, 255),
                bg: Rgb888::new(0, 0, 255),
            })
        );
        assert!(parse_command("display/message_colors", r#"{"fg":"white"}"#).is_err());
        assert!(parse_command("display/message_colors", r##"{"fg":"#12345","bg":"#000000"}"##).is_err());
    }

    #[test]
    fn test_invalid_payload_leaves_state_alone() {
        let manager = disabled_manager();
        let mut handler = CommandHandler::new(Arc::new(MessageBoard::new()), manager.size());
        handler.handle(&manager, "display/mode", "manual").unwrap();
        assert!(handler.handle(&manager, "display/mode", "bogus").is_err());
        assert_eq!(manager.mode(), RotationMode::Manual);
    }

    #[test]
    fn test_message_joins_and_leaves_rotation() {
        let manager = disabled_manager();
        let board = Arc::new(MessageBoard::new());
        let mut handler = CommandHandler::new(board.clone(), manager.size());

        handler.handle(&manager, "display/message", "Dinner at 7").unwrap();
        handler.handle(&manager, "display/message", "Dinner at 8").unwrap();
        assert_eq!(board.text(), "Dinner at 8");
        assert_eq!(manager.status().queue_len, 1);
        assert!(handler.message_item().is_some());

        handler.handle(&manager, "display/message", "").unwrap();
        assert_eq!(manager.status().queue_len, 0);
        assert!(handler.message_item().is_none());
    }

    #[test]
    fn test_rotation_switch_maps_to_modes() {
        let manager = disabled_manager();
        let mut handler = CommandHandler::new(Arc::new(MessageBoard::new()), manager.size());
        handler.handle(&manager, "display/rotation", "off").unwrap();
        assert_eq!(manager.mode(), RotationMode::Manual);
        handler.handle(&manager, "display/rotation", "on").unwrap();
        assert_eq!(manager.mode(), RotationMode::Auto);
    }
}
