//! Typed payloads carried inside IPC frames (§4.1). Kept as explicit structs
//! per the "dynamic JSON payloads" design note: nothing downstream of the
//! codec sees a bare `serde_json::Value`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// IPC frame type tags (§4.1).
pub mod frame_type {
    pub const STDIN_DATA: u8 = 0x01;
    pub const CONTROL_CMD: u8 = 0x02;
    pub const STATUS_UPDATE: u8 = 0x03;
    pub const HEARTBEAT: u8 = 0x04;
    pub const ERROR: u8 = 0x05;
}

/// The JSON body of a `CONTROL_CMD` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum ControlCommand {
    Resize { cols: u16, rows: u16 },
    Kill { signal: String },
    ResetSize,
}

/// The JSON body of an `ERROR` frame. `code` is one of §7's stable wire
/// strings; kept as an owned `String` (rather than `&'static str`) so the
/// type can round-trip through `Deserialize` on the client side too.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorPayload {
    pub fn from_error(err: &CoreError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_command_resize_round_trips_through_json() {
        let cmd = ControlCommand::Resize { cols: 120, rows: 40 };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"cmd":"resize","cols":120,"rows":40}"#);
        let back: ControlCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn control_command_kill_round_trips() {
        let cmd = ControlCommand::Kill { signal: "SIGTERM".into() };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: ControlCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn control_command_reset_size_has_no_extra_fields() {
        let cmd = ControlCommand::ResetSize;
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"cmd":"reset-size"}"#);
    }
}
