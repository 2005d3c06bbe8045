//! Host-side implementations of the engine's platform seams.
//!
//! A desktop or server host has a filesystem but no camera roll, SMS store,
//! screen projection consent or touch screen. Files are served from the
//! local disk; everything else reports `Unsupported` so the dispatcher logs
//! it and the controller gets no reply, as on a phone missing the feature.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use tether_core::capture::{
    CaptureBackend, CaptureConsent, EncoderProfile, InputSurface, VideoEncoder, VirtualDisplay,
};
use tether_core::codec::MAX_PAYLOAD_LEN;
use tether_core::{
    Attachment, CameraFacing, DeviceServices, GeoPoint, InjectionCapability, TetherError,
    TouchEvent,
};

// ── Device services ──────────────────────────────────────────────

/// Largest file `read_file` serves. Base64 and the JSON envelope around
/// it must still fit in one frame.
pub const MAX_READ_BYTES: u64 = (MAX_PAYLOAD_LEN as u64 / 4) * 3 - 64 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct HostDevice;

fn unsupported(what: &str) -> TetherError {
    TetherError::Unsupported(format!("{what} is not available on this host"))
}

#[async_trait]
impl DeviceServices for HostDevice {
    async fn list_cameras(&self) -> Result<Value, TetherError> {
        Err(unsupported("camera"))
    }

    async fn capture_camera(&self, _facing: CameraFacing) -> Result<Attachment, TetherError> {
        Err(unsupported("camera"))
    }

    /// Directory listing: `[{ "name", "isDir", "path" }]`, sorted by name.
    async fn list_files(&self, path: &str) -> Result<Value, TetherError> {
        let mut dir = tokio::fs::read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "isDir": is_dir,
                "path": entry.path().to_string_lossy(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        debug!(path, count = entries.len(), "listed directory");
        Ok(Value::Array(entries))
    }

    async fn read_file(&self, path: &str) -> Result<Attachment, TetherError> {
        let len = tokio::fs::metadata(path).await?.len();
        if len > MAX_READ_BYTES {
            return Err(TetherError::PayloadTooLarge {
                size: usize::try_from(len).unwrap_or(usize::MAX),
                max: MAX_READ_BYTES as usize,
            });
        }
        let bytes = tokio::fs::read(path).await?;
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Ok(Attachment::new(name, bytes))
    }

    async fn list_sms(&self) -> Result<Value, TetherError> {
        Err(unsupported("sms"))
    }

    async fn send_sms(&self, _to: &str, _body: &str) -> Result<bool, TetherError> {
        Err(unsupported("sms"))
    }

    async fn list_call_logs(&self) -> Result<Value, TetherError> {
        Err(unsupported("call log"))
    }

    async fn list_contacts(&self) -> Result<Value, TetherError> {
        Err(unsupported("contacts"))
    }

    async fn record_mic(&self, _seconds: u32) -> Result<Attachment, TetherError> {
        Err(unsupported("microphone"))
    }

    async fn last_location(&self) -> Result<Option<GeoPoint>, TetherError> {
        Ok(None)
    }
}

// ── Capture ──────────────────────────────────────────────────────

/// Screen capture backend for hosts without a projection API.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessCapture;

#[async_trait]
impl CaptureBackend for HeadlessCapture {
    fn is_supported(&self) -> bool {
        false
    }

    async fn request_consent(&self) -> Result<Option<Box<dyn CaptureConsent>>, TetherError> {
        Ok(None)
    }

    fn create_encoder(&self, _: &EncoderProfile) -> Result<Box<dyn VideoEncoder>, TetherError> {
        Err(unsupported("video encoder"))
    }

    fn create_input_surface(
        &self,
        _: &mut dyn VideoEncoder,
    ) -> Result<Box<dyn InputSurface>, TetherError> {
        Err(unsupported("input surface"))
    }

    fn create_virtual_display(
        &self,
        _: &dyn CaptureConsent,
        _: &EncoderProfile,
        _: &dyn InputSurface,
    ) -> Result<Box<dyn VirtualDisplay>, TetherError> {
        Err(unsupported("virtual display"))
    }
}

// ── Input ────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct NoTouchScreen;

impl InjectionCapability for NoTouchScreen {
    fn probe(&self) -> bool {
        false
    }

    fn inject(&self, _event: TouchEvent) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "tether-agent-{name}-{}",
                std::process::id()
            ));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[tokio::test]
    async fn lists_and_reads_local_files() {
        let scratch = ScratchDir::new("files");
        std::fs::write(scratch.0.join("b.txt"), b"bee").unwrap();
        std::fs::create_dir(scratch.0.join("a")).unwrap();

        let listing = HostDevice
            .list_files(scratch.0.to_str().unwrap())
            .await
            .unwrap();
        let names: Vec<_> = listing
            .as_array()
            .unwrap()
            .iter()
            .map(|e| (e["name"].as_str().unwrap().to_string(), e["isDir"].as_bool().unwrap()))
            .collect();
        assert_eq!(names, [("a".to_string(), true), ("b.txt".to_string(), false)]);

        let file = HostDevice
            .read_file(scratch.0.join("b.txt").to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(file.name, "b.txt");
        assert_eq!(&file.bytes[..], b"bee");
    }

    #[tokio::test]
    async fn files_too_big_for_one_frame_are_refused() {
        let scratch = ScratchDir::new("big");
        let path = scratch.0.join("big.bin");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_READ_BYTES + 1).unwrap();

        let err = HostDevice
            .read_file(path.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn missing_path_is_an_io_error() {
        let err = HostDevice
            .read_file("/definitely/not/here.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::Connection(_)));
    }

    #[tokio::test]
    async fn phone_only_services_are_unsupported() {
        assert!(matches!(
            HostDevice.list_sms().await,
            Err(TetherError::Unsupported(_))
        ));
        assert!(matches!(
            HostDevice.record_mic(5).await,
            Err(TetherError::Unsupported(_))
        ));
        assert_eq!(HostDevice.last_location().await.unwrap(), None);
    }

    #[tokio::test]
    async fn headless_capture_and_input_decline() {
        assert!(!HeadlessCapture.is_supported());
        assert!(HeadlessCapture.request_consent().await.unwrap().is_none());
        assert!(!NoTouchScreen.probe());
    }
}
