//! JSON payloads the agent sends back to the controller.
//!
//! Each sub-module defines one body shape. Bodies are serialized with
//! `serde_json` and carried as envelope payloads on the tag of the
//! command kind they answer.

pub mod frame;
pub mod response;

pub use frame::{FRAME_BODY_TYPE, FrameBody, FrameUnit};
pub use response::{Attachment, Response};
