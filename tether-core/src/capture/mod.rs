//! Screen capture: consent, encoder setup, and the frame streaming loop.
//!
//! | Module     | Purpose                                              |
//! |------------|------------------------------------------------------|
//! | `backend`  | Platform seam: consent, encoder, surface, display     |
//! | `pipeline` | Session state machine and the streaming task          |

pub mod backend;
pub mod pipeline;

pub use backend::{
    CaptureBackend, CaptureConsent, DEQUEUE_TIMEOUT, Dequeued, EncoderProfile, InputSurface,
    RETRY_DELAY, VideoCodec, VideoEncoder, VirtualDisplay,
};
pub use pipeline::{CapturePipeline, CaptureState, StartOutcome, StartRejection, StopOutcome};
