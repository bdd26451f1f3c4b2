//! Run session controller: stream request, lifecycle and SSE transport

pub mod events;
pub mod pump;
pub mod request;
pub mod session;

pub use events::{RunInfo, StreamEvent};
pub use pump::{PumpMessage, StreamEnvelope, StreamHandle};
pub use request::StreamRequest;
pub use session::{Applied, RunPhase, RunSessionController, StatusLine};
