//! Ordered speech delivery pipeline
//!
//! ```text
//!  segments ──► Sequencer ──► SynthesisJob (concurrent) ──┐
//!                 admit()      whole-file │ streaming      │ (slot, payload)
//!                                                         ▼
//!                                   reassembly channel ──► sender loop ──► Transport
//!                                                          (in slot order)
//! ```
//!
//! Positions are fixed at admission; synthesis may finish in any order; the
//! sender loop is the only ordering authority the client sees.

pub mod manager;
pub mod payload;
pub mod segment;
pub mod sender;
pub mod sequencer;
pub mod task;
pub mod transport;

pub use manager::{ManagerConfig, TtsTaskManager};
pub use payload::{AudioInput, AudioPayloadBuilder, Payload, PayloadBuilder, PayloadKind, PayloadType};
pub use segment::{Actions, DisplayText, Expression, Segment, is_silent_text};
pub use sender::{Queued, ReassemblyBuffer};
pub use sequencer::{Position, Sequencer, Slot};
pub use transport::{ChannelTransport, Transport};
