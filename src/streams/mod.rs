//! Streams: what they are, the pumps that run them, and the registry that owns them

pub mod metrics;
pub mod pump;
pub mod registry;
pub mod stream;

pub use metrics::{MetricsSnapshot, PumpMetrics};
pub use pump::{PumpEvent, PumpHandle, PumpState};
pub use registry::{StreamEvent, StreamRegistry};
pub use stream::{Direction, Stream, StreamRecord};
