pub mod controller;
pub mod device;
pub mod encoder;
pub mod sampler;
pub mod source;

pub use controller::{CaptureStatus, SamplerController};
pub use device::{DeviceLease, DeviceRegistry, VideoSource};
pub use encoder::{encode_frame, EncodedFrame};
pub use sampler::{FrameSampler, FrameSink, SkipReason, TickOutcome};
pub use source::{FrameSlot, FrameSlotSource};
