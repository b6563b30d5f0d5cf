pub mod frame;
pub mod handpose;

pub use frame::{FrameError, Orientation, Rotation, decode_frame};
pub use handpose::{DetectorConfig, HandDetector, MediapipeHandDetector};
