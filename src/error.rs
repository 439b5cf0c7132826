//! Error types for the GPU driver core.

use core::fmt;

/// Result type alias used throughout this crate.
pub type GpuResult<T> = Result<T, GpuError>;

/// Everything that can go wrong driving the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "GPU driver errors must be handled, not silently discarded"]
pub enum GpuError {
    /// The ring transport could not publish or complete a transaction.
    Transport { reason: &'static str },
    /// The device responded with something other than the expected success
    /// tag for the command that was sent.
    DeviceError {
        command: &'static str,
        response_tag: u32,
    },
    /// An argument violated a precondition of the operation.
    InvalidArgument { name: &'static str },
    /// The operation is intentionally unimplemented (reserved surface).
    Unsupported { feature: &'static str },
    /// A host-side allocation (typically the framebuffer) could not be made.
    OutOfMemory { requested: usize },
    /// The ring had no free descriptor chain of the required length.
    DescriptorsExhausted,
    /// An operation was attempted in a mode that does not support it (e.g.
    /// a graphics-only call while in text mode).
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { reason } => write!(f, "transport failure: {reason}"),
            Self::DeviceError {
                command,
                response_tag,
            } => write!(
                f,
                "{command} failed: device returned response tag {response_tag:#06x}"
            ),
            Self::InvalidArgument { name } => write!(f, "invalid argument: {name}"),
            Self::Unsupported { feature } => write!(f, "unsupported: {feature}"),
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory: requested {requested} bytes")
            }
            Self::DescriptorsExhausted => write!(f, "ring out of free descriptors"),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {expected}, got {actual}")
            }
        }
    }
}

/// Map a device response type tag that is not the expected success value for
/// `command` into a [`GpuError::DeviceError`], logging the failure.
pub(crate) fn device_error(command: &'static str, response_tag: u32) -> GpuError {
    log::warn!("{command}: unexpected response tag {response_tag:#06x}");
    GpuError::DeviceError {
        command,
        response_tag,
    }
}
