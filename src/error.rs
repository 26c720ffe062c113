use crate::timestamp::Timestamp;

/// Failure taxonomy of the step core.
///
/// Only `IndexOutOfRange` signals a caller bug. The others describe degraded but
/// recoverable states: the registry simply ends up with fewer populated steps.
#[derive(Debug, thiserror::Error)]
pub enum WiError {
    #[error("no timestamp markers found in draft")]
    NoMarkersFound,

    #[error("frame extraction failed at {timestamp}: {reason}")]
    ExtractionFailed { timestamp: Timestamp, reason: String },

    #[error("step index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("document assembled without images for {} step(s)", missing.len())]
    AssemblyPartial { missing: Vec<Timestamp> },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WiError {
    pub(crate) fn extraction(timestamp: Timestamp, reason: impl Into<String>) -> Self {
        WiError::ExtractionFailed {
            timestamp,
            reason: reason.into(),
        }
    }

    /// True for conditions the pipeline logs and continues past.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, WiError::IndexOutOfRange { .. } | WiError::Io(_))
    }
}
