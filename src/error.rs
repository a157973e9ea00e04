use crate::audio::layer::LayerId;

/// Failures the looper engine reports to its caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LooperError {
    /// No input device, permission denied, or the output sink could not be opened.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The recorded take was empty or could not be parsed back into PCM.
    #[error("could not decode recorded take: {0}")]
    DecodeError(String),

    /// A second recording was requested while one is still running.
    #[error("recording already in progress: {0}")]
    ScheduleConflict(&'static str),

    #[error("{name} must be between {min} and {max}, got {value}")]
    InvalidSetting {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("no layer with id {0}")]
    LayerNotFound(LayerId),

    #[error("tempo can only be changed while no layers are recorded")]
    BpmLocked,
}

pub type Result<T, E = LooperError> = std::result::Result<T, E>;

impl LooperError {
    pub(crate) fn check_range(name: &'static str, value: i64, min: i64, max: i64) -> Result<()> {
        if (min..=max).contains(&value) {
            Ok(())
        } else {
            Err(Self::InvalidSetting {
                name,
                value,
                min,
                max,
            })
        }
    }
}
