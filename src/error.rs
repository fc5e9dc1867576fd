// Error type for the soil-column water balance.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunoffError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunoffError {
    /// Negative sublayer moisture at entry. Signals corrupted upstream state;
    /// the caller is expected to abort the run.
    #[error("layer {layer} {sublayer} sublayer has negative soil moisture, {moisture}")]
    NegativeMoisture {
        layer: usize,
        sublayer: &'static str,
        moisture: f64,
    },

    /// Structural problem with the options, soil record or call arguments.
    #[error("invalid runoff configuration: {0}")]
    Config(String),

    /// Failure reported by a thermal-property collaborator.
    #[error("thermal property calculation failed: {0}")]
    Thermal(String),
}

impl RunoffError {
    pub fn config(msg: impl Into<String>) -> Self {
        RunoffError::Config(msg.into())
    }

    pub fn thermal(msg: impl Into<String>) -> Self {
        RunoffError::Thermal(msg.into())
    }

    /// Errors that indicate corrupted model state rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunoffError::NegativeMoisture { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_moisture_message_names_the_slot() {
        let err = RunoffError::NegativeMoisture {
            layer: 1,
            sublayer: "frozen",
            moisture: -2.5,
        };
        assert_eq!(
            err.to_string(),
            "layer 1 frozen sublayer has negative soil moisture, -2.5"
        );
        assert!(err.is_fatal());
        assert!(!RunoffError::config("x").is_fatal());
    }
}
