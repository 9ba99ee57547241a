use std::fmt;

use thiserror::Error;

use crate::aggregate::PatternError;

/// A single configuration problem.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting that must be positive was zero.
    #[error("{0} must be > 0")]
    Zero(&'static str),
    /// A link bandwidth below the minimum.
    #[error("bandwidth too small, minimum 100Bps (got {0}Bps)")]
    BandwidthTooSmall(u64),
    /// A setting above its maximum.
    #[error("{field} out of range: {value} (max {max})")]
    OutOfRange {
        /// The setting.
        field: &'static str,
        /// The rejected value.
        value: u64,
        /// The largest allowed value.
        max: u64,
    },
    /// A connection to an output the element does not have.
    #[error("output port {port} out of range, element has {outputs} outputs")]
    PortOutOfRange {
        /// The requested port.
        port: usize,
        /// The element's output count.
        outputs: usize,
    },
    /// A malformed filter rule.
    #[error("pattern error: {0}")]
    Pattern(#[from] PatternError),
}

/// Every problem found while validating an element's options.
///
/// Elements refuse to build if any problem is found, and report all of them at once.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConfigErrors(Vec<ConfigError>);

impl ConfigErrors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records `err` unless `ok` holds.
    pub(crate) fn check(&mut self, ok: bool, err: impl FnOnce() -> ConfigError) {
        if !ok {
            self.0.push(err());
        }
    }

    pub(crate) fn push(&mut self, err: impl Into<ConfigError>) {
        self.0.push(err.into());
    }

    /// Returns `value` if no problem was recorded.
    pub(crate) fn finish<T>(self, value: T) -> Result<T, Self> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    /// Number of errors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no errors.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the errors.
    pub fn iter(&self) -> impl Iterator<Item = &ConfigError> {
        self.0.iter()
    }
}

impl From<ConfigError> for ConfigErrors {
    fn from(err: ConfigError) -> Self {
        Self(vec![err])
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

/// Errors returned by element handles.
#[derive(Debug, Error)]
pub enum HandleError {
    /// The driver future was dropped or finished.
    #[error("Element driver stopped")]
    DriverStopped,
    /// The new settings were rejected.
    #[error("Invalid configuration:\n{0}")]
    Config(#[from] ConfigErrors),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_problem() {
        let mut errors = ConfigErrors::new();
        errors.check(true, || ConfigError::Zero("RATE"));
        errors.check(false, || ConfigError::Zero("TIMEOUT"));
        errors.push(ConfigError::BandwidthTooSmall(99));

        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.to_string(),
            "TIMEOUT must be > 0\nbandwidth too small, minimum 100Bps (got 99Bps)"
        );
        assert!(errors.finish(()).is_err());
        assert_eq!(ConfigErrors::new().finish(7), Ok(7));
    }
}
