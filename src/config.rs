use std::time::Duration;

use embedded_graphics::prelude::Size;

use crate::constants::{
    DISPLAY_HEIGHT, DISPLAY_WIDTH, IDLE_WAIT, MAX_ROTATION_SECS, MIN_ROTATION_SECS, PROBE_BACKOFF_INITIAL,
    PROBE_BACKOFF_MAX, REFRESH_INTERVAL, SHUTDOWN_TIMEOUT, TICK, WRITE_TIMEOUT,
};
use crate::error::DisplayError;
use crate::scheduler::SchedulerConfig;

/// Everything the display manager needs, read once at start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub tick: Duration,
    pub idle_wait: Duration,
    /// How often a steady panel is rendered again.
    pub refresh_interval: Duration,
    pub write_timeout: Duration,
    pub probe_backoff_initial: Duration,
    pub probe_backoff_max: Duration,
    pub shutdown_timeout: Duration,
    pub scheduler: SchedulerConfig,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: DISPLAY_WIDTH,
            height: DISPLAY_HEIGHT,
            tick: TICK,
            idle_wait: IDLE_WAIT,
            refresh_interval: REFRESH_INTERVAL,
            write_timeout: WRITE_TIMEOUT,
            probe_backoff_initial: PROBE_BACKOFF_INITIAL,
            probe_backoff_max: PROBE_BACKOFF_MAX,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl DisplayConfig {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn validate(&self) -> Result<(), DisplayError> {
        if self.width == 0 || self.height == 0 {
            return Err(DisplayError::config("size", "display size must be non-zero"));
        }
        if self.tick.is_zero() {
            return Err(DisplayError::config("tick", "tick must be non-zero"));
        }
        rotation_interval(self.scheduler.rotation_interval.as_secs_f64())
            .map_err(|reason| DisplayError::config("interval", reason))?;
        Ok(())
    }
}

/// Seconds per item as a duration, within the accepted bounds.
pub fn rotation_interval(secs: f64) -> Result<Duration, String> {
    if !secs.is_finite() || !(MIN_ROTATION_SECS..=MAX_ROTATION_SECS).contains(&secs) {
        return Err(format!(
            "{secs} is outside {MIN_ROTATION_SECS}..={MAX_ROTATION_SECS} seconds"
        ));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DisplayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.size(), Size::new(160, 80));
    }

    #[test]
    fn test_rotation_interval_bounds() {
        assert_eq!(rotation_interval(5.0), Ok(Duration::from_secs(5)));
        assert!(rotation_interval(0.5).is_err());
        assert!(rotation_interval(3601.0).is_err());
        assert!(rotation_interval(f64::NAN).is_err());
    }

    #[test]
    fn test_invalid_interval_is_config_error() {
        let mut config = DisplayConfig::default();
        config.scheduler.rotation_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(DisplayError::ConfigInvalid { .. })));
    }
}
