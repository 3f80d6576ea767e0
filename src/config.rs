use embedded_graphics::prelude::Size;

/// Path tracking policy.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrackerConfig {
    /// Minimum movement in metres before a new point is kept.
    pub min_movement_m: f32,
    /// Attempts per record when the sink reports `WouldBlock`.
    pub sink_attempts: u8,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_movement_m: 5.0,
            sink_attempts: 3,
        }
    }
}

/// Viewport policy. Scales are in pixels per metre.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RenderConfig {
    /// Fraction of the display kept free on each side.
    pub margin: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    /// Relative scale change needed before the viewport is rescaled.
    pub rescale_threshold: f32,
    /// Smallest logical box side in metres, used for degenerate paths.
    pub min_box_m: f32,
    /// Room left ahead of the newest point on a refit, as a fraction of the box side.
    pub lead: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            margin: 0.1,
            min_scale: 1.0e-5,
            max_scale: 4.0,
            rescale_threshold: 0.05,
            min_box_m: 10.0,
            lead: 0.1,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub render: RenderConfig,
    /// Display bounds in pixels.
    pub display: Size,
    /// Period at which the scheduler calls `tick`.
    pub tick_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            render: RenderConfig::default(),
            display: Size::new(400, 240),
            tick_ms: 1000,
        }
    }
}

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("minimum movement must be a finite, non-negative distance")]
    MinMovement,
    #[error("sink attempts must be at least one")]
    SinkAttempts,
    #[error("margin must be in [0, 0.5)")]
    Margin,
    #[error("scale range must satisfy 0 < min <= max")]
    ScaleRange,
    #[error("rescale threshold must be finite and non-negative")]
    RescaleThreshold,
    #[error("minimum box size must be positive")]
    MinBox,
    #[error("lead must be finite and non-negative")]
    Lead,
    #[error("display must be at least one pixel in each direction")]
    EmptyDisplay,
    #[error("tick interval must be non-zero")]
    TickInterval,
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_movement_m.is_finite() || self.min_movement_m < 0.0 {
            return Err(ConfigError::MinMovement);
        }
        if self.sink_attempts == 0 {
            return Err(ConfigError::SinkAttempts);
        }
        Ok(())
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..0.5).contains(&self.margin) {
            return Err(ConfigError::Margin);
        }
        if !(self.min_scale > 0.0 && self.min_scale <= self.max_scale && self.max_scale.is_finite()) {
            return Err(ConfigError::ScaleRange);
        }
        if !self.rescale_threshold.is_finite() || self.rescale_threshold < 0.0 {
            return Err(ConfigError::RescaleThreshold);
        }
        if !(self.min_box_m > 0.0 && self.min_box_m.is_finite()) {
            return Err(ConfigError::MinBox);
        }
        if !self.lead.is_finite() || self.lead < 0.0 {
            return Err(ConfigError::Lead);
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracker.validate()?;
        self.render.validate()?;
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::EmptyDisplay);
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::TickInterval);
        }
        Ok(())
    }
}
