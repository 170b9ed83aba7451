use log::{debug, info, trace, warn};
use serde::Deserialize;

/// User preference for active illumination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorchMode {
    /// Turn the torch on when the patch is too dark, off when it saturates
    #[default]
    Auto,
    /// Never turn the torch on; it is still turned off on saturation
    Off,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IlluminationConfig {
    /// Red mean at or above which the sensor counts as saturated (0-255)
    pub sat_high: f64,
    /// Red mean at or below which the patch counts as too dark (0-255)
    pub dark_low: f64,
    /// Streak length that triggers a torch change
    pub trigger_ticks: u32,
    /// Minimum time between applied torch changes
    pub min_apply_interval_ms: f64,
    /// A request with no reported outcome after this long is abandoned
    pub pending_timeout_ms: f64,
    /// An applied change this soon after the previous one counts as a reversal
    pub reversal_window_ms: f64,
    /// Ceiling for the apply interval, which doubles with each reversal
    pub max_apply_interval_ms: f64,
    pub mode: TorchMode,
}

impl Default for IlluminationConfig {
    fn default() -> Self {
        Self {
            sat_high: 245.0,
            dark_low: 40.0,
            trigger_ticks: 5,
            min_apply_interval_ms: 700.0,
            pending_timeout_ms: 2000.0,
            reversal_window_ms: 5000.0,
            max_apply_interval_ms: 8000.0,
            mode: TorchMode::Auto,
        }
    }
}

/// Outcome of a torch constraint change, reported by the device after the fact.
#[derive(Debug, Clone, PartialEq)]
pub enum TorchOutcome {
    Applied,
    Failed(String),
}

/// At most one torch request is outstanding, followed by a cooldown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TorchRequestState {
    Idle,
    Pending { enabled: bool, issued_at_ms: f64 },
    CoolingDown { until_ms: f64 },
}

/// Watches the red-mean stream and decides when to switch the torch.
///
/// `observe` never talks to hardware: it returns the torch state to request
/// and the caller dispatches it without waiting. The device's answer comes
/// back through `complete_request` on some later tick.
#[derive(Debug, Clone)]
pub struct IlluminationController {
    config: IlluminationConfig,
    torch_available: bool,
    torch_enabled: bool,
    saturated_streak: u32,
    dark_streak: u32,
    request: TorchRequestState,
    /// Target of a request that timed out; a late answer still lands here
    abandoned: Option<bool>,
    last_apply_at_ms: Option<f64>,
    reversals: u32,
    clipped: bool,
    too_dark: bool,
}

impl IlluminationController {
    pub fn new(config: IlluminationConfig, torch_available: bool, torch_enabled: bool) -> Self {
        if !torch_available {
            info!("Torch not available, illumination control is passive");
        }
        Self {
            config,
            torch_available,
            torch_enabled: torch_available && torch_enabled,
            saturated_streak: 0,
            dark_streak: 0,
            request: TorchRequestState::Idle,
            abandoned: None,
            last_apply_at_ms: None,
            reversals: 0,
            clipped: false,
            too_dark: false,
        }
    }

    /// Feed one red-mean sample. Returns `Some(enabled)` when a torch change
    /// should be dispatched now.
    pub fn observe(&mut self, red_mean: f64, now_ms: f64) -> Option<bool> {
        self.clipped = red_mean >= self.config.sat_high;
        self.too_dark = red_mean <= self.config.dark_low;

        let cap = self.config.trigger_ticks.saturating_mul(2).max(1);
        self.saturated_streak = step_streak(self.saturated_streak, self.clipped, cap);
        self.dark_streak = step_streak(self.dark_streak, self.too_dark, cap);

        self.advance_request_state(now_ms);

        if !self.torch_available || self.request != TorchRequestState::Idle {
            return None;
        }
        if let Some(last) = self.last_apply_at_ms {
            if now_ms - last < self.apply_interval_ms() {
                return None;
            }
        }

        let wanted = if self.saturated_streak >= self.config.trigger_ticks && self.torch_enabled {
            self.saturated_streak = 0;
            Some(false)
        } else if self.dark_streak >= self.config.trigger_ticks
            && !self.torch_enabled
            && self.config.mode == TorchMode::Auto
        {
            self.dark_streak = 0;
            Some(true)
        } else {
            None
        };

        if let Some(enabled) = wanted {
            debug!("Requesting torch {} at {:.0} ms", on_off(enabled), now_ms);
            self.abandoned = None;
            self.request = TorchRequestState::Pending {
                enabled,
                issued_at_ms: now_ms,
            };
        }
        wanted
    }

    /// Record the device's answer to the outstanding request.
    ///
    /// An answer to a request that already timed out still updates the torch
    /// state, so it keeps matching the hardware.
    pub fn complete_request(&mut self, now_ms: f64, outcome: TorchOutcome) {
        let TorchRequestState::Pending { enabled, .. } = self.request else {
            match (self.abandoned.take(), outcome) {
                (Some(enabled), TorchOutcome::Applied) => {
                    info!("Late torch {} applied at {:.0} ms", on_off(enabled), now_ms);
                    self.record_applied(enabled, now_ms);
                }
                (Some(enabled), TorchOutcome::Failed(reason)) => {
                    debug!("Late torch {} failure: {}", on_off(enabled), reason);
                }
                (None, outcome) => {
                    debug!("Ignoring torch outcome with no request pending: {:?}", outcome);
                }
            }
            return;
        };

        match outcome {
            TorchOutcome::Applied => {
                info!("Torch {} applied at {:.0} ms", on_off(enabled), now_ms);
                self.record_applied(enabled, now_ms);
            }
            TorchOutcome::Failed(reason) => {
                warn!("Torch {} request failed: {}", on_off(enabled), reason);
            }
        }
        self.request = TorchRequestState::CoolingDown {
            until_ms: now_ms + self.config.min_apply_interval_ms,
        };
    }

    fn record_applied(&mut self, enabled: bool, now_ms: f64) {
        self.reversals = match self.last_apply_at_ms {
            Some(last) if now_ms - last < self.config.reversal_window_ms => {
                (self.reversals + 1).min(16)
            }
            _ => 0,
        };
        if self.reversals > 0 {
            debug!(
                "Torch reversal {}, next change no sooner than {:.0} ms",
                self.reversals,
                self.apply_interval_ms()
            );
        }
        self.torch_enabled = enabled;
        self.last_apply_at_ms = Some(now_ms);
    }

    /// Minimum spacing of applied changes, doubled for each recent reversal.
    pub fn apply_interval_ms(&self) -> f64 {
        let base = self.config.min_apply_interval_ms;
        (base * 2f64.powi(self.reversals as i32)).min(self.config.max_apply_interval_ms.max(base))
    }

    fn advance_request_state(&mut self, now_ms: f64) {
        match self.request {
            TorchRequestState::Pending {
                enabled,
                issued_at_ms,
            } if now_ms - issued_at_ms >= self.config.pending_timeout_ms => {
                warn!(
                    "Torch request unanswered after {:.0} ms, abandoning",
                    now_ms - issued_at_ms
                );
                self.abandoned = Some(enabled);
                self.request = TorchRequestState::CoolingDown {
                    until_ms: now_ms + self.config.min_apply_interval_ms,
                };
            }
            TorchRequestState::CoolingDown { until_ms } if now_ms >= until_ms => {
                trace!("Torch cooldown over");
                self.request = TorchRequestState::Idle;
            }
            _ => {}
        }
    }

    /// Last sample was at or above the saturation threshold.
    pub fn is_clipped(&self) -> bool {
        self.clipped
    }

    /// Last sample was at or below the darkness threshold.
    pub fn is_too_dark(&self) -> bool {
        self.too_dark
    }

    pub fn torch_available(&self) -> bool {
        self.torch_available
    }

    pub fn torch_enabled(&self) -> bool {
        self.torch_enabled
    }

    pub fn request_state(&self) -> TorchRequestState {
        self.request
    }

    pub fn saturated_streak(&self) -> u32 {
        self.saturated_streak
    }

    pub fn dark_streak(&self) -> u32 {
        self.dark_streak
    }
}

fn step_streak(streak: u32, hit: bool, cap: u32) -> u32 {
    if hit {
        (streak + 1).min(cap)
    } else {
        streak.saturating_sub(1)
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}
