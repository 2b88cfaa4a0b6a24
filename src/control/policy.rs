use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Outcome of evaluating a temperature against the configured thresholds.
///
/// The string form (`TurnOnAc`, `TurnOnHeater`, `NoAction`) is what gets
/// stored in `HVAC_Events.event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum HvacAction {
    TurnOnAc,
    TurnOnHeater,
    NoAction,
}

impl HvacAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HvacAction::TurnOnAc => "TurnOnAc",
            HvacAction::TurnOnHeater => "TurnOnHeater",
            HvacAction::NoAction => "NoAction",
        }
    }

    /// The command to send to the HVAC service, or `None` when nothing needs
    /// to be dispatched.
    pub fn command(&self) -> Option<HvacCommand> {
        match self {
            HvacAction::TurnOnAc => Some(HvacCommand::TurnOnAc),
            HvacAction::TurnOnHeater => Some(HvacCommand::TurnOnHeater),
            HvacAction::NoAction => None,
        }
    }
}

impl fmt::Display for HvacAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The dispatchable subset of [`HvacAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HvacCommand {
    TurnOnAc,
    TurnOnHeater,
}

impl HvacCommand {
    /// Path segment used by the HVAC control endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            HvacCommand::TurnOnAc => "TurnOnAc",
            HvacCommand::TurnOnHeater => "TurnOnHeater",
        }
    }
}

impl fmt::Display for HvacCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HvacCommand> for HvacAction {
    fn from(c: HvacCommand) -> Self {
        match c {
            HvacCommand::TurnOnAc => HvacAction::TurnOnAc,
            HvacCommand::TurnOnHeater => HvacAction::TurnOnHeater,
        }
    }
}

/// Map a temperature to an action.
///
/// Cooling is checked first, so with degenerate thresholds
/// (`t_min == t_max == temperature`) the result is `TurnOnAc`.
pub fn decide(temperature: f64, t_min: f64, t_max: f64) -> HvacAction {
    if temperature >= t_max {
        HvacAction::TurnOnAc
    } else if temperature <= t_min {
        HvacAction::TurnOnHeater
    } else {
        HvacAction::NoAction
    }
}

/// Validated `(t_min, t_max)` pair. Always `t_min < t_max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    t_min: f64,
    t_max: f64,
}

impl Thresholds {
    pub fn new(t_min: f64, t_max: f64) -> Result<Self> {
        if !t_min.is_finite() || !t_max.is_finite() {
            bail!("thresholds must be finite numbers (T_MIN={t_min}, T_MAX={t_max})");
        }
        if t_min >= t_max {
            bail!("T_MIN ({t_min}) must be strictly lower than T_MAX ({t_max})");
        }
        Ok(Self { t_min, t_max })
    }

    pub fn t_min(&self) -> f64 {
        self.t_min
    }

    pub fn t_max(&self) -> f64 {
        self.t_max
    }

    pub fn decide(&self, temperature: f64) -> HvacAction {
        decide(temperature, self.t_min, self.t_max)
    }
}
