use std::{str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;

use crate::control::policy::Thresholds;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL shared by the sensor hub and the HVAC control API.
    pub host: String,
    pub token: String,
    pub database_url: String,
    pub thresholds: Thresholds,
    /// Duration sent along with every HVAC command.
    pub ticks: u32,
    pub hub_path: String,
    /// Hub event carrying sensor readings.
    pub hub_event: String,
    /// Zone every stored timestamp is normalized into.
    pub timezone: Tz,
    pub keep_alive_secs: u64,
    pub reconnect_interval_secs: u64,
    pub max_reconnect_attempts: u32,
    pub skip_negotiation: bool,
    pub hvac_timeout_secs: u64,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let t_min: f64 = env.parsed_required("T_MIN")?;
        let t_max: f64 = env.parsed_required("T_MAX")?;
        let thresholds = Thresholds::new(t_min, t_max)?;

        let timezone = env.optional("TIMEZONE", "US/Eastern");
        let timezone = timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("TIMEZONE must be an IANA zone name, got {timezone:?}: {e}"))?;

        let ticks: u32 = env.parsed_optional("TICKS", "10")?;
        if ticks == 0 {
            anyhow::bail!("TICKS must be a positive integer");
        }

        Ok(Self {
            host: env.required("HOST")?.trim_end_matches('/').to_owned(),
            token: env.required("TOKEN")?,
            database_url: env.required("DATABASE_URL")?,
            thresholds,
            ticks,
            hub_path: env.optional("HUB_PATH", "SensorHub").trim_matches('/').to_owned(),
            hub_event: env.optional("HUB_EVENT", "ReceiveSensorData"),
            timezone,
            keep_alive_secs: env.parsed_optional("KEEP_ALIVE_SECS", "10")?,
            reconnect_interval_secs: env.parsed_optional("RECONNECT_INTERVAL_SECS", "5")?,
            max_reconnect_attempts: env.parsed_optional("MAX_RECONNECT_ATTEMPTS", "999")?,
            skip_negotiation: parse_bool(&env.optional("SKIP_NEGOTIATION", "false"))
                .context("SKIP_NEGOTIATION must be true or false")?,
            hvac_timeout_secs: env.parsed_optional("HVAC_TIMEOUT_SECS", "10")?,
            server_host: env.optional("SERVER_HOST", "0.0.0.0"),
            server_port: env
                .optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
        })
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn hvac_timeout(&self) -> Duration {
        Duration::from_secs(self.hvac_timeout_secs)
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &str) -> Result<String> {
        (self.0)(key)
            .filter(|v| !v.trim().is_empty())
            .with_context(|| format!("missing required env var: {key}"))
    }

    fn optional(&self, key: &str, default: &str) -> String {
        (self.0)(key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default.to_owned())
    }

    fn parsed_required<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(key)?;
        raw.trim()
            .parse()
            .map_err(|e| anyhow!("{key} must be numeric, got {raw:?}: {e}"))
    }

    fn parsed_optional<T>(&self, key: &str, default: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.optional(key, default);
        raw.trim()
            .parse()
            .map_err(|e| anyhow!("{key} must be a non-negative integer, got {raw:?}: {e}"))
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(anyhow!("not a boolean: {other:?}")),
    }
}
