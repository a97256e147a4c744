//! Circuit policies and the flat `circuit.<name>.<property>` configuration
//! surface.
//!
//! ```rust
//! use circuit_gate::config::load_properties;
//! use std::time::Duration;
//!
//! let loaded = load_properties([
//!     ("circuit.payments.frequency", "2"),
//!     ("circuit.payments.period", "500"),
//!     ("circuit.payments.reset", "1000"),
//!     ("circuit.search.frequency", "5"),
//!     ("server.port", "8080"),
//! ]);
//!
//! let payments = &loaded.policies()["payments"];
//! assert_eq!(payments.threshold(), 2);
//! assert_eq!(payments.window(), Some(Duration::from_millis(500)));
//! assert_eq!(payments.reset_timeout(), Duration::from_millis(1000));
//!
//! // `search` is missing `period` and `reset`, so it stays on the default policy
//! assert!(!loaded.policies().contains_key("search"));
//! assert_eq!(loaded.errors().len(), 1);
//! ```

use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::time::Duration;

/// Prefix shared by every circuit property key.
pub const CONFIG_KEY_PREFIX: &str = "circuit.";

pub const FREQUENCY_KEY: &str = "frequency";
pub const PERIOD_KEY: &str = "period";
pub const RESET_KEY: &str = "reset";

/// Cooldown used by circuits that have no explicit configuration.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(15);

/// Numeric thresholds of one circuit.
///
/// Deserialization goes through the same checks as [`CircuitPolicy::validate`]:
/// a zero threshold or an empty window is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawPolicy"))]
pub struct CircuitPolicy {
    threshold: usize,
    window: Option<Duration>,
    reset_timeout: Duration,
}

impl CircuitPolicy {
    /// Trips once `frequency` tripping failures fall inside a trailing
    /// `period`. A zero `frequency` is raised to one.
    pub fn windowed(frequency: usize, period: Duration, reset_timeout: Duration) -> Self {
        Self {
            threshold: frequency.max(1),
            window: Some(period),
            reset_timeout,
        }
    }

    /// Trips on the first tripping failure.
    pub fn single_failure(reset_timeout: Duration) -> Self {
        Self {
            threshold: 1,
            window: None,
            reset_timeout,
        }
    }

    /// Failure count that trips the circuit.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Span over which failures are counted. `None` means failures never
    /// age out while the circuit is closed.
    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    /// Time the circuit stays open before a trial call is allowed.
    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }
}

impl CircuitPolicy {
    /// Builds a policy from raw parts, rejecting a zero threshold and a
    /// zero-length window.
    pub fn validate(
        threshold: usize,
        window: Option<Duration>,
        reset_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if threshold == 0 {
            return Err(ConfigError::InvalidPolicy("threshold must be at least 1"));
        }
        if window == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidPolicy("window must be positive"));
        }
        Ok(Self {
            threshold,
            window,
            reset_timeout,
        })
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawPolicy {
    threshold: usize,
    window: Option<Duration>,
    reset_timeout: Duration,
}

#[cfg(feature = "serde")]
impl TryFrom<RawPolicy> for CircuitPolicy {
    type Error = ConfigError;

    fn try_from(raw: RawPolicy) -> Result<Self, Self::Error> {
        Self::validate(raw.threshold, raw.window, raw.reset_timeout)
    }
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self::single_failure(DEFAULT_RESET_TIMEOUT)
    }
}

/// Result of loading a flat property set.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    policies: BTreeMap<String, CircuitPolicy>,
    errors: Vec<ConfigError>,
}

impl LoadedConfig {
    /// Circuits with all three properties present and positive.
    pub fn policies(&self) -> &BTreeMap<String, CircuitPolicy> {
        &self.policies
    }

    /// Entries that were skipped, in the order they were found.
    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    pub fn into_policies(self) -> BTreeMap<String, CircuitPolicy> {
        self.policies
    }
}

#[derive(Debug, Default)]
struct PartialPolicy {
    frequency: Option<i64>,
    period: Option<i64>,
    reset: Option<i64>,
}

impl PartialPolicy {
    fn complete(&self) -> Option<CircuitPolicy> {
        match (self.frequency, self.period, self.reset) {
            (Some(frequency), Some(period), Some(reset))
                if frequency > 0 && period > 0 && reset > 0 =>
            {
                Some(CircuitPolicy::windowed(
                    usize::try_from(frequency).unwrap_or(usize::MAX),
                    Duration::from_millis(period.unsigned_abs()),
                    Duration::from_millis(reset.unsigned_abs()),
                ))
            }
            _ => None,
        }
    }
}

/// Parses `circuit.<name>.frequency`, `circuit.<name>.period` (milliseconds)
/// and `circuit.<name>.reset` (milliseconds) entries.
///
/// Keys outside the `circuit.` prefix are skipped silently. Every other
/// problem is logged, recorded in [`LoadedConfig::errors`] and skipped;
/// loading never fails as a whole.
pub fn load_properties<I, K, V>(properties: I) -> LoadedConfig
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut partials: BTreeMap<String, PartialPolicy> = BTreeMap::new();
    let mut errors = Vec::new();

    for (key, value) in properties {
        let key = key.as_ref();
        let Some(rest) = key.strip_prefix(CONFIG_KEY_PREFIX) else {
            continue;
        };

        let Some((name, property)) = rest.split_once('.').filter(|(n, p)| !n.is_empty() && !p.is_empty())
        else {
            record(&mut errors, ConfigError::MalformedKey { key: key.to_string() });
            continue;
        };

        let slot = match property {
            FREQUENCY_KEY | PERIOD_KEY | RESET_KEY => property,
            _ => {
                record(&mut errors, ConfigError::UnknownProperty { key: key.to_string() });
                continue;
            }
        };

        let value = value.as_ref();
        let number = match value.trim().parse::<i64>() {
            Ok(n) => n,
            Err(_) => {
                record(
                    &mut errors,
                    ConfigError::InvalidNumber {
                        key: key.to_string(),
                        value: value.to_string(),
                    },
                );
                continue;
            }
        };

        let partial = partials.entry(name.to_string()).or_default();
        match slot {
            FREQUENCY_KEY => partial.frequency = Some(number),
            PERIOD_KEY => partial.period = Some(number),
            _ => partial.reset = Some(number),
        }
    }

    let mut policies = BTreeMap::new();
    for (name, partial) in partials {
        match partial.complete() {
            Some(policy) => {
                policies.insert(name, policy);
            }
            None => record(
                &mut errors,
                ConfigError::Incomplete {
                    name,
                    frequency: partial.frequency,
                    period: partial.period,
                    reset: partial.reset,
                },
            ),
        }
    }

    LoadedConfig { policies, errors }
}

fn record(errors: &mut Vec<ConfigError>, error: ConfigError) {
    #[cfg(feature = "tracing")]
    tracing::warn!(%error, "skipping circuit configuration entry");
    errors.push(error);
}
