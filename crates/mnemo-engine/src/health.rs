use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

/// A slice of the primary path with its own breaker and health flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Primary,
    Storage,
    Context,
    Search,
    Preferences,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Primary,
        Capability::Storage,
        Capability::Context,
        Capability::Search,
        Capability::Preferences,
    ];

    /// Also the breaker key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Storage => "storage",
            Self::Context => "context",
            Self::Search => "search",
            Self::Preferences => "preferences",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" | "primary_service" => Ok(Self::Primary),
            "storage" => Ok(Self::Storage),
            "context" => Ok(Self::Context),
            "search" => Ok(Self::Search),
            "preferences" => Ok(Self::Preferences),
            other => Err(format!("unknown capability: {other}")),
        }
    }
}

/// Per-capability health flags plus the process-wide degraded flag. Every
/// flag is a separate atomic.
#[derive(Debug)]
pub struct HealthStatus {
    flags: [AtomicBool; 5],
    degraded: AtomicBool,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            flags: std::array::from_fn(|_| AtomicBool::new(true)),
            degraded: AtomicBool::new(false),
        }
    }

    /// Returns the previous value.
    pub fn mark(&self, capability: Capability, healthy: bool) -> bool {
        self.flags[capability.index()].swap(healthy, Ordering::AcqRel)
    }

    pub fn is_healthy(&self, capability: Capability) -> bool {
        self.flags[capability.index()].load(Ordering::Acquire)
    }

    pub fn set_degraded(&self, degraded: bool) -> bool {
        self.degraded.swap(degraded, Ordering::AcqRel)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Requests are routed to the primary path. Capability flags do not
    /// gate routing; their breakers do.
    pub fn primary_available(&self) -> bool {
        !self.is_degraded() && self.is_healthy(Capability::Primary)
    }

    pub fn all_healthy(&self) -> bool {
        Capability::ALL.iter().all(|c| self.is_healthy(*c))
    }

    pub fn snapshot(&self) -> Vec<(Capability, bool)> {
        Capability::ALL.iter().map(|c| (*c, self.is_healthy(*c))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy_and_not_degraded() {
        let health = HealthStatus::new();
        assert!(Capability::ALL.iter().all(|c| health.is_healthy(*c)));
        assert!(!health.is_degraded());
        assert!(health.primary_available());
        assert!(health.all_healthy());
    }

    #[test]
    fn one_capability_does_not_degrade_the_rest() {
        let health = HealthStatus::new();
        assert!(health.mark(Capability::Search, false));
        assert!(!health.is_healthy(Capability::Search));
        assert!(!health.all_healthy());
        assert!(health.primary_available());

        health.set_degraded(true);
        assert!(!health.primary_available());
        health.set_degraded(false);
        health.mark(Capability::Primary, false);
        assert!(!health.primary_available());
    }

    #[test]
    fn capability_names_round_trip() {
        for c in Capability::ALL {
            assert_eq!(c.as_str().parse::<Capability>().unwrap(), c);
        }
        assert_eq!("primary_service".parse::<Capability>().unwrap(), Capability::Primary);
        assert!("cache".parse::<Capability>().is_err());
    }
}
