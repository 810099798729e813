//! Trigger sources and capability detection

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Event that can start a sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Explicit request from the application; always honored
    Manual,
    /// Host-provided periodic background wake
    Periodic,
    ConnectivityRestored,
    /// Window focus or app foregrounding
    Visibility,
}

impl TriggerKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Periodic => "periodic",
            Self::ConnectivityRestored => "connectivity_restored",
            Self::Visibility => "visibility",
        }
    }

    pub const fn is_automatic(self) -> bool {
        !matches!(self, Self::Manual)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "periodic" => Ok(Self::Periodic),
            "connectivity_restored" | "connectivity" | "online" => Ok(Self::ConnectivityRestored),
            "visibility" | "focus" => Ok(Self::Visibility),
            other => Err(format!("unknown trigger kind: {other}")),
        }
    }
}

/// What the host runtime can deliver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub periodic_wake: bool,
    pub connectivity_events: bool,
    pub visibility_events: bool,
}

impl Capabilities {
    /// The automatic trigger to arm: periodic, then connectivity, then visibility.
    pub const fn best_trigger(&self) -> Option<TriggerKind> {
        if self.periodic_wake {
            Some(TriggerKind::Periodic)
        } else if self.connectivity_events {
            Some(TriggerKind::ConnectivityRestored)
        } else if self.visibility_events {
            Some(TriggerKind::Visibility)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_trigger_prefers_periodic_then_connectivity() {
        let all = Capabilities {
            periodic_wake: true,
            connectivity_events: true,
            visibility_events: true,
        };
        assert_eq!(all.best_trigger(), Some(TriggerKind::Periodic));

        let no_periodic = Capabilities {
            periodic_wake: false,
            ..all
        };
        assert_eq!(no_periodic.best_trigger(), Some(TriggerKind::ConnectivityRestored));

        let focus_only = Capabilities {
            visibility_events: true,
            ..Capabilities::default()
        };
        assert_eq!(focus_only.best_trigger(), Some(TriggerKind::Visibility));
        assert_eq!(Capabilities::default().best_trigger(), None);
    }

    #[test]
    fn test_parse_trigger_aliases() {
        assert_eq!("online".parse::<TriggerKind>(), Ok(TriggerKind::ConnectivityRestored));
        assert_eq!(" Focus ".parse::<TriggerKind>(), Ok(TriggerKind::Visibility));
        assert!("cron".parse::<TriggerKind>().is_err());
    }
}
