use serde::Serialize;
use std::fmt;

/// Lifecycle of the open wallet file.
///
/// ```text
/// Closed ─► Opening ─┬─► Loaded ─► Saving ─┬─► Saved ─► (Saving ...)
///                    │               ▲     └─► Loaded (save failed)
///                    └─► FailedOpen  └──────── Saved
/// ```
///
/// Every state may go back to `Closed`. A snapshot save leaves the state
/// where it is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Closed,
    Opening,
    Loaded,
    FailedOpen,
    Saving,
    Saved,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Closed => "closed",
            LifecycleState::Opening => "opening",
            LifecycleState::Loaded => "loaded",
            LifecycleState::FailedOpen => "failed_open",
            LifecycleState::Saving => "saving",
            LifecycleState::Saved => "saved",
        }
    }

    /// A wallet is in memory and usable.
    pub fn is_open(&self) -> bool {
        matches!(self, LifecycleState::Loaded | LifecycleState::Saving | LifecycleState::Saved)
    }

    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (_, Closed) => true,
            (Closed, Opening) | (FailedOpen, Opening) => true,
            (Opening, Loaded) | (Opening, FailedOpen) => true,
            (Loaded, Saving) | (Saved, Saving) => true,
            (Saving, Saved) | (Saving, Loaded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
