use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a live component instance.
///
/// Also used as the scope id for references owned by a component and as the
/// key of a component's entry in the shared `body` attribute map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

impl ComponentId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ComponentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(ComponentId)
    }
}

impl From<u64> for ComponentId {
    fn from(raw: u64) -> Self {
        ComponentId(raw)
    }
}
