use serde::{Deserialize, Serialize};
use std::fmt;

/// Rack coordinate of a storage position.
///
/// `depth` is reserved for double-deep racking and is never written to the
/// PLC by the gateway; it defaults to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub floor: i16,
    pub rail: i16,
    pub block: i16,
    #[serde(default)]
    pub depth: i16,
}

impl Location {
    pub fn new(floor: i16, rail: i16, block: i16) -> Self {
        Self {
            floor,
            rail,
            block,
            depth: 0,
        }
    }

    pub fn with_depth(floor: i16, rail: i16, block: i16, depth: i16) -> Self {
        Self {
            floor,
            rail,
            block,
            depth,
        }
    }

    /// Manhattan distance over floor/rail/block. Depth is ignored.
    pub fn manhattan_distance_to(&self, other: &Location) -> i32 {
        (self.floor as i32 - other.floor as i32).abs()
            + (self.rail as i32 - other.rail as i32).abs()
            + (self.block as i32 - other.block as i32).abs()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.floor, self.rail, self.block)
    }
}
