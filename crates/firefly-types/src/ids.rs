// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Identifiers
// ─────────────────────────────────────────────────────────────────────

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one oscillator. In a grid this is the row-major cell index;
/// in a distributed deployment it is assigned by the node config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OscillatorId(pub u32);

impl fmt::Display for OscillatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for OscillatorId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Cell coordinates on the torus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPos {
    pub row: usize,
    pub col: usize,
}

impl GridPos {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_serializes_as_number() {
        let json = serde_json::to_string(&OscillatorId(17)).unwrap();
        assert_eq!(json, "17");
        let back: OscillatorId = serde_json::from_str("17").unwrap();
        assert_eq!(back, OscillatorId(17));
    }

    #[test]
    fn test_display() {
        assert_eq!(OscillatorId(4).to_string(), "#4");
        assert_eq!(GridPos::new(2, 5).to_string(), "(2, 5)");
    }
}
