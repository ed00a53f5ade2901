// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Configuration
// ─────────────────────────────────────────────────────────────────────

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use firefly_physics::params::{
    DEFAULT_COUPLING, DEFAULT_FREQUENCY_HZ, DEFAULT_THRESHOLD, DEFAULT_TICK_MS, MAX_GRID_CELLS,
    NEIGHBORS_PER_CELL,
};

use crate::error::{SyncError, SyncResult};
use crate::ids::OscillatorId;

/// How neighbors exchange signals and how the coupling sum is formed.
///
/// The two families are never mixed inside one oscillator:
/// - `Flash`: push. An oscillator broadcasts its flash timestamp on the
///   rising edge of `activity > threshold`; receivers adjust on arrival.
/// - `Sampled`: pull. At most `adjustment_hz` times per second the
///   oscillator reads every neighbor's current phase and adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CouplingFamily {
    Flash { threshold: f64 },
    Sampled { adjustment_hz: f64 },
}

impl Default for CouplingFamily {
    fn default() -> Self {
        CouplingFamily::Flash {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl CouplingFamily {
    pub fn is_flash(&self) -> bool {
        matches!(self, CouplingFamily::Flash { .. })
    }
}

/// Per-oscillator synchronization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Natural flashing frequency in Hz.
    /// Default: 0.1.
    pub frequency_hz: f64,

    /// Kuramoto coupling constant K (dimensionless, >= 0).
    /// Default: 1.0.
    pub coupling: f64,

    /// Signal exchange family.
    /// Default: flash with threshold 0.99.
    pub family: CouplingFamily,

    /// Sleep between loop ticks in milliseconds.
    /// Default: 10.
    pub tick_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            coupling: DEFAULT_COUPLING,
            family: CouplingFamily::default(),
            tick_interval_ms: DEFAULT_TICK_MS,
        }
    }
}

impl SyncConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.frequency_hz.is_finite() || self.frequency_hz <= 0.0 {
            return Err(SyncError::Config(format!(
                "frequency_hz must be finite and > 0, got {}",
                self.frequency_hz
            )));
        }
        if !self.coupling.is_finite() || self.coupling < 0.0 {
            return Err(SyncError::Config(format!(
                "coupling must be finite and >= 0, got {}",
                self.coupling
            )));
        }
        match self.family {
            CouplingFamily::Flash { threshold } => {
                // threshold = 1 would never flash; asin is undefined outside [-1, 1].
                if !(threshold > -1.0 && threshold < 1.0) {
                    return Err(SyncError::Config(format!(
                        "flash threshold must be in (-1, 1), got {threshold}"
                    )));
                }
            }
            CouplingFamily::Sampled { adjustment_hz } => {
                if !adjustment_hz.is_finite() || adjustment_hz <= 0.0 {
                    return Err(SyncError::Config(format!(
                        "adjustment_hz must be finite and > 0, got {adjustment_hz}"
                    )));
                }
            }
        }
        if self.tick_interval_ms == 0 {
            return Err(SyncError::Config(
                "tick_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SyncError::Config(format!("JSON parse error: {e}")))
    }
}

/// In-process torus simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub rows: usize,
    pub cols: usize,
    pub sync: SyncConfig,
    /// Seed for initial phases. `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: 30,
            cols: 30,
            sync: SyncConfig::default(),
            seed: None,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> SyncResult<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(SyncError::Config(format!(
                "grid dimensions must be >= 1, got {}x{}",
                self.rows, self.cols
            )));
        }
        match self.rows.checked_mul(self.cols) {
            Some(cells) if cells <= MAX_GRID_CELLS => {}
            _ => {
                return Err(SyncError::Config(format!(
                    "grid {}x{} exceeds {MAX_GRID_CELLS} cells (one thread per cell)",
                    self.rows, self.cols
                )))
            }
        }
        self.sync.validate()
    }

    pub fn cells(&self) -> usize {
        self.rows * self.cols
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SyncError::Config(format!("JSON parse error: {e}")))
    }
}

/// Process-reachable identity of a remote oscillator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle {
    pub id: OscillatorId,
    /// `host:port` the peer listens on.
    pub addr: String,
}

impl PeerHandle {
    pub fn new(id: impl Into<OscillatorId>, addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
        }
    }
}

/// Startup registration backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// First retry delay; doubles on every round.
    /// Default: 100.
    pub initial_backoff_ms: u64,
    /// Backoff cap.
    /// Default: 2000.
    pub max_backoff_ms: u64,
    /// Give up after this long. `None` waits forever.
    pub timeout_ms: Option<u64>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            timeout_ms: None,
        }
    }
}

/// Bounds on a single remote signal delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Default: 250.
    pub connect_timeout_ms: u64,
    /// Read/write timeout on an established connection.
    /// Default: 250.
    pub io_timeout_ms: u64,
    /// Connection attempts per delivery.
    /// Default: 2.
    pub attempts: u32,
    /// Pause between attempts.
    /// Default: 20.
    pub retry_backoff_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 250,
            io_timeout_ms: 250,
            attempts: 2,
            retry_backoff_ms: 20,
        }
    }
}

/// One distributed oscillator process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub id: OscillatorId,
    /// Address to bind, e.g. `0.0.0.0:7000`.
    pub listen: String,
    /// Address announced to neighbors. Defaults to the bound address.
    pub advertise: Option<String>,
    pub neighbors: Vec<PeerHandle>,
    /// Fixed start phase; random in [0, 2π) when absent.
    pub initial_phase: Option<f64>,
    pub sync: SyncConfig,
    pub registration: RegistrationConfig,
    pub delivery: DeliveryConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: OscillatorId(0),
            listen: "127.0.0.1:7000".to_string(),
            advertise: None,
            neighbors: Vec::new(),
            initial_phase: None,
            sync: SyncConfig::default(),
            registration: RegistrationConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> SyncResult<()> {
        self.sync.validate()?;
        if !self.sync.family.is_flash() {
            return Err(SyncError::Config(
                "distributed nodes only support the flash coupling family".to_string(),
            ));
        }
        if self.listen.trim().is_empty() {
            return Err(SyncError::Config("listen address is empty".to_string()));
        }
        if self.neighbors.len() > NEIGHBORS_PER_CELL {
            return Err(SyncError::Config(format!(
                "at most {NEIGHBORS_PER_CELL} neighbors, got {}",
                self.neighbors.len()
            )));
        }
        let mut seen = HashSet::new();
        for peer in &self.neighbors {
            if peer.id == self.id {
                return Err(SyncError::Config(format!(
                    "node {} lists itself as a neighbor",
                    self.id
                )));
            }
            if !seen.insert(peer.id) {
                return Err(SyncError::Config(format!(
                    "neighbor {} listed twice",
                    peer.id
                )));
            }
            if peer.addr.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "neighbor {} has no address",
                    peer.id
                )));
            }
        }
        if let Some(phase) = self.initial_phase {
            if !phase.is_finite() {
                return Err(SyncError::Config(format!(
                    "initial_phase must be finite, got {phase}"
                )));
            }
        }
        if self.delivery.attempts == 0 {
            return Err(SyncError::Config("delivery.attempts must be >= 1".to_string()));
        }
        if self.registration.initial_backoff_ms == 0
            || self.registration.max_backoff_ms < self.registration.initial_backoff_ms
        {
            return Err(SyncError::Config(format!(
                "registration backoff must satisfy 0 < initial ({}) <= max ({})",
                self.registration.initial_backoff_ms, self.registration.max_backoff_ms
            )));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SyncError::Config(format!("JSON parse error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        assert!(SyncConfig::default().validate().is_ok());
        assert!(GridConfig::default().validate().is_ok());
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_frequency() {
        for f in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cfg = SyncConfig {
                frequency_hz: f,
                ..SyncConfig::default()
            };
            assert!(cfg.validate().is_err(), "frequency {f} should be rejected");
        }
    }

    #[test]
    fn test_rejects_negative_coupling() {
        let cfg = SyncConfig {
            coupling: -0.1,
            ..SyncConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_zero_coupling_allowed() {
        let cfg = SyncConfig {
            coupling: 0.0,
            ..SyncConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_threshold_bounds() {
        for t in [1.0, -1.0, 1.5] {
            let cfg = SyncConfig {
                family: CouplingFamily::Flash { threshold: t },
                ..SyncConfig::default()
            };
            assert!(cfg.validate().is_err(), "threshold {t} should be rejected");
        }
    }

    #[test]
    fn test_sampled_rate_must_be_positive() {
        let cfg = SyncConfig {
            family: CouplingFamily::Sampled { adjustment_hz: 0.0 },
            ..SyncConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_grid_dimensions() {
        let cfg = GridConfig {
            rows: 0,
            ..GridConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = GridConfig {
            rows: 1,
            cols: 1,
            ..GridConfig::default()
        };
        assert!(cfg.validate().is_ok());
        let cfg = GridConfig {
            rows: usize::MAX,
            cols: 2,
            ..GridConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_node_rejects_sampled_family() {
        let cfg = NodeConfig {
            sync: SyncConfig {
                family: CouplingFamily::Sampled { adjustment_hz: 5.0 },
                ..SyncConfig::default()
            },
            ..NodeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_node_rejects_self_and_duplicate_neighbors() {
        let cfg = NodeConfig {
            id: OscillatorId(1),
            neighbors: vec![PeerHandle::new(1, "127.0.0.1:7001")],
            ..NodeConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = NodeConfig {
            id: OscillatorId(1),
            neighbors: vec![
                PeerHandle::new(2, "127.0.0.1:7002"),
                PeerHandle::new(2, "127.0.0.1:7003"),
            ],
            ..NodeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_node_rejects_five_neighbors() {
        let cfg = NodeConfig {
            id: OscillatorId(0),
            neighbors: (1..=5)
                .map(|i| PeerHandle::new(i, format!("127.0.0.1:{}", 7000 + i)))
                .collect(),
            ..NodeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = SyncConfig::from_json(
            r#"{"frequency_hz": 1.0, "family": {"kind": "flash", "threshold": 0.9}}"#,
        )
        .unwrap();
        assert_eq!(cfg.frequency_hz, 1.0);
        assert_eq!(cfg.family, CouplingFamily::Flash { threshold: 0.9 });
        assert_eq!(cfg.tick_interval_ms, DEFAULT_TICK_MS);
    }

    #[test]
    fn test_node_from_json() {
        let cfg = NodeConfig::from_json(
            r#"{
                "id": 5,
                "listen": "127.0.0.1:7005",
                "neighbors": [{"id": 4, "addr": "127.0.0.1:7004"}],
                "registration": {"timeout_ms": 3000}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.id, OscillatorId(5));
        assert_eq!(cfg.neighbors[0].id, OscillatorId(4));
        assert_eq!(cfg.registration.timeout_ms, Some(3000));
        assert_eq!(cfg.registration.initial_backoff_ms, 100);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            GridConfig::from_json("{not json"),
            Err(SyncError::Config(_))
        ));
    }
}
