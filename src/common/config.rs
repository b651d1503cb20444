use std::time::Duration;
use serde::{Serialize, Deserialize};

/// Tunables for the storage and concurrency core.
///
/// Every component takes the specific knob it needs; this struct is the
/// single place callers configure them together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of frames in the buffer pool.
    pub pool_size: usize,
    /// History length K of the LRU-K replacer.
    pub replacer_k: usize,
    /// Maximum number of keys held by a B+ tree leaf page.
    pub leaf_max_size: u32,
    /// Maximum number of children held by a B+ tree internal page.
    pub internal_max_size: u32,
    /// How often the deadlock detector wakes.
    #[serde(with = "interval_millis")]
    pub cycle_detection_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: 128,
            replacer_k: 2,
            leaf_max_size: 255,
            internal_max_size: 255,
            cycle_detection_interval: Duration::from_millis(50),
        }
    }
}

mod interval_millis {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
