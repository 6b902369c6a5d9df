use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::utils::time::{millis, opt_millis};

/// The setup parameters of the resource manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceManagerParams {
    /// Number of I/O worker threads. Zero disables background loading, content is then
    /// only loaded by threads which wait for it.
    pub io_workers: usize,
    /// Number of in-flight hand-overs to the owner thread.
    pub finalize_slots: usize,
    /// Deadlines of queued resources are refreshed at most once per interval.
    #[serde(with = "millis")]
    pub deadline_update_interval: Duration,
    /// Queued resources due later than `now + kick_out_window` are dropped from the queue.
    #[serde(with = "millis")]
    pub kick_out_window: Duration,
    /// A resource acquired within this window counts as recently used.
    #[serde(with = "millis")]
    pub reload_recency_window: Duration,
    /// Re-queues recently used resources right after a reload. They are loaded lazily on
    /// the next acquire otherwise.
    pub reload_preloads_recent: bool,
    /// Nested acquires of one resource beyond this depth are treated as a leak.
    pub max_acquire_depth: i32,
    /// Root directory of the default file loader.
    pub file_root: String,
    /// Time budget of the incremental sweep run by `per_frame_update`. Disabled if `None`.
    #[serde(with = "opt_millis")]
    pub auto_free_unused_timeout: Option<Duration>,
    /// Resources acquired within this threshold survive the incremental sweep.
    #[serde(with = "millis")]
    pub auto_free_unused_threshold: Duration,
}

impl Default for ResourceManagerParams {
    fn default() -> Self {
        ResourceManagerParams {
            io_workers: 2,
            finalize_slots: 16,
            deadline_update_interval: Duration::from_millis(100),
            kick_out_window: Duration::from_secs(30),
            reload_recency_window: Duration::from_secs(30),
            reload_preloads_recent: false,
            max_acquire_depth: 64,
            file_root: ".".into(),
            auto_free_unused_timeout: None,
            auto_free_unused_threshold: Duration::from_secs(10),
        }
    }
}

impl ResourceManagerParams {
    /// Parses parameters from JSON, missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: ResourceManagerParams = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.finalize_slots == 0 {
            return Err(crate::errors::Error::Malformed(
                "finalize_slots MUST be at least 1.".into(),
            ));
        }

        if self.max_acquire_depth <= 0 {
            return Err(crate::errors::Error::Malformed(
                "max_acquire_depth MUST be positive.".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json() {
        let params = ResourceManagerParams::from_json(
            r#"{ "io_workers": 4, "kick_out_window": 5000, "auto_free_unused_timeout": 2 }"#,
        )
        .unwrap();

        assert_eq!(params.io_workers, 4);
        assert_eq!(params.kick_out_window, Duration::from_secs(5));
        assert_eq!(params.auto_free_unused_timeout, Some(Duration::from_millis(2)));
        assert_eq!(params.finalize_slots, 16);

        let text = serde_json::to_string(&params).unwrap();
        assert_eq!(ResourceManagerParams::from_json(&text).unwrap(), params);
    }

    #[test]
    fn malformed() {
        assert!(ResourceManagerParams::from_json("{ \"io_workers\": -1 }").is_err());
        assert!(ResourceManagerParams::from_json("{ \"finalize_slots\": 0 }").is_err());
    }
}
