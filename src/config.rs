use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine tuning that is not part of a session. Loaded from `config.toml`
/// (or the file named by `ENTRAIN_CONFIG`); missing keys take defaults.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Used by the headless backend and when a device reports no rate.
    pub sample_rate: u32,
    pub visible_tick_ms: u64,
    pub hidden_tick_ms: u64,
    /// Seconds between pulse scheduler batches.
    pub pulse_interval: f64,
    /// Seconds of pulses covered by each batch. Must exceed the hidden tick.
    pub pulse_lookahead: f64,
    /// A cursor further than this behind `now` is resynced instead of caught up.
    pub pulse_resync: f64,
    pub pulse_ramp: f64,
    pub start_fade: f64,
    pub pause_fade: f64,
    pub complete_fade: f64,
    pub phase_ramp: f64,
    pub ambient_cache_capacity: usize,
    pub ambient_extension: String,
    pub narration_prefetch: usize,
    pub noise_seconds: f32,
    pub voice_gain: f32,
    pub noise_gain: f32,
    pub ambient_gain: f32,
    pub narration_gain: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            visible_tick_ms: 16,
            hidden_tick_ms: 1000,
            pulse_interval: 0.9,
            pulse_lookahead: 1.1,
            pulse_resync: 0.1,
            pulse_ramp: 0.002,
            start_fade: 2.0,
            pause_fade: 0.5,
            complete_fade: 2.0,
            phase_ramp: 3.0,
            ambient_cache_capacity: 3,
            ambient_extension: "mp3".to_string(),
            narration_prefetch: 3,
            noise_seconds: 8.0,
            voice_gain: 1.0,
            noise_gain: 1.0,
            ambient_gain: 1.0,
            narration_gain: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let txt = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&txt)?)
    }

    pub fn generate_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        let txt = toml::to_string_pretty(&Self::default())?;
        std::fs::write(path, txt)?;
        Ok(())
    }
}

fn config_path() -> PathBuf {
    std::env::var_os("ENTRAIN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.toml"))
}

pub static CONFIG: Lazy<EngineConfig> = Lazy::new(|| {
    let path = config_path();
    match EngineConfig::load(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            if path.exists() {
                log::warn!(target: "session::config", "ignoring {}: {e}", path.display());
            }
            EngineConfig::default()
        }
    }
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: EngineConfig = toml::from_str("pulse_lookahead = 1.5\nhidden_tick_ms = 500").unwrap();
        assert_eq!(cfg.pulse_lookahead, 1.5);
        assert_eq!(cfg.hidden_tick_ms, 500);
        assert_eq!(cfg.ambient_cache_capacity, 3);
    }

    #[test]
    fn lookahead_covers_background_tick() {
        let cfg = EngineConfig::default();
        assert!(cfg.pulse_lookahead > cfg.hidden_tick_ms as f64 / 1000.0);
    }
}
