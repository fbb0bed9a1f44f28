use serde::{Deserialize, Serialize};

use crate::error::SessionError;

fn default_volume() -> f32 {
    1.0
}

fn default_fade() -> f64 {
    3.0
}

fn default_breathing_hz() -> f64 {
    0.2
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct FrequencyPoint {
    pub time: f64,
    #[serde(alias = "beatFreq", alias = "beat_frequency")]
    pub beat_freq: f64,
}

impl FrequencyPoint {
    pub fn new(time: f64, beat_freq: f64) -> Self {
        Self { time, beat_freq }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CarrierLayer {
    #[serde(alias = "carrierFreq")]
    pub carrier_freq: f64,
    #[serde(default, alias = "gainDb")]
    pub gain_db: f64,
    /// Overlay tones track this constant offset instead of the envelope.
    #[serde(default, alias = "fixedBeatFreq")]
    pub fixed_beat_freq: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoiseKind {
    Pink,
    Brown,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct NoiseSettings {
    #[serde(rename = "type", alias = "kind")]
    pub kind: NoiseKind,
    #[serde(default = "default_volume", alias = "gain")]
    pub volume: f32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AmbientSettings {
    #[serde(alias = "soundId", alias = "id")]
    pub sound_id: String,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VoiceCue {
    pub time: f64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub chime: bool,
    #[serde(default, alias = "chimeOnly")]
    pub chime_only: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GuidancePhase {
    pub name: String,
    #[serde(alias = "startTime")]
    pub start_time: f64,
    #[serde(alias = "endTime")]
    pub end_time: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpatialMode {
    #[default]
    Smooth,
    Erratic,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SamWindow {
    #[serde(alias = "startTime")]
    pub start_time: f64,
    #[serde(alias = "endTime")]
    pub end_time: f64,
    #[serde(alias = "rotationHz")]
    pub rotation_hz: f64,
    #[serde(default)]
    pub mode: SpatialMode,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CarrierGainEvent {
    pub time: f64,
    #[serde(alias = "carrierIndex", alias = "carrier")]
    pub carrier_index: usize,
    #[serde(alias = "gainDb", alias = "targetDb")]
    pub gain_db: f64,
    #[serde(default = "default_fade", alias = "fadeSeconds", alias = "duration")]
    pub fade_seconds: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AmbientEvent {
    pub time: f64,
    #[serde(alias = "targetVolume")]
    pub volume: f32,
    #[serde(default = "default_fade", alias = "fadeSeconds", alias = "duration")]
    pub fade_seconds: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ResonantToneWindow {
    #[serde(alias = "startTime")]
    pub start_time: f64,
    #[serde(alias = "endTime")]
    pub end_time: f64,
    #[serde(alias = "carrierFreq")]
    pub carrier_freq: f64,
    #[serde(alias = "beatFreq")]
    pub beat_freq: f64,
    #[serde(default, alias = "gainDb")]
    pub gain_db: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct NoiseFilter {
    #[serde(alias = "cutoffHz", alias = "lowpass")]
    pub cutoff_hz: f32,
    #[serde(default)]
    pub breathing: bool,
    #[serde(default = "default_breathing_hz", alias = "breathingHz")]
    pub breathing_hz: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SpatialTone {
    #[serde(alias = "carrierFreq")]
    pub carrier_freq: f64,
    #[serde(default, alias = "gainDb")]
    pub gain_db: f64,
}

impl Default for SpatialTone {
    fn default() -> Self {
        Self {
            carrier_freq: 220.0,
            gain_db: -12.0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct GuidanceScript {
    /// Key into the narration manifest for pre-rendered cue audio.
    #[serde(default, alias = "trackId")]
    pub track_id: Option<String>,
    #[serde(default, alias = "voiceCues")]
    pub voice_cues: Vec<VoiceCue>,
    #[serde(default)]
    pub phases: Vec<GuidancePhase>,
    #[serde(default, alias = "samWindows")]
    pub sam_windows: Vec<SamWindow>,
    #[serde(default, alias = "carrierGainEvents")]
    pub carrier_gain_events: Vec<CarrierGainEvent>,
    #[serde(default, alias = "ambientEvents")]
    pub ambient_events: Vec<AmbientEvent>,
    #[serde(default, alias = "resonantTone")]
    pub resonant_tone: Option<ResonantToneWindow>,
    #[serde(default, alias = "noiseFilter")]
    pub noise_filter: Option<NoiseFilter>,
    #[serde(default, alias = "spatialTone")]
    pub spatial_tone: SpatialTone,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    #[serde(alias = "durationSeconds")]
    pub duration: f64,
    pub carriers: Vec<CarrierLayer>,
    #[serde(alias = "frequencyEnvelope", alias = "envelope")]
    pub frequency_envelope: Vec<FrequencyPoint>,
    #[serde(default)]
    pub noise: Option<NoiseSettings>,
    #[serde(default)]
    pub ambient: Option<AmbientSettings>,
    #[serde(default, alias = "hasReturnPhase")]
    pub has_return_phase: bool,
    #[serde(default, alias = "isochronicCarrierFreq")]
    pub isochronic_carrier_freq: Option<f64>,
    #[serde(default)]
    pub guidance: Option<GuidanceScript>,
}

impl SessionConfig {
    pub fn from_json(data: &str) -> Result<Self, SessionError> {
        let config: SessionConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations no session can be built from. Envelope
    /// irregularities are tolerated and handled by the interpolator.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(SessionError::Config(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        for (i, c) in self.carriers.iter().enumerate() {
            if !c.carrier_freq.is_finite() || c.carrier_freq <= 0.0 {
                return Err(SessionError::Config(format!(
                    "carrier {i} has invalid frequency {}",
                    c.carrier_freq
                )));
            }
        }
        Ok(())
    }

    pub fn is_guided(&self) -> bool {
        self.guidance.is_some()
    }

    pub fn isochronic_tone_hz(&self) -> f64 {
        self.isochronic_carrier_freq
            .or_else(|| self.carriers.first().map(|c| c.carrier_freq))
            .unwrap_or(200.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VoiceOptions {
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub voice_name: Option<String>,
    #[serde(default = "default_rate")]
    pub rate: f32,
}

fn default_rate() -> f32 {
    1.0
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            volume: 1.0,
            voice_name: None,
            rate: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_session() {
        let json = r#"{
            "duration": 180,
            "carriers": [{"carrierFreq": 200, "gainDb": -3}],
            "frequencyEnvelope": [{"time": 0, "beatFreq": 10}, {"time": 60, "beatFreq": 6}],
            "noise": {"type": "brown", "volume": 0.4},
            "hasReturnPhase": true,
            "guidance": {
                "voiceCues": [{"time": 5, "text": "breathe"}, {"time": 1, "chimeOnly": true, "chime": true}],
                "samWindows": [{"startTime": 10, "endTime": 20, "rotationHz": 0.5, "mode": "erratic"}]
            }
        }"#;
        let cfg = SessionConfig::from_json(json).unwrap();
        assert_eq!(cfg.carriers[0].gain_db, -3.0);
        assert_eq!(cfg.frequency_envelope[1].beat_freq, 6.0);
        assert_eq!(cfg.noise.as_ref().unwrap().kind, NoiseKind::Brown);
        assert!(cfg.has_return_phase);
        let guidance = cfg.guidance.unwrap();
        assert!(guidance.voice_cues[1].chime_only);
        assert_eq!(guidance.sam_windows[0].mode, SpatialMode::Erratic);
        assert_eq!(guidance.spatial_tone, SpatialTone::default());
    }

    #[test]
    fn rejects_non_positive_duration() {
        let json = r#"{"duration": 0, "carriers": [], "frequencyEnvelope": []}"#;
        assert!(matches!(
            SessionConfig::from_json(json),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn isochronic_tone_defaults_to_first_carrier() {
        let cfg = SessionConfig {
            duration: 60.0,
            carriers: vec![CarrierLayer {
                carrier_freq: 180.0,
                gain_db: 0.0,
                fixed_beat_freq: None,
            }],
            frequency_envelope: vec![FrequencyPoint::new(0.0, 8.0)],
            noise: None,
            ambient: None,
            has_return_phase: false,
            isochronic_carrier_freq: None,
            guidance: None,
        };
        assert_eq!(cfg.isochronic_tone_hz(), 180.0);
    }
}
