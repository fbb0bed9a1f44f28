use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use crate::automation::AudioParam;
use crate::dsp::db_to_gain;
use crate::graph::{Destination, NodeId};
use crate::layer::{AudioLayer, LayerLevel};
use crate::models::{SpatialMode, SpatialTone};
use crate::task::ScheduledTask;
use crate::voices::{ModulationSlot, PannedToneVoice, SineLfo};

/// Slowest rotation accepted; guards the erratic interval against zero.
const MIN_ROTATION_HZ: f64 = 0.01;
/// Fade applied when a modulation window opens or closes.
pub const SPATIAL_FADE: f64 = 3.0;

/// Moves an auxiliary tone around the stereo field, either orbiting
/// smoothly or jumping to random positions.
pub struct SpatialEngine {
    dest: Destination,
    tone_hz: f64,
    level: LayerLevel,
    pan: AudioParam,
    modulation: ModulationSlot,
    mode: Option<(SpatialMode, f64)>,
    jump: ScheduledTask,
    release: ScheduledTask,
    rng: StdRng,
    fade: f64,
    active: bool,
    node: Option<NodeId>,
}

impl SpatialEngine {
    pub fn new(dest: Destination, tone: &SpatialTone, fade: f64) -> Self {
        Self {
            dest,
            tone_hz: tone.carrier_freq,
            level: LayerLevel::new(db_to_gain(tone.gain_db)),
            pan: AudioParam::new(0.0),
            modulation: Arc::new(Mutex::new(None)),
            mode: None,
            jump: ScheduledTask::new(),
            release: ScheduledTask::new(),
            rng: StdRng::from_entropy(),
            fade,
            active: false,
            node: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn mode(&self) -> Option<SpatialMode> {
        self.mode.map(|(m, _)| m)
    }

    pub fn pan(&self) -> &AudioParam {
        &self.pan
    }

    /// Fades the tone in (if silent) and applies `mode`.
    pub fn activate(&mut self, mode: SpatialMode, rotation_hz: f64, now: f64) {
        self.release.cancel();
        self.set_mode(mode, rotation_hz, now);
        if !self.active {
            self.active = true;
            self.level.fade(self.level.volume(), self.fade, now);
        }
    }

    /// Fades the tone out; modulation is released once the fade is done.
    pub fn deactivate(&mut self, now: f64) {
        if !self.active {
            return;
        }
        self.active = false;
        self.level.fade(0.0, self.fade, now);
        self.release.arm(now + self.fade);
    }

    /// Swaps only the modulation; the tone keeps running.
    pub fn set_mode(&mut self, mode: SpatialMode, rotation_hz: f64, now: f64) {
        let rotation_hz = rotation_hz.max(MIN_ROTATION_HZ);
        if self.mode == Some((mode, rotation_hz)) {
            return;
        }
        self.mode = Some((mode, rotation_hz));
        match mode {
            SpatialMode::Smooth => {
                self.jump.cancel();
                self.pan.set_value(0.0);
                *self.modulation.lock() = Some(SineLfo::new(rotation_hz, 1.0));
            }
            SpatialMode::Erratic => {
                *self.modulation.lock() = None;
                let at = now + self.next_jump_in(rotation_hz);
                self.jump.arm(at);
            }
        }
    }

    fn next_jump_in(&mut self, rotation_hz: f64) -> f64 {
        (1.0 / rotation_hz) * self.rng.gen_range(0.5..1.5)
    }
}

impl AudioLayer for SpatialEngine {
    fn start(&mut self, _now: f64) {
        self.level.silence();
        if self.node.is_none() {
            let voice = PannedToneVoice::new(
                self.tone_hz,
                self.level.param(),
                self.pan.clone(),
                self.modulation.clone(),
            );
            self.node = Some(self.dest.connect(Box::new(voice)));
        }
    }

    fn stop(&mut self) {
        self.jump.cancel();
        self.release.cancel();
        self.active = false;
        self.mode = None;
        *self.modulation.lock() = None;
        if let Some(node) = self.node.take() {
            self.dest.disconnect(node);
        }
    }

    fn set_volume(&mut self, volume: f32, now: f64) {
        if self.active {
            self.level.set_volume(volume, now);
        } else {
            self.level.remember(volume);
        }
    }

    fn fade_volume(&mut self, target: f32, seconds: f64, now: f64) {
        self.level.fade(target, seconds, now);
    }

    /// Silent outside a modulation window.
    fn volume(&self) -> f32 {
        if self.active {
            self.level.volume()
        } else {
            0.0
        }
    }

    fn poll(&mut self, now: f64) {
        if self.jump.take_if_due(now) {
            if let Some((SpatialMode::Erratic, hz)) = self.mode {
                let target = self.rng.gen_range(-1.0f32..=1.0);
                self.pan.set_value_at_time(target, now);
                let at = now + self.next_jump_in(hz);
                self.jump.arm(at);
            }
        }
        if self.release.take_if_due(now) {
            self.jump.cancel();
            self.mode = None;
            *self.modulation.lock() = None;
        }
    }
}
