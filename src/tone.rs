use crate::automation::{AudioParam, RampCurve};
use crate::dsp::db_to_gain;
use crate::graph::{Destination, NodeId};
use crate::layer::{AudioLayer, LayerLevel};
use crate::models::CarrierLayer;
use crate::voices::BinauralPairVoice;

/// Headroom so several stacked carriers stay below full scale.
const LAYER_HEADROOM: f32 = 0.3;
/// Exponential ramps cannot reach zero; beats never go below this.
const MIN_BEAT_HZ: f32 = 0.01;
const BEAT_TOLERANCE: f32 = 1e-4;

pub fn layer_gain(gain_db: f64) -> f32 {
    db_to_gain(gain_db) * LAYER_HEADROOM
}

struct ToneLayer {
    carrier: f64,
    fixed_beat: Option<f64>,
    gain_db: f64,
    gain: AudioParam,
    node: Option<NodeId>,
}

/// Binaural carrier pairs. All envelope-tracking layers share one beat
/// parameter; fixed-beat layers carry their own constant.
pub struct ToneEngine {
    dest: Destination,
    layers: Vec<ToneLayer>,
    beat: AudioParam,
    level: LayerLevel,
}

impl ToneEngine {
    pub fn new(dest: Destination, carriers: &[CarrierLayer], beat_hz: f64, volume: f32) -> Self {
        let layers = carriers
            .iter()
            .map(|c| ToneLayer {
                carrier: c.carrier_freq,
                fixed_beat: c.fixed_beat_freq,
                gain_db: c.gain_db,
                gain: AudioParam::new(layer_gain(c.gain_db)),
                node: None,
            })
            .collect();
        Self {
            dest,
            layers,
            beat: AudioParam::new((beat_hz as f32).max(MIN_BEAT_HZ)),
            level: LayerLevel::new(volume),
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn beat_frequency(&self, now: f64) -> f64 {
        self.beat.value_at(now) as f64
    }

    /// Glides the shared beat toward `hz`: linear for small corrections,
    /// exponential for large jumps.
    pub fn ramp_beat_frequency(&mut self, hz: f64, seconds: f64, now: f64) {
        let current = self.beat.value_at(now);
        let target = (hz as f32).max(MIN_BEAT_HZ);
        let curve = if (target - current).abs() < 1.0 {
            RampCurve::Linear
        } else {
            RampCurve::Exponential
        };
        self.beat.ramp_to(target, now, seconds, curve);
    }

    /// Whether the shared beat at `now` is away from `hz` (after flooring).
    pub fn drifts_from(&self, hz: f64, now: f64) -> bool {
        let target = (hz as f32).max(MIN_BEAT_HZ);
        (self.beat.value_at(now) - target).abs() > BEAT_TOLERANCE
    }

    /// Jumps straight to `hz`. Only seeks should need this.
    pub fn set_beat_frequency(&mut self, hz: f64) {
        self.beat.set_value((hz as f32).max(MIN_BEAT_HZ));
    }

    pub fn fade_layer_gain(&mut self, index: usize, gain_db: f64, seconds: f64, now: f64) {
        match self.layers.get(index) {
            Some(layer) => layer.gain.fade_to(layer_gain(gain_db), now, seconds),
            None => log::warn!(target: "session::tone", "no carrier layer {index} to fade"),
        }
    }

    pub fn carrier_gain(&self, index: usize, now: f64) -> Option<f32> {
        self.layers.get(index).map(|l| l.gain.value_at(now))
    }

    /// Puts every layer back to its configured gain.
    pub fn reset_layer_gains(&mut self) {
        for layer in &self.layers {
            layer.gain.set_value(layer_gain(layer.gain_db));
        }
    }

    pub fn set_volume_over(&mut self, volume: f32, seconds: f64, now: f64) {
        self.level.set_volume_over(volume, seconds, now);
    }

    pub fn level_at(&self, now: f64) -> f32 {
        self.level.current(now)
    }
}

impl AudioLayer for ToneEngine {
    fn start(&mut self, _now: f64) {
        self.level.silence();
        for layer in self.layers.iter_mut() {
            if layer.node.is_some() {
                continue;
            }
            let beat = match layer.fixed_beat {
                Some(hz) => AudioParam::new(hz as f32),
                None => self.beat.clone(),
            };
            let voice = BinauralPairVoice::new(layer.carrier, beat, layer.gain.clone(), self.level.param());
            layer.node = Some(self.dest.connect(Box::new(voice)));
        }
    }

    fn stop(&mut self) {
        for layer in self.layers.iter_mut() {
            if let Some(node) = layer.node.take() {
                self.dest.disconnect(node);
            }
        }
    }

    fn set_volume(&mut self, volume: f32, now: f64) {
        self.level.set_volume(volume, now);
    }

    fn fade_volume(&mut self, target: f32, seconds: f64, now: f64) {
        self.level.fade(target, seconds, now);
    }

    fn volume(&self) -> f32 {
        self.level.volume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OutputGraph;

    fn carriers() -> Vec<CarrierLayer> {
        vec![
            CarrierLayer {
                carrier_freq: 200.0,
                gain_db: 0.0,
                fixed_beat_freq: None,
            },
            CarrierLayer {
                carrier_freq: 300.0,
                gain_db: -6.0,
                fixed_beat_freq: Some(4.0),
            },
        ]
    }

    #[test]
    fn layer_gain_includes_headroom() {
        assert!((layer_gain(0.0) - 0.3).abs() < 1e-6);
        assert!((layer_gain(-20.0) - 0.03).abs() < 1e-6);
    }

    #[test]
    fn small_steps_ramp_linearly() {
        let graph = OutputGraph::new(1000);
        let mut tone = ToneEngine::new(graph.destination(), &carriers(), 10.0, 1.0);
        tone.ramp_beat_frequency(10.5, 1.0, 0.0);
        assert!((tone.beat_frequency(0.5) - 10.25).abs() < 1e-4);
    }

    #[test]
    fn large_steps_ramp_exponentially() {
        let graph = OutputGraph::new(1000);
        let mut tone = ToneEngine::new(graph.destination(), &carriers(), 10.0, 1.0);
        tone.ramp_beat_frequency(2.5, 2.0, 0.0);
        // geometric midpoint, not arithmetic
        assert!((tone.beat_frequency(1.0) - 5.0).abs() < 1e-3);
        assert!((tone.beat_frequency(2.0) - 2.5).abs() < 1e-4);
    }

    #[test]
    fn drift_is_measured_against_the_floored_target() {
        let graph = OutputGraph::new(1000);
        let mut tone = ToneEngine::new(graph.destination(), &carriers(), 10.0, 1.0);
        tone.ramp_beat_frequency(6.0, 2.0, 0.0);
        assert!(tone.drifts_from(6.0, 1.0));
        assert!(!tone.drifts_from(6.0, 2.0));
        assert!(tone.drifts_from(4.0, 2.0));
        tone.set_beat_frequency(0.0);
        assert!(!tone.drifts_from(-1.0, 3.0));
    }

    #[test]
    fn beat_is_floored() {
        let graph = OutputGraph::new(1000);
        let mut tone = ToneEngine::new(graph.destination(), &carriers(), 10.0, 1.0);
        tone.ramp_beat_frequency(0.0, 1.0, 0.0);
        assert!(tone.beat_frequency(5.0) >= 0.01 - 1e-6);
        tone.set_beat_frequency(-3.0);
        assert!(tone.beat_frequency(5.0) > 0.0);
    }

    #[test]
    fn start_connects_every_carrier_once() {
        let graph = OutputGraph::new(1000);
        let dest = graph.destination();
        let mut tone = ToneEngine::new(dest.clone(), &carriers(), 10.0, 1.0);
        tone.start(0.0);
        tone.start(0.0);
        assert_eq!(dest.voice_count(), 2);
        tone.stop();
        tone.stop();
        assert_eq!(dest.voice_count(), 0);
    }
}
