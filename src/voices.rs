use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};
use parking_lot::Mutex;
use std::f64::consts::TAU;
use std::sync::Arc;

use crate::automation::AudioParam;
use crate::decode::AudioBuffer;
use crate::dsp::pan2;
use crate::graph::{Block, Voice};

/// Scratch buffers for per-frame parameter values.
#[derive(Default)]
struct ParamScratch {
    a: Vec<f32>,
    b: Vec<f32>,
    c: Vec<f32>,
}

impl ParamScratch {
    fn prepare(&mut self, frames: usize) {
        self.a.resize(frames, 0.0);
        self.b.resize(frames, 0.0);
        self.c.resize(frames, 0.0);
    }
}

/// Low-frequency sine added on top of a parameter's scheduled value.
#[derive(Debug, Clone)]
pub struct SineLfo {
    pub hz: f64,
    pub depth: f32,
    phase: f64,
}

impl SineLfo {
    pub fn new(hz: f64, depth: f32) -> Self {
        Self { hz, depth, phase: 0.0 }
    }

    fn next(&mut self, sample_rate: f32) -> f32 {
        let v = (self.phase.sin() as f32) * self.depth;
        self.phase = (self.phase + TAU * self.hz / sample_rate as f64) % TAU;
        v
    }
}

/// Swappable modulation source; replacing its content leaves the carrier untouched.
pub type ModulationSlot = Arc<Mutex<Option<SineLfo>>>;

/// One carrier layer: left ear at the carrier, right ear at carrier + beat.
pub struct BinauralPairVoice {
    carrier: f64,
    beat: AudioParam,
    layer_gain: AudioParam,
    master: AudioParam,
    phase_l: f64,
    phase_r: f64,
    scratch: ParamScratch,
}

impl BinauralPairVoice {
    pub fn new(carrier: f64, beat: AudioParam, layer_gain: AudioParam, master: AudioParam) -> Self {
        Self {
            carrier,
            beat,
            layer_gain,
            master,
            phase_l: 0.0,
            phase_r: 0.0,
            scratch: ParamScratch::default(),
        }
    }
}

impl Voice for BinauralPairVoice {
    fn process(&mut self, block: &Block, output: &mut [f32]) {
        let frames = block.frames;
        self.scratch.prepare(frames);
        self.beat.fill(block.start, block.sample_rate, &mut self.scratch.a);
        self.layer_gain.fill(block.start, block.sample_rate, &mut self.scratch.b);
        self.master.fill(block.start, block.sample_rate, &mut self.scratch.c);
        let sr = block.sample_rate as f64;
        let step_l = TAU * self.carrier / sr;
        for i in 0..frames {
            let gain = self.scratch.b[i] * self.scratch.c[i];
            output[i * 2] += (self.phase_l.sin() as f32) * gain;
            output[i * 2 + 1] += (self.phase_r.sin() as f32) * gain;
            self.phase_l = (self.phase_l + step_l) % TAU;
            let right = self.carrier + self.scratch.a[i] as f64;
            self.phase_r = (self.phase_r + TAU * right / sr) % TAU;
        }
    }
}

/// A centred tone gated by a scheduled pulse train.
pub struct PulsedToneVoice {
    freq: f64,
    gate: AudioParam,
    gain: AudioParam,
    phase: f64,
    scratch: ParamScratch,
}

impl PulsedToneVoice {
    pub fn new(freq: f64, gate: AudioParam, gain: AudioParam) -> Self {
        Self {
            freq,
            gate,
            gain,
            phase: 0.0,
            scratch: ParamScratch::default(),
        }
    }
}

impl Voice for PulsedToneVoice {
    fn process(&mut self, block: &Block, output: &mut [f32]) {
        let frames = block.frames;
        self.scratch.prepare(frames);
        self.gate.fill(block.start, block.sample_rate, &mut self.scratch.a);
        self.gain.fill(block.start, block.sample_rate, &mut self.scratch.b);
        let step = TAU * self.freq / block.sample_rate as f64;
        for i in 0..frames {
            let s = (self.phase.sin() as f32) * self.scratch.a[i] * self.scratch.b[i];
            output[i * 2] += s;
            output[i * 2 + 1] += s;
            self.phase = (self.phase + step) % TAU;
        }
    }
}

/// A fixed tone whose stereo position is the pan parameter plus whatever
/// modulator currently sits in its slot.
pub struct PannedToneVoice {
    freq: f64,
    gain: AudioParam,
    pan: AudioParam,
    modulation: ModulationSlot,
    phase: f64,
    scratch: ParamScratch,
}

impl PannedToneVoice {
    pub fn new(freq: f64, gain: AudioParam, pan: AudioParam, modulation: ModulationSlot) -> Self {
        Self {
            freq,
            gain,
            pan,
            modulation,
            phase: 0.0,
            scratch: ParamScratch::default(),
        }
    }
}

impl Voice for PannedToneVoice {
    fn process(&mut self, block: &Block, output: &mut [f32]) {
        let frames = block.frames;
        self.scratch.prepare(frames);
        self.gain.fill(block.start, block.sample_rate, &mut self.scratch.a);
        self.pan.fill(block.start, block.sample_rate, &mut self.scratch.b);
        {
            let mut slot = self.modulation.lock();
            if let Some(lfo) = slot.as_mut() {
                for v in self.scratch.b.iter_mut() {
                    *v += lfo.next(block.sample_rate);
                }
            }
        }
        let step = TAU * self.freq / block.sample_rate as f64;
        for i in 0..frames {
            let s = (self.phase.sin() as f32) * self.scratch.a[i];
            let (l, r) = pan2(s, self.scratch.b[i]);
            output[i * 2] += l;
            output[i * 2 + 1] += r;
            self.phase = (self.phase + step) % TAU;
        }
    }
}

struct StereoLowpass {
    left: DirectForm2Transposed<f32>,
    right: DirectForm2Transposed<f32>,
}

impl StereoLowpass {
    fn new(cutoff_hz: f32, sample_rate: f32) -> Option<Self> {
        let cutoff = cutoff_hz.min(sample_rate * 0.45);
        let coeffs = Coefficients::<f32>::from_params(
            Type::LowPass,
            sample_rate.hz(),
            cutoff.hz(),
            Q_BUTTERWORTH_F32,
        )
        .map_err(|e| log::warn!(target: "session::noise", "low-pass at {cutoff_hz} Hz rejected: {e:?}"))
        .ok()?;
        Some(Self {
            left: DirectForm2Transposed::<f32>::new(coeffs),
            right: DirectForm2Transposed::<f32>::new(coeffs),
        })
    }
}

/// Loops a decoded buffer forever, optionally low-passed and breathing.
pub struct LoopedBufferVoice {
    buffer: Arc<AudioBuffer>,
    position: usize,
    gain: AudioParam,
    master: Option<AudioParam>,
    lowpass: Option<StereoLowpass>,
    /// Centre and swing of the amplitude modulator.
    breathing: Option<(f32, SineLfo)>,
    scratch: ParamScratch,
}

impl LoopedBufferVoice {
    pub fn new(buffer: Arc<AudioBuffer>, gain: AudioParam) -> Self {
        Self {
            buffer,
            position: 0,
            gain,
            master: None,
            lowpass: None,
            breathing: None,
            scratch: ParamScratch::default(),
        }
    }

    /// Second gain stage, multiplied with the per-source gain.
    pub fn with_master(mut self, master: AudioParam) -> Self {
        self.master = Some(master);
        self
    }

    pub fn with_lowpass(mut self, cutoff_hz: f32) -> Self {
        self.lowpass = StereoLowpass::new(cutoff_hz, self.buffer.sample_rate as f32);
        self
    }

    pub fn with_breathing(mut self, hz: f64, centre: f32, swing: f32) -> Self {
        self.breathing = Some((centre, SineLfo::new(hz, swing)));
        self
    }
}

impl Voice for LoopedBufferVoice {
    fn process(&mut self, block: &Block, output: &mut [f32]) {
        let data = &self.buffer.samples;
        if data.len() < 2 {
            return;
        }
        let frames = block.frames;
        self.scratch.prepare(frames);
        self.gain.fill(block.start, block.sample_rate, &mut self.scratch.a);
        match &self.master {
            Some(master) => master.fill(block.start, block.sample_rate, &mut self.scratch.b),
            None => self.scratch.b.fill(1.0),
        }
        for i in 0..frames {
            let mut l = data[self.position];
            let mut r = data[self.position + 1];
            self.position += 2;
            if self.position + 1 >= data.len() {
                self.position = 0;
            }
            if let Some(lp) = self.lowpass.as_mut() {
                l = lp.left.run(l);
                r = lp.right.run(r);
            }
            let mut g = self.scratch.a[i] * self.scratch.b[i];
            if let Some((centre, lfo)) = self.breathing.as_mut() {
                g *= *centre + lfo.next(block.sample_rate);
            }
            output[i * 2] += l * g;
            output[i * 2 + 1] += r * g;
        }
    }
}

/// Plays a buffer once, then reports finished so the mixer drops it.
pub struct ClipVoice {
    buffer: Arc<AudioBuffer>,
    position: usize,
    gain: AudioParam,
    scratch: ParamScratch,
}

impl ClipVoice {
    pub fn new(buffer: Arc<AudioBuffer>, gain: AudioParam) -> Self {
        Self {
            buffer,
            position: 0,
            gain,
            scratch: ParamScratch::default(),
        }
    }
}

impl Voice for ClipVoice {
    fn process(&mut self, block: &Block, output: &mut [f32]) {
        let data = &self.buffer.samples;
        let frames = block.frames;
        self.scratch.prepare(frames);
        self.gain.fill(block.start, block.sample_rate, &mut self.scratch.a);
        for i in 0..frames {
            if self.position + 1 >= data.len() {
                self.position = data.len();
                break;
            }
            let g = self.scratch.a[i];
            output[i * 2] += data[self.position] * g;
            output[i * 2 + 1] += data[self.position + 1] * g;
            self.position += 2;
        }
    }

    fn is_finished(&self) -> bool {
        self.position + 1 >= self.buffer.samples.len()
    }
}
