use parking_lot::Mutex;
use ringbuf::traits::Producer;
use ringbuf::HeapProd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::analyser::Analyser;
use crate::automation::AudioParam;

/// Timing of the block being rendered.
#[derive(Debug, Clone, Copy)]
pub struct Block {
    /// Graph time of the first frame, in seconds.
    pub start: f64,
    pub sample_rate: f32,
    pub frames: usize,
}

impl Block {
    pub fn time_of(&self, frame: usize) -> f64 {
        self.start + frame as f64 / self.sample_rate as f64
    }
}

/// A render-side source. Voices add interleaved stereo into `output`.
pub trait Voice: Send {
    fn process(&mut self, block: &Block, output: &mut [f32]);
    fn is_finished(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

struct Mixer {
    voices: Vec<(NodeId, Box<dyn Voice>)>,
    scratch: Vec<f32>,
    gain: Vec<f32>,
    mono: Vec<f32>,
    tap: Option<HeapProd<f32>>,
}

struct Shared {
    sample_rate: u32,
    frames: AtomicU64,
    next_id: AtomicU64,
    closed: AtomicBool,
    master: AudioParam,
    mixer: Mutex<Mixer>,
}

/// The session's output graph. Only the orchestrator holds one; engines
/// get a [`Destination`], which can connect sources but never close the graph.
pub struct OutputGraph {
    shared: Arc<Shared>,
    analyser: Analyser,
}

impl OutputGraph {
    pub fn new(sample_rate: u32) -> Self {
        let (analyser, tap) = Analyser::new(sample_rate);
        let shared = Arc::new(Shared {
            sample_rate,
            frames: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            master: AudioParam::new(1.0),
            mixer: Mutex::new(Mixer {
                voices: Vec::new(),
                scratch: Vec::new(),
                gain: Vec::new(),
                mono: Vec::new(),
                tap: Some(tap),
            }),
        });
        Self { shared, analyser }
    }

    pub fn destination(&self) -> Destination {
        Destination {
            shared: self.shared.clone(),
        }
    }

    pub fn renderer(&self) -> Renderer {
        Renderer {
            shared: self.shared.clone(),
        }
    }

    pub fn analyser(&self) -> Analyser {
        self.analyser.clone()
    }

    pub fn master(&self) -> &AudioParam {
        &self.shared.master
    }

    pub fn current_time(&self) -> f64 {
        self.destination().current_time()
    }

    /// Renders one block directly. Headless backends drive time this way.
    pub fn render(&self, output: &mut [f32]) {
        self.renderer().render(output);
    }

    /// Drops every source. Rendering afterwards yields silence.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut mixer = self.shared.mixer.lock();
        mixer.voices.clear();
        mixer.tap = None;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Handle given to the output stream callback.
#[derive(Clone)]
pub struct Renderer {
    shared: Arc<Shared>,
}

impl Renderer {
    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    /// Mixes all live voices into interleaved stereo `output` and advances
    /// graph time by the block length.
    pub fn render(&self, output: &mut [f32]) {
        output.fill(0.0);
        let frames = output.len() / 2;
        if frames == 0 {
            return;
        }
        let start_frame = self.shared.frames.load(Ordering::Acquire);
        let block = Block {
            start: start_frame as f64 / self.shared.sample_rate as f64,
            sample_rate: self.shared.sample_rate as f32,
            frames,
        };
        if !self.shared.closed.load(Ordering::Acquire) {
            let mut guard = self.shared.mixer.lock();
            let mixer = &mut *guard;
            mixer.scratch.resize(output.len(), 0.0);
            for (_, voice) in mixer.voices.iter_mut() {
                mixer.scratch.fill(0.0);
                voice.process(&block, &mut mixer.scratch);
                for (o, s) in output.iter_mut().zip(mixer.scratch.iter()) {
                    *o += *s;
                }
            }
            mixer.voices.retain(|(_, v)| !v.is_finished());

            mixer.gain.resize(frames, 0.0);
            self.shared.master.fill(block.start, block.sample_rate, &mut mixer.gain);
            for (frame, g) in output.chunks_exact_mut(2).zip(mixer.gain.iter()) {
                frame[0] *= *g;
                frame[1] *= *g;
            }

            // Keep headroom when layers stack up
            const THRESH: f32 = 0.95;
            let max_val = output.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            if max_val > THRESH {
                let norm = THRESH / max_val;
                for v in output.iter_mut() {
                    *v *= norm;
                }
            }

            if let Some(tap) = mixer.tap.as_mut() {
                mixer.mono.clear();
                mixer
                    .mono
                    .extend(output.chunks_exact(2).map(|f| 0.5 * (f[0] + f[1])));
                // a full tap just drops samples; the analyser is best-effort
                tap.push_slice(&mixer.mono);
            }
        }
        self.shared
            .frames
            .store(start_frame + frames as u64, Ordering::Release);
    }
}

/// What an engine is allowed to do with the output graph.
#[derive(Clone)]
pub struct Destination {
    shared: Arc<Shared>,
}

impl Destination {
    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    /// Graph time in seconds: frames rendered so far.
    pub fn current_time(&self) -> f64 {
        self.shared.frames.load(Ordering::Acquire) as f64 / self.shared.sample_rate as f64
    }

    pub fn connect(&self, voice: Box<dyn Voice>) -> NodeId {
        let id = NodeId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        if !self.shared.closed.load(Ordering::Acquire) {
            self.shared.mixer.lock().voices.push((id, voice));
        }
        id
    }

    pub fn disconnect(&self, id: NodeId) {
        self.shared.mixer.lock().voices.retain(|(node, _)| *node != id);
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        self.shared.mixer.lock().voices.iter().any(|(node, _)| *node == id)
    }

    pub fn voice_count(&self) -> usize {
        self.shared.mixer.lock().voices.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dc(f32, usize);

    impl Voice for Dc {
        fn process(&mut self, block: &Block, output: &mut [f32]) {
            for frame in output.chunks_exact_mut(2).take(block.frames) {
                frame[0] += self.0;
                frame[1] += self.0;
            }
            self.1 = self.1.saturating_sub(block.frames);
        }

        fn is_finished(&self) -> bool {
            self.1 == 0
        }
    }

    #[test]
    fn render_advances_time_and_mixes() {
        let graph = OutputGraph::new(1000);
        let dest = graph.destination();
        dest.connect(Box::new(Dc(0.25, usize::MAX)));
        dest.connect(Box::new(Dc(0.25, usize::MAX)));
        let mut buf = vec![0.0f32; 200];
        graph.render(&mut buf);
        assert!((buf[0] - 0.5).abs() < 1e-6);
        assert!((dest.current_time() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn finished_voices_are_dropped() {
        let graph = OutputGraph::new(1000);
        let dest = graph.destination();
        let id = dest.connect(Box::new(Dc(0.1, 50)));
        let mut buf = vec![0.0f32; 200];
        graph.render(&mut buf);
        assert!(!dest.is_connected(id));
    }

    #[test]
    fn peaks_are_normalized() {
        let graph = OutputGraph::new(1000);
        let dest = graph.destination();
        dest.connect(Box::new(Dc(0.8, usize::MAX)));
        dest.connect(Box::new(Dc(0.8, usize::MAX)));
        let mut buf = vec![0.0f32; 20];
        graph.render(&mut buf);
        assert!((buf[0] - 0.95).abs() < 1e-6);
    }

    #[test]
    fn closed_graph_is_silent_and_rejects_sources() {
        let graph = OutputGraph::new(1000);
        let dest = graph.destination();
        dest.connect(Box::new(Dc(0.5, usize::MAX)));
        graph.close();
        graph.close();
        dest.connect(Box::new(Dc(0.5, usize::MAX)));
        let mut buf = vec![1.0f32; 20];
        graph.render(&mut buf);
        assert!(buf.iter().all(|s| *s == 0.0));
        assert_eq!(dest.voice_count(), 0);
    }
}
