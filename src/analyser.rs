use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::sync::Arc;

pub const FFT_SIZE: usize = 2048;

struct AnalyserState {
    tap: HeapCons<f32>,
    window: Vec<f32>,
    incoming: Vec<f32>,
}

impl AnalyserState {
    fn drain(&mut self) {
        loop {
            let n = self.tap.pop_slice(&mut self.incoming);
            if n == 0 {
                break;
            }
            let len = self.window.len();
            if n >= len {
                self.window.copy_from_slice(&self.incoming[n - len..n]);
            } else {
                self.window.copy_within(n.., 0);
                self.window[len - n..].copy_from_slice(&self.incoming[..n]);
            }
        }
    }
}

/// Read-only view of the live output signal for visualizers.
#[derive(Clone)]
pub struct Analyser {
    state: Arc<Mutex<AnalyserState>>,
    sample_rate: u32,
}

impl Analyser {
    pub(crate) fn new(sample_rate: u32) -> (Self, HeapProd<f32>) {
        let rb = HeapRb::<f32>::new(FFT_SIZE * 8);
        let (prod, cons) = rb.split();
        let state = AnalyserState {
            tap: cons,
            window: vec![0.0; FFT_SIZE],
            incoming: vec![0.0; FFT_SIZE],
        };
        (
            Self {
                state: Arc::new(Mutex::new(state)),
                sample_rate,
            },
            prod,
        )
    }

    /// The most recent `FFT_SIZE` mono samples, oldest first.
    pub fn time_domain(&self) -> Vec<f32> {
        let mut state = self.state.lock();
        state.drain();
        state.window.clone()
    }

    /// Magnitude spectrum in dBFS over `FFT_SIZE / 2` bins, Hann windowed.
    pub fn frequency_data(&self) -> Vec<f32> {
        let samples = self.time_domain();
        let n = samples.len();
        let mut buf: Vec<Complex<f32>> = samples
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let w = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos();
                Complex::new(s * w, 0.0)
            })
            .collect();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        fft.process(&mut buf);
        let scale = 2.0 / n as f32;
        buf[..n / 2]
            .iter()
            .map(|c| 20.0 * (c.norm() * scale).max(1e-10).log10())
            .collect()
    }

    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / FFT_SIZE as f32
    }
}
