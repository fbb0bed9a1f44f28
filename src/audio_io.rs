use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::SessionError;
use crate::graph::Renderer;

/// Something that pulls rendered audio out of the graph.
pub trait AudioBackend {
    fn sample_rate(&self) -> u32;
    fn open(&mut self, renderer: Renderer) -> Result<(), SessionError>;
    /// Stops pulling audio. Safe to call when not open.
    fn close(&mut self);
    /// An error the device reported since the last call, if any.
    fn take_error(&mut self) -> Option<String> {
        None
    }
}

/// No device: audio only advances when the owner calls [`HeadlessBackend::render_frames`].
/// Clones share the same attached graph.
#[derive(Clone)]
pub struct HeadlessBackend {
    sample_rate: u32,
    renderer: Arc<Mutex<Option<Renderer>>>,
    refuse_open: bool,
}

const HEADLESS_BLOCK: usize = 256;

impl HeadlessBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            renderer: Arc::new(Mutex::new(None)),
            refuse_open: false,
        }
    }

    /// A backend whose `open` always fails, as if no output were available.
    pub fn unavailable(sample_rate: u32) -> Self {
        Self {
            refuse_open: true,
            ..Self::new(sample_rate)
        }
    }

    pub fn is_open(&self) -> bool {
        self.renderer.lock().is_some()
    }

    /// Renders and discards `frames` frames. Returns the peak sample seen.
    pub fn render_frames(&self, frames: usize) -> f32 {
        let guard = self.renderer.lock();
        let Some(renderer) = guard.as_ref() else {
            return 0.0;
        };
        let mut block = vec![0.0f32; HEADLESS_BLOCK * 2];
        let mut peak = 0.0f32;
        let mut left = frames;
        while left > 0 {
            let n = left.min(HEADLESS_BLOCK);
            renderer.render(&mut block[..n * 2]);
            peak = block[..n * 2].iter().fold(peak, |m, s| m.max(s.abs()));
            left -= n;
        }
        peak
    }

    pub fn render_seconds(&self, seconds: f64) -> f32 {
        self.render_frames((seconds * self.sample_rate as f64).round() as usize)
    }

    /// Renders into `out` (interleaved stereo).
    pub fn render_into(&self, out: &mut [f32]) {
        match self.renderer.lock().as_ref() {
            Some(renderer) => renderer.render(out),
            None => out.fill(0.0),
        }
    }
}

impl AudioBackend for HeadlessBackend {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&mut self, renderer: Renderer) -> Result<(), SessionError> {
        if self.refuse_open {
            return Err(SessionError::Output("headless output refused".into()));
        }
        *self.renderer.lock() = Some(renderer);
        Ok(())
    }

    fn close(&mut self) {
        self.renderer.lock().take();
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use device::CpalBackend;

#[cfg(not(target_arch = "wasm32"))]
mod device {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};
    use parking_lot::Mutex;
    use std::sync::Arc;

    use super::AudioBackend;
    use crate::error::SessionError;
    use crate::graph::Renderer;

    /// The default output device via cpal. The stream is not `Send`, so
    /// this backend lives on the thread that created it.
    pub struct CpalBackend {
        device: cpal::Device,
        config: StreamConfig,
        stream: Option<cpal::Stream>,
        errors: Arc<Mutex<Option<String>>>,
    }

    impl CpalBackend {
        pub fn new() -> Result<Self, SessionError> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| SessionError::Output("no output device available".into()))?;
            let supported = device
                .default_output_config()
                .map_err(|e| SessionError::Output(e.to_string()))?;
            if supported.sample_format() != SampleFormat::F32 {
                return Err(SessionError::Output(format!(
                    "unsupported sample format {:?}",
                    supported.sample_format()
                )));
            }
            Ok(Self {
                device,
                config: supported.into(),
                stream: None,
                errors: Arc::new(Mutex::new(None)),
            })
        }
    }

    impl AudioBackend for CpalBackend {
        fn sample_rate(&self) -> u32 {
            self.config.sample_rate.0
        }

        fn open(&mut self, renderer: Renderer) -> Result<(), SessionError> {
            self.close();
            let channels = self.config.channels.max(1) as usize;
            let mut stereo: Vec<f32> = Vec::new();
            let audio_callback = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                stereo.resize(frames * 2, 0.0);
                renderer.render(&mut stereo);
                for (out, frame) in data.chunks_mut(channels).zip(stereo.chunks_exact(2)) {
                    if channels == 1 {
                        out[0] = 0.5 * (frame[0] + frame[1]);
                    } else {
                        out[0] = frame[0];
                        out[1] = frame[1];
                        out[2..].fill(0.0);
                    }
                }
            };
            let errors = self.errors.clone();
            let err_fn = move |err: cpal::StreamError| {
                log::error!(target: "session::audio", "stream error: {err}");
                *errors.lock() = Some(err.to_string());
            };
            let stream = self
                .device
                .build_output_stream(&self.config, audio_callback, err_fn, None)
                .map_err(|e| SessionError::Output(e.to_string()))?;
            stream.play().map_err(|e| SessionError::Output(e.to_string()))?;
            self.stream = Some(stream);
            Ok(())
        }

        fn close(&mut self) {
            if let Some(stream) = self.stream.take() {
                if let Err(e) = stream.pause() {
                    log::debug!(target: "session::audio", "pause on close failed: {e}");
                }
            }
        }

        fn take_error(&mut self) -> Option<String> {
            self.errors.lock().take()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OutputGraph;

    #[test]
    fn headless_render_advances_graph_time() {
        let graph = OutputGraph::new(1000);
        let mut backend = HeadlessBackend::new(1000);
        backend.open(graph.renderer()).unwrap();
        backend.render_seconds(1.5);
        assert!((graph.current_time() - 1.5).abs() < 1e-9);
        backend.close();
        backend.close();
        assert!(!backend.is_open());
        backend.render_seconds(1.0);
        assert!((graph.current_time() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn unavailable_backend_fails_to_open() {
        let graph = OutputGraph::new(1000);
        let mut backend = HeadlessBackend::unavailable(1000);
        assert!(matches!(backend.open(graph.renderer()), Err(SessionError::Output(_))));
    }
}
