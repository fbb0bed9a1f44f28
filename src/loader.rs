use crossbeam::channel::{unbounded, Receiver, Sender};
use std::path::Path;
use std::sync::Arc;

use crate::assets::Assets;
use crate::decode::{decode_bytes, resample_linear_stereo, AudioBuffer};
use crate::error::AssetError;
use crate::models::VoiceOptions;

#[derive(Debug, Clone, PartialEq)]
pub enum LoadJob {
    Ambient {
        id: String,
        file: String,
    },
    NarrationClip {
        generation: u64,
        index: usize,
        file: String,
    },
    Speech {
        generation: u64,
        cue: usize,
        text: String,
        voice: VoiceOptions,
    },
}

#[derive(Debug)]
pub struct LoadResponse {
    pub job: LoadJob,
    pub result: Result<Arc<AudioBuffer>, AssetError>,
}

struct Worker {
    assets: Assets,
    sample_rate: u32,
}

impl Worker {
    fn run(&self, job: &LoadJob) -> Result<Arc<AudioBuffer>, AssetError> {
        match job {
            LoadJob::Ambient { file, .. } => {
                let source = self
                    .assets
                    .ambient
                    .as_ref()
                    .ok_or_else(|| AssetError::NotFound(file.clone()))?;
                self.fetch_decode(source.fetch(file)?, file)
            }
            LoadJob::NarrationClip { file, .. } => {
                let source = self
                    .assets
                    .narration
                    .as_ref()
                    .ok_or_else(|| AssetError::NotFound(file.clone()))?;
                self.fetch_decode(source.fetch(file)?, file)
            }
            LoadJob::Speech { text, voice, .. } => {
                let synth = self
                    .assets
                    .speech
                    .as_ref()
                    .ok_or_else(|| AssetError::Synthesis("no speech synthesizer".into()))?;
                let mut buf = synth.synthesize(text, voice)?;
                if buf.sample_rate != self.sample_rate {
                    buf.samples = resample_linear_stereo(&buf.samples, buf.sample_rate, self.sample_rate);
                    buf.sample_rate = self.sample_rate;
                }
                Ok(Arc::new(buf))
            }
        }
    }

    fn fetch_decode(&self, bytes: Vec<u8>, file: &str) -> Result<Arc<AudioBuffer>, AssetError> {
        let ext = Path::new(file).extension().and_then(|e| e.to_str());
        Ok(Arc::new(decode_bytes(bytes, ext, self.sample_rate)?))
    }

    fn handle(&self, job: LoadJob) -> LoadResponse {
        let result = self.run(&job);
        if let Err(e) = &result {
            log::debug!(target: "session::loader", "{job:?} failed: {e}");
        }
        LoadResponse { job, result }
    }
}

enum Mode {
    Threaded(Sender<LoadJob>),
    Inline(Worker),
}

/// Fetch/decode/synthesis off the control thread. Results are picked up
/// with [`AssetLoader::poll`], so callers never block on I/O.
pub struct AssetLoader {
    mode: Mode,
    responses_tx: Sender<LoadResponse>,
    responses: Receiver<LoadResponse>,
}

impl AssetLoader {
    pub fn spawn(assets: Assets, sample_rate: u32) -> Self {
        let (jobs_tx, jobs_rx) = unbounded::<LoadJob>();
        let (responses_tx, responses) = unbounded();
        let worker = Worker { assets, sample_rate };
        let tx = responses_tx.clone();
        std::thread::Builder::new()
            .name("asset-loader".into())
            .spawn(move || {
                for job in jobs_rx.iter() {
                    if tx.send(worker.handle(job)).is_err() {
                        break;
                    }
                }
            })
            .map(|_| ())
            .unwrap_or_else(|e| log::error!(target: "session::loader", "loader thread failed to start: {e}"));
        Self {
            mode: Mode::Threaded(jobs_tx),
            responses_tx,
            responses,
        }
    }

    /// Runs every job synchronously inside `request`. Deterministic; meant
    /// for tests and tooling.
    pub fn inline(assets: Assets, sample_rate: u32) -> Self {
        let (responses_tx, responses) = unbounded();
        Self {
            mode: Mode::Inline(Worker { assets, sample_rate }),
            responses_tx,
            responses,
        }
    }

    pub fn request(&self, job: LoadJob) {
        match &self.mode {
            Mode::Threaded(tx) => {
                if let Err(e) = tx.send(job) {
                    let job = e.into_inner();
                    let _ = self.responses_tx.send(LoadResponse {
                        job,
                        result: Err(AssetError::LoaderClosed),
                    });
                }
            }
            Mode::Inline(worker) => {
                let _ = self.responses_tx.send(worker.handle(job));
            }
        }
    }

    pub fn poll(&self) -> Vec<LoadResponse> {
        self.responses.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssetSource;
    use std::time::Duration;

    #[test]
    fn missing_ambient_reports_not_found() {
        let src = MemoryAssetSource::new();
        let assets = Assets {
            ambient: Some(Arc::new(src.clone())),
            ..Default::default()
        };
        let loader = AssetLoader::inline(assets, 48_000);
        loader.request(LoadJob::Ambient {
            id: "rain".into(),
            file: "rain.mp3".into(),
        });
        let responses = loader.poll();
        assert_eq!(responses.len(), 1);
        assert!(matches!(responses[0].result, Err(AssetError::NotFound(_))));
        assert_eq!(src.fetched(), vec!["rain.mp3".to_string()]);
    }

    #[test]
    fn threaded_loader_delivers_responses() {
        let loader = AssetLoader::spawn(Assets::default(), 48_000);
        loader.request(LoadJob::Speech {
            generation: 1,
            cue: 0,
            text: "hello".into(),
            voice: VoiceOptions::default(),
        });
        let mut got = Vec::new();
        for _ in 0..100 {
            got.extend(loader.poll());
            if !got.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0].result, Err(AssetError::Synthesis(_))));
    }
}
