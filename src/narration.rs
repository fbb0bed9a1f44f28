use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::decode::AudioBuffer;
use crate::dsp::render_chime;
use crate::error::AssetError;
use crate::graph::{Destination, NodeId};
use crate::layer::{AudioLayer, LayerLevel};
use crate::loader::{AssetLoader, LoadJob};
use crate::models::{VoiceCue, VoiceOptions};
use crate::voices::ClipVoice;

const CHIME_HZ: f32 = 528.0;
const CHIME_SECONDS: f32 = 3.0;

/// A cue handed out by [`NarrationSequencer::tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedCue {
    pub index: usize,
    pub time: f64,
    pub text: Option<String>,
    pub chime: bool,
}

/// Plays guidance cues against elapsed time.
///
/// Cue audio comes from pre-rendered clips looked up by spoken-cue index
/// (chime-only cues take no index). Clips for the next few spoken cues are
/// fetched ahead; a cue whose clip is missing or broken is synthesized
/// instead.
pub struct NarrationSequencer {
    dest: Destination,
    loader: Arc<AssetLoader>,
    cues: Vec<VoiceCue>,
    /// Spoken index of each cue, `None` for chime-only cues.
    spoken: Vec<Option<usize>>,
    clips: Vec<String>,
    voice: VoiceOptions,
    prefetch: usize,
    cursor: usize,
    generation: u64,
    ready: HashMap<usize, Arc<AudioBuffer>>,
    requested: HashSet<usize>,
    failed: HashSet<usize>,
    /// Spoken index to cue index for cues dispatched before their clip arrived.
    awaiting: HashMap<usize, usize>,
    playing: Vec<NodeId>,
    chime: Arc<AudioBuffer>,
    level: LayerLevel,
    live: bool,
}

impl NarrationSequencer {
    pub fn new(
        dest: Destination,
        loader: Arc<AssetLoader>,
        cues: &[VoiceCue],
        clips: Vec<String>,
        voice: VoiceOptions,
        prefetch: usize,
        volume: f32,
    ) -> Self {
        let mut cues = cues.to_vec();
        cues.sort_by(|a, b| a.time.total_cmp(&b.time));
        let mut next = 0;
        let spoken = cues
            .iter()
            .map(|c| {
                if c.chime_only || c.text.is_none() {
                    None
                } else {
                    next += 1;
                    Some(next - 1)
                }
            })
            .collect();
        let chime = Arc::new(AudioBuffer {
            samples: render_chime(dest.sample_rate(), CHIME_HZ, CHIME_SECONDS),
            sample_rate: dest.sample_rate(),
        });
        Self {
            dest,
            loader,
            cues,
            spoken,
            clips,
            voice,
            prefetch,
            cursor: 0,
            generation: 0,
            ready: HashMap::new(),
            requested: HashSet::new(),
            failed: HashSet::new(),
            awaiting: HashMap::new(),
            playing: Vec::new(),
            chime,
            level: LayerLevel::new(volume),
            live: false,
        }
    }

    pub fn cues(&self) -> &[VoiceCue] {
        &self.cues
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Dispatches every cue whose time has been reached since the last call.
    pub fn tick(&mut self, elapsed: f64) -> Vec<DispatchedCue> {
        let mut out = Vec::new();
        while let Some(cue) = self.cues.get(self.cursor) {
            if cue.time > elapsed {
                break;
            }
            let index = self.cursor;
            self.cursor += 1;
            out.push(self.dispatch(index));
        }
        out
    }

    fn dispatch(&mut self, index: usize) -> DispatchedCue {
        let cue = self.cues[index].clone();
        if self.live {
            if cue.chime {
                self.play_chime();
            }
            if let Some(k) = self.spoken[index] {
                self.voice_cue(index, k);
                self.prefetch_from(k + 1);
            }
        }
        DispatchedCue {
            index,
            time: cue.time,
            text: if cue.chime_only { None } else { cue.text },
            chime: cue.chime,
        }
    }

    fn voice_cue(&mut self, index: usize, k: usize) {
        if let Some(buffer) = self.ready.get(&k).cloned() {
            self.play(buffer);
        } else if k < self.clips.len() && !self.failed.contains(&k) {
            self.request_clip(k);
            self.awaiting.insert(k, index);
        } else {
            self.synthesize(index);
        }
    }

    fn request_clip(&mut self, k: usize) {
        if self.requested.insert(k) {
            self.loader.request(LoadJob::NarrationClip {
                generation: self.generation,
                index: k,
                file: self.clips[k].clone(),
            });
        }
    }

    fn synthesize(&mut self, index: usize) {
        let Some(text) = self.cues[index].text.clone() else {
            return;
        };
        self.loader.request(LoadJob::Speech {
            generation: self.generation,
            cue: index,
            text,
            voice: self.voice.clone(),
        });
    }

    fn prefetch_from(&mut self, first: usize) {
        let end = (first + self.prefetch).min(self.clips.len());
        for k in first..end {
            if !self.ready.contains_key(&k) && !self.failed.contains(&k) {
                self.request_clip(k);
            }
        }
    }

    fn play(&mut self, buffer: Arc<AudioBuffer>) {
        let node = self.dest.connect(Box::new(ClipVoice::new(buffer, self.level.param())));
        self.playing.push(node);
    }

    pub fn play_chime(&mut self) {
        if self.live {
            let chime = self.chime.clone();
            self.play(chime);
        }
    }

    /// Moves the cursor to the first cue at or after `t` and silences
    /// anything still playing or about to play.
    pub fn seek(&mut self, t: f64) {
        self.cursor = self.cues.partition_point(|c| c.time < t);
        self.generation += 1;
        self.awaiting.clear();
        self.cancel_playback();
        let next_spoken = self.spoken[self.cursor..].iter().flatten().next().copied();
        if let Some(k) = next_spoken {
            if self.live {
                self.prefetch_from(k);
            }
        }
    }

    fn cancel_playback(&mut self) {
        for node in self.playing.drain(..) {
            self.dest.disconnect(node);
        }
    }

    /// Latest spoken text at or before `t`.
    pub fn text_at_time(&self, t: f64) -> Option<&str> {
        let end = self.cues.partition_point(|c| c.time <= t);
        self.cues[..end]
            .iter()
            .rev()
            .find(|c| !c.chime_only && c.text.is_some())
            .and_then(|c| c.text.as_deref())
    }

    /// Loader completion for a clip or a synthesized cue.
    pub fn on_loaded(&mut self, job: &LoadJob, result: Result<Arc<AudioBuffer>, AssetError>) {
        match job {
            LoadJob::NarrationClip { index, file, .. } => {
                self.requested.remove(index);
                match result {
                    Ok(buffer) => {
                        self.ready.insert(*index, buffer.clone());
                        if let Some(cue) = self.awaiting.remove(index) {
                            if self.live {
                                log::debug!(target: "session::narration", "late clip for cue {cue}");
                                self.play(buffer);
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!(target: "session::narration", "clip {file} unavailable, using speech: {e}");
                        self.failed.insert(*index);
                        if let Some(cue) = self.awaiting.remove(index) {
                            if self.live {
                                self.synthesize(cue);
                            }
                        }
                    }
                }
            }
            LoadJob::Speech { generation, cue, .. } => {
                if *generation != self.generation || !self.live {
                    return;
                }
                match result {
                    Ok(buffer) => self.play(buffer),
                    Err(e) => log::warn!(target: "session::narration", "speech for cue {cue} failed: {e}"),
                }
            }
            LoadJob::Ambient { .. } => {}
        }
        let dest = &self.dest;
        self.playing.retain(|node| dest.is_connected(*node));
    }
}

impl AudioLayer for NarrationSequencer {
    fn start(&mut self, _now: f64) {
        self.live = true;
        self.level.silence();
        let first = self.spoken[self.cursor..].iter().flatten().next().copied();
        if let Some(k) = first {
            self.prefetch_from(k);
        }
    }

    fn stop(&mut self) {
        self.live = false;
        self.awaiting.clear();
        self.generation += 1;
        self.cancel_playback();
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

    fn poll(&mut self, _now: f64) {
        let dest = &self.dest;
        self.playing.retain(|node| dest.is_connected(*node));
    }
}
