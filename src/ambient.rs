use std::collections::VecDeque;
use std::sync::Arc;

use crate::automation::AudioParam;
use crate::decode::AudioBuffer;
use crate::error::AssetError;
use crate::graph::{Destination, NodeId};
use crate::layer::{AudioLayer, LayerLevel};
use crate::loader::{AssetLoader, LoadJob};
use crate::task::ScheduledTask;
use crate::voices::LoopedBufferVoice;

const SWITCH_FADE_OUT: f64 = 1.0;
/// The outgoing source is torn down only after its fade has finished.
const TEARDOWN_DELAY: f64 = 1.1;
/// Gap before the incoming source starts; the two overlap audibly.
const SWITCH_OVERLAP: f64 = 0.2;
const SOURCE_FADE_IN: f64 = 1.0;

/// Decoded ambient buffers, bounded, evicted in insertion order.
#[derive(Debug)]
pub struct BufferCache {
    capacity: usize,
    entries: VecDeque<(String, Arc<AudioBuffer>)>,
}

impl BufferCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<AudioBuffer>> {
        self.entries.iter().find(|(k, _)| k == id).map(|(_, b)| b.clone())
    }

    /// Re-inserting an id replaces its buffer but keeps its position.
    pub fn insert(&mut self, id: &str, buffer: Arc<AudioBuffer>) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == id) {
            entry.1 = buffer;
            return;
        }
        self.entries.push_back((id.to_string(), buffer));
        while self.entries.len() > self.capacity {
            if let Some((evicted, _)) = self.entries.pop_front() {
                log::debug!(target: "session::ambient", "evicting {evicted} from cache");
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }
}

struct Source {
    id: String,
    node: NodeId,
    gain: AudioParam,
}

/// Looping ambient backdrop with crossfaded switches. Owns the decoded
/// buffer cache; nothing else touches it.
pub struct AmbientEngine {
    dest: Destination,
    loader: Arc<AssetLoader>,
    cache: BufferCache,
    extension: String,
    sound_id: String,
    level: LayerLevel,
    current: Option<Source>,
    retiring: Vec<(Source, ScheduledTask)>,
    pending: Option<(String, ScheduledTask)>,
    loading: Option<String>,
    live: bool,
}

impl AmbientEngine {
    pub fn new(
        dest: Destination,
        loader: Arc<AssetLoader>,
        sound_id: impl Into<String>,
        volume: f32,
        cache_capacity: usize,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            dest,
            loader,
            cache: BufferCache::new(cache_capacity),
            extension: extension.into(),
            sound_id: sound_id.into(),
            level: LayerLevel::new(volume),
            current: None,
            retiring: Vec::new(),
            pending: None,
            loading: None,
            live: false,
        }
    }

    /// The sound the engine is playing or about to play.
    pub fn sound_id(&self) -> &str {
        &self.sound_id
    }

    pub fn playing_id(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.id.as_str())
    }

    pub fn cache(&self) -> &BufferCache {
        &self.cache
    }

    pub fn source_count(&self) -> usize {
        self.current.iter().count() + self.retiring.len()
    }

    pub fn set_volume_over(&mut self, volume: f32, seconds: f64, now: f64) {
        self.level.set_volume_over(volume, seconds, now);
    }

    pub fn level_at(&self, now: f64) -> f32 {
        self.level.current(now)
    }

    fn file_for(&self, id: &str) -> String {
        if id.starts_with("data:") || id.contains('.') {
            id.to_string()
        } else {
            format!("{id}.{}", self.extension)
        }
    }

    /// Crossfades to `id`: the current source fades out over a second and
    /// is torn down shortly after; the new one starts after a short overlap.
    pub fn switch_sound(&mut self, id: &str, now: f64) {
        if !self.live {
            self.sound_id = id.to_string();
            return;
        }
        if self.sound_id == id && self.current.is_some() && self.pending.is_none() {
            return;
        }
        self.sound_id = id.to_string();
        // a load still in flight for another id must not start anymore
        self.loading = None;
        match self.current.take() {
            Some(source) => {
                self.retire(source, now);
                let mut task = ScheduledTask::new();
                task.arm(now + SWITCH_OVERLAP);
                self.pending = Some((id.to_string(), task));
            }
            None => {
                self.pending = None;
                self.play(id, now);
            }
        }
    }

    fn retire(&mut self, source: Source, now: f64) {
        source.gain.fade_to(0.0, now, SWITCH_FADE_OUT);
        let mut task = ScheduledTask::new();
        task.arm(now + TEARDOWN_DELAY);
        self.retiring.push((source, task));
    }

    fn play(&mut self, id: &str, now: f64) {
        if let Some(buffer) = self.cache.get(id) {
            self.begin(id, buffer, now);
            return;
        }
        if self.loading.as_deref() == Some(id) {
            return;
        }
        self.loading = Some(id.to_string());
        self.loader.request(LoadJob::Ambient {
            id: id.to_string(),
            file: self.file_for(id),
        });
    }

    fn begin(&mut self, id: &str, buffer: Arc<AudioBuffer>, now: f64) {
        if let Some(previous) = self.current.take() {
            self.retire(previous, now);
        }
        let gain = AudioParam::new(0.0);
        gain.fade_to(1.0, now, SOURCE_FADE_IN);
        let voice = LoopedBufferVoice::new(buffer, gain.clone()).with_master(self.level.param());
        let node = self.dest.connect(Box::new(voice));
        log::debug!(target: "session::ambient", "playing {id}");
        self.current = Some(Source {
            id: id.to_string(),
            node,
            gain,
        });
    }

    /// Loader completion. Failures skip the layer; the session carries on.
    pub fn on_loaded(&mut self, id: &str, result: Result<Arc<AudioBuffer>, AssetError>, now: f64) {
        let wanted = self.loading.as_deref() == Some(id);
        if wanted {
            self.loading = None;
        }
        match result {
            Ok(buffer) => {
                self.cache.insert(id, buffer.clone());
                if wanted && self.live {
                    self.begin(id, buffer, now);
                }
            }
            Err(e) => {
                log::warn!(target: "session::ambient", "ambient sound {id} unavailable, skipping: {e}");
            }
        }
    }
}

impl AudioLayer for AmbientEngine {
    fn start(&mut self, now: f64) {
        self.live = true;
        self.level.silence();
        if self.current.is_none() {
            let id = self.sound_id.clone();
            self.play(&id, now);
        }
    }

    fn stop(&mut self) {
        self.live = false;
        self.pending = None;
        self.loading = None;
        if let Some(source) = self.current.take() {
            self.dest.disconnect(source.node);
        }
        for (source, _) in self.retiring.drain(..) {
            self.dest.disconnect(source.node);
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

    fn poll(&mut self, now: f64) {
        if !self.live {
            return;
        }
        let dest = &self.dest;
        self.retiring.retain_mut(|(source, task)| {
            if task.take_if_due(now) {
                dest.disconnect(source.node);
                false
            } else {
                true
            }
        });
        let due = match self.pending.as_mut() {
            Some((_, task)) => task.take_if_due(now),
            None => false,
        };
        if due {
            if let Some((id, _)) = self.pending.take() {
                self.play(&id, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{Assets, MemoryAssetSource};
    use crate::graph::OutputGraph;
    use std::io::Cursor;

    fn wav(frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames * 2 {
                writer.write_sample(((i % 50) as i16 - 25) * 200).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn setup(ids: &[&str]) -> (OutputGraph, Arc<AssetLoader>, MemoryAssetSource) {
        let source = MemoryAssetSource::new();
        for id in ids {
            source.insert(format!("{id}.wav"), wav(800));
        }
        let assets = Assets {
            ambient: Some(Arc::new(source.clone())),
            ..Default::default()
        };
        let graph = OutputGraph::new(8_000);
        let loader = Arc::new(AssetLoader::inline(assets, 8_000));
        (graph, loader, source)
    }

    fn pump(engine: &mut AmbientEngine, loader: &AssetLoader, now: f64) {
        for response in loader.poll() {
            if let LoadJob::Ambient { id, .. } = &response.job {
                engine.on_loaded(id, response.result, now);
            }
        }
    }

    #[test]
    fn cache_evicts_in_insertion_order() {
        let mut cache = BufferCache::new(3);
        let buf = Arc::new(AudioBuffer {
            samples: vec![0.0; 4],
            sample_rate: 8_000,
        });
        for id in ["a", "b", "c", "a", "d"] {
            cache.insert(id, buf.clone());
        }
        assert_eq!(cache.ids(), vec!["b", "c", "d"]);
    }

    #[test]
    fn five_sounds_leave_the_three_most_recent() {
        let ids = ["rain", "wind", "creek", "birds", "fire"];
        let (graph, loader, _) = setup(&ids);
        let mut engine = AmbientEngine::new(graph.destination(), loader.clone(), ids[0], 1.0, 3, "wav");
        engine.start(0.0);
        pump(&mut engine, &loader, 0.0);
        let mut t = 0.0;
        for id in &ids[1..] {
            t += 2.0;
            engine.switch_sound(id, t);
            engine.poll(t + 0.3);
            pump(&mut engine, &loader, t + 0.3);
        }
        assert_eq!(engine.cache().len(), 3);
        assert_eq!(engine.cache().ids(), vec!["creek", "birds", "fire"]);
        assert_eq!(engine.playing_id(), Some("fire"));
    }

    #[test]
    fn switch_overlaps_then_tears_down_old_source() {
        let (graph, loader, _) = setup(&["rain", "wind"]);
        let dest = graph.destination();
        let mut engine = AmbientEngine::new(dest.clone(), loader.clone(), "rain", 1.0, 3, "wav");
        engine.start(0.0);
        pump(&mut engine, &loader, 0.0);
        assert_eq!(dest.voice_count(), 1);

        engine.switch_sound("wind", 5.0);
        engine.poll(5.1);
        assert_eq!(engine.playing_id(), None);
        engine.poll(5.25);
        pump(&mut engine, &loader, 5.25);
        // both audible during the crossfade
        assert_eq!(dest.voice_count(), 2);
        engine.poll(6.0);
        assert_eq!(dest.voice_count(), 2);
        engine.poll(6.15);
        assert_eq!(dest.voice_count(), 1);
        assert_eq!(engine.playing_id(), Some("wind"));
    }

    #[test]
    fn stop_during_crossfade_is_clean() {
        let (graph, loader, _) = setup(&["rain", "wind"]);
        let dest = graph.destination();
        let mut engine = AmbientEngine::new(dest.clone(), loader.clone(), "rain", 1.0, 3, "wav");
        engine.start(0.0);
        pump(&mut engine, &loader, 0.0);
        engine.switch_sound("wind", 1.0);
        engine.stop();
        engine.stop();
        assert_eq!(dest.voice_count(), 0);
        // late work after teardown never touches the graph
        engine.poll(3.0);
        pump(&mut engine, &loader, 3.0);
        assert_eq!(dest.voice_count(), 0);
    }

    #[test]
    fn missing_sound_is_skipped() {
        let (graph, loader, source) = setup(&[]);
        let dest = graph.destination();
        let mut engine = AmbientEngine::new(dest.clone(), loader.clone(), "ocean", 1.0, 3, "wav");
        engine.start(0.0);
        pump(&mut engine, &loader, 0.0);
        assert_eq!(source.fetched(), vec!["ocean.wav".to_string()]);
        assert_eq!(dest.voice_count(), 0);
        assert!(engine.cache().is_empty());
    }
}
