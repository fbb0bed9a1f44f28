use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::decode::AudioBuffer;
use crate::error::AssetError;
use crate::models::VoiceOptions;

/// Raw byte access keyed by filename. `NotFound` is an expected outcome,
/// not a fault.
pub trait AssetSource: Send + Sync {
    fn fetch(&self, name: &str) -> Result<Vec<u8>, AssetError>;
}

/// Text to speech, best-effort. Output is interleaved stereo at any rate.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Result<AudioBuffer, AssetError>;
}

/// Reads files below a root directory; names may also be `data:` URLs.
pub struct FsAssetSource {
    root: PathBuf,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn decode_data_url(url: &str) -> Result<Vec<u8>, AssetError> {
    let idx = url.find(',').ok_or_else(|| AssetError::NotFound(url.to_string()))?;
    let (_, b64) = url.split_at(idx + 1);
    Ok(BASE64.decode(b64.trim())?)
}

impl AssetSource for FsAssetSource {
    fn fetch(&self, name: &str) -> Result<Vec<u8>, AssetError> {
        if name.starts_with("data:") {
            return decode_data_url(name);
        }
        let path = self.root.join(name);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AssetError::NotFound(name.to_string())
            } else {
                AssetError::Io {
                    name: name.to_string(),
                    source: e,
                }
            }
        })
    }
}

/// In-memory assets; also records every fetch, which tests lean on.
#[derive(Default, Clone)]
pub struct MemoryAssetSource {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.files.lock().insert(name.into(), bytes);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

impl AssetSource for MemoryAssetSource {
    fn fetch(&self, name: &str) -> Result<Vec<u8>, AssetError> {
        self.fetched.lock().push(name.to_string());
        self.files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(name.to_string()))
    }
}

/// Pre-rendered narration: track id to the ordered clip filenames of its
/// spoken cues.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NarrationManifest {
    #[serde(flatten)]
    pub tracks: HashMap<String, Vec<String>>,
}

impl NarrationManifest {
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn clips_for(&self, track_id: &str) -> Option<&[String]> {
        self.tracks.get(track_id).map(|v| v.as_slice())
    }
}

/// The collaborators a session needs for its sampled layers.
#[derive(Clone, Default)]
pub struct Assets {
    pub ambient: Option<Arc<dyn AssetSource>>,
    pub narration: Option<Arc<dyn AssetSource>>,
    pub manifest: Option<NarrationManifest>,
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_urls_are_decoded() {
        let src = FsAssetSource::new("/nonexistent");
        let bytes = src.fetch("data:audio/wav;base64,AQID").unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn missing_file_is_not_found() {
        let src = FsAssetSource::new(std::env::temp_dir());
        assert!(matches!(
            src.fetch("definitely-not-here-4b1f.mp3"),
            Err(AssetError::NotFound(_))
        ));
    }

    #[test]
    fn manifest_maps_tracks() {
        let m = NarrationManifest::from_json(r#"{"calm": ["a.mp3", "b.mp3"]}"#).unwrap();
        assert_eq!(m.clips_for("calm").unwrap()[1], "b.mp3");
        assert!(m.clips_for("other").is_none());
    }
}
