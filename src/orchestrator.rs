use serde::Serialize;
use std::sync::Arc;

use crate::ambient::AmbientEngine;
use crate::analyser::Analyser;
use crate::assets::Assets;
use crate::audio_io::AudioBackend;
use crate::clock::{SessionClock, TimeSource};
use crate::config::{EngineConfig, CONFIG};
use crate::envelope::interpolate;
use crate::error::SessionError;
use crate::graph::{Destination, OutputGraph};
use crate::guidance::{active_window, phase_name_at, resonant_active, EventCursor};
use crate::layer::{AudioLayer, LayerKind, VOLUME_GLIDE};
use crate::loader::{AssetLoader, LoadJob, LoadResponse};
use crate::models::{AmbientEvent, CarrierGainEvent, CarrierLayer, GuidanceScript, SessionConfig, VoiceOptions};
use crate::narration::NarrationSequencer;
use crate::noise_bed::NoiseBed;
use crate::phase::{PhaseTracker, SessionPhase};
use crate::pulse::{PulseScheduler, PulseTiming};
use crate::spatial::{SpatialEngine, SPATIAL_FADE};
use crate::task::ScheduledTask;
use crate::tone::ToneEngine;

/// Seeks land at least this far before the end.
const SEEK_EPSILON: f64 = 0.001;
/// Bounds for the per-tick beat glide.
const MIN_GLIDE: f64 = 0.01;
const MAX_GLIDE: f64 = 1.0;
/// Level of the isochronic tone before the engine gain.
const PULSE_LEVEL: f32 = 0.25;

#[derive(Debug, Clone)]
pub struct StartOptions {
    pub volume: f32,
    pub isochronic: bool,
    /// Plays this ambient sound instead of the session's own.
    pub ambient_override: Option<String>,
    pub voice: VoiceOptions,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            volume: 1.0,
            isochronic: false,
            ambient_override: None,
            voice: VoiceOptions::default(),
        }
    }
}

/// The snapshot handed to observers once per tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickState {
    pub phase: SessionPhase,
    pub elapsed_seconds: f64,
    pub beat_freq_hz: f64,
    pub guidance_phase_name: Option<String>,
}

/// Platform integration (keep-awake, lock-screen transport).
pub trait TransportHooks: Send {
    fn playback_changed(&mut self, _playing: bool) {}
}

pub struct NoTransportHooks;

impl TransportHooks for NoTransportHooks {}

pub type TickCallback = Box<dyn FnMut(&TickState) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoaderMode {
    Threaded,
    Inline,
}

struct GuidanceCursors {
    script: GuidanceScript,
    carrier_events: EventCursor<CarrierGainEvent>,
    ambient_events: EventCursor<AmbientEvent>,
}

struct Session {
    config: SessionConfig,
    graph: OutputGraph,
    loader: Arc<AssetLoader>,
    clock: SessionClock,
    tracker: PhaseTracker,
    layers: Vec<LayerKind>,
    guidance: Option<GuidanceCursors>,
    on_tick: TickCallback,
    paused: bool,
    last_target: f64,
    last_elapsed: f64,
    /// Per-tick retargeting waits until a phase-change glide is over.
    glide_until: f64,
    /// Ambient level outside guidance events (config or user set).
    ambient_base: f32,
    resonant_on: bool,
    teardown: ScheduledTask,
}

macro_rules! find_layer {
    ($layers:expr, $variant:ident) => {
        $layers.iter_mut().find_map(|l| match l {
            LayerKind::$variant(inner) => Some(inner),
            _ => None,
        })
    };
}

impl Session {
    fn now(&self) -> f64 {
        self.graph.current_time()
    }

    fn tone(&mut self) -> Option<&mut ToneEngine> {
        find_layer!(self.layers, Tone)
    }

    fn resonant(&mut self) -> Option<&mut ToneEngine> {
        find_layer!(self.layers, Resonant)
    }

    fn pulse(&mut self) -> Option<&mut PulseScheduler> {
        find_layer!(self.layers, Pulse)
    }

    fn spatial(&mut self) -> Option<&mut SpatialEngine> {
        find_layer!(self.layers, Spatial)
    }

    fn ambient(&mut self) -> Option<&mut AmbientEngine> {
        find_layer!(self.layers, Ambient)
    }

    fn narration(&mut self) -> Option<&mut NarrationSequencer> {
        find_layer!(self.layers, Narration)
    }

    fn fade_all(&mut self, seconds: f64, now: f64, to_volume: bool) {
        for layer in self.layers.iter_mut() {
            let target = if to_volume { layer.volume() } else { 0.0 };
            layer.fade_volume(target, seconds, now);
        }
    }

    fn route_loads(&mut self, now: f64) {
        for LoadResponse { job, result } in self.loader.poll() {
            match &job {
                LoadJob::Ambient { id, .. } => match self.ambient() {
                    Some(ambient) => ambient.on_loaded(id, result, now),
                    None => log::debug!(target: "session", "dropping ambient load for {id}"),
                },
                LoadJob::NarrationClip { .. } | LoadJob::Speech { .. } => {
                    if let Some(narration) = self.narration() {
                        narration.on_loaded(&job, result);
                    }
                }
            }
        }
    }

    /// One control step from a single elapsed snapshot.
    fn advance(&mut self, elapsed: f64, cfg: &EngineConfig) -> TickState {
        let now = self.now();
        let previous = self.tracker.current();
        let phase = self.tracker.update(elapsed);
        let target = interpolate(&self.config.frequency_envelope, elapsed);
        let gap = (elapsed - self.last_elapsed).clamp(MIN_GLIDE, MAX_GLIDE);
        let glide_until = self.glide_until;
        let mut new_glide = None;
        if let Some(tone) = self.tone() {
            if phase != previous {
                tone.ramp_beat_frequency(target, cfg.phase_ramp, now);
                new_glide = Some(now + cfg.phase_ramp);
            } else if now >= glide_until && tone.drifts_from(target, now) {
                // The target may have moved on while a phase glide was running.
                tone.ramp_beat_frequency(target, gap, now);
            }
        }
        if let Some(until) = new_glide {
            self.glide_until = until;
        }
        if let Some(pulse) = self.pulse() {
            pulse.set_beat_frequency(target);
        }
        let guidance_phase_name = self.advance_guidance(elapsed, now, cfg);
        self.last_target = target;
        self.last_elapsed = elapsed;
        TickState {
            phase,
            elapsed_seconds: elapsed,
            beat_freq_hz: target,
            guidance_phase_name,
        }
    }

    fn advance_guidance(&mut self, elapsed: f64, now: f64, cfg: &EngineConfig) -> Option<String> {
        let g = self.guidance.as_mut()?;
        let carrier_due = g.carrier_events.due(elapsed).to_vec();
        let ambient_due = g.ambient_events.due(elapsed).to_vec();
        let window = active_window(&g.script.sam_windows, elapsed).map(|w| (w.mode, w.rotation_hz));
        let resonant = g.script.resonant_tone.as_ref().map(|w| resonant_active(w, elapsed));
        let name = phase_name_at(&g.script.phases, elapsed).map(str::to_string);

        if let Some(narration) = self.narration() {
            for cue in narration.tick(elapsed) {
                log::debug!(target: "session::narration", "cue {} at {:.1}s", cue.index, cue.time);
            }
        }
        if let Some(tone) = self.tone() {
            for e in &carrier_due {
                tone.fade_layer_gain(e.carrier_index, e.gain_db, e.fade_seconds, now);
            }
        }
        if let Some(ambient) = self.ambient() {
            for e in &ambient_due {
                ambient.set_volume_over(e.volume * cfg.ambient_gain, e.fade_seconds, now);
            }
        }
        if let Some(spatial) = self.spatial() {
            match window {
                Some((mode, hz)) => spatial.activate(mode, hz, now),
                None => spatial.deactivate(now),
            }
        }
        if let Some(active) = resonant {
            if active != self.resonant_on {
                self.resonant_on = active;
                let volume = if active { cfg.voice_gain } else { 0.0 };
                if let Some(tone) = self.resonant() {
                    tone.set_volume_over(volume, cfg.phase_ramp, now);
                }
            }
        }
        name
    }

    /// Puts every guidance-driven layer where it would be at `t`: passed
    /// one-shot events take effect at once, future ones are left pending.
    fn relocate_guidance(&mut self, t: f64, now: f64, cfg: &EngineConfig) -> Option<String> {
        let g = self.guidance.as_mut()?;
        let carriers = g.carrier_events.seek(t).to_vec();
        let has_ambient_events = !g.ambient_events.is_empty();
        let ambient_passed = g.ambient_events.seek(t).to_vec();
        let window = active_window(&g.script.sam_windows, t).map(|w| (w.mode, w.rotation_hz));
        let resonant = g.script.resonant_tone.as_ref().map(|w| resonant_active(w, t));
        let name = phase_name_at(&g.script.phases, t).map(str::to_string);

        if let Some(narration) = self.narration() {
            narration.seek(t);
        }
        if let Some(tone) = self.tone() {
            tone.reset_layer_gains();
            for e in &carriers {
                tone.fade_layer_gain(e.carrier_index, e.gain_db, 0.0, now);
            }
        }
        if has_ambient_events {
            let volume = ambient_passed
                .last()
                .map(|e| e.volume * cfg.ambient_gain)
                .unwrap_or(self.ambient_base);
            if let Some(ambient) = self.ambient() {
                ambient.set_volume_over(volume, 0.0, now);
            }
        }
        if let Some(spatial) = self.spatial() {
            match window {
                Some((mode, hz)) => spatial.activate(mode, hz, now),
                None => spatial.deactivate(now),
            }
        }
        if let Some(active) = resonant {
            self.resonant_on = active;
            let volume = if active { cfg.voice_gain } else { 0.0 };
            if let Some(tone) = self.resonant() {
                tone.set_volume_over(volume, 0.0, now);
            }
        }
        name
    }
}

/// Owns a session's lifecycle: the output graph, every layer, the clock
/// and the tick that ties them together.
///
/// All methods are meant to be called from one control thread. Rendering
/// happens wherever the [`AudioBackend`] pulls audio.
pub struct Orchestrator {
    backend: Box<dyn AudioBackend>,
    time: Arc<dyn TimeSource>,
    assets: Assets,
    hooks: Box<dyn TransportHooks>,
    engine: EngineConfig,
    loader_mode: LoaderMode,
    state: SessionPhase,
    session: Option<Session>,
}

impl Orchestrator {
    pub fn new(backend: Box<dyn AudioBackend>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            backend,
            time,
            assets: Assets::default(),
            hooks: Box::new(NoTransportHooks),
            engine: CONFIG.clone(),
            loader_mode: LoaderMode::Threaded,
            state: SessionPhase::Idle,
            session: None,
        }
    }

    pub fn with_assets(mut self, assets: Assets) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_hooks(mut self, hooks: Box<dyn TransportHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Loads assets synchronously on the control thread. Deterministic,
    /// for tests and offline tooling.
    pub fn with_inline_loader(mut self) -> Self {
        self.loader_mode = LoaderMode::Inline;
        self
    }

    pub fn state(&self) -> SessionPhase {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.paused)
    }

    pub fn analyser(&self) -> Option<Analyser> {
        self.session.as_ref().map(|s| s.graph.analyser())
    }

    pub fn elapsed(&self) -> Option<f64> {
        let session = self.session.as_ref()?;
        Some(session.clock.elapsed(self.time.now_ms()))
    }

    pub fn layer_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.layers.len())
    }

    pub fn isochronic_enabled(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.layers.iter().any(|l| matches!(l, LayerKind::Pulse(_))))
    }

    pub fn ambient_sound(&self) -> Option<String> {
        self.session.as_ref()?.layers.iter().find_map(|l| match l {
            LayerKind::Ambient(a) => Some(a.sound_id().to_string()),
            _ => None,
        })
    }

    /// Latest narration text at the current position, for display after a seek.
    pub fn narration_text(&self) -> Option<String> {
        let session = self.session.as_ref()?;
        let t = session.clock.elapsed(self.time.now_ms());
        session.layers.iter().find_map(|l| match l {
            LayerKind::Narration(n) => n.text_at_time(t).map(str::to_string),
            _ => None,
        })
    }

    pub fn start(
        &mut self,
        config: SessionConfig,
        options: StartOptions,
        on_tick: TickCallback,
    ) -> Result<(), SessionError> {
        if self.state == SessionPhase::Starting {
            log::warn!(target: "session", "start ignored, a session is already starting");
            return Ok(());
        }
        self.stop();
        self.state = SessionPhase::Starting;
        let mut session = match self.build(config, options, on_tick) {
            Ok(session) => session,
            Err(e) => {
                self.backend.close();
                self.state = SessionPhase::Idle;
                return Err(e);
            }
        };
        let phase = session.tracker.update(0.0);
        let state = TickState {
            phase,
            elapsed_seconds: 0.0,
            beat_freq_hz: session.last_target,
            guidance_phase_name: session
                .guidance
                .as_ref()
                .and_then(|g| phase_name_at(&g.script.phases, 0.0))
                .map(str::to_string),
        };
        (session.on_tick)(&state);
        log::info!(
            target: "session",
            "session started: {:.0}s, {} layers",
            session.config.duration,
            session.layers.len()
        );
        self.session = Some(session);
        self.state = phase;
        self.hooks.playback_changed(true);
        Ok(())
    }

    fn build(&mut self, config: SessionConfig, options: StartOptions, on_tick: TickCallback) -> Result<Session, SessionError> {
        let sample_rate = self.backend.sample_rate();
        let graph = OutputGraph::new(sample_rate);
        self.backend.open(graph.renderer())?;
        graph.master().set_value(options.volume);
        let loader = Arc::new(match self.loader_mode {
            LoaderMode::Threaded => AssetLoader::spawn(self.assets.clone(), sample_rate),
            LoaderMode::Inline => AssetLoader::inline(self.assets.clone(), sample_rate),
        });
        let cfg = &self.engine;
        let dest = graph.destination();
        let now = graph.current_time();
        let beat = interpolate(&config.frequency_envelope, 0.0);

        let mut layers = vec![LayerKind::Tone(ToneEngine::new(
            dest.clone(),
            &config.carriers,
            beat,
            cfg.voice_gain,
        ))];
        if let Some(noise) = &config.noise {
            let filter = config.guidance.as_ref().and_then(|g| g.noise_filter.clone());
            layers.push(LayerKind::Noise(NoiseBed::with_generated(
                dest.clone(),
                noise.kind,
                cfg.noise_seconds,
                filter,
                noise.volume * cfg.noise_gain,
            )));
        }
        if options.isochronic {
            layers.push(LayerKind::Pulse(pulse_layer(&dest, &config, beat, cfg)));
        }
        let ambient_volume = config
            .ambient
            .as_ref()
            .map(|a| a.volume * cfg.ambient_gain)
            .unwrap_or(cfg.ambient_gain);
        let ambient_id = options
            .ambient_override
            .clone()
            .or_else(|| config.ambient.as_ref().map(|a| a.sound_id.clone()));
        if let Some(id) = ambient_id {
            layers.push(LayerKind::Ambient(AmbientEngine::new(
                dest.clone(),
                loader.clone(),
                id,
                ambient_volume,
                cfg.ambient_cache_capacity,
                cfg.ambient_extension.clone(),
            )));
        }
        let mut guidance = None;
        if let Some(script) = &config.guidance {
            let clips = script
                .track_id
                .as_deref()
                .and_then(|id| self.assets.manifest.as_ref()?.clips_for(id))
                .map(|c| c.to_vec())
                .unwrap_or_default();
            layers.push(LayerKind::Narration(NarrationSequencer::new(
                dest.clone(),
                loader.clone(),
                &script.voice_cues,
                clips,
                options.voice.clone(),
                cfg.narration_prefetch,
                options.voice.volume * cfg.narration_gain,
            )));
            if !script.sam_windows.is_empty() {
                layers.push(LayerKind::Spatial(SpatialEngine::new(
                    dest.clone(),
                    &script.spatial_tone,
                    SPATIAL_FADE,
                )));
            }
            if let Some(window) = &script.resonant_tone {
                let carrier = CarrierLayer {
                    carrier_freq: window.carrier_freq,
                    gain_db: window.gain_db,
                    fixed_beat_freq: Some(window.beat_freq),
                };
                layers.push(LayerKind::Resonant(ToneEngine::new(
                    dest.clone(),
                    &[carrier],
                    window.beat_freq,
                    0.0,
                )));
            }
            guidance = Some(GuidanceCursors {
                script: script.clone(),
                carrier_events: EventCursor::new(&script.carrier_gain_events),
                ambient_events: EventCursor::new(&script.ambient_events),
            });
        }

        for layer in layers.iter_mut() {
            layer.start(now);
            let volume = layer.volume();
            layer.fade_volume(volume, cfg.start_fade, now);
        }

        let mut clock = SessionClock::new(config.duration);
        clock.start(self.time.now_ms());
        let tracker = PhaseTracker::new(&config.frequency_envelope, config.duration, config.has_return_phase);
        let mut session = Session {
            config,
            graph,
            loader,
            clock,
            tracker,
            layers,
            guidance,
            on_tick,
            paused: false,
            last_target: beat,
            last_elapsed: 0.0,
            glide_until: 0.0,
            ambient_base: ambient_volume,
            resonant_on: false,
            teardown: ScheduledTask::new(),
        };
        if let Some(narration) = session.narration() {
            narration.play_chime();
        }
        Ok(session)
    }

    /// One control step. Returns the emitted snapshot, if any.
    pub fn tick(&mut self) -> Result<Option<TickState>, SessionError> {
        if let Some(err) = self.backend.take_error() {
            return Err(SessionError::Output(err));
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        let now = session.now();
        session.route_loads(now);
        for layer in session.layers.iter_mut() {
            layer.poll(now);
        }
        if self.state == SessionPhase::Complete {
            if session.teardown.take_if_due(now) {
                for layer in session.layers.iter_mut() {
                    layer.stop();
                }
                session.layers.clear();
                log::info!(target: "session", "session complete, layers released");
            }
            return Ok(None);
        }
        if session.paused {
            return Ok(None);
        }
        if session.clock.is_finished(self.time.now_ms()) {
            return Ok(self.complete());
        }
        let elapsed = session.clock.elapsed(self.time.now_ms());
        let state = session.advance(elapsed, &self.engine);
        self.state = state.phase;
        (session.on_tick)(&state);
        Ok(Some(state))
    }

    fn complete(&mut self) -> Option<TickState> {
        let session = self.session.as_mut()?;
        if self.state == SessionPhase::Complete {
            return None;
        }
        let now = session.now();
        session.tracker.complete();
        session.paused = false;
        session.fade_all(self.engine.complete_fade, now, false);
        session.teardown.arm(now + self.engine.complete_fade);
        self.state = SessionPhase::Complete;
        let state = TickState {
            phase: SessionPhase::Complete,
            elapsed_seconds: session.config.duration,
            beat_freq_hz: session.last_target,
            guidance_phase_name: None,
        };
        (session.on_tick)(&state);
        self.hooks.playback_changed(false);
        log::info!(target: "session", "session reached its end");
        Some(state)
    }

    pub fn pause(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.paused || !self.state.is_running() {
            return;
        }
        session.clock.pause(self.time.now_ms());
        session.paused = true;
        let now = session.now();
        session.fade_all(self.engine.pause_fade, now, false);
        self.hooks.playback_changed(false);
    }

    /// Completes instead when the paused position is already at the end.
    pub fn resume(&mut self) {
        let now_ms = self.time.now_ms();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.paused {
            return;
        }
        if session.clock.is_finished(now_ms) {
            session.clock.resume(now_ms);
            self.complete();
            return;
        }
        session.clock.resume(now_ms);
        session.paused = false;
        let now = session.now();
        session.fade_all(self.engine.pause_fade, now, true);
        self.hooks.playback_changed(true);
    }

    /// Jumps to `target` seconds. Beat and phase follow at once, without a glide.
    pub fn seek(&mut self, target: f64) -> Option<TickState> {
        let now_ms = self.time.now_ms();
        let session = self.session.as_mut()?;
        if !self.state.is_running() {
            return None;
        }
        let t = target.clamp(0.0, (session.config.duration - SEEK_EPSILON).max(0.0));
        session.clock.seek(t, now_ms);
        session.tracker.reset();
        let phase = session.tracker.update(t);
        let beat = interpolate(&session.config.frequency_envelope, t);
        let now = session.now();
        if let Some(tone) = session.tone() {
            tone.set_beat_frequency(beat);
        }
        if let Some(pulse) = session.pulse() {
            pulse.set_beat_frequency(beat);
        }
        let guidance_phase_name = session.relocate_guidance(t, now, &self.engine);
        if session.paused {
            session.fade_all(0.0, now, false);
        }
        session.last_target = beat;
        session.last_elapsed = t;
        session.glide_until = 0.0;
        self.state = phase;
        let state = TickState {
            phase,
            elapsed_seconds: t,
            beat_freq_hz: beat,
            guidance_phase_name,
        };
        (session.on_tick)(&state);
        Some(state)
    }

    /// Tears everything down and releases the output. Safe in any state.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            for layer in session.layers.iter_mut() {
                layer.stop();
            }
            session.layers.clear();
            self.backend.close();
            session.graph.close();
            if self.state.is_running() && !session.paused {
                self.hooks.playback_changed(false);
            }
            log::info!(target: "session", "session stopped");
        }
        self.state = SessionPhase::Idle;
    }

    pub fn set_volume(&mut self, volume: f32) {
        if let Some(session) = self.session.as_mut() {
            let now = session.now();
            session.graph.master().fade_to(volume, now, VOLUME_GLIDE);
        }
    }

    pub fn set_ambient_volume(&mut self, volume: f32) {
        let gain = self.engine.ambient_gain;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let now = session.now();
        let paused = session.paused;
        session.ambient_base = volume * gain;
        if let Some(ambient) = session.ambient() {
            ambient.set_volume(volume * gain, now);
            if paused {
                ambient.fade_volume(0.0, 0.0, now);
            }
        }
    }

    /// Crossfades to `id`, or starts an ambient layer if there is none.
    pub fn set_ambient_sound(&mut self, id: &str) {
        let cfg = &self.engine;
        let running = self.state.is_running();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let now = session.now();
        if let Some(ambient) = session.ambient() {
            ambient.switch_sound(id, now);
            return;
        }
        if !running {
            return;
        }
        let mut ambient = AmbientEngine::new(
            session.graph.destination(),
            session.loader.clone(),
            id,
            session.ambient_base,
            cfg.ambient_cache_capacity,
            cfg.ambient_extension.clone(),
        );
        ambient.start(now);
        if !session.paused {
            ambient.fade_volume(ambient.volume(), cfg.start_fade, now);
        }
        session.layers.push(LayerKind::Ambient(ambient));
    }

    /// Adds or removes the isochronic layer. Returns whether it is now on.
    pub fn toggle_isochronic(&mut self) -> bool {
        let running = self.state.is_running();
        let cfg = &self.engine;
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if let Some(idx) = session.layers.iter().position(|l| matches!(l, LayerKind::Pulse(_))) {
            let mut layer = session.layers.remove(idx);
            layer.stop();
            return false;
        }
        if !running {
            return false;
        }
        let now = session.now();
        let mut pulse = pulse_layer(&session.graph.destination(), &session.config, session.last_target, cfg);
        pulse.start(now);
        if !session.paused {
            pulse.fade_volume(pulse.volume(), cfg.start_fade, now);
        }
        session.layers.push(LayerKind::Pulse(pulse));
        true
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pulse_layer(dest: &Destination, config: &SessionConfig, beat: f64, cfg: &EngineConfig) -> PulseScheduler {
    PulseScheduler::new(
        dest.clone(),
        config.isochronic_tone_hz(),
        beat,
        PULSE_LEVEL * cfg.voice_gain,
        PulseTiming {
            interval: cfg.pulse_interval,
            lookahead: cfg.pulse_lookahead,
            resync: cfg.pulse_resync,
            ramp: cfg.pulse_ramp,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_io::HeadlessBackend;
    use crate::clock::ManualTimeSource;
    use crate::models::FrequencyPoint;
    use crate::tone::layer_gain;
    use parking_lot::Mutex;

    fn config() -> SessionConfig {
        SessionConfig {
            duration: 180.0,
            carriers: vec![CarrierLayer {
                carrier_freq: 200.0,
                gain_db: 0.0,
                fixed_beat_freq: None,
            }],
            frequency_envelope: vec![
                FrequencyPoint::new(0.0, 10.0),
                FrequencyPoint::new(60.0, 10.0),
                FrequencyPoint::new(120.0, 6.0),
                FrequencyPoint::new(180.0, 6.0),
            ],
            noise: None,
            ambient: None,
            has_return_phase: false,
            isochronic_carrier_freq: None,
            guidance: None,
        }
    }

    fn orchestrator() -> (Orchestrator, ManualTimeSource, HeadlessBackend) {
        let time = ManualTimeSource::new();
        let backend = HeadlessBackend::new(1000);
        let orch = Orchestrator::new(Box::new(backend.clone()), Arc::new(time.clone()))
            .with_engine_config(EngineConfig::default())
            .with_inline_loader();
        (orch, time, backend)
    }

    fn recorder() -> (TickCallback, Arc<Mutex<Vec<TickState>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Box::new(move |s: &TickState| sink.lock().push(s.clone())), seen)
    }

    #[test]
    fn unavailable_output_is_fatal() {
        let time = ManualTimeSource::new();
        let mut orch = Orchestrator::new(Box::new(HeadlessBackend::unavailable(1000)), Arc::new(time))
            .with_engine_config(EngineConfig::default())
            .with_inline_loader();
        let (cb, _) = recorder();
        assert!(orch.start(config(), StartOptions::default(), cb).is_err());
        assert_eq!(orch.state(), SessionPhase::Idle);
    }

    #[test]
    fn starting_guard_rejects_reentry() {
        let (mut orch, _, _) = orchestrator();
        orch.state = SessionPhase::Starting;
        let (cb, seen) = recorder();
        orch.start(config(), StartOptions::default(), cb).unwrap();
        assert!(seen.lock().is_empty());
        assert!(orch.session.is_none());
    }

    #[test]
    fn tick_reports_envelope_and_phase() {
        let (mut orch, time, _) = orchestrator();
        let (cb, _) = recorder();
        orch.start(config(), StartOptions::default(), cb).unwrap();
        time.set(30_000.0);
        let s = orch.tick().unwrap().unwrap();
        assert_eq!(s.beat_freq_hz, 10.0);
        assert_eq!(s.phase, SessionPhase::Induction);
        time.set(90_000.0);
        let s = orch.tick().unwrap().unwrap();
        assert_eq!(s.beat_freq_hz, 8.0);
        assert_eq!(s.phase, SessionPhase::Main);
    }

    #[test]
    fn beat_catches_up_after_a_phase_glide_into_a_flat_segment() {
        let (mut orch, time, backend) = orchestrator();
        let mut session = config();
        session.frequency_envelope = vec![
            FrequencyPoint::new(0.0, 10.0),
            FrequencyPoint::new(60.0, 10.0),
            FrequencyPoint::new(120.0, 6.0),
            FrequencyPoint::new(121.0, 4.0),
        ];
        session.has_return_phase = true;
        let (cb, _) = recorder();
        orch.start(session, StartOptions::default(), cb).unwrap();
        let mut last = None;
        for _ in 0..560 {
            backend.render_seconds(0.25);
            time.advance(250.0);
            last = orch.tick().unwrap();
        }
        assert_eq!(last.unwrap().beat_freq_hz, 4.0);
        let s = orch.session.as_mut().unwrap();
        let now = s.now();
        let beat = s.tone().unwrap().beat_frequency(now);
        assert!((beat - 4.0).abs() < 1e-3, "tone stuck at {beat}");
    }

    const GUIDED: &str = r#"{
        "duration": 300,
        "carriers": [{"carrierFreq": 200}, {"carrierFreq": 300, "gainDb": -6}],
        "frequencyEnvelope": [{"time": 0, "beatFreq": 8}, {"time": 300, "beatFreq": 8}],
        "ambient": {"soundId": "rain", "volume": 0.5},
        "guidance": {
            "carrierGainEvents": [{"time": 50, "carrierIndex": 1, "gainDb": -20, "fadeSeconds": 4}],
            "ambientEvents": [
                {"time": 60, "volume": 0.1, "fadeSeconds": 5},
                {"time": 120, "volume": 0.8, "fadeSeconds": 5}
            ],
            "resonantTone": {"startTime": 100, "endTime": 150, "carrierFreq": 180, "beatFreq": 7},
            "samWindows": [{"startTime": 200, "endTime": 250, "rotationHz": 0.5}]
        }
    }"#;

    #[derive(Debug, PartialEq)]
    struct GuidedLevels {
        second_carrier: f32,
        ambient: f32,
        resonant: f32,
        spatial: bool,
    }

    /// Layer levels just after `after` seconds of graph time from now.
    fn guided_levels(orch: &mut Orchestrator, after: f64) -> GuidedLevels {
        let s = orch.session.as_mut().unwrap();
        let t = s.now() + after;
        GuidedLevels {
            second_carrier: s.tone().unwrap().carrier_gain(1, t).unwrap(),
            ambient: s.ambient().unwrap().level_at(t),
            resonant: s.resonant().unwrap().level_at(t),
            spatial: s.spatial().unwrap().is_active(),
        }
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn seek_applies_passed_guidance_events_at_once() {
        let (mut orch, _, _) = orchestrator();
        let (cb, _) = recorder();
        orch.start(SessionConfig::from_json(GUIDED).unwrap(), StartOptions::default(), cb)
            .unwrap();

        orch.seek(130.0).unwrap();
        let l = guided_levels(&mut orch, 0.01);
        assert!(close(l.second_carrier, layer_gain(-20.0)), "{l:?}");
        assert!(close(l.ambient, 0.8), "{l:?}");
        assert!(close(l.resonant, 1.0), "{l:?}");
        assert!(!l.spatial);

        orch.seek(70.0).unwrap();
        let l = guided_levels(&mut orch, 0.01);
        assert!(close(l.second_carrier, layer_gain(-20.0)), "{l:?}");
        assert!(close(l.ambient, 0.1), "{l:?}");
        assert!(close(l.resonant, 0.0), "{l:?}");

        orch.seek(10.0).unwrap();
        let l = guided_levels(&mut orch, 0.01);
        assert!(close(l.second_carrier, layer_gain(-6.0)), "{l:?}");
        assert!(close(l.ambient, 0.5), "{l:?}");
        assert!(close(l.resonant, 0.0), "{l:?}");
    }

    #[test]
    fn paused_seek_moves_spatial_window_but_stays_silent() {
        let (mut orch, _, _) = orchestrator();
        let (cb, _) = recorder();
        orch.start(SessionConfig::from_json(GUIDED).unwrap(), StartOptions::default(), cb)
            .unwrap();
        orch.pause();

        orch.seek(220.0).unwrap();
        let l = guided_levels(&mut orch, 0.01);
        assert!(l.spatial);
        assert!(close(l.ambient, 0.0), "{l:?}");

        orch.seek(120.5).unwrap();
        let l = guided_levels(&mut orch, 0.01);
        assert!(!l.spatial);
        assert!(close(l.resonant, 0.0), "{l:?}");

        orch.resume();
        let fade = orch.engine.pause_fade + 0.01;
        let l = guided_levels(&mut orch, fade);
        assert!(close(l.ambient, 0.8), "{l:?}");
        assert!(close(l.resonant, 1.0), "{l:?}");
    }

    #[test]
    fn toggling_isochronic_only_touches_its_layer() {
        let (mut orch, _, _) = orchestrator();
        let (cb, _) = recorder();
        orch.start(config(), StartOptions::default(), cb).unwrap();
        let base = orch.layer_count();
        assert!(orch.toggle_isochronic());
        assert_eq!(orch.layer_count(), base + 1);
        assert!(orch.isochronic_enabled());
        assert!(!orch.toggle_isochronic());
        assert_eq!(orch.layer_count(), base);
    }

    #[test]
    fn resume_past_the_end_completes() {
        let (mut orch, time, _) = orchestrator();
        let (cb, seen) = recorder();
        orch.start(config(), StartOptions::default(), cb).unwrap();
        time.set(179_999.0);
        orch.tick().unwrap();
        time.set(180_500.0);
        orch.pause();
        time.set(400_000.0);
        orch.resume();
        assert_eq!(orch.state(), SessionPhase::Complete);
        let completes = seen.lock().iter().filter(|s| s.phase == SessionPhase::Complete).count();
        assert_eq!(completes, 1);
    }

    #[test]
    fn seek_is_clamped_before_the_end() {
        let (mut orch, _, _) = orchestrator();
        let (cb, _) = recorder();
        orch.start(config(), StartOptions::default(), cb).unwrap();
        let s = orch.seek(500.0).unwrap();
        assert!((s.elapsed_seconds - (180.0 - SEEK_EPSILON)).abs() < 1e-9);
        assert_eq!(s.phase, SessionPhase::Main);
        assert!(orch.elapsed().unwrap() < 180.0);
    }
}
