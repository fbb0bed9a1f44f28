use std::io::Cursor;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::DecodeError;

/// Decoded audio, interleaved stereo at `sample_rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Copies a decoded packet into `slot`, growing it when a packet is larger
/// than any seen before.
fn interleave<'a>(slot: &'a mut Option<SampleBuffer<f32>>, decoded: AudioBufferRef<'_>) -> &'a SampleBuffer<f32> {
    let needed = decoded.capacity() * decoded.spec().channels.count();
    if slot.as_ref().is_some_and(|buf| buf.capacity() < needed) {
        *slot = None;
    }
    let sbuf = slot.get_or_insert_with(|| SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec()));
    sbuf.copy_interleaved_ref(decoded);
    sbuf
}

fn decode_reader<R: MediaSource + 'static>(
    reader: R,
    hint: &Hint,
    sample_rate: u32,
) -> Result<AudioBuffer, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(reader), Default::default());
    let probed = get_probe().format(
        hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format.default_track().ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
    let src_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::UnknownSampleRate)?;

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!(target: "session::decode", "skipping corrupt packet: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let channels = decoded.spec().channels.count().max(1);
        let sbuf = interleave(&mut sample_buf, decoded);
        for frame in sbuf.samples().chunks(channels) {
            let l = frame[0];
            let r = if channels > 1 { frame[1] } else { frame[0] };
            samples.push(l);
            samples.push(r);
        }
    }
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }
    if src_rate != sample_rate {
        samples = resample_linear_stereo(&samples, src_rate, sample_rate);
    }
    Ok(AudioBuffer {
        samples,
        sample_rate,
    })
}

/// Decodes a complete encoded file held in memory, resampled to `sample_rate`.
pub fn decode_bytes(data: Vec<u8>, extension: Option<&str>, sample_rate: u32) -> Result<AudioBuffer, DecodeError> {
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }
    decode_reader(Cursor::new(data), &hint, sample_rate)
}

/// Linear interpolation between neighbouring frames; good enough for
/// ambience and speech.
pub fn resample_linear_stereo(input: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    let frames = input.len() / 2;
    if src_rate == dst_rate || frames == 0 {
        return input.to_vec();
    }
    let step = src_rate as f64 / dst_rate as f64;
    let out_frames = (frames as f64 / step).round() as usize;
    let last = frames - 1;
    (0..out_frames)
        .flat_map(|i| {
            let pos = i as f64 * step;
            let a = (pos as usize).min(last);
            let b = (a + 1).min(last);
            let w = (pos - a as f64) as f32;
            [0, 1].map(|ch| input[a * 2 + ch] + (input[b * 2 + ch] - input[a * 2 + ch]) * w)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(v).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_mono_wav_to_stereo() {
        let buf = decode_bytes(wav_bytes(16_000, 1, 1600), Some("wav"), 16_000).unwrap();
        assert_eq!(buf.frames(), 1600);
        assert_eq!(buf.samples[10], buf.samples[11]);
    }

    #[test]
    fn resamples_to_target_rate() {
        let buf = decode_bytes(wav_bytes(22_050, 2, 22_050), Some("wav"), 44_100).unwrap();
        assert_eq!(buf.sample_rate, 44_100);
        assert!((buf.duration() - 1.0).abs() < 0.01);
    }

    #[test]
    fn larger_later_packet_gets_a_bigger_buffer() {
        use symphonia::core::audio::{
            AsAudioBufferRef, AudioBuffer as PacketBuffer, Channels, Signal, SignalSpec,
        };
        let spec = SignalSpec::new(8_000, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let packet = |frames: usize| {
            let mut buf = PacketBuffer::<f32>::new(frames as u64, spec);
            buf.render_reserved(Some(frames));
            buf
        };
        let mut slot = None;
        assert_eq!(interleave(&mut slot, packet(64).as_audio_buffer_ref()).samples().len(), 128);
        assert_eq!(interleave(&mut slot, packet(1024).as_audio_buffer_ref()).samples().len(), 2048);
        assert_eq!(interleave(&mut slot, packet(32).as_audio_buffer_ref()).samples().len(), 64);
        assert_eq!(slot.map(|b| b.capacity()), Some(2048));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decode_bytes(vec![1, 2, 3, 4, 5], None, 48_000).is_err());
    }
}
