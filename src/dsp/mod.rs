use rand::Rng;

/// Leak step of the brown-noise integrator.
const BROWN_STEP: f32 = 0.02;

pub fn db_to_gain(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

/// Pink noise, Voss-McCartney style: seven correlated poles fed by white noise.
pub fn generate_pink_noise_samples<R: Rng>(rng: &mut R, n_samples: usize) -> Vec<f32> {
    let mut b = [0.0f32; 7];
    let mut out = Vec::with_capacity(n_samples);
    for _ in 0..n_samples {
        let w = rng.gen_range(-1.0f32..1.0);
        b[0] = 0.99886 * b[0] + w * 0.0555179;
        b[1] = 0.99332 * b[1] + w * 0.0750759;
        b[2] = 0.96900 * b[2] + w * 0.1538520;
        b[3] = 0.86650 * b[3] + w * 0.3104856;
        b[4] = 0.55000 * b[4] + w * 0.5329522;
        b[5] = -0.7616 * b[5] - w * 0.0168980;
        let sum: f32 = b.iter().sum::<f32>() + w * 0.5362;
        out.push(sum * 0.11);
        b[6] = w * 0.115926;
    }
    out
}

/// Brown noise from a leaky integrator, scaled up to sit near pink in loudness.
pub fn generate_brown_noise_samples<R: Rng>(rng: &mut R, n_samples: usize) -> Vec<f32> {
    let mut last = 0.0f32;
    let mut out = Vec::with_capacity(n_samples);
    for _ in 0..n_samples {
        let w = rng.gen_range(-1.0f32..1.0);
        last = (last + BROWN_STEP * w) / (1.0 + BROWN_STEP);
        out.push(last * 3.5);
    }
    out
}

/// Blends the last `fade` samples into the first ones so the buffer loops
/// without a click, then drops the blended tail.
pub fn crossfade_loop(samples: &mut Vec<f32>, fade: usize) {
    let fade = fade.min(samples.len() / 2);
    if fade == 0 {
        return;
    }
    let tail_start = samples.len() - fade;
    for i in 0..fade {
        let ratio = i as f32 / fade as f32;
        let tail = samples[tail_start + i];
        samples[i] = samples[i] * ratio + tail * (1.0 - ratio);
    }
    samples.truncate(tail_start);
}

/// Equal-power pan; `pan` in `[-1, 1]`.
pub fn pan2(signal: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
    let left = angle.cos() * signal;
    let right = angle.sin() * signal;
    (left, right)
}

/// A soft bell: a few inharmonic partials with exponential decay,
/// rendered as interleaved stereo.
pub fn render_chime(sample_rate: u32, fundamental: f32, seconds: f32) -> Vec<f32> {
    const PARTIALS: [(f32, f32, f32); 4] = [
        // ratio, amplitude, decay per second
        (1.0, 0.6, 1.2),
        (2.76, 0.25, 2.0),
        (5.40, 0.12, 3.1),
        (8.93, 0.05, 4.5),
    ];
    let frames = (seconds * sample_rate as f32) as usize;
    let attack = (0.005 * sample_rate as f32).max(1.0);
    let mut out = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let mut s = 0.0;
        for &(ratio, amp, decay) in &PARTIALS {
            s += amp * (-decay * t).exp() * (2.0 * std::f32::consts::PI * fundamental * ratio * t).sin();
        }
        s *= (i as f32 / attack).min(1.0) * 0.5;
        out.push(s);
        out.push(s);
    }
    out
}
