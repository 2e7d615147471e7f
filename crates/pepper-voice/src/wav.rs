//! Canonical PCM container helpers: 16-bit mono WAV at 16 kHz.

use crate::error::VoiceError;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

fn canonical_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Returns true if the bytes start with a RIFF/WAVE header.
pub fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Encodes mono 16-bit samples as an in-memory WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, VoiceError> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, canonical_spec(sample_rate))
            .map_err(|e| VoiceError::Normalize(format!("failed to start WAV: {}", e)))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| VoiceError::Normalize(format!("failed to write WAV: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Normalize(format!("failed to finish WAV: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

/// Writes mono 16-bit samples to a WAV file.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), VoiceError> {
    let mut writer = hound::WavWriter::create(path, canonical_spec(sample_rate))
        .map_err(|e| VoiceError::Normalize(format!("failed to create {:?}: {}", path, e)))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| VoiceError::Normalize(format!("failed to write WAV: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| VoiceError::Normalize(format!("failed to finish WAV: {}", e)))
}

/// Decodes any PCM WAV into mono 16-bit samples at the canonical rate.
pub fn decode_to_canonical<R: Read + Seek>(reader: R) -> Result<Vec<i16>, VoiceError> {
    let reader = hound::WavReader::new(reader)
        .map_err(|e| VoiceError::Normalize(format!("failed to parse WAV: {}", e)))?;
    let spec = reader.spec();

    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| VoiceError::Normalize(format!("failed to read samples: {}", e)))?,
        (hound::SampleFormat::Int, bits) if bits <= 32 => {
            let shift = bits.saturating_sub(16);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| if bits > 16 { (v >> shift) as i16 } else { (v << (16 - bits)) as i16 }))
                .collect::<Result<_, _>>()
                .map_err(|e| VoiceError::Normalize(format!("failed to read samples: {}", e)))?
        }
        (hound::SampleFormat::Float, _) => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| VoiceError::Normalize(format!("failed to read samples: {}", e)))?,
        (format, bits) => {
            return Err(VoiceError::Normalize(format!(
                "unsupported WAV encoding: {:?} {}-bit",
                format, bits
            )))
        }
    };

    let mono = downmix(&interleaved, spec.channels);
    Ok(resample(&mono, spec.sample_rate, CANONICAL_SAMPLE_RATE))
}

/// Reads a WAV file as mono f32 samples in [-1, 1] with its sample rate.
pub fn read_mono_f32(path: &Path) -> Result<(Vec<f32>, u32), VoiceError> {
    let file = std::fs::File::open(path)?;
    let samples = decode_to_canonical(std::io::BufReader::new(file))?;
    let floats = samples
        .iter()
        .map(|&s| s as f32 / i16::MAX as f32)
        .collect();
    Ok((floats, CANONICAL_SAMPLE_RATE))
}

fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    match channels {
        0 | 1 => samples.to_vec(),
        n => samples
            .chunks_exact(n as usize)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / n as i32) as i16
            })
            .collect(),
    }
}

fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
