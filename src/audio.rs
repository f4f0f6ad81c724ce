//! Audio artifact decoding and lip-sync volume analysis
//!
//! Synthesized artifacts arrive as WAV or MP3 files. Before delivery they are
//! normalized to 16-bit mono WAV and summarized into a per-slice loudness
//! envelope that the client uses to drive mouth movement.

use std::io::Cursor;
use std::path::Path;

use crate::{Error, Result};

/// Default slice length for the volume envelope, in milliseconds
pub const DEFAULT_SLICE_MS: u32 = 20;

/// Mono PCM samples in `[-1.0, 1.0]` with their sample rate
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode an audio file, sniffing WAV by its RIFF header and falling back to MP3
///
/// # Errors
///
/// Returns error if the file cannot be read or decoded
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let data = std::fs::read(path)?;
    decode_bytes(&data)
}

/// Decode in-memory audio (WAV or MP3)
///
/// # Errors
///
/// Returns error if the bytes are neither valid WAV nor MP3
pub fn decode_bytes(data: &[u8]) -> Result<DecodedAudio> {
    if data.starts_with(b"RIFF") {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

/// Decode WAV bytes, mixing all channels down to mono
///
/// # Errors
///
/// Returns error if the WAV header or samples are malformed
pub fn decode_wav(data: &[u8]) -> Result<DecodedAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| {
                    #[allow(clippy::cast_precision_loss)]
                    let v = v as f32;
                    v / scale
                }))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok(DecodedAudio {
        samples: mixdown(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error on a corrupt frame or when no frames are present
pub fn decode_mp3(data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate.get_or_insert(frame.sample_rate);
                let channels = frame.channels.max(1);
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(mixdown(&pcm, channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    let sample_rate = sample_rate
        .and_then(|r| u32::try_from(r).ok())
        .ok_or_else(|| Error::Audio("no audio frames found".to_string()))?;

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

fn mixdown(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let divisor = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / divisor)
        .collect()
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Compute the normalized RMS loudness of consecutive `slice_ms` windows
///
/// The loudest slice maps to `1.0`. A trailing partial slice is included.
///
/// # Errors
///
/// Returns error if the audio is empty or entirely silent
pub fn volume_envelope(samples: &[f32], sample_rate: u32, slice_ms: u32) -> Result<Vec<f32>> {
    let slice_len = usize::try_from(u64::from(sample_rate) * u64::from(slice_ms) / 1000)
        .unwrap_or(usize::MAX)
        .max(1);

    let rms: Vec<f32> = samples
        .chunks(slice_len)
        .map(|chunk| {
            #[allow(clippy::cast_precision_loss)]
            let n = chunk.len() as f32;
            (chunk.iter().map(|s| s * s).sum::<f32>() / n).sqrt()
        })
        .collect();

    let max = rms.iter().copied().fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return Err(Error::Audio("audio is empty or all zero".to_string()));
    }

    Ok(rms.into_iter().map(|v| v / max).collect())
}
