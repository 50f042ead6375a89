use std::io::{Cursor, Read};
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, warn};

use super::segment::AudioSegment;
use crate::error::{SessionError, SessionResult};

pub const WAV_MIME_TYPE: &str = "audio/wav";

/// Decoded 16-bit PCM
#[derive(Debug, Clone)]
pub struct WavAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl WavAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }

    /// Bytes of PCM per second of audio
    pub fn byte_rate(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * 2
    }
}

/// Decode WAV bytes into 16-bit PCM.
///
/// A stream cut short (recording stopped mid-chunk) yields the samples that
/// were fully present instead of an error.
pub fn decode(bytes: &[u8]) -> SessionResult<WavAudio> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| SessionError::DecodeOrFormat(format!("invalid WAV data: {}", e)))?;
    Ok(read_pcm16(reader))
}

pub fn read_pcm16<R: Read>(mut reader: WavReader<R>) -> WavAudio {
    let spec = reader.spec();

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map_while(|s| s.ok())
            .collect(),
        (SampleFormat::Int, bits) => {
            let shift = bits.saturating_sub(16) as u32;
            reader
                .samples::<i32>()
                .map_while(|s| s.ok())
                .map(|s| if bits > 16 { (s >> shift) as i16 } else { (s << (16 - bits)) as i16 })
                .collect()
        }
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .map_while(|s| s.ok())
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect(),
    };

    WavAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    }
}

pub fn encode(samples: &[i16], sample_rate: u32, channels: u16) -> SessionResult<Vec<u8>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| SessionError::DecodeOrFormat(format!("failed to create WAV: {}", e)))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| SessionError::DecodeOrFormat(format!("failed to write sample: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| SessionError::DecodeOrFormat(format!("failed to finalize WAV: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

/// Join every recorded segment into one playable buffer.
///
/// WAV segments are decoded and re-encoded as a single WAV; any other
/// container is byte-concatenated under the first segment's type.
/// Returns `None` when there is nothing to merge.
pub fn merge_segments(segments: &[AudioSegment]) -> SessionResult<Option<AudioSegment>> {
    let non_empty: Vec<&AudioSegment> = segments.iter().filter(|s| !s.is_empty()).collect();
    let Some(first) = non_empty.first() else {
        return Ok(None);
    };

    if non_empty.iter().all(|s| s.is_wav()) {
        let mut merged = decode(first.data())?;
        for segment in &non_empty[1..] {
            let next = decode(segment.data())?;
            if next.sample_rate != merged.sample_rate || next.channels != merged.channels {
                return Err(SessionError::DecodeOrFormat(format!(
                    "cannot merge {}Hz/{}ch with {}Hz/{}ch",
                    merged.sample_rate, merged.channels, next.sample_rate, next.channels
                )));
            }
            merged.samples.extend_from_slice(&next.samples);
        }

        debug!(
            "Merged {} WAV segments: {:.1}s",
            non_empty.len(),
            merged.duration().as_secs_f64()
        );

        let bytes = encode(&merged.samples, merged.sample_rate, merged.channels)?;
        return Ok(Some(AudioSegment::new(bytes, WAV_MIME_TYPE)));
    }

    if non_empty.iter().any(|s| s.container() != first.container()) {
        warn!("Merging segments with mixed containers; using {}", first.mime_type());
    }

    let bytes: Vec<u8> = non_empty.iter().flat_map(|s| s.data().iter().copied()).collect();
    Ok(Some(AudioSegment::new(bytes, first.mime_type())))
}
