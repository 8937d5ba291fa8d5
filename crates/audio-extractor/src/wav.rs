//! WAV loading for speech models

use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::debug;
use video_digest_common::{ProcessingError, Result};

/// Mono samples in `[-1.0, 1.0]`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSamples {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSamples {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

fn read_error(e: hound::Error) -> ProcessingError {
    ProcessingError::CorruptedFile(format!("Failed to read WAV: {e}"))
}

/// Read a WAV file and downmix it to mono f32
pub fn load_wav_samples(path: &Path) -> Result<AudioSamples> {
    let mut reader = WavReader::open(path).map_err(read_error)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            // Convert integer samples to f32 in [-1.0, 1.0]
            let max_val = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val).map_err(read_error))
                .collect::<Result<_>>()?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(read_error))
            .collect::<Result<_>>()?,
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    let audio = AudioSamples {
        samples,
        sample_rate: spec.sample_rate,
    };
    debug!(
        samples = audio.samples.len(),
        seconds = audio.duration_seconds(),
        path = %path.display(),
        "Loaded WAV"
    );
    Ok(audio)
}
