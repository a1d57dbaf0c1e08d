//! Sample-rate conversion for finalized recordings.
//!
//! cpal captures at the device's native rate (commonly 44.1/48 kHz); the
//! artifact format is fixed at 16 kHz mono. `RateConverter` bridges that gap
//! on the capture worker thread after the stream has stopped, where
//! allocation is fine. Same-rate input is a passthrough with no rubato
//! session at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{Result, VoiceBoxError};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == output rate (passthrough).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between `process` calls.
    pending: Vec<f32>,
    /// Input frames rubato consumes per call.
    block: usize,
    /// Pre-allocated `[1][output_frames_max]` output buffer.
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `VoiceBoxError::AudioStream` if rubato fails to initialise.
    pub fn new(input_rate: u32, output_rate: u32, block: usize) -> Result<Self> {
        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                block,
                scratch: Vec::new(),
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, block, 1)
            .map_err(|e| VoiceBoxError::AudioStream(format!("resampler init: {e}")))?;

        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];
        info!(input_rate, output_rate, block, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            block,
            scratch,
        })
    }

    /// Convert `samples`, returning whatever full blocks produce. Remainder
    /// input is held until the next `process` or [`RateConverter::finish`].
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= self.block {
            let input = &self.pending[..self.block];
            match resampler.process_into_buffer(&[input], &mut self.scratch, None) {
                Ok((_consumed, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..self.block);
        }
        out
    }

    /// Flush the held remainder by zero-padding it to a full block.
    ///
    /// The padding converts to trailing silence, which transcription treats
    /// as end-of-utterance anyway.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.pending.is_empty() {
            return Vec::new();
        }
        // `process` drains all full blocks, so the remainder is < block.
        let padding = vec![0f32; self.block - self.pending.len()];
        self.process(&padding)
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
