//! Random record padding.
//!
//! A padded record is `[length: u16 LE][replay nonce: u64 LE][frame][filler]`
//! where the total length is randomized between the true frame length and a
//! configured target, hiding frame sizes from traffic analysis. The filler
//! comes from a pre-generated random template that is refreshed periodically;
//! its content is covered by the outer encryption either way.

use rand::{Rng, RngCore};

use super::replay::ReplayGuard;
use crate::core::constants::{PADDING_HEADER_SIZE, PADDING_TEMPLATE_SIZE, PADDING_TOTAL_OVERHEAD};
use crate::core::error::CryptoError;

/// Pads outgoing frames and unpads/verifies incoming records.
pub struct RecordPadder {
    /// Largest frame body after which no padding is added.
    max_frame_len: usize,
    template: Vec<u8>,
    replay: ReplayGuard,
}

impl RecordPadder {
    /// Create a padder targeting `target_size` bytes per encrypted record.
    ///
    /// `target_size` must exceed [`PADDING_TOTAL_OVERHEAD`]; config
    /// validation enforces this before a padder is built.
    pub fn new(target_size: usize, replay: ReplayGuard) -> Self {
        debug_assert!(target_size > PADDING_TOTAL_OVERHEAD);
        let mut template = vec![0u8; PADDING_TEMPLATE_SIZE];
        rand::thread_rng().fill_bytes(&mut template);
        Self {
            max_frame_len: (target_size - PADDING_TOTAL_OVERHEAD).min(PADDING_TEMPLATE_SIZE),
            template,
            replay,
        }
    }

    /// Pad a frame into a record body carrying a fresh replay nonce.
    ///
    /// Frames at or above the target threshold are emitted without filler.
    /// Frames longer than the 16-bit length field can describe are refused.
    pub fn pad(&mut self, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if frame.len() > usize::from(u16::MAX) {
            return Err(CryptoError::MalformedPadding);
        }

        let total = if frame.len() >= self.max_frame_len {
            frame.len()
        } else {
            rand::thread_rng().gen_range(frame.len()..=self.max_frame_len)
        };

        let mut record = Vec::with_capacity(PADDING_HEADER_SIZE + total);
        record.extend_from_slice(&(frame.len() as u16).to_le_bytes());
        record.extend_from_slice(&self.replay.issue().to_le_bytes());
        record.extend_from_slice(frame);
        record.extend_from_slice(&self.template[..total - frame.len()]);
        Ok(record)
    }

    /// Strip padding from a record body, verifying the replay nonce and the
    /// declared length bound.
    pub fn unpad(&mut self, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if record.len() < PADDING_HEADER_SIZE {
            return Err(CryptoError::MalformedPadding);
        }
        let length = usize::from(u16::from_le_bytes([record[0], record[1]]));
        let nonce = u64::from_le_bytes(
            record[2..PADDING_HEADER_SIZE]
                .try_into()
                .map_err(|_| CryptoError::MalformedPadding)?,
        );

        if !self.replay.verify(nonce) {
            return Err(CryptoError::ReplayDetected);
        }

        let body = &record[PADDING_HEADER_SIZE..];
        if length > body.len() {
            return Err(CryptoError::MalformedPadding);
        }
        Ok(body[..length].to_vec())
    }

    /// Regenerate the random filler template. Called periodically so filler
    /// bytes are never long-lived.
    pub fn refresh_template(&mut self) {
        rand::thread_rng().fill_bytes(&mut self.template);
    }

    /// Sweep the embedded replay guard's working set.
    pub fn sweep_replay(&mut self) {
        self.replay.sweep();
    }
}
