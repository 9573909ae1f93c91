//! Component D: wire codec. Base64 framing for the JSON transport, plus
//! sample-alignment bookkeeping for the inbound PCM stream (deltas can
//! split mid-sample and must not be handed to the converter or the sink
//! until a whole number of frames has accumulated).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::warn;

pub fn encode_chunk(pcm: &[u8]) -> String {
    STANDARD.encode(pcm)
}

pub fn decode_chunk(b64: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(b64)
}

/// Accumulates base64-decoded bytes from `response.audio.delta` events and
/// releases only whole frames, carrying any partial frame over to the next
/// call. Tracks misaligned-chunk counts for rate-limited logging, matching
/// the upstream wire format's occasional off-boundary splits.
pub struct FrameAligner {
    tail: Vec<u8>,
    bytes_per_sample: usize,
    channels: u16,
    misaligned_chunks: u64,
}

impl FrameAligner {
    pub fn new(channels: u16) -> Self {
        Self {
            tail: Vec::new(),
            bytes_per_sample: 2,
            channels,
            misaligned_chunks: 0,
        }
    }

    /// Feed raw decoded bytes, returning the largest whole-frame-aligned
    /// prefix available (possibly empty). Any remainder is buffered.
    pub fn push(&mut self, raw: &[u8]) -> Vec<u8> {
        if raw.len() % self.bytes_per_sample != 0 {
            self.misaligned_chunks += 1;
            if self.misaligned_chunks <= 3 {
                warn!(
                    len = raw.len(),
                    bytes_per_sample = self.bytes_per_sample,
                    "audio_wire_chunk_not_sample_aligned"
                );
            }
        }

        self.tail.extend_from_slice(raw);
        let frame_bytes = self.bytes_per_sample * self.channels as usize;
        let n = (self.tail.len() / frame_bytes) * frame_bytes;
        if n == 0 {
            return Vec::new();
        }
        self.tail.drain(..n).collect()
    }

    pub fn misaligned_chunks(&self) -> u64 {
        self.misaligned_chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let pcm = vec![1u8, 2, 3, 4, 5, 6];
        let encoded = encode_chunk(&pcm);
        let decoded = decode_chunk(&encoded).unwrap();
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn test_frame_aligner_buffers_partial_frame() {
        let mut aligner = FrameAligner::new(1);
        // 3 bytes: 1 full sample (2 bytes) + 1 leftover byte
        let out = aligner.push(&[1, 2, 3]);
        assert_eq!(out, vec![1, 2]);

        let out2 = aligner.push(&[4, 5, 6]);
        // leftover byte 3 + new bytes 4,5,6 = [3,4,5,6] -> two full samples
        assert_eq!(out2, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_frame_aligner_stereo_frame_size() {
        let mut aligner = FrameAligner::new(2);
        // one stereo frame is 4 bytes; feed 5 bytes, expect 4 released, 1 buffered
        let out = aligner.push(&[1, 2, 3, 4, 5]);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_frame_aligner_counts_misaligned_pushes() {
        let mut aligner = FrameAligner::new(1);
        aligner.push(&[1, 2, 3]); // len 3 is odd -> misaligned
        assert_eq!(aligner.misaligned_chunks(), 1);
    }
}
