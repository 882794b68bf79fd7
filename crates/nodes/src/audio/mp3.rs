// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! MPEG-1/2 Layer III decoding through symphonia.
//!
//! Input arrives as an unframed byte stream, so frames are located here by
//! their sync word and handed to symphonia's codec one packet at a time.

use bytes::{Buf, BytesMut};
use portkit_core::{PortKitError, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_MP3};
use symphonia::core::errors::Error;
use symphonia::core::formats::Packet;

use super::decoder::{AudioDecoder, PcmChunk};

const ID3V2_HEADER_LEN: usize = 10;
const FRAME_HEADER_LEN: usize = 4;

const MPEG1_L3_KBPS: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const MPEG2_L3_KBPS: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];
const MPEG1_RATES: [u32; 3] = [44100, 48000, 32000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sample_rate: u32,
    pub bitrate_kbps: u32,
    /// Whole frame length, header included.
    pub len: usize,
    pub samples_per_frame: u64,
}

/// Parses a Layer III frame header. Free-format and reserved values are
/// rejected.
pub fn parse_frame_header(h: &[u8]) -> Option<FrameHeader> {
    if h.len() < FRAME_HEADER_LEN || h[0] != 0xFF || h[1] & 0xE0 != 0xE0 {
        return None;
    }
    let version = (h[1] >> 3) & 3;
    let layer = (h[1] >> 1) & 3;
    if version == 1 || layer != 1 {
        return None;
    }
    let bitrate_idx = usize::from(h[2] >> 4);
    let rate_idx = usize::from((h[2] >> 2) & 3);
    if bitrate_idx == 0 || bitrate_idx == 15 || rate_idx == 3 {
        return None;
    }
    let padding = usize::from((h[2] >> 1) & 1);
    let mpeg1 = version == 3;
    let (bitrate_kbps, sample_rate) = match version {
        3 => (MPEG1_L3_KBPS[bitrate_idx], MPEG1_RATES[rate_idx]),
        2 => (MPEG2_L3_KBPS[bitrate_idx], MPEG1_RATES[rate_idx] / 2),
        _ => (MPEG2_L3_KBPS[bitrate_idx], MPEG1_RATES[rate_idx] / 4),
    };
    let coefficient = if mpeg1 { 144_000 } else { 72_000 };
    let len = (coefficient * bitrate_kbps / sample_rate) as usize + padding;
    let samples_per_frame = if mpeg1 { 1152 } else { 576 };
    Some(FrameHeader { sample_rate, bitrate_kbps, len, samples_per_frame })
}

/// Length of a leading ID3v2 tag, if `data` starts with one.
fn id3v2_len(data: &[u8]) -> Option<usize> {
    if data.len() < ID3V2_HEADER_LEN || !data.starts_with(b"ID3") {
        return None;
    }
    let size = data[6..10].iter().fold(0usize, |acc, b| (acc << 7) | usize::from(b & 0x7F));
    let footer = if data[5] & 0x10 != 0 { ID3V2_HEADER_LEN } else { 0 };
    Some(ID3V2_HEADER_LEN + size + footer)
}

enum Sync {
    Frame(FrameHeader),
    NeedMore,
}

/// Drops bytes until `buf` starts with a valid frame header.
fn resync(buf: &mut BytesMut) -> Sync {
    loop {
        if let Some(tag) = id3v2_len(buf) {
            if buf.len() < tag {
                return Sync::NeedMore;
            }
            buf.advance(tag);
            continue;
        }
        match buf.windows(FRAME_HEADER_LEN).position(|w| parse_frame_header(w).is_some()) {
            Some(pos) => {
                buf.advance(pos);
                if let Some(header) = parse_frame_header(buf) {
                    return Sync::Frame(header);
                }
            },
            None => {
                // Keep a possible partial header or tag start.
                let keep = buf.len().min(FRAME_HEADER_LEN - 1);
                buf.advance(buf.len() - keep);
                return Sync::NeedMore;
            },
        }
    }
}

#[derive(Default)]
pub struct Mp3Decoder {
    codec: Option<Box<dyn Decoder>>,
    input: BytesMut,
    samples: Option<SampleBuffer<i16>>,
    frames: u64,
}

impl Mp3Decoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioDecoder for Mp3Decoder {
    fn init(&mut self) -> Result<()> {
        let mut params = CodecParameters::new();
        params.for_codec(CODEC_TYPE_MP3);
        let codec = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| PortKitError::Runtime(format!("failed to create MP3 decoder: {e}")))?;
        self.codec = Some(codec);
        Ok(())
    }

    fn push(&mut self, data: &[u8]) {
        self.input.extend_from_slice(data);
    }

    fn decode_next(&mut self) -> Result<Option<PcmChunk>> {
        let Some(codec) = self.codec.as_mut() else {
            return Err(PortKitError::Runtime("MP3 decoder not initialized".to_string()));
        };
        loop {
            let header = match resync(&mut self.input) {
                Sync::Frame(h) => h,
                Sync::NeedMore => return Ok(None),
            };
            if self.input.len() < header.len {
                return Ok(None);
            }
            let frame = self.input.split_to(header.len);
            let ts = self.frames * header.samples_per_frame;
            let packet = Packet::new_from_slice(0, ts, header.samples_per_frame, &frame);
            self.frames += 1;

            match codec.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let needed = decoded.capacity() * spec.channels.count();
                    if self.samples.as_ref().is_none_or(|b| b.capacity() < needed) {
                        self.samples = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                    }
                    let Some(buf) = self.samples.as_mut() else {
                        continue;
                    };
                    buf.copy_interleaved_ref(decoded);
                    return Ok(Some(PcmChunk {
                        sample_rate: spec.rate,
                        channels: u32::try_from(spec.channels.count()).unwrap_or(2),
                        samples: buf.samples().to_vec(),
                    }));
                },
                Err(Error::DecodeError(reason)) => {
                    tracing::warn!(frame = self.frames, %reason, "MP3 decode error (continuing)");
                },
                Err(Error::ResetRequired) => codec.reset(),
                Err(e) => {
                    return Err(PortKitError::StreamCorrupt {
                        reason: format!("MP3 decode failed: {e}"),
                        fatal: true,
                    });
                },
            }
        }
    }

    fn reset(&mut self) {
        self.input.clear();
        self.frames = 0;
        if let Some(codec) = self.codec.as_mut() {
            codec.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 128 kbps, 44.1 kHz, MPEG-1 Layer III, no padding.
    const HEADER_128K: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];

    #[test]
    fn test_frame_length() {
        let h = parse_frame_header(&HEADER_128K).unwrap();
        assert_eq!(h.sample_rate, 44100);
        assert_eq!(h.bitrate_kbps, 128);
        assert_eq!(h.len, 417);
        assert_eq!(h.samples_per_frame, 1152);

        // Padding bit adds one byte.
        assert_eq!(parse_frame_header(&[0xFF, 0xFB, 0x92, 0x00]).unwrap().len, 418);
        // MPEG-2, 64 kbps, 22.05 kHz.
        let h = parse_frame_header(&[0xFF, 0xF3, 0x80, 0x00]).unwrap();
        assert_eq!((h.sample_rate, h.len, h.samples_per_frame), (22050, 208, 576));
    }

    #[test]
    fn test_rejects_invalid_headers() {
        // Free format.
        assert_eq!(parse_frame_header(&[0xFF, 0xFB, 0x00, 0x00]), None);
        // Reserved rate.
        assert_eq!(parse_frame_header(&[0xFF, 0xFB, 0x9C, 0x00]), None);
        // Layer II.
        assert_eq!(parse_frame_header(&[0xFF, 0xFD, 0x90, 0x00]), None);
        assert_eq!(parse_frame_header(&[0x00, 0xFB, 0x90, 0x00]), None);
    }

    #[test]
    fn test_resync_skips_tags_and_garbage() {
        let mut data = BytesMut::new();
        data.extend_from_slice(b"ID3\x04\x00\x00\x00\x00\x00\x02");
        data.extend_from_slice(&[0xAA, 0xBB]);
        data.extend_from_slice(&[0x12, 0x34, 0x56]);
        data.extend_from_slice(&HEADER_128K);
        match resync(&mut data) {
            Sync::Frame(h) => assert_eq!(h.len, 417),
            Sync::NeedMore => panic!("expected a frame"),
        }
        assert_eq!(&data[..], &HEADER_128K);
    }

    #[test]
    fn test_resync_waits_for_whole_tag() {
        let mut data = BytesMut::from(&b"ID3\x04\x00\x00\x00\x00\x01\x00"[..]);
        assert!(matches!(resync(&mut data), Sync::NeedMore));
        assert_eq!(data.len(), 10);
    }

    #[test]
    fn test_incomplete_frame_needs_more() {
        let mut decoder = Mp3Decoder::new();
        decoder.init().unwrap();
        decoder.push(&HEADER_128K);
        decoder.push(&[0; 100]);
        assert_eq!(decoder.decode_next().unwrap(), None);
    }
}
