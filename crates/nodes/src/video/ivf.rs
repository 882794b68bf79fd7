// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! IVF and raw VP8 elementary stream framing.
//!
//! Both layouts prefix every frame with its little-endian 32-bit size. IVF
//! adds a 64-bit presentation timestamp after the size and opens the file with
//! a 32-byte `DKIF` header; raw streams carry nothing but frames.

use super::VideoDecoder;

pub const IVF_MAGIC: &[u8; 4] = b"DKIF";
pub const IVF_FILE_HEADER_LEN: usize = 32;
pub const IVF_FRAME_HEADER_LEN: usize = 12;
pub const RAW_FRAME_HEADER_LEN: usize = 4;

/// Bytes needed to tell the stream layouts apart.
pub const PROBE_LEN: usize = 32;

/// `VP80`, little-endian.
pub const VP8_FOURCC: u32 = 0x3038_5056;

pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;
pub const MAX_RAW_FRAME_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Ivf,
    Raw,
}

impl StreamKind {
    pub const fn frame_header_len(self) -> usize {
        match self {
            Self::Ivf => IVF_FRAME_HEADER_LEN,
            Self::Raw => RAW_FRAME_HEADER_LEN,
        }
    }

    const fn max_frame_size(self) -> usize {
        match self {
            Self::Ivf => MAX_FRAME_SIZE,
            Self::Raw => MAX_RAW_FRAME_SIZE,
        }
    }
}

/// Stream parameters found at the start of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub kind: StreamKind,
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    /// (numerator, denominator)
    pub frame_rate: (u32, u32),
}

fn le16(data: &[u8], at: usize) -> u32 {
    u32::from(u16::from_le_bytes([data[at], data[at + 1]]))
}

fn le32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Parses an IVF file header. `data` must hold at least [`PROBE_LEN`] bytes.
pub fn probe_ivf(data: &[u8]) -> Option<StreamHeader> {
    if data.len() < IVF_FILE_HEADER_LEN || !data.starts_with(IVF_MAGIC) {
        return None;
    }
    let version = le16(data, 4);
    if version != 0 {
        tracing::warn!(version, "Unrecognized IVF version, the file may not decode properly");
    }
    let mut num = le32(data, 16);
    let mut den = le32(data, 20);
    // Some encoders wrote 1/(2*fps) as the timebase.
    if num < 1000 {
        if num & 1 == 1 {
            den <<= 1;
        } else {
            num >>= 1;
        }
    } else {
        num = 30;
        den = 1;
    }
    Some(StreamHeader {
        kind: StreamKind::Ivf,
        fourcc: le32(data, 8),
        width: le16(data, 12),
        height: le16(data, 14),
        frame_rate: (num, den),
    })
}

/// Asks the codec whether the first frame of a raw stream is a keyframe it
/// understands.
pub fn probe_raw(data: &[u8], decoder: &dyn VideoDecoder) -> Option<StreamHeader> {
    let frame = data.get(RAW_FRAME_HEADER_LEN..data.len().min(PROBE_LEN))?;
    let info = decoder.peek_stream_info(frame)?;
    Some(StreamHeader {
        kind: StreamKind::Raw,
        fourcc: VP8_FOURCC,
        width: info.width,
        height: info.height,
        frame_rate: (30, 1),
    })
}

pub fn find_stream_info(data: &[u8], decoder: &dyn VideoDecoder) -> Option<StreamHeader> {
    probe_ivf(data).or_else(|| probe_raw(data, decoder))
}

/// Outcome of feeding bytes to a [`FrameReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Every offered byte was used and the frame is still incomplete.
    NeedMore,
    /// A complete frame is available through [`FrameReader::frame`].
    Frame,
    /// The frame header announced an unusable size. The header was consumed
    /// and the reader is ready for the next one.
    Invalid { size: usize },
}

/// Reassembles frames whose headers and payloads may straddle input buffers.
#[derive(Debug)]
pub struct FrameReader {
    kind: StreamKind,
    header: [u8; IVF_FRAME_HEADER_LEN],
    header_len: usize,
    frame: Vec<u8>,
    frame_size: usize,
    pts: Option<u64>,
    complete: bool,
}

impl FrameReader {
    pub const fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            header: [0; IVF_FRAME_HEADER_LEN],
            header_len: 0,
            frame: Vec::new(),
            frame_size: 0,
            pts: None,
            complete: false,
        }
    }

    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Bytes of the frame gathered so far.
    pub fn filled_len(&self) -> usize {
        self.frame.len()
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Timestamp of the current frame, IVF only.
    pub const fn pts(&self) -> Option<u64> {
        self.pts
    }

    /// Drops any partially read header or frame.
    pub fn reset(&mut self) {
        self.header_len = 0;
        self.frame.clear();
        self.frame_size = 0;
        self.pts = None;
        self.complete = false;
    }

    /// Consumes bytes from `data` toward the next frame, returning how many
    /// were used.
    pub fn feed(&mut self, data: &[u8]) -> (usize, ReadOutcome) {
        if self.complete {
            self.reset();
        }
        let mut used = 0;
        if self.frame_size == 0 {
            let hdr_len = self.kind.frame_header_len();
            let n = (hdr_len - self.header_len).min(data.len());
            self.header[self.header_len..self.header_len + n].copy_from_slice(&data[..n]);
            self.header_len += n;
            used += n;
            if self.header_len < hdr_len {
                return (used, ReadOutcome::NeedMore);
            }
            self.header_len = 0;

            let size = le32(&self.header, 0) as usize;
            if size == 0 || size > self.kind.max_frame_size() {
                return (used, ReadOutcome::Invalid { size });
            }
            self.pts = match self.kind {
                StreamKind::Ivf => {
                    let mut ts = [0u8; 8];
                    ts.copy_from_slice(&self.header[4..12]);
                    Some(u64::from_le_bytes(ts))
                },
                StreamKind::Raw => None,
            };
            self.frame_size = size;
            self.frame.reserve(size);
        }

        let n = (self.frame_size - self.frame.len()).min(data.len() - used);
        self.frame.extend_from_slice(&data[used..used + n]);
        used += n;
        if self.frame.len() == self.frame_size {
            self.complete = true;
            (used, ReadOutcome::Frame)
        } else {
            (used, ReadOutcome::NeedMore)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeVideoDecoder;

    fn ivf_file_header(width: u16, height: u16, num: u32, den: u32) -> Vec<u8> {
        let mut h = Vec::with_capacity(IVF_FILE_HEADER_LEN);
        h.extend_from_slice(IVF_MAGIC);
        h.extend_from_slice(&0u16.to_le_bytes());
        h.extend_from_slice(&32u16.to_le_bytes());
        h.extend_from_slice(&VP8_FOURCC.to_le_bytes());
        h.extend_from_slice(&width.to_le_bytes());
        h.extend_from_slice(&height.to_le_bytes());
        h.extend_from_slice(&num.to_le_bytes());
        h.extend_from_slice(&den.to_le_bytes());
        h.extend_from_slice(&[0; 8]);
        h
    }

    #[test]
    fn test_ivf_timebase_correction() {
        let even = probe_ivf(&ivf_file_header(320, 240, 60, 1)).unwrap();
        assert_eq!(even.kind, StreamKind::Ivf);
        assert_eq!((even.width, even.height), (320, 240));
        assert_eq!(even.fourcc, VP8_FOURCC);
        assert_eq!(even.frame_rate, (30, 1));

        let odd = probe_ivf(&ivf_file_header(320, 240, 25, 1)).unwrap();
        assert_eq!(odd.frame_rate, (25, 2));

        let large = probe_ivf(&ivf_file_header(320, 240, 90000, 1)).unwrap();
        assert_eq!(large.frame_rate, (30, 1));
    }

    #[test]
    fn test_raw_detection_uses_codec_peek() {
        let decoder = FakeVideoDecoder::new(4, 2);
        let mut data =
            vec![20, 0, 0, 0, 0x50, 0x00, 0x00, 0x9d, 0x01, 0x2a, 0x40, 0x01, 0xf0, 0x00];
        data.resize(PROBE_LEN, 0);
        let header = find_stream_info(&data, &decoder).unwrap();
        assert_eq!(header.kind, StreamKind::Raw);
        assert_eq!((header.width, header.height), (320, 240));
        assert_eq!(header.frame_rate, (30, 1));

        assert_eq!(find_stream_info(&[0xFF; PROBE_LEN], &decoder), None);
    }

    #[test]
    fn test_header_split_across_feeds() {
        let mut reader = FrameReader::new(StreamKind::Ivf);
        let mut stream = Vec::new();
        stream.extend_from_slice(&3u32.to_le_bytes());
        stream.extend_from_slice(&7u64.to_le_bytes());
        stream.extend_from_slice(&[1, 2, 3]);

        assert_eq!(reader.feed(&stream[..5]), (5, ReadOutcome::NeedMore));
        assert_eq!(reader.feed(&stream[5..13]), (8, ReadOutcome::NeedMore));
        assert_eq!(reader.feed(&stream[13..]), (2, ReadOutcome::Frame));
        assert_eq!(reader.frame(), &[1, 2, 3]);
        assert_eq!(reader.pts(), Some(7));
    }

    #[test]
    fn test_oversized_frame_leaves_reader_clean() {
        let mut reader = FrameReader::new(StreamKind::Raw);
        let mut stream = Vec::new();
        stream.extend_from_slice(&(300 * 1024u32).to_le_bytes());
        stream.extend_from_slice(&2u32.to_le_bytes());
        stream.extend_from_slice(&[9, 9]);

        assert_eq!(reader.feed(&stream), (4, ReadOutcome::Invalid { size: 300 * 1024 }));
        assert_eq!(reader.filled_len(), 0);
        assert_eq!(reader.feed(&stream[4..]), (6, ReadOutcome::Frame));
        assert_eq!(reader.frame(), &[9, 9]);
    }

    #[test]
    fn test_ivf_allows_large_frames() {
        let mut reader = FrameReader::new(StreamKind::Ivf);
        let mut header = (300 * 1024u32).to_le_bytes().to_vec();
        header.extend_from_slice(&[0; 8]);
        assert_eq!(reader.feed(&header), (12, ReadOutcome::NeedMore));

        let mut reader = FrameReader::new(StreamKind::Ivf);
        let mut header = ((256 * 1024 * 1024 + 1) as u32).to_le_bytes().to_vec();
        header.extend_from_slice(&[0; 8]);
        assert!(matches!(reader.feed(&header).1, ReadOutcome::Invalid { .. }));
    }
}
