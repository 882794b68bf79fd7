// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Video decoding components.

use portkit_core::Result;

pub mod ivf;
pub mod vp8;

pub use vp8::{register_vp8_decoder, Vp8DecoderConfig, Vp8DecoderProcessor};

/// What a decoder can tell about a stream from a single keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub is_keyframe: bool,
}

/// A decoded I420 picture. Planes are Y, U, V; each row of plane `i`
/// starts `strides[i]` bytes after the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub planes: [Vec<u8>; 3],
    pub strides: [usize; 3],
}

impl DecodedImage {
    /// Visible size of plane `plane` as (row bytes, rows).
    pub const fn plane_size(&self, plane: usize) -> (usize, usize) {
        let (w, h) = (self.width as usize, self.height as usize);
        if plane == 0 {
            (w, h)
        } else {
            (w.div_ceil(2), h.div_ceil(2))
        }
    }

    /// Bytes needed to hold the tightly packed picture.
    pub const fn packed_len(&self) -> usize {
        let (yw, yh) = self.plane_size(0);
        let (cw, ch) = self.plane_size(1);
        yw * yh + 2 * cw * ch
    }
}

/// A frame-level video codec.
pub trait VideoDecoder: Send {
    /// # Errors
    ///
    /// Any error here is reported as `InsufficientResources` by the caller.
    fn init(&mut self) -> Result<()>;

    /// Inspects the start of a frame without decoding it.
    fn peek_stream_info(&self, data: &[u8]) -> Option<StreamInfo>;

    /// Decodes one complete compressed frame. `Ok(None)` means the frame
    /// produced no picture.
    ///
    /// # Errors
    ///
    /// `StreamCorrupt` when the frame cannot be decoded.
    fn decode(&mut self, frame: &[u8]) -> Result<Option<DecodedImage>>;
}
