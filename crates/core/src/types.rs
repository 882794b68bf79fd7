// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types: port directions, domains, codings and port definitions.

use serde::{Deserialize, Serialize};

/// Wildcard port index, used by commands and events that apply to every port.
pub const ALL_PORTS: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    Audio,
    Video,
    Other,
}

/// Audio coding types, including the container-level codings used by
/// sources whose exact stream contents are only known after sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCoding {
    /// No particular coding; compatible with any coding in the audio domain.
    Unused,
    /// Coding to be discovered from live stream bytes.
    AutoDetect,
    Pcm,
    Adpcm,
    Mp3,
    Aac,
    Vorbis,
    Wma,
    Ra,
    Sbc,
    Opus,
    Flac,
    Speex,
    Oga,
    Mp2,
    Mp4,
    Webm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCoding {
    Unused,
    AutoDetect,
    Avc,
    Vp8,
    Vp9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorFormat {
    Unused,
    Yuv420Planar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OtherFormat {
    Unused,
    Binary,
}

/// Concrete encoding of a port, domain included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    Audio(AudioCoding),
    Video(VideoCoding),
    Other(OtherFormat),
}

impl Encoding {
    pub const fn domain(self) -> Domain {
        match self {
            Self::Audio(_) => Domain::Audio,
            Self::Video(_) => Domain::Video,
            Self::Other(_) => Domain::Other,
        }
    }

    /// True for the "unspecified/any" coding of each domain.
    pub const fn is_unused(self) -> bool {
        matches!(
            self,
            Self::Audio(AudioCoding::Unused)
                | Self::Video(VideoCoding::Unused)
                | Self::Other(OtherFormat::Unused)
        )
    }

    pub const fn is_auto_detect(self) -> bool {
        matches!(self, Self::Audio(AudioCoding::AutoDetect) | Self::Video(VideoCoding::AutoDetect))
    }
}

/// Video-domain format fields of a port definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub coding: VideoCoding,
    pub color: ColorFormat,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub slice_height: u32,
    /// Frames per second as a (numerator, denominator) pair.
    pub frame_rate: (u32, u32),
}

impl VideoFormat {
    pub const fn new(coding: VideoCoding, color: ColorFormat) -> Self {
        Self {
            coding,
            color,
            width: 176,
            height: 144,
            stride: 176,
            slice_height: 144,
            frame_rate: (30, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortFormat {
    Audio { coding: AudioCoding },
    Video(VideoFormat),
    Other { format: OtherFormat },
}

impl PortFormat {
    pub const fn domain(&self) -> Domain {
        match self {
            Self::Audio { .. } => Domain::Audio,
            Self::Video(_) => Domain::Video,
            Self::Other { .. } => Domain::Other,
        }
    }

    pub const fn encoding(&self) -> Encoding {
        match self {
            Self::Audio { coding } => Encoding::Audio(*coding),
            Self::Video(v) => Encoding::Video(v.coding),
            Self::Other { format } => Encoding::Other(*format),
        }
    }
}

/// Generic port definition, common to every port regardless of codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub index: u32,
    pub direction: Direction,
    pub enabled: bool,
    pub buffer_count_min: u32,
    pub buffer_count_actual: u32,
    /// Minimum payload size of each buffer, in bytes.
    pub buffer_size: usize,
    pub format: PortFormat,
}

impl PortDefinition {
    pub const fn new(
        index: u32,
        direction: Direction,
        buffer_size: usize,
        format: PortFormat,
    ) -> Self {
        Self {
            index,
            direction,
            enabled: true,
            buffer_count_min: 2,
            buffer_count_actual: 2,
            buffer_size,
            format,
        }
    }

    pub const fn domain(&self) -> Domain {
        self.format.domain()
    }

    pub const fn encoding(&self) -> Encoding {
        self.format.encoding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unused_codings_per_domain() {
        assert!(Encoding::Audio(AudioCoding::Unused).is_unused());
        assert!(Encoding::Video(VideoCoding::Unused).is_unused());
        assert!(!Encoding::Audio(AudioCoding::AutoDetect).is_unused());
        assert!(Encoding::Audio(AudioCoding::AutoDetect).is_auto_detect());
    }

    #[test]
    fn test_definition_domain_follows_format() {
        let def = PortDefinition::new(
            1,
            Direction::Output,
            4096,
            PortFormat::Video(VideoFormat::new(VideoCoding::Vp8, ColorFormat::Unused)),
        );
        assert_eq!(def.domain(), Domain::Video);
        assert_eq!(def.encoding(), Encoding::Video(VideoCoding::Vp8));
    }
}
