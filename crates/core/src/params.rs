// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Parameter index space and parameter blocks.
//!
//! Components expose a get/set surface keyed by [`ParamIndex`]. Standard
//! indexes live in the low range; service-specific structures live in the
//! vendor range starting at [`VENDOR_START`], in a fixed order so the numeric
//! codes stay stable across releases.

use serde::{Deserialize, Serialize};

use crate::types::PortDefinition;

/// First code of the vendor extension range.
pub const VENDOR_START: u32 = 0x7F00_0000;

const STANDARD_START: u32 = 0x0100_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamIndex {
    PortDefinition,
    ContentUri,
    MetadataItem,
    AudioPcm,
    AudioMp3,
    AudioAac,
    AudioVorbis,
    AudioWma,
    AudioRa,
    AudioSbc,
    AudioAdpcm,
    VideoVp8,

    // Vendor range, in code order.
    BufferPreAnnouncementsMode,
    HttpServer,
    IcecastMountpoint,
    IcecastMetadata,
    AudioOpus,
    AudioFlac,
    AudioMp2,
    SpotifySession,
    SpotifyPlaylist,
    GmusicSession,
    GmusicPlaylist,
    PlaylistSkip,
    SoundCloudSession,
    SoundCloudPlaylist,
    DirbleSession,
    DirblePlaylist,
    YoutubeSession,
    YoutubePlaylist,
    DeezerSession,
    DeezerPlaylist,
}

const STANDARD_INDEXES: [ParamIndex; 12] = [
    ParamIndex::PortDefinition,
    ParamIndex::ContentUri,
    ParamIndex::MetadataItem,
    ParamIndex::AudioPcm,
    ParamIndex::AudioMp3,
    ParamIndex::AudioAac,
    ParamIndex::AudioVorbis,
    ParamIndex::AudioWma,
    ParamIndex::AudioRa,
    ParamIndex::AudioSbc,
    ParamIndex::AudioAdpcm,
    ParamIndex::VideoVp8,
];

const VENDOR_INDEXES: [ParamIndex; 20] = [
    ParamIndex::BufferPreAnnouncementsMode,
    ParamIndex::HttpServer,
    ParamIndex::IcecastMountpoint,
    ParamIndex::IcecastMetadata,
    ParamIndex::AudioOpus,
    ParamIndex::AudioFlac,
    ParamIndex::AudioMp2,
    ParamIndex::SpotifySession,
    ParamIndex::SpotifyPlaylist,
    ParamIndex::GmusicSession,
    ParamIndex::GmusicPlaylist,
    ParamIndex::PlaylistSkip,
    ParamIndex::SoundCloudSession,
    ParamIndex::SoundCloudPlaylist,
    ParamIndex::DirbleSession,
    ParamIndex::DirblePlaylist,
    ParamIndex::YoutubeSession,
    ParamIndex::YoutubePlaylist,
    ParamIndex::DeezerSession,
    ParamIndex::DeezerPlaylist,
];

impl ParamIndex {
    /// Numeric code of this index in the extensible index space.
    #[allow(clippy::cast_possible_truncation)]
    pub fn code(self) -> u32 {
        if let Some(pos) = VENDOR_INDEXES.iter().position(|i| *i == self) {
            return VENDOR_START + 1 + pos as u32;
        }
        let pos = STANDARD_INDEXES.iter().position(|i| *i == self).unwrap_or_default();
        STANDARD_START + 1 + pos as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        if code > VENDOR_START {
            VENDOR_INDEXES.get((code - VENDOR_START - 1) as usize).copied()
        } else if code > STANDARD_START {
            STANDARD_INDEXES.get((code - STANDARD_START - 1) as usize).copied()
        } else {
            None
        }
    }

    pub const fn is_vendor(self) -> bool {
        !matches!(
            self,
            Self::PortDefinition
                | Self::ContentUri
                | Self::MetadataItem
                | Self::AudioPcm
                | Self::AudioMp3
                | Self::AudioAac
                | Self::AudioVorbis
                | Self::AudioWma
                | Self::AudioRa
                | Self::AudioSbc
                | Self::AudioAdpcm
                | Self::VideoVp8
        )
    }
}

impl std::fmt::Display for ParamIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}({:#010x})", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMode {
    Stereo,
    JointStereo,
    Dual,
    Mono,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcmParams {
    pub port_index: u32,
    pub channels: u32,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    pub signed: bool,
    pub interleaved: bool,
    pub little_endian: bool,
}

impl Default for PcmParams {
    fn default() -> Self {
        Self {
            port_index: 0,
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            signed: true,
            interleaved: true,
            little_endian: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mp3Params {
    pub port_index: u32,
    pub channels: u32,
    pub bit_rate: u32,
    pub sample_rate: u32,
    pub audio_band_width: u32,
    pub channel_mode: ChannelMode,
}

impl Default for Mp3Params {
    fn default() -> Self {
        Self {
            port_index: 0,
            channels: 2,
            bit_rate: 0,
            sample_rate: 48000,
            audio_band_width: 0,
            channel_mode: ChannelMode::Stereo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AacProfile {
    Lc,
    He,
    HeV2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AacParams {
    pub port_index: u32,
    pub channels: u32,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub frame_length: u32,
    pub profile: AacProfile,
}

impl Default for AacParams {
    fn default() -> Self {
        Self {
            port_index: 0,
            channels: 2,
            sample_rate: 44100,
            bit_rate: 0,
            frame_length: 1024,
            profile: AacProfile::Lc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VorbisParams {
    pub port_index: u32,
    pub channels: u32,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub min_bit_rate: u32,
    pub max_bit_rate: u32,
    pub quality: i32,
}

impl Default for VorbisParams {
    fn default() -> Self {
        Self {
            port_index: 0,
            channels: 2,
            sample_rate: 44100,
            bit_rate: 0,
            min_bit_rate: 0,
            max_bit_rate: 0,
            quality: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WmaParams {
    pub port_index: u32,
    pub channels: u32,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub block_align: u32,
}

impl Default for WmaParams {
    fn default() -> Self {
        Self { port_index: 0, channels: 2, sample_rate: 44100, bit_rate: 0, block_align: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaParams {
    pub port_index: u32,
    pub channels: u32,
    pub sample_rate: u32,
    pub bits_per_frame: u32,
    pub samples_per_frame: u32,
}

impl Default for RaParams {
    fn default() -> Self {
        Self {
            port_index: 0,
            channels: 2,
            sample_rate: 44100,
            bits_per_frame: 0,
            samples_per_frame: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SbcParams {
    pub port_index: u32,
    pub channels: u32,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub blocks: u32,
    pub subbands: u32,
    pub bitpool: u32,
}

impl Default for SbcParams {
    fn default() -> Self {
        Self {
            port_index: 0,
            channels: 2,
            sample_rate: 44100,
            bit_rate: 0,
            blocks: 16,
            subbands: 8,
            bitpool: 53,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdpcmParams {
    pub port_index: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    pub sample_rate: u32,
}

impl Default for AdpcmParams {
    fn default() -> Self {
        Self { port_index: 0, channels: 2, bits_per_sample: 4, sample_rate: 44100 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusParams {
    pub port_index: u32,
    pub channels: u32,
    /// 6-256 kbps per channel.
    pub bit_rate: u32,
    pub sample_rate: u32,
    /// 2.5, 5, 10, 20, 40 or 60 ms; -1 when unknown.
    pub frame_duration: i32,
    pub encoder_complexity: u32,
    pub packet_loss_resilience: bool,
    pub forward_error_correction: bool,
    pub dtx: bool,
}

impl Default for OpusParams {
    fn default() -> Self {
        Self {
            port_index: 0,
            channels: 2,
            bit_rate: 256,
            sample_rate: 48000,
            frame_duration: -1,
            encoder_complexity: 0,
            packet_loss_resilience: false,
            forward_error_correction: false,
            dtx: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlacParams {
    pub port_index: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    pub sample_rate: u32,
    /// 0 (fastest) to 8 (best).
    pub compression_level: u32,
    /// 16 to 65535 samples; 0 lets the encoder choose.
    pub block_size: u32,
    pub total_samples_estimate: u64,
}

impl Default for FlacParams {
    fn default() -> Self {
        Self {
            port_index: 0,
            channels: 2,
            bits_per_sample: 16,
            sample_rate: 44100,
            compression_level: 5,
            block_size: 0,
            total_samples_estimate: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mp2Format {
    Mpeg1,
    Mpeg2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mp2Params {
    pub port_index: u32,
    pub channels: u32,
    pub bit_rate: u32,
    pub sample_rate: u32,
    pub channel_mode: ChannelMode,
    pub format: Mp2Format,
}

impl Default for Mp2Params {
    fn default() -> Self {
        Self {
            port_index: 0,
            channels: 2,
            bit_rate: 0,
            sample_rate: 48000,
            channel_mode: ChannelMode::Stereo,
            format: Mp2Format::Mpeg1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Vp8Params {
    pub port_index: u32,
    pub profile: u32,
    pub dct_partitions: u32,
    pub error_resilient: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServerParams {
    pub listening_port: u32,
    pub max_clients: u32,
}

impl Default for HttpServerParams {
    fn default() -> Self {
        Self { listening_port: 8010, max_clients: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IcecastMountpoint {
    pub port_index: u32,
    pub mount_name: String,
    pub station_name: String,
    pub station_description: String,
    pub station_genre: String,
    pub station_url: String,
    pub metadata_period: u32,
    pub burst_on_connect: bool,
    pub initial_burst_size: u32,
    pub max_clients: u32,
}

/// Streaming services with a session/playlist pair in the vendor range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Spotify,
    Gmusic,
    SoundCloud,
    Dirble,
    Youtube,
    Deezer,
}

impl Service {
    pub const fn session_index(self) -> ParamIndex {
        match self {
            Self::Spotify => ParamIndex::SpotifySession,
            Self::Gmusic => ParamIndex::GmusicSession,
            Self::SoundCloud => ParamIndex::SoundCloudSession,
            Self::Dirble => ParamIndex::DirbleSession,
            Self::Youtube => ParamIndex::YoutubeSession,
            Self::Deezer => ParamIndex::DeezerSession,
        }
    }

    pub const fn playlist_index(self) -> ParamIndex {
        match self {
            Self::Spotify => ParamIndex::SpotifyPlaylist,
            Self::Gmusic => ParamIndex::GmusicPlaylist,
            Self::SoundCloud => ParamIndex::SoundCloudPlaylist,
            Self::Dirble => ParamIndex::DirblePlaylist,
            Self::Youtube => ParamIndex::YoutubePlaylist,
            Self::Deezer => ParamIndex::DeezerPlaylist,
        }
    }
}

/// Credentials for a content provider session.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub user_name: String,
    pub user_password: String,
    pub oauth_token: String,
    pub device_id: String,
    pub api_key: String,
}

// Keep secrets out of logs.
impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("user_name", &self.user_name)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// What a playlist name refers to. Each provider accepts a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistKind {
    #[default]
    Unknown,
    User,
    Tracks,
    Artist,
    Album,
    Station,
    Genre,
    Situation,
    PromotedTracks,
    Podcast,
    Mixes,
    Playlist,
    TopPlaylist,
    Moods,
    UserFlow,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub kind: PlaylistKind,
    pub name: String,
    pub shuffle: bool,
    pub unlimited_search: bool,
}

/// A typed parameter block. The variant determines its [`ParamIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Param {
    PortDefinition(PortDefinition),
    ContentUri(String),
    Pcm(PcmParams),
    Mp3(Mp3Params),
    Aac(AacParams),
    Vorbis(VorbisParams),
    Wma(WmaParams),
    Ra(RaParams),
    Sbc(SbcParams),
    Adpcm(AdpcmParams),
    Opus(OpusParams),
    Flac(FlacParams),
    Mp2(Mp2Params),
    Vp8(Vp8Params),
    BufferPreAnnouncements { port_index: u32, enabled: bool },
    HttpServer(HttpServerParams),
    IcecastMountpoint(IcecastMountpoint),
    IcecastMetadata { port_index: u32, stream_title: String },
    Session(Service, SessionConfig),
    Playlist(Service, PlaylistConfig),
    /// Signed step through the playlist; wrap-around is up to the provider.
    PlaylistSkip(i32),
}

impl Param {
    pub const fn index(&self) -> ParamIndex {
        match self {
            Self::PortDefinition(_) => ParamIndex::PortDefinition,
            Self::ContentUri(_) => ParamIndex::ContentUri,
            Self::Pcm(_) => ParamIndex::AudioPcm,
            Self::Mp3(_) => ParamIndex::AudioMp3,
            Self::Aac(_) => ParamIndex::AudioAac,
            Self::Vorbis(_) => ParamIndex::AudioVorbis,
            Self::Wma(_) => ParamIndex::AudioWma,
            Self::Ra(_) => ParamIndex::AudioRa,
            Self::Sbc(_) => ParamIndex::AudioSbc,
            Self::Adpcm(_) => ParamIndex::AudioAdpcm,
            Self::Opus(_) => ParamIndex::AudioOpus,
            Self::Flac(_) => ParamIndex::AudioFlac,
            Self::Mp2(_) => ParamIndex::AudioMp2,
            Self::Vp8(_) => ParamIndex::VideoVp8,
            Self::BufferPreAnnouncements { .. } => ParamIndex::BufferPreAnnouncementsMode,
            Self::HttpServer(_) => ParamIndex::HttpServer,
            Self::IcecastMountpoint(_) => ParamIndex::IcecastMountpoint,
            Self::IcecastMetadata { .. } => ParamIndex::IcecastMetadata,
            Self::Session(service, _) => service.session_index(),
            Self::Playlist(service, _) => service.playlist_index(),
            Self::PlaylistSkip(_) => ParamIndex::PlaylistSkip,
        }
    }

    /// Overwrites sample rate and channel count on audio codec blocks.
    /// Returns false for blocks that carry neither.
    pub fn set_rate_and_channels(&mut self, rate: u32, channels: u32) -> bool {
        let (r, c) = match self {
            Self::Pcm(b) => (&mut b.sample_rate, &mut b.channels),
            Self::Mp3(b) => (&mut b.sample_rate, &mut b.channels),
            Self::Aac(b) => (&mut b.sample_rate, &mut b.channels),
            Self::Vorbis(b) => (&mut b.sample_rate, &mut b.channels),
            Self::Wma(b) => (&mut b.sample_rate, &mut b.channels),
            Self::Ra(b) => (&mut b.sample_rate, &mut b.channels),
            Self::Sbc(b) => (&mut b.sample_rate, &mut b.channels),
            Self::Adpcm(b) => (&mut b.sample_rate, &mut b.channels),
            Self::Opus(b) => (&mut b.sample_rate, &mut b.channels),
            Self::Flac(b) => (&mut b.sample_rate, &mut b.channels),
            Self::Mp2(b) => (&mut b.sample_rate, &mut b.channels),
            _ => return false,
        };
        *r = rate;
        *c = channels;
        true
    }

    /// Sets the port index carried inside port-scoped blocks.
    pub fn set_port_index(&mut self, index: u32) {
        match self {
            Self::PortDefinition(d) => d.index = index,
            Self::Pcm(b) => b.port_index = index,
            Self::Mp3(b) => b.port_index = index,
            Self::Aac(b) => b.port_index = index,
            Self::Vorbis(b) => b.port_index = index,
            Self::Wma(b) => b.port_index = index,
            Self::Ra(b) => b.port_index = index,
            Self::Sbc(b) => b.port_index = index,
            Self::Adpcm(b) => b.port_index = index,
            Self::Opus(b) => b.port_index = index,
            Self::Flac(b) => b.port_index = index,
            Self::Mp2(b) => b.port_index = index,
            Self::Vp8(b) => b.port_index = index,
            Self::BufferPreAnnouncements { port_index, .. }
            | Self::IcecastMetadata { port_index, .. } => *port_index = index,
            Self::IcecastMountpoint(m) => m.port_index = index,
            Self::ContentUri(_)
            | Self::HttpServer(_)
            | Self::Session(..)
            | Self::Playlist(..)
            | Self::PlaylistSkip(_) => {},
        }
    }
}
