// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Playback configuration for a streaming service graph, and the fixed
//! component list each service runs with.

use portkit_core::params::{PlaylistConfig, Service, SessionConfig};
use portkit_core::types::AudioCoding;
use portkit_core::{ParamIndex, PortKitError, Result};
use portkit_nodes::sources::provider::FLAVOURS;
use serde::Deserialize;

use crate::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

pub const SOURCE_COMPONENT: &str = "portkit.audio_source.http";
pub const RENDERER_ROLE: &str = "audio_renderer.pcm";

const fn default_bitrate_kbps() -> u32 {
    320
}

const fn default_cache_seconds() -> u32 {
    10
}

const fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

const fn default_channels() -> u32 {
    DEFAULT_CHANNELS
}

/// What to play and how the graph around the source is set up.
#[derive(Deserialize, Debug, Clone)]
pub struct ServiceConfig {
    pub service: Service,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub playlist: PlaylistConfig,
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,
    #[serde(default = "default_cache_seconds")]
    pub cache_seconds: u32,
    /// Extra source params (catalog, buffer sizes). Bitrate and cache
    /// settings above take precedence.
    #[serde(default)]
    pub source: Option<serde_json::Value>,
    #[serde(default)]
    pub decoder: Option<serde_json::Value>,
    #[serde(default)]
    pub renderer: Option<serde_json::Value>,
    /// Rate and channels assumed until the decoder reports the real ones.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Headers per tunnel; ports may ask for more.
    #[serde(default)]
    pub buffer_count: Option<u32>,
}

impl ServiceConfig {
    pub fn new(service: Service, session: SessionConfig, playlist: PlaylistConfig) -> Self {
        Self {
            service,
            session,
            playlist,
            bitrate_kbps: default_bitrate_kbps(),
            cache_seconds: default_cache_seconds(),
            source: None,
            decoder: None,
            renderer: None,
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            buffer_count: None,
        }
    }

    /// # Errors
    ///
    /// `Configuration` when the document does not describe a service config.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_saphyr::from_str(yaml)
            .map_err(|e| PortKitError::Configuration(format!("invalid service config: {e}")))
    }

    /// Role the HTTP source runs under for this service.
    ///
    /// # Errors
    ///
    /// `Configuration` for services without an HTTP source flavour.
    pub fn source_role(&self) -> Result<&'static str> {
        FLAVOURS
            .iter()
            .find(|f| f.service == self.service)
            .map(|f| f.role)
            .ok_or_else(|| {
                PortKitError::Configuration(format!("no HTTP source for {:?}", self.service))
            })
    }

    /// Source params with the bitrate and cache settings merged in.
    pub fn source_params(&self) -> serde_json::Value {
        let mut params = match &self.source {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        params.insert("bitrate_kbps".to_string(), self.bitrate_kbps.into());
        params.insert("cache_seconds".to_string(), self.cache_seconds.into());
        serde_json::Value::Object(params)
    }
}

/// Decoder role for a detected coding.
pub const fn decoder_role(coding: AudioCoding) -> Option<&'static str> {
    match coding {
        AudioCoding::Mp3 => Some("audio_decoder.mp3"),
        AudioCoding::Aac => Some("audio_decoder.aac"),
        AudioCoding::Vorbis => Some("audio_decoder.vorbis"),
        AudioCoding::Opus => Some("audio_decoder.opus"),
        AudioCoding::Flac => Some("audio_decoder.flac"),
        AudioCoding::Mp2 => Some("audio_decoder.mp2"),
        _ => None,
    }
}

/// Codec block carried by a decoder input port for `coding`.
pub const fn codec_index(coding: AudioCoding) -> Option<ParamIndex> {
    match coding {
        AudioCoding::Mp3 => Some(ParamIndex::AudioMp3),
        AudioCoding::Aac => Some(ParamIndex::AudioAac),
        AudioCoding::Vorbis => Some(ParamIndex::AudioVorbis),
        AudioCoding::Opus => Some(ParamIndex::AudioOpus),
        AudioCoding::Flac => Some(ParamIndex::AudioFlac),
        AudioCoding::Mp2 => Some(ParamIndex::AudioMp2),
        AudioCoding::Pcm => Some(ParamIndex::AudioPcm),
        _ => None,
    }
}
