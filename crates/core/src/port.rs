// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Ports: typed data endpoints of a component.
//!
//! A port owns its [`PortDefinition`] plus, for codec ports, one
//! codec-specific parameter block. It validates parameter updates, decides
//! tunnel compatibility against a peer definition, and re-derives shared
//! parameters (sample rate, channels) when the port it follows changes.

use smallvec::SmallVec;

use crate::error::{PortKitError, Result};
use crate::params::{
    AacParams, FlacParams, Mp2Params, Mp3Params, OpusParams, Param, ParamIndex, PcmParams,
    VorbisParams, Vp8Params,
};
use crate::types::{
    AudioCoding, ColorFormat, Direction, Encoding, OtherFormat, PortDefinition, PortFormat,
    VideoCoding, VideoFormat,
};

/// Indexes changed as a consequence of slaving.
pub type ChangedIndexes = SmallVec<[ParamIndex; 4]>;

pub trait Port: Send {
    fn definition(&self) -> &PortDefinition;
    fn definition_mut(&mut self) -> &mut PortDefinition;

    fn index(&self) -> u32 {
        self.definition().index
    }

    /// The port whose shared parameters this port follows, if any.
    fn master_port(&self) -> Option<u32> {
        None
    }

    /// # Errors
    ///
    /// `UnsupportedIndex` when this port does not carry `index`.
    fn get_parameter(&self, index: ParamIndex) -> Result<Param>;

    /// Client-facing update, subject to the slave-port check.
    ///
    /// # Errors
    ///
    /// `BadParameter` on invalid values, `UnsupportedIndex` on foreign blocks.
    fn set_parameter(&mut self, param: Param) -> Result<()>;

    /// Runtime-originated update. Same validation, no slave-port check.
    ///
    /// # Errors
    ///
    /// `BadParameter` on invalid values, `UnsupportedIndex` on foreign blocks.
    fn set_parameter_internal(&mut self, param: Param) -> Result<()>;

    fn check_tunnel_compatibility(
        &self,
        this_def: &PortDefinition,
        other_def: &PortDefinition,
    ) -> bool;

    /// Re-derives this port's shared parameters from a block that changed on
    /// a related port, pushing this port's own index to `changed` if anything
    /// moved.
    fn apply_slaving_behaviour(
        &mut self,
        _index: ParamIndex,
        _new_values: &Param,
        _changed: &mut ChangedIndexes,
    ) {
    }
}

type RateChannels = fn(&Param) -> Option<(u32, u32)>;

macro_rules! rate_channels {
    ($variant:ident) => {
        |p: &Param| match p {
            Param::$variant(b) => Some((b.sample_rate, b.channels)),
            _ => None,
        }
    };
}

/// One entry per codec block that carries shared audio parameters.
static SLAVING_TABLE: [(ParamIndex, RateChannels); 11] = [
    (ParamIndex::AudioPcm, rate_channels!(Pcm)),
    (ParamIndex::AudioMp3, rate_channels!(Mp3)),
    (ParamIndex::AudioAac, rate_channels!(Aac)),
    (ParamIndex::AudioVorbis, rate_channels!(Vorbis)),
    (ParamIndex::AudioWma, rate_channels!(Wma)),
    (ParamIndex::AudioRa, rate_channels!(Ra)),
    (ParamIndex::AudioSbc, rate_channels!(Sbc)),
    (ParamIndex::AudioAdpcm, rate_channels!(Adpcm)),
    (ParamIndex::AudioOpus, rate_channels!(Opus)),
    (ParamIndex::AudioFlac, rate_channels!(Flac)),
    (ParamIndex::AudioMp2, rate_channels!(Mp2)),
];

/// Extracts (sample rate, channels) from a block registered under `index`.
pub fn shared_audio_params(index: ParamIndex, param: &Param) -> Option<(u32, u32)> {
    SLAVING_TABLE.iter().find(|(i, _)| *i == index).and_then(|(_, extract)| extract(param))
}

/// Legal sample rates of an audio codec port.
#[derive(Debug, Clone, Copy)]
pub enum RateSet {
    Enumerated(&'static [u32]),
    Range { min: u32, max: u32 },
}

impl RateSet {
    pub fn contains(&self, rate: u32) -> bool {
        match self {
            Self::Enumerated(rates) => rates.contains(&rate),
            Self::Range { min, max } => (*min..=*max).contains(&rate),
        }
    }
}

pub const MPEG_RATES: &[u32] = &[16000, 22050, 24000, 32000, 44100, 48000];
pub const PCM_RATES: &[u32] =
    &[8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 88200, 96000, 176_400, 192_000];
pub const OPUS_RATES: &[u32] = &[8000, 12000, 16000, 24000, 48000];
pub const AAC_RATES: &[u32] =
    &[8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200, 96000];

fn set_definition(def: &mut PortDefinition, new: PortDefinition) -> Result<()> {
    if new.domain() != def.domain() {
        return Err(PortKitError::BadParameter(format!(
            "port {} cannot change domain from {:?} to {:?}",
            def.index,
            def.domain(),
            new.domain()
        )));
    }
    if new.buffer_count_actual < def.buffer_count_min {
        return Err(PortKitError::BadParameter(format!(
            "port {}: buffer count {} below minimum {}",
            def.index, new.buffer_count_actual, def.buffer_count_min
        )));
    }
    if new.buffer_size < def.buffer_size {
        return Err(PortKitError::BadParameter(format!(
            "port {}: buffer size {} below minimum {}",
            def.index, new.buffer_size, def.buffer_size
        )));
    }
    def.buffer_count_actual = new.buffer_count_actual;
    def.buffer_size = new.buffer_size;
    def.format = new.format;
    Ok(())
}

fn unsupported(port: u32, index: ParamIndex) -> PortKitError {
    PortKitError::UnsupportedIndex(format!("port {port} does not handle {index}"))
}

/// Domain and encoding check shared by every port kind.
fn encodings_compatible(
    expected: Encoding,
    this_def: &PortDefinition,
    other_def: &PortDefinition,
) -> bool {
    if this_def.domain() != other_def.domain() {
        tracing::warn!(
            port = this_def.index,
            "Tunnel check: expected domain {:?}, found {:?}",
            this_def.domain(),
            other_def.domain()
        );
        return false;
    }
    let other = other_def.encoding();
    // An unused coding on either side stands for "any format in this domain".
    if other.is_unused() || expected.is_unused() || other == expected {
        tracing::trace!(port = this_def.index, "Tunnel check OK");
        true
    } else {
        tracing::warn!(
            port = this_def.index,
            "Tunnel check: expected encoding {:?}, found {:?}",
            expected,
            other
        );
        false
    }
}

/// An audio port, optionally carrying one codec block.
pub struct AudioPort {
    def: PortDefinition,
    master: Option<u32>,
    coding: AudioCoding,
    rates: RateSet,
    max_channels: u32,
    block: Option<Param>,
}

impl AudioPort {
    fn with_block(
        index: u32,
        direction: Direction,
        buffer_size: usize,
        coding: AudioCoding,
        rates: RateSet,
        max_channels: u32,
        mut block: Param,
    ) -> Self {
        block.set_port_index(index);
        Self {
            def: PortDefinition::new(index, direction, buffer_size, PortFormat::Audio { coding }),
            master: None,
            coding,
            rates,
            max_channels,
            block: Some(block),
        }
    }

    /// A port without a codec block. Its expected encoding follows whatever
    /// coding the definition currently declares.
    pub const fn generic(
        index: u32,
        direction: Direction,
        buffer_size: usize,
        coding: AudioCoding,
    ) -> Self {
        Self {
            def: PortDefinition::new(index, direction, buffer_size, PortFormat::Audio { coding }),
            master: None,
            coding,
            rates: RateSet::Range { min: 1, max: u32::MAX },
            max_channels: 8,
            block: None,
        }
    }

    pub fn pcm(index: u32, direction: Direction, buffer_size: usize, params: PcmParams) -> Self {
        Self::with_block(
            index,
            direction,
            buffer_size,
            AudioCoding::Pcm,
            RateSet::Enumerated(PCM_RATES),
            8,
            Param::Pcm(params),
        )
    }

    pub fn mp3(index: u32, direction: Direction, buffer_size: usize, params: Mp3Params) -> Self {
        Self::with_block(
            index,
            direction,
            buffer_size,
            AudioCoding::Mp3,
            RateSet::Enumerated(MPEG_RATES),
            2,
            Param::Mp3(params),
        )
    }

    pub fn mp2(index: u32, direction: Direction, buffer_size: usize, params: Mp2Params) -> Self {
        Self::with_block(
            index,
            direction,
            buffer_size,
            AudioCoding::Mp2,
            RateSet::Enumerated(MPEG_RATES),
            2,
            Param::Mp2(params),
        )
    }

    pub fn aac(index: u32, direction: Direction, buffer_size: usize, params: AacParams) -> Self {
        Self::with_block(
            index,
            direction,
            buffer_size,
            AudioCoding::Aac,
            RateSet::Enumerated(AAC_RATES),
            8,
            Param::Aac(params),
        )
    }

    pub fn vorbis(
        index: u32,
        direction: Direction,
        buffer_size: usize,
        params: VorbisParams,
    ) -> Self {
        Self::with_block(
            index,
            direction,
            buffer_size,
            AudioCoding::Vorbis,
            RateSet::Range { min: 8000, max: 192_000 },
            8,
            Param::Vorbis(params),
        )
    }

    pub fn opus(index: u32, direction: Direction, buffer_size: usize, params: OpusParams) -> Self {
        Self::with_block(
            index,
            direction,
            buffer_size,
            AudioCoding::Opus,
            RateSet::Enumerated(OPUS_RATES),
            8,
            Param::Opus(params),
        )
    }

    pub fn flac(index: u32, direction: Direction, buffer_size: usize, params: FlacParams) -> Self {
        Self::with_block(
            index,
            direction,
            buffer_size,
            AudioCoding::Flac,
            RateSet::Range { min: 1, max: 655_350 },
            8,
            Param::Flac(params),
        )
    }

    /// Makes this port follow the shared parameters of port `master`.
    #[must_use]
    pub const fn with_master(mut self, master: u32) -> Self {
        self.master = Some(master);
        self
    }

    fn expected_encoding(&self) -> Encoding {
        if self.block.is_some() {
            Encoding::Audio(self.coding)
        } else {
            self.def.encoding()
        }
    }

    fn is_slave(&self) -> bool {
        self.def.direction == Direction::Output && self.master.is_some_and(|m| m != self.def.index)
    }

    fn set_block(&mut self, mut param: Param, check_slave: bool) -> Result<()> {
        let index = param.index();
        let Some(current) = &self.block else {
            return Err(unsupported(self.def.index, index));
        };
        if current.index() != index {
            return Err(unsupported(self.def.index, index));
        }

        if let Some((rate, channels)) = shared_audio_params(index, &param) {
            if !self.rates.contains(rate) {
                return Err(PortKitError::BadParameter(format!(
                    "port {}: sample rate {rate} not supported by {:?}",
                    self.def.index, self.coding
                )));
            }
            if channels == 0 || channels > self.max_channels {
                return Err(PortKitError::BadParameter(format!(
                    "port {}: {channels} channels not supported by {:?}",
                    self.def.index, self.coding
                )));
            }
            if check_slave
                && self.is_slave()
                && shared_audio_params(index, current) != Some((rate, channels))
            {
                tracing::error!(
                    port = self.def.index,
                    "Slave port, cannot update sample rate or number of channels"
                );
                return Err(PortKitError::BadParameter(format!(
                    "port {} is a slave, cannot change rate/channels",
                    self.def.index
                )));
            }
        }

        param.set_port_index(self.def.index);
        self.block = Some(param);
        Ok(())
    }

    fn set(&mut self, param: Param, check_slave: bool) -> Result<()> {
        match param {
            Param::PortDefinition(def) => set_definition(&mut self.def, def),
            other => self.set_block(other, check_slave),
        }
    }
}

impl Port for AudioPort {
    fn definition(&self) -> &PortDefinition {
        &self.def
    }

    fn definition_mut(&mut self) -> &mut PortDefinition {
        &mut self.def
    }

    fn master_port(&self) -> Option<u32> {
        self.master
    }

    fn get_parameter(&self, index: ParamIndex) -> Result<Param> {
        if index == ParamIndex::PortDefinition {
            return Ok(Param::PortDefinition(self.def.clone()));
        }
        match &self.block {
            Some(block) if block.index() == index => Ok(block.clone()),
            _ => Err(unsupported(self.def.index, index)),
        }
    }

    fn set_parameter(&mut self, param: Param) -> Result<()> {
        self.set(param, true)
    }

    fn set_parameter_internal(&mut self, param: Param) -> Result<()> {
        self.set(param, false)
    }

    fn check_tunnel_compatibility(
        &self,
        this_def: &PortDefinition,
        other_def: &PortDefinition,
    ) -> bool {
        encodings_compatible(self.expected_encoding(), this_def, other_def)
    }

    fn apply_slaving_behaviour(
        &mut self,
        index: ParamIndex,
        new_values: &Param,
        changed: &mut ChangedIndexes,
    ) {
        let Some(block) = &mut self.block else {
            return;
        };
        let own_index = block.index();
        let Some(current) = shared_audio_params(own_index, block) else {
            return;
        };
        let Some((rate, channels)) = shared_audio_params(index, new_values) else {
            return;
        };
        if current != (rate, channels) {
            block.set_rate_and_channels(rate, channels);
            changed.push(own_index);
            tracing::trace!(
                port = self.def.index,
                "{index} -> changed {own_index} (rate {rate}, channels {channels})"
            );
        }
    }
}

/// A video port. Compressed ports carry a VP8 block; raw ports declare an
/// unused coding with a planar YUV colour format.
pub struct VideoPort {
    def: PortDefinition,
    block: Option<Param>,
}

impl VideoPort {
    pub fn vp8(index: u32, direction: Direction, buffer_size: usize) -> Self {
        Self {
            def: PortDefinition::new(
                index,
                direction,
                buffer_size,
                PortFormat::Video(VideoFormat::new(VideoCoding::Vp8, ColorFormat::Unused)),
            ),
            block: Some(Param::Vp8(Vp8Params { port_index: index, ..Default::default() })),
        }
    }

    pub const fn yuv420(index: u32, direction: Direction, buffer_size: usize) -> Self {
        Self {
            def: PortDefinition::new(
                index,
                direction,
                buffer_size,
                PortFormat::Video(VideoFormat::new(VideoCoding::Unused, ColorFormat::Yuv420Planar)),
            ),
            block: None,
        }
    }

    fn set(&mut self, param: Param) -> Result<()> {
        match param {
            Param::PortDefinition(def) => {
                if let PortFormat::Video(v) = &def.format {
                    if v.width == 0 || v.height == 0 {
                        return Err(PortKitError::BadParameter(format!(
                            "port {}: invalid frame size {}x{}",
                            self.def.index, v.width, v.height
                        )));
                    }
                }
                set_definition(&mut self.def, def)
            },
            Param::Vp8(mut b) if self.block.is_some() => {
                b.port_index = self.def.index;
                self.block = Some(Param::Vp8(b));
                Ok(())
            },
            other => Err(unsupported(self.def.index, other.index())),
        }
    }
}

impl Port for VideoPort {
    fn definition(&self) -> &PortDefinition {
        &self.def
    }

    fn definition_mut(&mut self) -> &mut PortDefinition {
        &mut self.def
    }

    fn get_parameter(&self, index: ParamIndex) -> Result<Param> {
        if index == ParamIndex::PortDefinition {
            return Ok(Param::PortDefinition(self.def.clone()));
        }
        match &self.block {
            Some(block) if block.index() == index => Ok(block.clone()),
            _ => Err(unsupported(self.def.index, index)),
        }
    }

    fn set_parameter(&mut self, param: Param) -> Result<()> {
        self.set(param)
    }

    fn set_parameter_internal(&mut self, param: Param) -> Result<()> {
        self.set(param)
    }

    fn check_tunnel_compatibility(
        &self,
        this_def: &PortDefinition,
        other_def: &PortDefinition,
    ) -> bool {
        let expected = if self.block.is_some() {
            Encoding::Video(VideoCoding::Vp8)
        } else {
            self.def.encoding()
        };
        encodings_compatible(expected, this_def, other_def)
    }
}

/// A port for bytes outside the audio and video domains, such as
/// container data. It carries no codec block.
pub struct OtherPort {
    def: PortDefinition,
}

impl OtherPort {
    pub const fn new(
        index: u32,
        direction: Direction,
        buffer_size: usize,
        format: OtherFormat,
    ) -> Self {
        let format = PortFormat::Other { format };
        Self { def: PortDefinition::new(index, direction, buffer_size, format) }
    }

    pub const fn binary(index: u32, direction: Direction, buffer_size: usize) -> Self {
        Self::new(index, direction, buffer_size, OtherFormat::Binary)
    }
}

impl Port for OtherPort {
    fn definition(&self) -> &PortDefinition {
        &self.def
    }

    fn definition_mut(&mut self) -> &mut PortDefinition {
        &mut self.def
    }

    fn get_parameter(&self, index: ParamIndex) -> Result<Param> {
        match index {
            ParamIndex::PortDefinition => Ok(Param::PortDefinition(self.def.clone())),
            other => Err(unsupported(self.def.index, other)),
        }
    }

    fn set_parameter(&mut self, param: Param) -> Result<()> {
        self.set_parameter_internal(param)
    }

    fn set_parameter_internal(&mut self, param: Param) -> Result<()> {
        match param {
            Param::PortDefinition(def) => set_definition(&mut self.def, def),
            other => Err(unsupported(self.def.index, other.index())),
        }
    }

    fn check_tunnel_compatibility(
        &self,
        this_def: &PortDefinition,
        other_def: &PortDefinition,
    ) -> bool {
        encodings_compatible(self.def.encoding(), this_def, other_def)
    }
}
