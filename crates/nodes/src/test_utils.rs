// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Test doubles for processor testing.
//!
//! Everything here records what it was asked to do so tests can assert on it
//! after driving a processor through its entry points.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use portkit_core::{
    BufferHeader, ComponentEvent, Kernel, Param, ParamIndex, PortKitError, ReadyPorts, Result,
};
use url::Url;

use crate::audio::decoder::{AudioDecoder, PcmChunk};
use crate::audio::renderer::{PcmFormat, PcmSink};
use crate::sources::provider::{ContentProvider, TrackInfo};
use crate::transfer::{Transport, TransportPoll};
use crate::video::{DecodedImage, StreamInfo, VideoDecoder};

/// In-memory kernel with per-port header queues.
pub struct MockKernel {
    name: String,
    queues: HashMap<u32, VecDeque<BufferHeader>>,
    next_id: u64,
    params: HashMap<(u32, ParamIndex), Param>,
    configs: HashMap<ParamIndex, Param>,
    pub events: Vec<ComponentEvent>,
    pub released: Vec<(u32, BufferHeader)>,
    pub metadata: Vec<(String, String)>,
    pub io_active: bool,
    pub timer: Option<Duration>,
    pub timer_restarts: u32,
}

impl MockKernel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queues: HashMap::new(),
            next_id: 1,
            params: HashMap::new(),
            configs: HashMap::new(),
            events: Vec::new(),
            released: Vec::new(),
            metadata: Vec::new(),
            io_active: false,
            timer: None,
            timer_restarts: 0,
        }
    }

    /// Queues `count` empty headers of `size` bytes on `port`.
    pub fn offer(&mut self, port: u32, count: usize, size: usize) {
        for _ in 0..count {
            let hdr = BufferHeader::new(self.next_id, size);
            self.next_id += 1;
            self.queues.entry(port).or_default().push_back(hdr);
        }
    }

    /// Queues a header carrying `payload` on `port`.
    pub fn offer_payload(&mut self, port: u32, payload: &[u8]) {
        let mut hdr = BufferHeader::new(self.next_id, payload.len().max(1));
        self.next_id += 1;
        hdr.append(payload);
        self.offer_header(port, hdr);
    }

    pub fn offer_header(&mut self, port: u32, header: BufferHeader) {
        self.queues.entry(port).or_default().push_back(header);
    }

    pub fn queued(&self, port: u32) -> usize {
        self.queues.get(&port).map_or(0, VecDeque::len)
    }

    #[must_use]
    pub fn with_param(mut self, port: u32, mut param: Param) -> Self {
        param.set_port_index(port);
        self.params.insert((port, param.index()), param);
        self
    }

    #[must_use]
    pub fn with_config(mut self, param: Param) -> Self {
        self.configs.insert(param.index(), param);
        self
    }

    pub fn set_config(&mut self, param: Param) {
        self.configs.insert(param.index(), param);
    }

    pub fn param(&self, port: u32, index: ParamIndex) -> Option<&Param> {
        self.params.get(&(port, index))
    }

    /// Concatenated payloads of every header released on `port`.
    pub fn released_payload(&self, port: u32) -> Vec<u8> {
        self.released
            .iter()
            .filter(|(p, _)| *p == port)
            .flat_map(|(_, hdr)| hdr.payload().to_vec())
            .collect()
    }

    pub fn take_released(&mut self, port: u32) -> Vec<BufferHeader> {
        let (taken, kept) =
            std::mem::take(&mut self.released).into_iter().partition(|(p, _)| *p == port);
        self.released = kept;
        taken.into_iter().map(|(_, hdr)| hdr).collect()
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

impl Kernel for MockKernel {
    fn component_name(&self) -> &str {
        &self.name
    }

    fn claim_buffer(&mut self, port: u32) -> Result<Option<BufferHeader>> {
        Ok(self.queues.get_mut(&port).and_then(VecDeque::pop_front))
    }

    fn release_buffer(&mut self, port: u32, header: BufferHeader) -> Result<()> {
        self.released.push((port, header));
        Ok(())
    }

    fn select(&self, nports: u32) -> ReadyPorts {
        (0..nports).filter(|p| self.queued(*p) > 0).collect()
    }

    fn get_parameter(&self, port: u32, index: ParamIndex) -> Result<Param> {
        self.params
            .get(&(port, index))
            .cloned()
            .ok_or_else(|| PortKitError::UnsupportedIndex(format!("{index} on port {port}")))
    }

    fn set_parameter_internal(&mut self, port: u32, mut param: Param) -> Result<()> {
        param.set_port_index(port);
        self.params.insert((port, param.index()), param);
        Ok(())
    }

    fn get_config(&self, index: ParamIndex) -> Result<Param> {
        self.configs
            .get(&index)
            .cloned()
            .ok_or_else(|| PortKitError::UnsupportedIndex(index.to_string()))
    }

    fn issue_event(&mut self, event: ComponentEvent) {
        self.events.push(event);
    }

    fn clear_metadata(&mut self) {
        self.metadata.clear();
    }

    fn store_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.metadata.push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn io_watcher_start(&mut self) {
        self.io_active = true;
    }

    fn io_watcher_stop(&mut self) {
        self.io_active = false;
    }

    fn timer_watcher_start(&mut self, after: Duration) {
        self.timer = Some(after);
    }

    fn timer_watcher_stop(&mut self) {
        self.timer = None;
    }

    fn timer_watcher_restart(&mut self) {
        self.timer_restarts += 1;
    }
}

#[derive(Default)]
struct Script {
    pending: VecDeque<TransportPoll>,
    opened: Vec<Url>,
    open: bool,
    close_count: usize,
    fail_next_open: bool,
}

/// Transport that replays pushed events. Clones share the same script, so a
/// test keeps one handle while the adapter owns another.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: TransportPoll) {
        self.lock().pending.push_back(event);
    }

    pub fn push_header(&self, line: &str) {
        self.push(TransportPoll::Header(Bytes::copy_from_slice(line.as_bytes())));
    }

    pub fn push_data(&self, data: &[u8]) {
        self.push(TransportPoll::Data(Bytes::copy_from_slice(data)));
    }

    pub fn push_finished(&self) {
        self.push(TransportPoll::Finished);
    }

    pub fn push_lost(&self, reason: &str) {
        self.push(TransportPoll::Lost(reason.to_string()));
    }

    pub fn opened(&self) -> Vec<Url> {
        self.lock().opened.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn fail_next_open(&self) {
        self.lock().fail_next_open = true;
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self, url: &Url) -> Result<()> {
        let mut script = self.lock();
        if std::mem::take(&mut script.fail_next_open) {
            return Err(PortKitError::Network(format!("connection refused: {url}")));
        }
        script.opened.push(url.clone());
        script.open = true;
        Ok(())
    }

    fn poll(&mut self) -> TransportPoll {
        let mut script = self.lock();
        if !script.open {
            return TransportPoll::Pending;
        }
        script.pending.pop_front().unwrap_or(TransportPoll::Pending)
    }

    fn close(&mut self) {
        let mut script = self.lock();
        script.open = false;
        script.close_count += 1;
    }
}

/// Provider over a fixed URL list, with optional failure injection.
#[derive(Debug, Default)]
pub struct FakeProvider {
    urls: Vec<String>,
    pos: Option<usize>,
    pub fail_init: bool,
    pub fail_enqueue: bool,
    pub shuffle: Option<bool>,
    pub enqueued: Vec<(portkit_core::params::PlaylistKind, String)>,
}

impl FakeProvider {
    pub fn new(urls: &[&str]) -> Self {
        Self { urls: urls.iter().map(ToString::to_string).collect(), ..Default::default() }
    }
}

impl ContentProvider for FakeProvider {
    fn init(&mut self, _session: &portkit_core::params::SessionConfig) -> Result<()> {
        if self.fail_init {
            return Err(PortKitError::Network("login rejected".to_string()));
        }
        Ok(())
    }

    fn set_playback_mode(&mut self, shuffle: bool) {
        self.shuffle = Some(shuffle);
    }

    fn enqueue(
        &mut self,
        kind: portkit_core::params::PlaylistKind,
        name: &str,
        _unlimited_search: bool,
    ) -> Result<()> {
        if self.fail_enqueue {
            return Err(PortKitError::Network(format!("playlist '{name}' not found")));
        }
        self.enqueued.push((kind, name.to_string()));
        Ok(())
    }

    fn next_url(&mut self) -> Option<String> {
        if self.urls.is_empty() {
            return None;
        }
        let next = self.pos.map_or(0, |p| (p + 1) % self.urls.len());
        self.pos = Some(next);
        self.urls.get(next).cloned()
    }

    fn prev_url(&mut self) -> Option<String> {
        if self.urls.is_empty() {
            return None;
        }
        let len = self.urls.len();
        let prev = self.pos.map_or(len - 1, |p| (p + len - 1) % len);
        self.pos = Some(prev);
        self.urls.get(prev).cloned()
    }

    fn current_track(&self) -> Option<TrackInfo> {
        let pos = self.pos?;
        Some(TrackInfo {
            artist: format!("Artist {pos}"),
            title: format!("Title {pos}"),
            album: "Album".to_string(),
            year: if pos == 0 { "0".to_string() } else { "1999".to_string() },
            duration: "3:30".to_string(),
            track_number: (pos + 1).to_string(),
            total_tracks: self.urls.len().to_string(),
        })
    }
}

/// Video decoder producing flat-colour I420 frames of a fixed size.
///
/// A frame is accepted when its first byte is non-zero; a leading zero byte
/// makes `decode` fail as corrupt.
#[derive(Debug)]
pub struct FakeVideoDecoder {
    pub width: u32,
    pub height: u32,
    pub fail_init: bool,
    pub decoded: Vec<Vec<u8>>,
}

impl FakeVideoDecoder {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height, fail_init: false, decoded: Vec::new() }
    }
}

impl VideoDecoder for FakeVideoDecoder {
    fn init(&mut self) -> Result<()> {
        if self.fail_init {
            return Err(PortKitError::Runtime("codec unavailable".to_string()));
        }
        Ok(())
    }

    fn peek_stream_info(&self, data: &[u8]) -> Option<StreamInfo> {
        crate::video::vp8::peek_keyframe_info(data)
    }

    fn decode(&mut self, frame: &[u8]) -> Result<Option<DecodedImage>> {
        if frame.first().copied().unwrap_or(0) == 0 {
            return Err(PortKitError::StreamCorrupt {
                reason: "bad frame".to_string(),
                fatal: false,
            });
        }
        self.decoded.push(frame.to_vec());
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        Ok(Some(DecodedImage {
            width: self.width,
            height: self.height,
            planes: [vec![0x10; w * h], vec![0x80; cw * ch], vec![0xF0; cw * ch]],
            strides: [w, cw, cw],
        }))
    }
}

/// Audio decoder that treats every input byte as one 16-bit sample.
#[derive(Debug)]
pub struct FakeAudioDecoder {
    pub sample_rate: u32,
    pub channels: u32,
    pub fail_init: bool,
    input: Vec<u8>,
}

impl FakeAudioDecoder {
    pub const fn new(sample_rate: u32, channels: u32) -> Self {
        Self { sample_rate, channels, fail_init: false, input: Vec::new() }
    }
}

impl AudioDecoder for FakeAudioDecoder {
    fn init(&mut self) -> Result<()> {
        if self.fail_init {
            return Err(PortKitError::Runtime("codec unavailable".to_string()));
        }
        Ok(())
    }

    fn push(&mut self, data: &[u8]) {
        self.input.extend_from_slice(data);
    }

    fn decode_next(&mut self) -> Result<Option<PcmChunk>> {
        if self.input.is_empty() {
            return Ok(None);
        }
        let samples = self.input.drain(..).map(i16::from).collect();
        Ok(Some(PcmChunk { sample_rate: self.sample_rate, channels: self.channels, samples }))
    }

    fn reset(&mut self) {
        self.input.clear();
    }
}

#[derive(Debug, Default)]
struct Recording {
    format: Option<PcmFormat>,
    bytes: Vec<u8>,
    drained: usize,
    closed: bool,
}

/// Sink that records everything written to it. Clones share the recording.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    recording: Arc<Mutex<Recording>>,
    pub fail_open: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn format(&self) -> Option<PcmFormat> {
        self.lock().format
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.lock().bytes.clone()
    }

    pub fn drained(&self) -> usize {
        self.lock().drained
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl PcmSink for RecordingSink {
    fn open(&mut self, format: PcmFormat) -> Result<()> {
        if self.fail_open {
            return Err(PortKitError::Runtime("no audio device".to_string()));
        }
        let mut rec = self.lock();
        rec.format = Some(format);
        rec.closed = false;
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.lock().bytes.extend_from_slice(pcm);
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.lock().drained += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }
}
