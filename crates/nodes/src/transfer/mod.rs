// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! URL transfer adapter.
//!
//! [`UrlTransfer`] bridges a polled byte [`Transport`] to the synchronous
//! buffer-ready calls of a processor. Incoming payload lands in an internal
//! cache first. Once the cache reaches its pre-buffering depth, bytes are
//! staged into headers pulled from the processor through
//! [`TransferCallbacks::buffer_emptied`] and handed back with
//! [`TransferCallbacks::buffer_filled`] once full.
//!
//! ```text
//!   Idle ──start──▶ Connecting ──first bytes──▶ Transferring ⇄ Paused
//!     ▲                 ▲  │                         │
//!     │      reconnect  │  └──────── cancel ─────────┴──▶ Cancelled
//!     └──── drained ────┴────────── lost ────────────┘
//! ```
//!
//! The adapter never decides whether to reconnect: on connection loss it asks
//! the processor via [`TransferCallbacks::connection_lost`].

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};
use portkit_core::{BufferHeader, Kernel, PortKitError, Result};
use url::Url;

#[cfg(feature = "http")]
pub mod http;
pub mod transport;

pub use transport::{Transport, TransportPoll};

/// Builds a fresh transport for each allocated transfer.
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// The transport used when a component is not given one explicitly.
#[cfg(feature = "http")]
pub fn default_transport_factory() -> TransportFactory {
    Arc::new(|| Box::new(http::HttpTransport::new()))
}

/// Cache depth for a stream of `bitrate_kbps` buffered for `seconds`.
pub const fn cache_bytes(bitrate_kbps: u32, seconds: u32) -> usize {
    (bitrate_kbps as usize) * 1000 / 8 * (seconds as usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Connecting,
    Transferring,
    Paused,
    Cancelled,
}

/// What the adapter needs from the processor that owns it.
///
/// Implemented by a short-lived view over the processor's session state and
/// the kernel, built for the duration of one entry point.
pub trait TransferCallbacks {
    /// Kernel access for the I/O and timer watchers.
    fn kernel(&mut self) -> &mut dyn Kernel;

    /// Returns the header to stage bytes into, claiming one if needed.
    /// `None` when the port is disabled or no header is available.
    fn buffer_emptied(&mut self) -> Option<&mut BufferHeader>;

    /// The header returned by the last `buffer_emptied` is ready to go.
    fn buffer_filled(&mut self);

    /// One protocol header line.
    fn header_available(&mut self, header: &[u8]);

    /// Payload arrived. Returning true pauses the transfer before any of these
    /// bytes are staged.
    fn data_available(&mut self, data: &[u8]) -> bool;

    /// The connection dropped. Returning true schedules a reconnect.
    fn connection_lost(&mut self) -> bool;
}

pub struct UrlTransfer {
    component: String,
    url: Url,
    transport: Box<dyn Transport>,
    state: TransferState,
    cache: BytesMut,
    cache_size: usize,
    active_cache_size: usize,
    min_buffer_size: usize,
    reconnect_timeout: Duration,
    prebuffered: bool,
    stream_ended: bool,
    got_response: bool,
    reconnect_pending: bool,
    io_active: bool,
    bytes_received: Counter<u64>,
    metric_labels: [KeyValue; 1],
}

/// Parses a content URI into a [`Url`].
///
/// # Errors
///
/// `ContentUri` when `uri` is not a valid absolute URL.
pub fn parse_uri(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|e| PortKitError::ContentUri(format!("invalid URI '{uri}': {e}")))
}

impl UrlTransfer {
    /// # Errors
    ///
    /// `ContentUri` when `uri` does not parse.
    pub fn init(
        component: &str,
        uri: &str,
        min_buffer_size: usize,
        reconnect_timeout: Duration,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let url = parse_uri(uri)?;
        let meter = global::meter("portkit_nodes");
        let bytes_received = meter
            .u64_counter("transfer.bytes_received")
            .with_description("Payload bytes received by URL transfers")
            .build();
        tracing::debug!(
            component,
            %url,
            min_buffer_size,
            ?reconnect_timeout,
            "Transfer initialized"
        );
        Ok(Self {
            component: component.to_string(),
            url,
            transport,
            state: TransferState::Idle,
            cache: BytesMut::new(),
            cache_size: 0,
            active_cache_size: 0,
            min_buffer_size,
            reconnect_timeout,
            prebuffered: true,
            stream_ended: false,
            got_response: false,
            reconnect_pending: false,
            io_active: false,
            bytes_received,
            metric_labels: [KeyValue::new("component", component.to_string())],
        })
    }

    pub const fn state(&self) -> TransferState {
        self.state
    }

    pub const fn url(&self) -> &Url {
        &self.url
    }

    pub fn cached_bytes(&self) -> usize {
        self.cache.len()
    }

    /// Opens the current URI from scratch, discarding cached bytes.
    ///
    /// # Errors
    ///
    /// `Network` when the transport cannot open the URI.
    pub fn start(&mut self, cb: &mut dyn TransferCallbacks) -> Result<()> {
        self.transport.close();
        cb.kernel().timer_watcher_stop();
        self.cache.clear();
        self.active_cache_size = self.cache_size;
        self.prebuffered = self.active_cache_size == 0;
        self.stream_ended = false;
        self.got_response = false;
        self.reconnect_pending = false;

        if let Err(e) = self.transport.open(&self.url) {
            tracing::error!(
                component = %self.component,
                url = %self.url,
                error = %e,
                "Transfer failed to start"
            );
            self.state = TransferState::Idle;
            self.set_io(cb, false);
            return Err(e);
        }
        self.state = TransferState::Connecting;
        self.set_io(cb, true);
        tracing::info!(
            component = %self.component,
            url = %self.url,
            cache_size = self.active_cache_size,
            "Transfer started"
        );
        Ok(())
    }

    pub fn pause(&mut self, cb: &mut dyn TransferCallbacks) {
        if matches!(self.state, TransferState::Connecting | TransferState::Transferring) {
            self.state = TransferState::Paused;
            self.set_io(cb, false);
            if self.reconnect_pending {
                cb.kernel().timer_watcher_stop();
            }
            tracing::debug!(
                component = %self.component,
                cached = self.cache.len(),
                "Transfer paused"
            );
        }
    }

    /// # Errors
    ///
    /// Currently infallible; kept fallible for parity with the other entry points.
    pub fn unpause(&mut self, cb: &mut dyn TransferCallbacks) -> Result<()> {
        if self.state != TransferState::Paused {
            return Ok(());
        }
        self.state =
            if self.got_response { TransferState::Transferring } else { TransferState::Connecting };
        tracing::debug!(component = %self.component, state = ?self.state, "Transfer unpaused");
        if self.reconnect_pending {
            cb.kernel().timer_watcher_start(self.reconnect_timeout);
            return Ok(());
        }
        if !self.stream_ended {
            self.set_io(cb, true);
        }
        self.deliver(cb);
        Ok(())
    }

    /// Halts the current download. Cached bytes are kept until the next
    /// [`UrlTransfer::start`] or [`UrlTransfer::flush_buffer`].
    pub fn cancel(&mut self, cb: &mut dyn TransferCallbacks) {
        self.transport.close();
        self.set_io(cb, false);
        if self.reconnect_pending {
            cb.kernel().timer_watcher_stop();
            self.reconnect_pending = false;
        }
        self.stream_ended = false;
        self.state = TransferState::Cancelled;
        tracing::debug!(component = %self.component, "Transfer cancelled");
    }

    pub fn flush_buffer(&mut self) {
        self.cache.clear();
    }

    /// Takes effect on the next [`UrlTransfer::start`].
    pub const fn set_internal_buffer_size(&mut self, bytes: usize) {
        self.cache_size = bytes;
    }

    /// Re-points the adapter at `uri`, halting any download in flight.
    ///
    /// # Errors
    ///
    /// `ContentUri` when `uri` does not parse; the current URI is kept.
    pub fn set_uri(&mut self, uri: &str, cb: &mut dyn TransferCallbacks) -> Result<()> {
        let url = parse_uri(uri)?;
        if matches!(
            self.state,
            TransferState::Connecting | TransferState::Transferring | TransferState::Paused
        ) {
            self.cancel(cb);
        }
        self.url = url;
        Ok(())
    }

    /// Headers became available downstream.
    ///
    /// # Errors
    ///
    /// `Network` when a deferred start fails to open the URI.
    pub fn on_buffers_ready(&mut self, cb: &mut dyn TransferCallbacks) -> Result<()> {
        match self.state {
            TransferState::Cancelled => self.start(cb),
            TransferState::Connecting | TransferState::Transferring => {
                self.deliver(cb);
                if !self.io_active
                    && !self.stream_ended
                    && !self.reconnect_pending
                    && self.cache.len() <= self.high_water_mark()
                {
                    tracing::trace!(component = %self.component, "Resuming reads");
                    self.set_io(cb, true);
                }
                Ok(())
            },
            TransferState::Idle | TransferState::Paused => Ok(()),
        }
    }

    /// Drains the transport until it has nothing more to offer.
    ///
    /// # Errors
    ///
    /// Currently infallible; transport failures go through `connection_lost`.
    pub fn on_io_ready(&mut self, cb: &mut dyn TransferCallbacks) -> Result<()> {
        if !matches!(self.state, TransferState::Connecting | TransferState::Transferring) {
            return Ok(());
        }
        loop {
            match self.transport.poll() {
                TransportPoll::Header(line) => {
                    self.got_response = true;
                    self.state = TransferState::Transferring;
                    cb.header_available(&line);
                },
                TransportPoll::Data(chunk) => {
                    self.got_response = true;
                    self.state = TransferState::Transferring;
                    self.bytes_received.add(chunk.len() as u64, &self.metric_labels);
                    let pause_needed = cb.data_available(&chunk);
                    self.cache.extend_from_slice(&chunk);
                    if pause_needed {
                        self.pause(cb);
                        return Ok(());
                    }
                    if self.cache.len() > self.high_water_mark() {
                        self.deliver(cb);
                        if self.cache.len() > self.high_water_mark() {
                            tracing::debug!(
                                component = %self.component,
                                cached = self.cache.len(),
                                "Cache full, holding reads"
                            );
                            self.set_io(cb, false);
                            return Ok(());
                        }
                    }
                },
                TransportPoll::Pending => break,
                TransportPoll::Finished => {
                    tracing::info!(
                        component = %self.component,
                        url = %self.url,
                        "Transfer finished"
                    );
                    self.end_of_stream(cb);
                    break;
                },
                TransportPoll::Lost(reason) => {
                    tracing::warn!(
                        component = %self.component,
                        url = %self.url,
                        %reason,
                        "Connection lost"
                    );
                    self.transport.close();
                    if cb.connection_lost() {
                        self.reconnect_pending = true;
                        self.state = TransferState::Connecting;
                        self.set_io(cb, false);
                        cb.kernel().timer_watcher_start(self.reconnect_timeout);
                        return Ok(());
                    }
                    self.end_of_stream(cb);
                    break;
                },
            }
        }
        self.deliver(cb);
        Ok(())
    }

    /// Fires the reconnect attempt armed by a lost connection.
    ///
    /// # Errors
    ///
    /// Currently infallible; failed attempts re-arm the timer.
    pub fn on_timer_ready(&mut self, cb: &mut dyn TransferCallbacks) -> Result<()> {
        if !self.reconnect_pending || self.state != TransferState::Connecting {
            return Ok(());
        }
        self.reconnect_pending = false;
        match self.transport.open(&self.url) {
            Ok(()) => {
                tracing::info!(component = %self.component, url = %self.url, "Reconnecting");
                self.got_response = false;
                self.set_io(cb, true);
            },
            Err(e) => {
                tracing::warn!(
                    component = %self.component,
                    error = %e,
                    "Reconnect failed, retrying"
                );
                self.reconnect_pending = true;
                cb.kernel().timer_watcher_restart();
            },
        }
        Ok(())
    }

    fn high_water_mark(&self) -> usize {
        self.active_cache_size + self.min_buffer_size
    }

    fn end_of_stream(&mut self, cb: &mut dyn TransferCallbacks) {
        self.transport.close();
        self.stream_ended = true;
        self.state = TransferState::Transferring;
        self.set_io(cb, false);
    }

    fn set_io(&mut self, cb: &mut dyn TransferCallbacks, on: bool) {
        if on == self.io_active {
            return;
        }
        if on {
            cb.kernel().io_watcher_start();
        } else {
            cb.kernel().io_watcher_stop();
        }
        self.io_active = on;
    }

    /// Moves cached bytes into headers, honouring the pre-buffering depth.
    fn deliver(&mut self, cb: &mut dyn TransferCallbacks) {
        if self.state != TransferState::Transferring {
            return;
        }
        if !self.prebuffered {
            if self.cache.len() < self.active_cache_size && !self.stream_ended {
                return;
            }
            tracing::debug!(
                component = %self.component,
                cached = self.cache.len(),
                "Pre-buffering complete"
            );
            self.prebuffered = true;
        }

        while !self.cache.is_empty() {
            let Some(hdr) = cb.buffer_emptied() else {
                return;
            };
            let n = hdr.append(&self.cache);
            let full = hdr.is_full();
            self.cache.advance(n);
            if full {
                cb.buffer_filled();
            } else {
                break;
            }
        }

        if self.stream_ended && self.cache.is_empty() && cb.buffer_emptied().is_some() {
            // Last header goes out even if partially filled or empty.
            cb.buffer_filled();
            self.state = TransferState::Idle;
            tracing::info!(component = %self.component, "Transfer drained");
        }
    }
}

impl Drop for UrlTransfer {
    fn drop(&mut self) {
        self.transport.close();
    }
}
