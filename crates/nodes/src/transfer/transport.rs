// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The byte transport behind a [`super::UrlTransfer`].
//!
//! A transport is polled, never awaited: the transfer adapter drains it from
//! its I/O readiness entry point and stops as soon as it reports
//! [`TransportPoll::Pending`].

use bytes::Bytes;
use portkit_core::Result;
use url::Url;

/// One step of transport progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPoll {
    /// One protocol header line, e.g. `Content-Type: audio/mpeg`.
    Header(Bytes),
    /// A chunk of payload bytes.
    Data(Bytes),
    /// Nothing available right now.
    Pending,
    /// The response body ended normally.
    Finished,
    /// The connection dropped before the body ended.
    Lost(String),
}

pub trait Transport: Send {
    /// Opens `url`, replacing any previous connection.
    ///
    /// # Errors
    ///
    /// `Network` when the request cannot be issued.
    fn open(&mut self, url: &Url) -> Result<()>;

    fn poll(&mut self) -> TransportPoll;

    /// Drops the current connection, if any. Idempotent.
    fn close(&mut self);
}
