// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Protocol header line parsing for streaming sources.

use portkit_core::types::AudioCoding;

/// Header names at or above this length are ignored.
const MAX_NAME_LEN: usize = 64;

const MP3_CONTENT_TYPES: [&str; 3] = ["audio/mpeg", "audio/mpg", "audio/mp3"];

/// Splits `Name: value` at the first colon, stripping control and space
/// bytes around the value.
pub fn split_header(line: &[u8]) -> Option<(&str, &str)> {
    let colon = line.iter().position(|b| *b == b':')?;
    if colon >= MAX_NAME_LEN {
        return None;
    }
    let name = std::str::from_utf8(&line[..colon]).ok()?;
    let mut value = &line[colon + 1..];
    while let [first, rest @ ..] = value {
        if *first > 0x20 {
            break;
        }
        value = rest;
    }
    while let [rest @ .., last] = value {
        if *last > 0x20 {
            break;
        }
        value = rest;
    }
    Some((name, std::str::from_utf8(value).ok()?))
}

pub fn coding_from_content_type(value: &str) -> AudioCoding {
    if MP3_CONTENT_TYPES.iter().any(|t| value.starts_with(t)) {
        AudioCoding::Mp3
    } else {
        AudioCoding::Unused
    }
}
