/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Remote object naming convention (spec §4.1, §6.1).
//!
//! Two generations of filenames exist:
//! - `vm@2-<uri>` (canonical): the URI is stored verbatim, already encoded
//!   by the caller.
//! - `vm-<percent-encoded-uri>` (legacy, read-only): the URI is
//!   percent-decoded on the way in; we never write this form.

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

/// The default name of the remote meta file. Never matches
/// [`is_script_file`] — the registry and reconciler rely on that to avoid
/// treating it as a script.
pub const DEFAULT_META_FILE: &str = "Violentmonkey";

const CANONICAL_PREFIX: &str = "vm@2-";
const LEGACY_PREFIX: &str = "vm-";

/// Whether `name` looks like a script filename, i.e. begins with `vm-` or
/// `vm@<digits>-`.
pub fn is_script_file(name: &str) -> bool {
    if let Some(rest) = name.strip_prefix("vm@") {
        match rest.find('-') {
            Some(dash) => rest[..dash].chars().all(|c| c.is_ascii_digit()) && !rest[..dash].is_empty(),
            None => false,
        }
    } else {
        name.starts_with(LEGACY_PREFIX)
    }
}

/// Parses a script filename into `(version, uri)`. Legacy names (no
/// version, i.e. plain `vm-`) are reported as version `1`. Returns `None`
/// if `name` doesn't look like a script file at all.
pub fn parse_uri_from_filename(name: &str) -> Option<(u32, String)> {
    if let Some(rest) = name.strip_prefix(CANONICAL_PREFIX) {
        return Some((2, rest.to_string()));
    }
    if let Some(rest) = name.strip_prefix("vm@") {
        let dash = rest.find('-')?;
        let version: u32 = rest[..dash].parse().ok()?;
        let encoded_or_raw = &rest[dash + 1..];
        // Only version 2 is defined as "verbatim"; any other explicit
        // version we haven't seen falls back to the legacy percent-decode
        // behavior, same as the no-version case below.
        if version == 2 {
            return Some((version, encoded_or_raw.to_string()));
        }
        return Some((version, decode_legacy_uri(encoded_or_raw)));
    }
    let rest = name.strip_prefix(LEGACY_PREFIX)?;
    Some((1, decode_legacy_uri(rest)))
}

fn decode_legacy_uri(raw: &str) -> String {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Produces a remote object name for a script. `name` (the object's
/// currently-stored name, if known) wins when present; otherwise a fresh
/// canonical name is synthesized from `uri`. The caller is responsible for
/// percent-encoding `uri` beforehand if that's ever needed — this module
/// does not re-encode (spec §4.1: "already encoded").
pub fn filename_for(name: Option<&str>, uri: &str) -> String {
    if let Some(name) = name {
        return name.to_string();
    }
    format!("{CANONICAL_PREFIX}{uri}")
}

/// Percent-encodes `uri` for embedding in a legacy-style name. Exposed for
/// providers/tests that want to construct legacy fixtures; the core never
/// calls this when writing, since writes are always canonical (spec §4.1).
pub fn percent_encode_uri(uri: &str) -> String {
    utf8_percent_encode(uri, NON_ALPHANUMERIC).to_string()
}
