/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Typesafe wrapper so local and remote
/// clocks aren't accidentally compared to unrelated integers.
///
/// Unlike the Sync 1.5 `ServerTimestamp` this is serialized as a plain JSON
/// integer, matching the wire shape in spec §3 (`timestamp: int ms`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn now() -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("current time before unix epoch");
        Timestamp(since_epoch.as_millis() as i64)
    }

    #[inline]
    pub fn as_millis(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<i64> for Timestamp {
    #[inline]
    fn from(ms: i64) -> Self {
        Timestamp(ms)
    }
}

impl From<Timestamp> for i64 {
    #[inline]
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_the_epoch() {
        assert!(Timestamp::EPOCH.is_zero());
        assert_eq!(Timestamp::default(), Timestamp::EPOCH);
    }

    #[test]
    fn ordering_matches_millis() {
        let a = Timestamp(100);
        let b = Timestamp(200);
        assert!(a < b);
    }

    #[test]
    fn serde_roundtrip_is_a_plain_integer() {
        let ts = Timestamp(1_700_000_000_123);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "1700000000123");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
