//! Listener payload codec.
//!
//! A probe line is `dataId \x02 group \x02 md5 [\x02 tenant] \x01`; the
//! tenant and its separator are omitted when the namespace is empty. The
//! server answers with a percent-encoded list of changed keys using the
//! same separators. The whole body is percent-decoded first and split
//! afterwards; the separators themselves arrive encoded as `%01`/`%02`.

use tracing::warn;

use crate::constants::LINE_SEPARATOR;
use crate::constants::WORD_SEPARATOR;
use crate::key::ConfigKey;

/// One subscription's probe state.
pub(crate) struct ProbeItem {
    pub(crate) key: ConfigKey,
    pub(crate) last_md5: String,
}

/// Serializes the probe payload for one long-poll request.
pub(crate) fn build_probe(items: &[ProbeItem]) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(item.key.data_id());
        out.push(WORD_SEPARATOR);
        out.push_str(item.key.group());
        out.push(WORD_SEPARATOR);
        out.push_str(&item.last_md5);
        if !item.key.tenant().is_empty() {
            out.push(WORD_SEPARATOR);
            out.push_str(item.key.tenant());
        }
        out.push(LINE_SEPARATOR);
    }
    out
}

/// Parses the long-poll response into the changed keys, in server order.
pub(crate) fn parse_changed_keys(body: &str) -> Vec<ConfigKey> {
    let decoded = percent_decode_plus(body);
    let mut changed = Vec::new();
    for line in decoded.split(LINE_SEPARATOR) {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split(WORD_SEPARATOR);
        let data_id = fields.next().unwrap_or_default();
        let group = fields.next().unwrap_or_default();
        let tenant = fields.next().unwrap_or_default();
        match ConfigKey::new(data_id, group, tenant) {
            Ok(key) => changed.push(key),
            Err(e) => warn!("unparseable changed-key entry {:?}: {}", line, e),
        }
    }
    changed
}

/// `application/x-www-form-urlencoded` decoding: `+` is a space and
/// `%XX` is a byte. Malformed escapes pass through literally.
pub(crate) fn percent_decode_plus(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
