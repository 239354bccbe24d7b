//! Binary artifact encoding for the satellite text channel.
//!
//! An artifact is deflated once (zlib, best compression), base64-encoded,
//! and sliced into windows. Each window travels in an envelope
//!
//! ```text
//! msg {i}/{n}:
//! {window}
//! end
//! ```
//!
//! so a receiver can put fragments back in order and notice gaps. The
//! envelope tokens are part of the wire contract and must not change.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use super::{Fragment, char_len};
use crate::error::EncodingError;

const HEADER_PREFIX: &str = "msg ";
const HEADER_SUFFIX: &str = ":\n";
const TERMINATOR: &str = "\nend";

/// Smallest budget that leaves room for an envelope with a ten-digit total
/// plus one payload character.
pub const MIN_FRAGMENT_BUDGET: usize = 32;

/// Encodes binary artifacts into `msg i/n:` fragments.
#[derive(Debug, Clone, Copy)]
pub struct PayloadEncoder {
    budget: usize,
}

impl PayloadEncoder {
    /// Create an encoder whose rendered fragments never exceed `budget`
    /// characters.
    pub fn new(budget: usize) -> Result<Self, EncodingError> {
        if budget < MIN_FRAGMENT_BUDGET {
            return Err(EncodingError::BudgetTooSmall {
                budget,
                minimum: MIN_FRAGMENT_BUDGET,
            });
        }
        Ok(Self { budget })
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Window width used for a base64 text of `text_len` characters.
    ///
    /// The envelope grows with the digit width of the total, so the window
    /// is recomputed until the digit width it implies is stable.
    pub fn effective_window(&self, text_len: usize) -> usize {
        let mut digits = 1;
        loop {
            let window = self.budget - envelope_overhead(digits);
            let total = text_len.div_ceil(window).max(1);
            let needed = digit_count(total);
            if needed <= digits {
                return window;
            }
            digits = needed;
        }
    }

    /// Encode `bytes` into an ordered, non-empty fragment list.
    ///
    /// Deterministic: the same input always yields the same fragments. An
    /// empty artifact yields a single envelope with an empty window.
    pub fn encode(&self, bytes: &[u8]) -> Result<Vec<Fragment>, EncodingError> {
        if bytes.is_empty() {
            return Ok(vec![envelope(1, 1, String::new())]);
        }

        let compressed = compress(bytes)?;
        let encoded = BASE64.encode(&compressed);
        let window = self.effective_window(encoded.len());

        // base64 output is ASCII, so byte slicing is character slicing.
        let windows: Vec<&str> = encoded
            .as_bytes()
            .chunks(window)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
            .collect();
        let total = windows.len();

        tracing::debug!(
            original = bytes.len(),
            compressed = compressed.len(),
            encoded = encoded.len(),
            window,
            fragments = total,
            "Encoded artifact"
        );

        Ok(windows
            .into_iter()
            .enumerate()
            .map(|(i, w)| envelope(i + 1, total, w.to_string()))
            .collect())
    }
}

/// Reassemble an artifact from its rendered fragments.
///
/// Fragments may arrive in any order; every index from 1 to the total must
/// be present exactly once.
pub fn decode_fragments<S: AsRef<str>>(fragments: &[S]) -> Result<Vec<u8>, EncodingError> {
    if fragments.is_empty() {
        return Err(EncodingError::Empty);
    }

    let mut total: Option<usize> = None;
    let mut slots: BTreeMap<usize, &str> = BTreeMap::new();

    for raw in fragments {
        let (index, count, window) = parse_envelope(raw.as_ref())?;
        match total {
            None => total = Some(count),
            Some(first) if first != count => {
                return Err(EncodingError::InconsistentTotal {
                    first,
                    other: count,
                });
            }
            Some(_) => {}
        }

        if let Some(existing) = slots.insert(index, window)
            && existing != window
        {
            return Err(EncodingError::MalformedEnvelope(format!(
                "conflicting duplicates of fragment {index}"
            )));
        }
    }

    // The header total is untrusted; only indices actually seen are stored.
    let total = total.unwrap_or_default();
    let mut text = String::new();
    for (expected, (index, window)) in (1..).zip(&slots) {
        if *index != expected {
            return Err(EncodingError::MissingFragment {
                index: expected,
                total,
            });
        }
        text.push_str(window);
    }
    if slots.len() < total {
        return Err(EncodingError::MissingFragment {
            index: slots.len() + 1,
            total,
        });
    }

    if text.is_empty() {
        return Ok(Vec::new());
    }

    let compressed = BASE64.decode(text.as_bytes())?;
    let mut out = Vec::new();
    ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut out)?;
    Ok(out)
}

/// Pull the envelopes out of free text, such as a pasted inbox thread.
///
/// An envelope starts at a line beginning with `msg ` and ends at the next
/// line that is exactly `end`. Anything in between other envelopes is
/// ignored.
pub fn split_envelopes(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in text.lines().map(str::trim) {
        if line.starts_with(HEADER_PREFIX) {
            current = Some(vec![line]);
        } else if let Some(ref mut lines) = current {
            lines.push(line);
            // Header, window line, terminator; a window may itself read "end".
            if line == "end" && lines.len() >= 3 {
                found.push(lines.join("\n"));
                current = None;
            }
        }
    }
    found
}

fn compress(bytes: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn envelope(index: usize, total: usize, window: String) -> Fragment {
    let rendered = format!("{HEADER_PREFIX}{index}/{total}{HEADER_SUFFIX}{window}{TERMINATOR}");
    Fragment::new(index, total, window, rendered)
}

/// Returns `(index, total, window)`.
fn parse_envelope(raw: &str) -> Result<(usize, usize, &str), EncodingError> {
    let malformed = |what: &str| EncodingError::MalformedEnvelope(format!("{what}: {raw:?}"));

    let body = raw
        .trim()
        .strip_prefix(HEADER_PREFIX)
        .ok_or_else(|| malformed("missing 'msg' header"))?;
    let (counter, rest) = body
        .split_once(HEADER_SUFFIX)
        .ok_or_else(|| malformed("missing ':' after counter"))?;
    let window = match rest.strip_suffix(TERMINATOR) {
        Some(w) => w,
        // An empty window renders as ":\n\nend"; trimming leaves ":\nend".
        None if rest == "end" => "",
        None => return Err(malformed("missing 'end' terminator")),
    };

    let (index, total) = counter
        .split_once('/')
        .ok_or_else(|| malformed("counter is not i/n"))?;
    let index: usize = index.parse().map_err(|_| malformed("bad index"))?;
    let total: usize = total.parse().map_err(|_| malformed("bad total"))?;
    if index == 0 || index > total {
        return Err(malformed("index out of range"));
    }

    Ok((index, total, window))
}

/// Envelope characters around a window when index and total both have
/// `digits` digits.
fn envelope_overhead(digits: usize) -> usize {
    char_len(HEADER_PREFIX) + 2 * digits + 1 + char_len(HEADER_SUFFIX) + char_len(TERMINATOR)
}

fn digit_count(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn encoder() -> PayloadEncoder {
        PayloadEncoder::new(120).unwrap()
    }

    /// Pseudo-random bytes that deflate poorly, so tests get many fragments.
    fn noisy_bytes(len: usize) -> Vec<u8> {
        let mut state: u32 = 0x9E37_79B9;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xFF) as u8
            })
            .collect()
    }

    fn rendered(fragments: &[Fragment]) -> Vec<String> {
        fragments.iter().map(|f| f.as_str().to_string()).collect()
    }

    #[test]
    fn test_budget_below_minimum_rejected() {
        let err = PayloadEncoder::new(MIN_FRAGMENT_BUDGET - 1).unwrap_err();
        assert!(matches!(err, EncodingError::BudgetTooSmall { .. }));
        assert!(PayloadEncoder::new(MIN_FRAGMENT_BUDGET).is_ok());
    }

    #[test]
    fn test_empty_input_yields_single_envelope() {
        let fragments = encoder().encode(&[]).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_str(), "msg 1/1:\n\nend");
        assert!(fragments[0].is_terminal());

        let decoded = decode_fragments(&rendered(&fragments)).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_roundtrip_restores_bytes() {
        for len in [1, 7, 119, 120, 121, 5_000] {
            let data = noisy_bytes(len);
            let fragments = encoder().encode(&data).unwrap();
            let decoded = decode_fragments(&rendered(&fragments)).unwrap();
            assert_eq!(decoded, data, "roundtrip failed for {len} bytes");
        }
    }

    #[test]
    fn test_every_fragment_within_budget() {
        for budget in [MIN_FRAGMENT_BUDGET, 40, 120, 160] {
            let encoder = PayloadEncoder::new(budget).unwrap();
            let fragments = encoder.encode(&noisy_bytes(3_000)).unwrap();
            for f in &fragments {
                assert!(
                    f.len() <= budget,
                    "fragment {} is {} chars, budget {budget}",
                    f.sequence_index(),
                    f.len()
                );
                assert_eq!(f.sequence_total(), fragments.len());
            }
        }
    }

    #[test]
    fn test_five_thousand_bytes_fragment_count_and_envelope() {
        let data = noisy_bytes(5_000);
        let compressed = compress(&data).unwrap();
        let b64_len = BASE64.encode(&compressed).len();

        let encoder = encoder();
        let window = encoder.effective_window(b64_len);
        let fragments = encoder.encode(&data).unwrap();

        assert_eq!(fragments.len(), b64_len.div_ceil(window));
        let n = fragments.len();
        for (i, f) in fragments.iter().enumerate() {
            assert!(f.as_str().starts_with(&format!("msg {}/{n}:", i + 1)));
        }
        assert!(fragments.last().unwrap().as_str().ends_with("end"));
        assert!(fragments.last().unwrap().is_terminal());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let data = noisy_bytes(800);
        let a = encoder().encode(&data).unwrap();
        let b = encoder().encode(&data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_window_shrinks_when_total_gains_a_digit() {
        let encoder = encoder();
        // Totals below 10 use the one-digit envelope.
        assert_eq!(encoder.effective_window(100), 120 - envelope_overhead(1));
        // Enough text for more than nine fragments forces two digits.
        assert_eq!(encoder.effective_window(2_000), 120 - envelope_overhead(2));
    }

    #[test]
    fn test_decode_accepts_any_order() {
        let data = noisy_bytes(1_000);
        let mut texts = rendered(&encoder().encode(&data).unwrap());
        texts.reverse();
        assert_eq!(decode_fragments(&texts).unwrap(), data);
    }

    #[test]
    fn test_decode_reports_missing_fragment() {
        let data = noisy_bytes(1_000);
        let mut texts = rendered(&encoder().encode(&data).unwrap());
        let total = texts.len();
        texts.remove(1);
        let err = decode_fragments(&texts).unwrap_err();
        assert!(matches!(
            err,
            EncodingError::MissingFragment { index: 2, total: t } if t == total
        ));
    }

    #[test]
    fn test_decode_rejects_inconsistent_totals() {
        let texts = vec!["msg 1/2:\nAAAA\nend", "msg 2/3:\nAAAA\nend"];
        let err = decode_fragments(&texts).unwrap_err();
        assert!(matches!(err, EncodingError::InconsistentTotal { first: 2, other: 3 }));
    }

    #[test]
    fn test_decode_rejects_oversized_total() {
        let err = decode_fragments(&["msg 1/999999999999999:\nAAAA\nend"]).unwrap_err();
        assert!(matches!(
            err,
            EncodingError::MissingFragment {
                index: 2,
                total: 999_999_999_999_999
            }
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_envelope() {
        for bad in ["hello", "msg 1/1 AAAA end", "msg 0/1:\nAAAA\nend", "msg 1/1:\nAAAA"] {
            let err = decode_fragments(&[bad]).unwrap_err();
            assert!(
                matches!(err, EncodingError::MalformedEnvelope(_)),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        let data = b"GRIB test payload".to_vec();
        let texts: Vec<String> = rendered(&encoder().encode(&data).unwrap())
            .into_iter()
            .map(|t| format!("  {t}\n"))
            .collect();
        assert_eq!(decode_fragments(&texts).unwrap(), data);
    }

    #[test]
    fn test_decode_empty_list() {
        let empty: Vec<String> = Vec::new();
        assert!(matches!(decode_fragments(&empty), Err(EncodingError::Empty)));
    }

    #[test]
    fn test_digit_count() {
        assert_eq!(digit_count(0), 1);
        assert_eq!(digit_count(9), 1);
        assert_eq!(digit_count(10), 2);
        assert_eq!(digit_count(1_000), 4);
    }

    #[test]
    fn test_split_envelopes_from_thread() {
        let data = noisy_bytes(300);
        let fragments = encoder().encode(&data).unwrap();
        let mut thread = String::from("Fwd: weather\n> quoted line\n\n");
        for f in fragments.iter().rev() {
            thread.push_str(f.as_str());
            thread.push_str("\n\nSent via satellite\n");
        }

        let envelopes = split_envelopes(&thread);
        assert_eq!(envelopes.len(), fragments.len());
        assert_eq!(decode_fragments(&envelopes).unwrap(), data);
    }

    #[test]
    fn test_split_envelopes_drops_unterminated() {
        let text = "msg 1/2:\neJzz\nend\nmsg 2/2:\nSM8\n";
        assert_eq!(split_envelopes(text), vec!["msg 1/2:\neJzz\nend".to_string()]);
    }
}
