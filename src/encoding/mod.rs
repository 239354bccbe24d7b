//! Bounded-text encoders.
//!
//! Everything that crosses the satellite link is a sequence of short,
//! numbered plain-text [`Fragment`]s. Two encoders produce them:
//!
//! - [`payload`] turns an arbitrary binary artifact into base64 windows
//!   wrapped in a `msg i/n:` envelope, and decodes them back.
//! - [`balancer`] splits natural-language answers on word boundaries into
//!   evenly filled `[i/n]` fragments, with an optional cost footer on the
//!   terminal fragment.
//!
//! [`ledger`] holds the running balance that the cost footer reports.

pub mod balancer;
pub mod ledger;
pub mod payload;

pub use balancer::{BalancerConfig, CostFooter, TextBalancer};
pub use ledger::{BalanceLedger, FileLedger, InMemoryLedger};
pub use payload::{PayloadEncoder, decode_fragments, split_envelopes};

/// Character length as the destination device counts it.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// One bounded text unit, ready to be sent as a single message.
///
/// Fragments are immutable once an encoder produced them; the delivery
/// executors only read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    sequence_index: usize,
    sequence_total: usize,
    payload_text: String,
    rendered: String,
    is_terminal: bool,
}

impl Fragment {
    pub(crate) fn new(
        sequence_index: usize,
        sequence_total: usize,
        payload_text: String,
        rendered: String,
    ) -> Self {
        debug_assert!(sequence_index >= 1 && sequence_index <= sequence_total);
        Self {
            sequence_index,
            sequence_total,
            payload_text,
            rendered,
            is_terminal: sequence_index == sequence_total,
        }
    }

    /// 1-based position within the sequence.
    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    /// Number of fragments in the sequence.
    pub fn sequence_total(&self) -> usize {
        self.sequence_total
    }

    /// Content without envelope, marker or footer.
    pub fn payload_text(&self) -> &str {
        &self.payload_text
    }

    /// Whether this is the last fragment of its sequence.
    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    /// The exact text sent over the wire.
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// Rendered length in characters.
    pub fn len(&self) -> usize {
        char_len(&self.rendered)
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }
}

impl std::fmt::Display for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rendered)
    }
}
