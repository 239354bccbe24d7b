//! Word-balanced splitting of natural-language answers.
//!
//! Answers are split into `[i/n] text` fragments that each fit the
//! per-message ceiling. Fragments are filled evenly rather than greedily,
//! so a 250-character answer becomes two or three comfortably sized
//! messages instead of one full message and a stub. The terminal fragment
//! optionally carries a cost footer; when it does not fit next to the text
//! it gets a fragment of its own.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::ledger::BalanceLedger;
use super::{Fragment, char_len};

/// Tuning constants for the text balancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Hard per-fragment ceiling, marker and footer included.
    pub max_chars: usize,
    /// Characters reserved for the `[i/n] ` marker while filling.
    pub marker_reserve: usize,
    /// Fill target per fragment; used to estimate the fragment count.
    pub target_chars: usize,
    /// A fragment is only closed early (word quota reached) once it holds
    /// at least this many characters.
    pub min_fill: usize,
    /// Fragments shorter than this are merged into a neighbour when the
    /// merged text still fits.
    pub merge_threshold: usize,
    /// Upper bound on fragments per answer before degrading to fixed-width
    /// slices.
    pub max_fragments: usize,
    /// Appended where text had to be cut.
    pub ellipsis: String,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            max_chars: 120,
            marker_reserve: 8,
            target_chars: 110,
            min_fill: 80,
            merge_threshold: 80,
            max_fragments: 10,
            ellipsis: "...".to_string(),
        }
    }
}

impl BalancerConfig {
    /// Defaults scaled to a different ceiling.
    pub fn with_max_chars(max_chars: usize) -> Self {
        let defaults = Self::default();
        let usable = max_chars.saturating_sub(defaults.marker_reserve);
        Self {
            max_chars,
            target_chars: defaults.target_chars.min(usable),
            min_fill: defaults.min_fill.min(usable * 2 / 3),
            merge_threshold: defaults.merge_threshold.min(usable * 2 / 3),
            ..defaults
        }
    }
}

/// Cost and remaining balance reported on the terminal fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostFooter {
    pub cost: Decimal,
    pub balance: Decimal,
}

impl CostFooter {
    pub fn new(cost: Decimal, balance: Decimal) -> Self {
        Self { cost, balance }
    }

    /// Footer appended to the terminal fragment's text.
    pub fn suffix(&self) -> String {
        format!(" | {}", self.standalone())
    }

    /// Footer text when it travels as its own fragment.
    pub fn standalone(&self) -> String {
        let cost = self
            .cost
            .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
        let balance = self
            .balance
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        format!("Cost: ${cost:.4} | Balance: ${balance:.2}")
    }
}

/// Splits answers into balanced `[i/n]` fragments.
#[derive(Debug, Clone, Default)]
pub struct TextBalancer {
    config: BalancerConfig,
}

impl TextBalancer {
    pub fn new(config: BalancerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Charge `cost` to `ledger` and balance `text` with the resulting
    /// footer. The ledger is charged exactly once, before delivery.
    pub fn balance_charged(
        &self,
        text: &str,
        cost: Decimal,
        ledger: &dyn BalanceLedger,
    ) -> Vec<Fragment> {
        let balance = ledger.charge(cost);
        let footer = CostFooter::new(cost, balance);
        self.balance(text, Some(&footer))
    }

    /// Split `text` into fragments, each at most `max_chars` long once its
    /// marker (and, for the terminal fragment, the footer) is added.
    ///
    /// Never fails and never returns an empty list. Deterministic for equal
    /// inputs.
    pub fn balance(&self, text: &str, footer: Option<&CostFooter>) -> Vec<Fragment> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let joined = words.join(" ");

        if let Some(single) = self.single(&joined, footer) {
            return vec![single];
        }

        let mut bodies = self.fill(&words, char_len(&joined));
        self.merge_short(&mut bodies);

        if bodies.is_empty() {
            tracing::warn!("Balancer produced no fragments, sending truncated text");
            return vec![self.truncated_single(&joined, footer)];
        }

        let footer_alone = footer.is_some_and(|f| !self.footer_fits(&bodies, f));
        let count = bodies.len() + usize::from(footer_alone);
        if count > self.config.max_fragments {
            tracing::debug!(
                fragments = count,
                cap = self.config.max_fragments,
                "Too many fragments, slicing at fixed width"
            );
            let slices = self.fixed_width(&joined);
            return self.render(slices, footer, false);
        }

        self.render(bodies, footer, footer_alone)
    }

    fn usable(&self) -> usize {
        self.config
            .max_chars
            .saturating_sub(self.config.marker_reserve)
            .max(1)
    }

    /// Whole answer in one fragment, if it fits.
    fn single(&self, joined: &str, footer: Option<&CostFooter>) -> Option<Fragment> {
        let rendered = match footer {
            Some(f) if joined.is_empty() => format!("[1/1] {}", f.standalone()),
            Some(f) => format!("[1/1] {joined}{}", f.suffix()),
            None => format!("[1/1] {joined}").trim_end().to_string(),
        };
        (char_len(&rendered) <= self.config.max_chars)
            .then(|| Fragment::new(1, 1, joined.to_string(), rendered))
    }

    fn truncated_single(&self, joined: &str, footer: Option<&CostFooter>) -> Fragment {
        let suffix = footer.map(CostFooter::suffix).unwrap_or_default();
        let (body, rendered) = self.fit("[1/1] ", joined, &suffix);
        Fragment::new(1, 1, body, rendered)
    }

    /// Greedy word accumulation toward an even split.
    fn fill(&self, words: &[&str], text_len: usize) -> Vec<String> {
        let usable = self.usable();
        let target = self.config.target_chars.clamp(1, usable);
        let min_fill = self.config.min_fill.min(usable);

        let estimate = text_len / target + 1;
        let quota = (words.len() / estimate).max(1);

        let mut bodies = Vec::new();
        let mut current = String::new();
        let mut count = 0;

        for (i, word) in words.iter().enumerate() {
            let projected = if current.is_empty() {
                char_len(word)
            } else {
                char_len(&current) + 1 + char_len(word)
            };

            if projected <= usable {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
                count += 1;

                let more_words = i + 1 < words.len();
                let len = char_len(&current);
                if more_words && (len >= target || count >= quota) && len >= min_fill {
                    bodies.push(std::mem::take(&mut current));
                    count = 0;
                }
            } else {
                if !current.is_empty() {
                    bodies.push(std::mem::take(&mut current));
                }
                current.push_str(word);
                count = 1;
            }
        }

        if !current.is_empty() {
            bodies.push(current);
        }
        bodies
    }

    /// Merge short fragments into the next neighbour, else the previous one,
    /// until nothing more can be merged within the usable width.
    fn merge_short(&self, bodies: &mut Vec<String>) {
        let usable = self.usable();
        let threshold = self.config.merge_threshold.min(usable);

        loop {
            let mut merged = false;
            for i in 0..bodies.len() {
                let len = char_len(&bodies[i]);
                if len >= threshold {
                    continue;
                }
                if i + 1 < bodies.len() && len + 1 + char_len(&bodies[i + 1]) <= usable {
                    let next = bodies.remove(i + 1);
                    bodies[i].push(' ');
                    bodies[i].push_str(&next);
                    merged = true;
                    break;
                }
                if i > 0 && char_len(&bodies[i - 1]) + 1 + len <= usable {
                    let short = bodies.remove(i);
                    bodies[i - 1].push(' ');
                    bodies[i - 1].push_str(&short);
                    merged = true;
                    break;
                }
            }
            if !merged {
                break;
            }
        }
    }

    fn footer_fits(&self, bodies: &[String], footer: &CostFooter) -> bool {
        let total = bodies.len();
        let last = bodies.last().map(String::as_str).unwrap_or_default();
        let rendered_len = char_len(&marker(total, total)) + char_len(last) + char_len(&footer.suffix());
        rendered_len <= self.config.max_chars
    }

    /// Degraded path: slice at fixed width, ignoring word boundaries, and
    /// cut whatever does not fit in `max_fragments` slices.
    fn fixed_width(&self, joined: &str) -> Vec<String> {
        let usable = self.usable();
        let chars: Vec<char> = joined.chars().collect();
        let mut slices: Vec<String> = chars
            .chunks(usable)
            .map(|chunk| chunk.iter().collect::<String>().trim().to_string())
            .collect();

        let cap = self.config.max_fragments.max(1);
        if slices.len() > cap {
            slices.truncate(cap);
            if let Some(last) = slices.last_mut() {
                let keep = usable.saturating_sub(char_len(&self.config.ellipsis));
                *last = format!("{}{}", take_chars(last, keep).trim_end(), self.config.ellipsis);
            }
        }
        slices
    }

    fn render(
        &self,
        bodies: Vec<String>,
        footer: Option<&CostFooter>,
        footer_alone: bool,
    ) -> Vec<Fragment> {
        let total = bodies.len() + usize::from(footer_alone);
        let body_count = bodies.len();
        let mut fragments = Vec::with_capacity(total);

        for (i, body) in bodies.into_iter().enumerate() {
            let index = i + 1;
            let suffix = match footer {
                Some(f) if index == body_count && !footer_alone => f.suffix(),
                _ => String::new(),
            };
            let (payload, rendered) = self.fit(&marker(index, total), &body, &suffix);
            if payload != body {
                tracing::debug!(index, total, "Fragment truncated to fit ceiling");
            }
            fragments.push(Fragment::new(index, total, payload, rendered));
        }

        if footer_alone && let Some(f) = footer {
            let (payload, rendered) = self.fit(&marker(total, total), &f.standalone(), "");
            fragments.push(Fragment::new(total, total, payload, rendered));
        }

        fragments
    }

    /// Returns `(payload, rendered)` with the body cut so the rendered text
    /// stays within the ceiling.
    fn fit(&self, prefix: &str, body: &str, suffix: &str) -> (String, String) {
        let max = self.config.max_chars;
        let room = max.saturating_sub(char_len(prefix) + char_len(suffix));
        let ellipsis = &self.config.ellipsis;

        let payload = if char_len(body) <= room {
            body.to_string()
        } else if room > char_len(ellipsis) {
            let keep = room - char_len(ellipsis);
            format!("{}{ellipsis}", take_chars(body, keep).trim_end())
        } else {
            take_chars(body, room)
        };

        let mut rendered = format!("{prefix}{payload}{suffix}");
        if char_len(&rendered) > max {
            rendered = take_chars(&rendered, max);
        }
        (payload, rendered)
    }
}

fn marker(index: usize, total: usize) -> String {
    format!("[{index}/{total}] ")
}

fn take_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}
