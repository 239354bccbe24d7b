//! Offline tools: encode a file, decode fragments, split a text answer.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use rust_decimal::Decimal;

use crate::encoding::{
    BalancerConfig, Fragment, InMemoryLedger, PayloadEncoder, TextBalancer, decode_fragments,
    split_envelopes,
};

/// Print the `msg i/n:` envelopes for a file, separated by blank lines.
pub fn run_encode_command(file: &Path, budget: usize) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let fragments = PayloadEncoder::new(budget)?.encode(&bytes)?;
    eprintln!(
        "{} bytes -> {} fragment(s) of at most {budget} chars",
        bytes.len(),
        fragments.len()
    );
    println!("{}", render(&fragments));
    Ok(())
}

/// Reassemble envelopes found in `file` and write the artifact.
pub fn run_decode_command(file: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let envelopes = split_envelopes(&text);
    anyhow::ensure!(!envelopes.is_empty(), "no envelopes found in {}", file.display());

    let bytes = decode_fragments(&envelopes)?;
    match output {
        Some(path) => {
            std::fs::write(path, &bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "{} envelope(s) -> {} bytes written to {}",
                envelopes.len(),
                bytes.len(),
                path.display()
            );
        }
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}

/// Balance `text` into `[i/n]` fragments. With `cost`, `balance` is charged
/// and the footer reports what is left.
pub fn run_split_command(
    text: &str,
    max_chars: usize,
    cost: Option<Decimal>,
    balance: Decimal,
) -> anyhow::Result<()> {
    let fragments = split_text(text, max_chars, cost, balance);
    println!("{}", render(&fragments));
    Ok(())
}

fn split_text(text: &str, max_chars: usize, cost: Option<Decimal>, balance: Decimal) -> Vec<Fragment> {
    let balancer = TextBalancer::new(BalancerConfig::with_max_chars(max_chars));
    match cost {
        Some(cost) => balancer.balance_charged(text, cost, &InMemoryLedger::new(balance)),
        None => balancer.balance(text, None),
    }
}

fn render(fragments: &[Fragment]) -> String {
    fragments
        .iter()
        .map(Fragment::as_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}
