//! `route`: show which channel a reply link would be delivered through.

use crate::delivery::{DeliveryEndpoint, EndpointKind};
use crate::inbound::extract_reply_url;

/// Classify `input` (a link, an address, or a pasted device message).
pub fn run_route_command(input: &str, fallback: Option<String>) -> anyhow::Result<()> {
    let endpoint = resolve(input, fallback)?;
    println!("{}", describe(&endpoint));
    Ok(())
}

fn resolve(input: &str, fallback: Option<String>) -> anyhow::Result<DeliveryEndpoint> {
    let target = extract_reply_url(input).unwrap_or_else(|| input.trim().to_string());
    Ok(DeliveryEndpoint::classify(&target, fallback)?)
}

fn describe(endpoint: &DeliveryEndpoint) -> String {
    let mut lines = vec![format!("channel:  {}", endpoint.kind())];
    match endpoint.kind() {
        EndpointKind::FormPost => {
            lines.push(format!(
                "post to:  {}",
                endpoint.form_post_url().unwrap_or_default()
            ));
            lines.push(format!(
                "guid:     {}",
                endpoint.correlation_token().unwrap_or_default()
            ));
        }
        EndpointKind::InteractiveSession => {
            lines.push(format!("open:     {}", endpoint.raw_url()));
        }
        EndpointKind::EmailFallback => {}
    }
    lines.push(format!(
        "fallback: {}",
        endpoint.fallback_address().unwrap_or("none")
    ));
    lines.join("\n")
}
