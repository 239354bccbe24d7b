//! Doctor diagnostics CLI command.
//!
//! Checks the relay configuration and reports actionable fixes.

use std::time::Duration;

use secrecy::ExposeSecret;

use crate::config::Config;

/// Diagnostic check result.
struct Check {
    name: &'static str,
    status: CheckStatus,
    message: String,
    fix: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl Check {
    fn ok(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Ok,
            message: message.into(),
            fix: None,
        }
    }

    fn warn(name: &'static str, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Warning,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }

    fn error(name: &'static str, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Error,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }

    fn icon(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "[OK]",
            CheckStatus::Warning => "[WARN]",
            CheckStatus::Error => "[ERR]",
        }
    }
}

/// Run diagnostics.
pub async fn run_doctor_command() -> anyhow::Result<()> {
    println!("satrelay doctor");
    println!("===============\n");

    let mut checks = Vec::new();
    match Config::from_env() {
        Ok(config) => {
            checks.push(Check::ok(
                "Configuration",
                format!("loaded for {}", config.relay_account),
            ));
            checks.extend(config_checks(&config));
            checks.push(check_mailbox(&config).await);
        }
        Err(e) => checks.push(Check::error(
            "Configuration",
            e.to_string(),
            "Set the variable in the environment or in .env",
        )),
    }
    checks.push(check_browser());

    let mut errors = 0;
    let mut warnings = 0;
    for check in &checks {
        println!("  {} {}: {}", check.icon(), check.name, check.message);
        if let Some(ref fix) = check.fix {
            println!("       Fix: {}", fix);
        }
        match check.status {
            CheckStatus::Error => errors += 1,
            CheckStatus::Warning => warnings += 1,
            CheckStatus::Ok => {}
        }
    }

    println!();
    println!(
        "Summary: {} checks, {} passed, {} warnings, {} errors",
        checks.len(),
        checks.len() - errors - warnings,
        warnings,
        errors
    );

    if errors > 0 {
        println!("\nFix the errors above before running the relay.");
    } else if warnings > 0 {
        println!("\nThe relay will run, but some requests may not be answered.");
    } else {
        println!("\nAll checks passed.");
    }
    Ok(())
}

fn config_checks(config: &Config) -> Vec<Check> {
    vec![
        check_providers(config),
        check_device_login(config),
        check_ledger(config),
        check_weather(config),
        Check::ok(
            "Fragments",
            format!(
                "{} chars, {}s apart",
                config.fragment_char_budget,
                config.fragment_delay.as_secs()
            ),
        ),
    ]
}

fn check_providers(config: &Config) -> Check {
    let configured: Vec<&str> = [
        ("claude", config.anthropic_api_key.is_some()),
        ("mistral", config.mistral_api_key.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, set)| set.then_some(name))
    .collect();

    match configured.len() {
        0 => Check::warn(
            "AI providers",
            "none configured; questions get a not-available notice",
            "Set ANTHROPIC_API_KEY and/or MISTRAL_API_KEY",
        ),
        2 => Check::ok("AI providers", configured.join(", ")),
        _ => Check::warn(
            "AI providers",
            format!("only {}", configured.join(", ")),
            "Set the missing key to answer both prefixes",
        ),
    }
}

fn check_device_login(config: &Config) -> Check {
    match config.device {
        Some(ref device) => Check::ok("Device login", device.username.clone()),
        None => Check::warn(
            "Device login",
            "not set; reply pages that ask for a login fall back to email",
            "Set DEVICE_USERNAME and DEVICE_PASSWORD",
        ),
    }
}

fn check_ledger(config: &Config) -> Check {
    let Some(ref path) = config.ledger_path else {
        return Check::warn(
            "Ledger",
            "in memory; balances reset on restart",
            "Set LEDGER_PATH to keep balances",
        );
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    if dir.is_dir() {
        Check::ok("Ledger", path.display().to_string())
    } else {
        Check::error(
            "Ledger",
            format!("directory {} does not exist", dir.display()),
            format!("mkdir -p {}", dir.display()),
        )
    }
}

fn check_weather(config: &Config) -> Check {
    let weather = &config.weather;
    let summary = format!(
        "{} (wait {}s, poll {}s)",
        weather.provider_address,
        weather.timeout.as_secs(),
        weather.poll_interval.as_secs()
    );
    if weather.timeout < weather.poll_interval {
        Check::warn(
            "Weather",
            summary,
            "WEATHER_TIMEOUT_SECS is shorter than one poll; replies are never seen",
        )
    } else {
        Check::ok("Weather", summary)
    }
}

fn check_browser() -> Check {
    if cfg!(feature = "browser") {
        Check::ok("Browser", "headless Chromium support built in")
    } else {
        Check::warn(
            "Browser",
            "built without the browser feature; session links fall back to email",
            "Rebuild with --features browser",
        )
    }
}

async fn check_mailbox(config: &Config) -> Check {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build();
    let client = match client {
        Ok(c) => c,
        Err(e) => {
            return Check::error(
                "Mailbox",
                format!("HTTP client error: {}", e),
                "TLS library may be misconfigured",
            );
        }
    };

    let url = format!(
        "{}/gmail/v1/users/me/profile",
        config.gmail.api_base.trim_end_matches('/')
    );
    match client
        .get(&url)
        .bearer_auth(config.gmail.access_token.expose_secret())
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => Check::ok("Mailbox", "Gmail API reachable"),
        Ok(resp) if resp.status().as_u16() == 401 => Check::error(
            "Mailbox",
            "access token rejected",
            "Refresh GMAIL_ACCESS_TOKEN",
        ),
        Ok(resp) => Check::warn(
            "Mailbox",
            format!("Gmail API returned {}", resp.status()),
            "Check the token scopes and GMAIL_API_BASE",
        ),
        Err(_) => Check::warn(
            "Mailbox",
            "cannot reach the Gmail API",
            "Check your internet connection and firewall settings",
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(extra: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = [
            ("RELAY_ACCOUNT", "relay@example.com"),
            ("GMAIL_ACCESS_TOKEN", "token"),
        ]
        .iter()
        .chain(extra)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Config::from_lookup(move |key| map.get(key).cloned()).unwrap()
    }

    fn status_of(checks: &[Check], name: &str) -> &'static str {
        checks
            .iter()
            .find(|c| c.name == name)
            .map(Check::icon)
            .unwrap_or("missing")
    }

    #[test]
    fn test_minimal_config_warns() {
        let checks = config_checks(&config(&[]));
        assert_eq!(status_of(&checks, "AI providers"), "[WARN]");
        assert_eq!(status_of(&checks, "Device login"), "[WARN]");
        assert_eq!(status_of(&checks, "Ledger"), "[WARN]");
        assert_eq!(status_of(&checks, "Weather"), "[OK]");
    }

    #[test]
    fn test_complete_config_passes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = dir.path().join("ledger.json").to_string_lossy().to_string();
        let checks = config_checks(&config(&[
            ("ANTHROPIC_API_KEY", "a"),
            ("MISTRAL_API_KEY", "m"),
            ("DEVICE_USERNAME", "skipper@example.org"),
            ("DEVICE_PASSWORD", "pw"),
            ("LEDGER_PATH", ledger.as_str()),
        ]));
        assert!(checks.iter().all(|c| c.status == CheckStatus::Ok));
    }

    #[test]
    fn test_ledger_directory_missing() {
        let check = check_ledger(&config(&[("LEDGER_PATH", "/nonexistent/satrelay/ledger.json")]));
        assert_eq!(check.status, CheckStatus::Error);
        assert!(check.fix.unwrap().contains("mkdir -p /nonexistent/satrelay"));
    }

    #[test]
    fn test_weather_timeout_shorter_than_poll() {
        let check = check_weather(&config(&[
            ("WEATHER_TIMEOUT_SECS", "5"),
            ("WEATHER_POLL_SECS", "10"),
        ]));
        assert_eq!(check.status, CheckStatus::Warning);
    }

    #[tokio::test]
    async fn test_mailbox_check_against_mock() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/gmail/v1/users/me/profile")
            .match_header("authorization", "Bearer token")
            .with_status(401)
            .create_async()
            .await;

        let base = server.url();
        let check = check_mailbox(&config(&[("GMAIL_API_BASE", base.as_str())])).await;
        assert_eq!(check.status, CheckStatus::Error);
        mock.assert_async().await;
    }
}
