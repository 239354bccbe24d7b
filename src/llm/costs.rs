//! Per-token pricing for the supported models.
//!
//! Rates are USD per token. Providers quote them per million tokens; the
//! constants below are those quotes divided out so that
//! `input_tokens × input_rate + output_tokens × output_rate` is the cost.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::TokenUsage;

/// `(input, output)` USD per token for a model name, if known.
pub fn model_cost(model: &str) -> Option<(Decimal, Decimal)> {
    let model = model.rsplit('/').next().unwrap_or(model);
    if model.starts_with("claude-sonnet") || model.starts_with("claude-3-5-sonnet") {
        Some((dec!(0.000003), dec!(0.000015)))
    } else if model.starts_with("claude-opus") {
        Some((dec!(0.000015), dec!(0.000075)))
    } else if model.starts_with("claude-haiku") || model.starts_with("claude-3-5-haiku") {
        Some((dec!(0.0000008), dec!(0.000004)))
    } else if model.starts_with("mistral-large") {
        Some((dec!(0.000002), dec!(0.000006)))
    } else if model.starts_with("mistral-small") {
        Some((dec!(0.0000002), dec!(0.0000006)))
    } else {
        None
    }
}

/// Conservative fallback for unknown models.
pub fn default_cost() -> (Decimal, Decimal) {
    (dec!(0.000003), dec!(0.000015))
}

/// Cost of one exchange.
pub fn cost_of(usage: &TokenUsage, (input_rate, output_rate): (Decimal, Decimal)) -> Decimal {
    Decimal::from(usage.input_tokens) * input_rate + Decimal::from(usage.output_tokens) * output_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_rates() {
        assert_eq!(
            model_cost("claude-sonnet-4-20250514"),
            Some((dec!(0.000003), dec!(0.000015)))
        );
    }

    #[test]
    fn test_mistral_rates() {
        assert_eq!(
            model_cost("mistral-large-latest"),
            Some((dec!(0.000002), dec!(0.000006)))
        );
    }

    #[test]
    fn test_provider_prefix_is_ignored() {
        assert_eq!(
            model_cost("anthropic/claude-sonnet-4"),
            model_cost("claude-sonnet-4")
        );
    }

    #[test]
    fn test_unknown_model() {
        assert_eq!(model_cost("gpt-unknown"), None);
        assert!(default_cost().0 > Decimal::ZERO);
    }

    #[test]
    fn test_cost_of_usage() {
        let usage = TokenUsage {
            input_tokens: 1_000,
            output_tokens: 200,
        };
        // 1000 × 3e-6 + 200 × 15e-6 = 0.003 + 0.003
        assert_eq!(cost_of(&usage, (dec!(0.000003), dec!(0.000015))), dec!(0.006));
    }
}
