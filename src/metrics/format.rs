//! Human-readable formatting of metrics

/// `$0.0042`, `$0.125`, `$12.50`
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("${cost:.4}")
    } else if cost < 1.0 {
        format!("${cost:.3}")
    } else {
        format!("${cost:.2}")
    }
}

/// `950`, `1.5k`, `2.3M`
pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}k", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}

/// `2h 5m`, `3m 20s`, `45s`
pub fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{hours}h {}m", minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

/// `$0.030/s`
pub fn format_burn_rate(rate: f64) -> String {
    format!("{}/s", format_cost(rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.0), "$0.0000");
        assert_eq!(format_cost(0.02), "$0.020");
        assert_eq!(format_cost(0.0042), "$0.0042");
        assert_eq!(format_cost(0.125), "$0.125");
        assert_eq!(format_cost(12.5), "$12.50");
    }

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_tokens(0), "0");
        assert_eq!(format_tokens(999), "999");
        assert_eq!(format_tokens(1_500), "1.5k");
        assert_eq!(format_tokens(2_300_000), "2.3M");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(45_999), "45s");
        assert_eq!(format_duration(200_000), "3m 20s");
        assert_eq!(format_duration(7_500_000), "2h 5m");
    }

    #[test]
    fn test_format_burn_rate() {
        assert_eq!(format_burn_rate(0.03), "$0.030/s");
    }
}
