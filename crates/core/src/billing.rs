//! Download pricing: how many credit minutes a completed job costs.

/// Seconds in one billable minute.
pub const SECONDS_PER_MINUTE: i64 = 60;

/// Characters of input text synthesised per minute of audio (~150 wpm).
pub const TEXT_CHARS_PER_MINUTE: i64 = 900;

/// Smallest charge for any download.
pub const MIN_CHARGE_MINUTES: i64 = 1;

/// Longest output duration a worker may report for one job (24 hours).
pub const MAX_OUTPUT_DURATION_SECS: i64 = 24 * 60 * 60;

/// Whether a worker-reported output duration is plausible.
pub fn is_valid_output_duration(secs: i64) -> bool {
    (0..=MAX_OUTPUT_DURATION_SECS).contains(&secs)
}

/// Estimate the billable minutes of a job's output.
///
/// Prefers the media duration the worker reported on completion, then a
/// `duration_secs` parameter supplied at intake, then the length of a
/// `text` parameter. Never returns less than [`MIN_CHARGE_MINUTES`].
pub fn estimated_minutes(output_duration_secs: Option<i64>, parameters: &serde_json::Value) -> i64 {
    let minutes = if let Some(secs) = output_duration_secs {
        ceil_div(secs, SECONDS_PER_MINUTE)
    } else if let Some(secs) = parameters.get("duration_secs").and_then(|v| v.as_i64()) {
        ceil_div(secs, SECONDS_PER_MINUTE)
    } else if let Some(text) = parameters.get("text").and_then(|v| v.as_str()) {
        ceil_div(text.chars().count() as i64, TEXT_CHARS_PER_MINUTE)
    } else {
        MIN_CHARGE_MINUTES
    };
    minutes.max(MIN_CHARGE_MINUTES)
}

fn ceil_div(value: i64, divisor: i64) -> i64 {
    if value <= 0 {
        0
    } else {
        value / divisor + i64::from(value % divisor != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reported_duration_wins() {
        let params = json!({ "duration_secs": 6000, "text": "hi" });
        assert_eq!(estimated_minutes(Some(300), &params), 5);
    }

    #[test]
    fn partial_minutes_round_up() {
        assert_eq!(estimated_minutes(Some(61), &json!({})), 2);
        assert_eq!(estimated_minutes(Some(60), &json!({})), 1);
    }

    #[test]
    fn falls_back_to_duration_parameter() {
        assert_eq!(estimated_minutes(None, &json!({ "duration_secs": 150 })), 3);
    }

    #[test]
    fn falls_back_to_text_length() {
        let text = "a".repeat(1801);
        assert_eq!(estimated_minutes(None, &json!({ "text": text })), 3);
    }

    #[test]
    fn never_below_minimum() {
        assert_eq!(estimated_minutes(Some(0), &json!({})), MIN_CHARGE_MINUTES);
        assert_eq!(estimated_minutes(None, &serde_json::Value::Null), MIN_CHARGE_MINUTES);
        assert_eq!(estimated_minutes(Some(-5), &json!({})), MIN_CHARGE_MINUTES);
    }

    #[test]
    fn extreme_durations_do_not_overflow() {
        assert_eq!(
            estimated_minutes(Some(i64::MAX), &json!({})),
            i64::MAX / SECONDS_PER_MINUTE + 1
        );
        assert_eq!(
            estimated_minutes(None, &json!({ "duration_secs": i64::MAX })),
            i64::MAX / SECONDS_PER_MINUTE + 1
        );
        assert_eq!(estimated_minutes(Some(i64::MIN), &json!({})), MIN_CHARGE_MINUTES);
    }

    #[test]
    fn reported_duration_bounds() {
        assert!(is_valid_output_duration(0));
        assert!(is_valid_output_duration(MAX_OUTPUT_DURATION_SECS));
        assert!(!is_valid_output_duration(-1));
        assert!(!is_valid_output_duration(MAX_OUTPUT_DURATION_SECS + 1));
        assert!(!is_valid_output_duration(i64::MAX));
    }
}
