/// Format seconds as `m:ss`. Zero, negative and unknown times all read `0:00`.
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0:00".to_string();
    }

    let whole = seconds.floor() as u64;
    format!("{}:{:02}", whole / 60, whole % 60)
}

/// [`format_time`] for a duration that may not be known yet
pub fn format_optional_time(seconds: Option<f64>) -> String {
    seconds.map_or_else(|| "0:00".to_string(), format_time)
}
