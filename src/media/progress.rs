/// Progress-line parsing for the subprocess's merged stdout/stderr
/// (spec.md §4.3). Ported from the `key=value` token style ffmpeg emits
/// both in its human-readable stderr (`time=`) and its `-progress pipe:1`
/// machine-readable stream (`out_time=`/`out_time_ms=`).

/// Parse one output line for a current-time-seconds value, if present.
pub fn parse_time_position(line: &str) -> Option<f64> {
    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("out_time_ms=") {
            if let Ok(us) = rest.parse::<f64>() {
                return Some(us / 1_000_000.0);
            }
        } else if let Some(rest) = token.strip_prefix("out_time=") {
            return Some(parse_hms(rest));
        } else if let Some(rest) = token.strip_prefix("time=") {
            return Some(parse_hms(rest));
        }
    }
    None
}

/// `HH:MM:SS.cs` (or bare seconds) to seconds.
fn parse_hms(s: &str) -> f64 {
    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            let h = parts[0].parse::<f64>().unwrap_or(0.0);
            let m = parts[1].parse::<f64>().unwrap_or(0.0);
            let sec = parts[2].parse::<f64>().unwrap_or(0.0);
            return h * 3600.0 + m * 60.0 + sec;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Overall percent = clamp(100 * current / duration, 0, 100).
pub fn percent_of(current_seconds: f64, duration_seconds: f64) -> i32 {
    if duration_seconds <= 0.0 || !duration_seconds.is_finite() {
        return 0;
    }
    let pct = 100.0 * current_seconds / duration_seconds;
    pct.clamp(0.0, 100.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_human_readable_time_token() {
        assert_eq!(
            parse_time_position("frame=100 fps=25 time=00:00:05.50 bitrate=..."),
            Some(5.5)
        );
    }

    #[test]
    fn parses_machine_readable_out_time_ms() {
        assert_eq!(parse_time_position("out_time_ms=2500000"), Some(2.5));
    }

    #[test]
    fn lines_without_a_time_token_yield_none() {
        assert_eq!(parse_time_position("frame=100 fps=25"), None);
    }

    #[test]
    fn percent_clamps_to_0_100() {
        assert_eq!(percent_of(-5.0, 10.0), 0);
        assert_eq!(percent_of(20.0, 10.0), 100);
        assert_eq!(percent_of(5.0, 10.0), 50);
        assert_eq!(percent_of(5.0, 0.0), 0);
    }
}
