//! Human-readable rendering for log lines and client messages

use chrono::Duration;

/// Render a latency in the largest unit that keeps it readable:
/// whole microseconds below 1 ms, milliseconds below 1 s, seconds above.
pub fn format_latency(latency: Duration) -> String {
    let micros = latency.num_microseconds().unwrap_or(i64::MAX).unsigned_abs();
    let millis = micros as f64 / 1000.0;

    if millis < 1.0 {
        format!("{}µs", micros)
    } else if millis < 1000.0 {
        format!("{:.2}ms", millis)
    } else {
        format!("{:.2}s", millis / 1000.0)
    }
}

/// Group an integer's digits in thousands: `1234567` → `"1,234,567"`.
pub fn format_count(value: usize) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
