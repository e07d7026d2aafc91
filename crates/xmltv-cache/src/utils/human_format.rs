//! Human-readable sizes and durations for log lines and CLI output.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// `1536` → `"1.50KB"`, `512 MiB` → `"512.0MB"`. Binary units.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes}B");
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    let precision = if size >= 10.0 { 1 } else { 2 };
    format!("{size:.precision$}{}", UNITS[unit])
}

/// Elapsed milliseconds, coarsening as the value grows: `250ms`, `1.50s`, `1m30s`, `2h`.
pub fn format_duration(millis: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;

    match millis {
        0..1_000 => format!("{millis}ms"),
        1_000..60_000 => {
            let seconds = millis as f64 / 1000.0;
            let precision = if seconds >= 10.0 { 1 } else { 2 };
            format!("{seconds:.precision$}s")
        }
        _ => {
            let secs = millis / 1000;
            let (major, major_unit, minor, minor_unit) = if secs < HOUR {
                (secs / MINUTE, "m", secs % MINUTE, "s")
            } else {
                (secs / HOUR, "h", (secs % HOUR) / MINUTE, "m")
            };
            if minor == 0 {
                format!("{major}{major_unit}")
            } else {
                format!("{major}{major_unit}{minor}{minor_unit}")
            }
        }
    }
}
