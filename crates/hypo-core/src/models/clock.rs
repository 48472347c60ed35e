use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Captures the local UTC offset. Must run before any extra threads exist,
/// otherwise the platform lookup is refused and UTC is used.
pub fn capture_local_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}

fn local(at: SystemTime) -> OffsetDateTime {
    let offset = LOCAL_OFFSET.get().copied().unwrap_or(UtcOffset::UTC);
    OffsetDateTime::from(at).to_offset(offset)
}

/// `YYYY-MM-DD__HH-MM-SS` in local time.
pub fn format_stamp(at: SystemTime) -> String {
    let format = format_description!("[year]-[month]-[day]__[hour]-[minute]-[second]");
    local(at)
        .format(&format)
        .unwrap_or_else(|_| String::from("0000-00-00__00-00-00"))
}

pub fn format_instant(at: SystemTime) -> String {
    local(at)
        .format(&Rfc3339)
        .unwrap_or_else(|_| format_stamp(at))
}

/// Seconds with two decimals, e.g. `12.50`.
pub fn format_seconds(duration: Duration) -> String {
    format!("{:.2}", duration.as_secs_f64())
}

/// `H:MM:SS[.ffffff]`, prefixed by `N day(s), ` past 24 hours.
pub fn format_elapsed(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    let micros = duration.subsec_micros();

    let mut rendered = String::new();
    if days > 0 {
        let unit = if days == 1 { "day" } else { "days" };
        rendered.push_str(&format!("{days} {unit}, "));
    }
    rendered.push_str(&format!("{hours}:{minutes:02}:{seconds:02}"));
    if micros > 0 {
        rendered.push_str(&format!(".{micros:06}"));
    }
    rendered
}

pub fn elapsed_between(start: SystemTime, end: SystemTime) -> Duration {
    end.duration_since(start).unwrap_or(Duration::ZERO)
}
