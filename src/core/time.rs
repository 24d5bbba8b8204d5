use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

/// `yyyy/MM/dd/HH/mm` in UTC, the layout used by archive and result keys.
pub(crate) fn minute_path(value: OffsetDateTime) -> String {
    let utc = value.to_offset(time::UtcOffset::UTC);
    let format = format_description!("[year]/[month]/[day]/[hour]/[minute]");
    utc.format(&format).unwrap_or_else(|_| {
        format!(
            "{:04}/{:02}/{:02}/{:02}/{:02}",
            utc.year(),
            u8::from(utc.month()),
            utc.day(),
            utc.hour(),
            utc.minute()
        )
    })
}

/// Human-readable UTC timestamp for email subjects.
pub(crate) fn format_display(value: OffsetDateTime) -> String {
    let utc = value.to_offset(time::UtcOffset::UTC);
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    utc.format(&format).unwrap_or_else(|_| format_offset(utc))
}

/// Drops seconds and below, the resolution of archive and result keys.
pub(crate) fn truncate_to_minute(value: OffsetDateTime) -> OffsetDateTime {
    value.replace_second(0).and_then(|value| value.replace_nanosecond(0)).unwrap_or(value)
}

/// Drops sub-second precision so the value survives a JSON round trip unchanged.
pub(crate) fn truncate_to_seconds(value: OffsetDateTime) -> OffsetDateTime {
    value.replace_nanosecond(0).unwrap_or(value)
}
