//! RFC 1123 `Date` header values.

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub const HTTP_DATE_FORMAT: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Format `at` as an HTTP date, converting to UTC first.
pub fn http_date(at: OffsetDateTime) -> String {
    let at = at.to_offset(UtcOffset::UTC);
    at.format(HTTP_DATE_FORMAT).unwrap_or_else(|_| at.to_string())
}

/// The current time as an HTTP date.
pub fn http_date_now() -> String {
    http_date(OffsetDateTime::now_utc())
}
