//! Daily quota boundary. Free-tier Gemini quotas roll over at midnight US
//! Pacific time.

use time::macros::offset;
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset, Weekday};

const PST: UtcOffset = offset!(-8);
const PDT: UtcOffset = offset!(-7);

/// Next Pacific midnight strictly after `now`, plus `buffer`.
pub fn next_daily_reset(now: OffsetDateTime, buffer: std::time::Duration) -> OffsetDateTime {
    next_pacific_midnight(now).unwrap_or(now + Duration::DAY) + buffer
}

fn next_pacific_midnight(now: OffsetDateTime) -> Option<OffsetDateTime> {
    let local = now.to_offset(pacific_offset(now)?);
    let next_date = local.date().next_day()?;
    // Switches happen at 02:00 local, so midnight itself is never ambiguous;
    // only the offset may differ from the one in effect right now.
    let guess = next_date.midnight().assume_offset(local.offset());
    Some(next_date.midnight().assume_offset(pacific_offset(guess)?))
}

/// US rules: PDT from the second Sunday of March 02:00 PST until the first
/// Sunday of November 02:00 PDT.
fn pacific_offset(at: OffsetDateTime) -> Option<UtcOffset> {
    let utc = at.to_offset(UtcOffset::UTC);
    let year = utc.year();
    let dst_start = nth_sunday(year, Month::March, 2)?
        .with_hms(10, 0, 0)
        .ok()?
        .assume_utc();
    let dst_end = nth_sunday(year, Month::November, 1)?
        .with_hms(9, 0, 0)
        .ok()?
        .assume_utc();
    if utc >= dst_start && utc < dst_end {
        Some(PDT)
    } else {
        Some(PST)
    }
}

fn nth_sunday(year: i32, month: Month, n: u8) -> Option<Date> {
    let first = Date::from_calendar_date(year, month, 1).ok()?;
    let mut day = first;
    while day.weekday() != Weekday::Sunday {
        day = day.next_day()?;
    }
    day.checked_add(Duration::weeks(i64::from(n.saturating_sub(1))))
}
