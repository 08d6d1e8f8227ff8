// =============================================================================
// Packaged exchange holiday data — full closures and early closes
// =============================================================================
//
// Covers the US equity/CME calendar for 2024-2026. Early-close entries carry
// the shortened regular-session end as local wall-clock time in the
// exchange timezone. Crypto venues trade through all of these; the calendar
// skips holiday lookups for symbols resolved to the UTC "exchange".
// =============================================================================

use chrono::{NaiveDate, NaiveTime};

/// How a holiday affects the trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolidayKind {
    /// Market fully closed; no sessions at all.
    FullClosure,
    /// Market open but the regular session ends early at the given local time.
    EarlyClose(NaiveTime),
}

/// One calendar entry.
#[derive(Debug, Clone, Copy)]
pub struct Holiday {
    pub date: NaiveDate,
    pub kind: HolidayKind,
    pub name: &'static str,
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).expect("static holiday date is valid")
}

fn early(h: u32, m: u32) -> HolidayKind {
    HolidayKind::EarlyClose(NaiveTime::from_hms_opt(h, m, 0).expect("static time is valid"))
}

/// The packaged table. Early closes end at 13:00 New York / 12:15 Chicago for
/// equity-linked futures; the single local time stored here is interpreted in
/// the symbol's exchange timezone, so 13:00 covers both equity venues and a
/// close approximation for CME equity futures.
pub fn holiday_table() -> &'static [Holiday] {
    const EARLY_H: u32 = 13;
    static TABLE: once_cell::sync::Lazy<Vec<Holiday>> = once_cell::sync::Lazy::new(|| {
        vec![
            // ── 2024 ───────────────────────────────────────────────────
            Holiday { date: d(2024, 1, 1), kind: HolidayKind::FullClosure, name: "New Year's Day" },
            Holiday { date: d(2024, 1, 15), kind: HolidayKind::FullClosure, name: "Martin Luther King Jr. Day" },
            Holiday { date: d(2024, 2, 19), kind: HolidayKind::FullClosure, name: "Presidents' Day" },
            Holiday { date: d(2024, 3, 29), kind: HolidayKind::FullClosure, name: "Good Friday" },
            Holiday { date: d(2024, 5, 27), kind: HolidayKind::FullClosure, name: "Memorial Day" },
            Holiday { date: d(2024, 6, 19), kind: HolidayKind::FullClosure, name: "Juneteenth" },
            Holiday { date: d(2024, 7, 3), kind: early(EARLY_H, 0), name: "Independence Day (early close)" },
            Holiday { date: d(2024, 7, 4), kind: HolidayKind::FullClosure, name: "Independence Day" },
            Holiday { date: d(2024, 9, 2), kind: HolidayKind::FullClosure, name: "Labor Day" },
            Holiday { date: d(2024, 11, 28), kind: HolidayKind::FullClosure, name: "Thanksgiving" },
            Holiday { date: d(2024, 11, 29), kind: early(EARLY_H, 0), name: "Day after Thanksgiving (early close)" },
            Holiday { date: d(2024, 12, 24), kind: early(EARLY_H, 0), name: "Christmas Eve (early close)" },
            Holiday { date: d(2024, 12, 25), kind: HolidayKind::FullClosure, name: "Christmas Day" },
            // ── 2025 ───────────────────────────────────────────────────
            Holiday { date: d(2025, 1, 1), kind: HolidayKind::FullClosure, name: "New Year's Day" },
            Holiday { date: d(2025, 1, 20), kind: HolidayKind::FullClosure, name: "Martin Luther King Jr. Day" },
            Holiday { date: d(2025, 2, 17), kind: HolidayKind::FullClosure, name: "Presidents' Day" },
            Holiday { date: d(2025, 4, 18), kind: HolidayKind::FullClosure, name: "Good Friday" },
            Holiday { date: d(2025, 5, 26), kind: HolidayKind::FullClosure, name: "Memorial Day" },
            Holiday { date: d(2025, 6, 19), kind: HolidayKind::FullClosure, name: "Juneteenth" },
            Holiday { date: d(2025, 7, 3), kind: early(EARLY_H, 0), name: "Independence Day (early close)" },
            Holiday { date: d(2025, 7, 4), kind: HolidayKind::FullClosure, name: "Independence Day" },
            Holiday { date: d(2025, 9, 1), kind: HolidayKind::FullClosure, name: "Labor Day" },
            Holiday { date: d(2025, 11, 27), kind: HolidayKind::FullClosure, name: "Thanksgiving" },
            Holiday { date: d(2025, 11, 28), kind: early(EARLY_H, 0), name: "Day after Thanksgiving (early close)" },
            Holiday { date: d(2025, 12, 24), kind: early(EARLY_H, 0), name: "Christmas Eve (early close)" },
            Holiday { date: d(2025, 12, 25), kind: HolidayKind::FullClosure, name: "Christmas Day" },
            // ── 2026 ───────────────────────────────────────────────────
            Holiday { date: d(2026, 1, 1), kind: HolidayKind::FullClosure, name: "New Year's Day" },
            Holiday { date: d(2026, 1, 19), kind: HolidayKind::FullClosure, name: "Martin Luther King Jr. Day" },
            Holiday { date: d(2026, 2, 16), kind: HolidayKind::FullClosure, name: "Presidents' Day" },
            Holiday { date: d(2026, 4, 3), kind: HolidayKind::FullClosure, name: "Good Friday" },
            Holiday { date: d(2026, 5, 25), kind: HolidayKind::FullClosure, name: "Memorial Day" },
            Holiday { date: d(2026, 6, 19), kind: HolidayKind::FullClosure, name: "Juneteenth" },
            Holiday { date: d(2026, 7, 3), kind: HolidayKind::FullClosure, name: "Independence Day (observed)" },
            Holiday { date: d(2026, 9, 7), kind: HolidayKind::FullClosure, name: "Labor Day" },
            Holiday { date: d(2026, 11, 26), kind: HolidayKind::FullClosure, name: "Thanksgiving" },
            Holiday { date: d(2026, 11, 27), kind: early(EARLY_H, 0), name: "Day after Thanksgiving (early close)" },
            Holiday { date: d(2026, 12, 24), kind: early(EARLY_H, 0), name: "Christmas Eve (early close)" },
            Holiday { date: d(2026, 12, 25), kind: HolidayKind::FullClosure, name: "Christmas Day" },
        ]
    });
    &TABLE
}

/// Look up the holiday entry for a date, if any.
pub fn lookup(date: NaiveDate) -> Option<&'static Holiday> {
    holiday_table().iter().find(|h| h.date == date)
}

/// `true` when the date is a full market closure.
pub fn is_full_closure(date: NaiveDate) -> bool {
    matches!(lookup(date), Some(h) if h.kind == HolidayKind::FullClosure)
}

/// The shortened local close time for the date, when it is an early close.
pub fn early_close_time(date: NaiveDate) -> Option<NaiveTime> {
    match lookup(date) {
        Some(Holiday {
            kind: HolidayKind::EarlyClose(t),
            ..
        }) => Some(*t),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn christmas_is_full_closure() {
        assert!(is_full_closure(d(2024, 12, 25)));
        assert!(is_full_closure(d(2025, 12, 25)));
    }

    #[test]
    fn christmas_eve_is_early_close() {
        let t = early_close_time(d(2024, 12, 24)).unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(13, 0, 0).unwrap());
        assert!(!is_full_closure(d(2024, 12, 24)));
    }

    #[test]
    fn regular_day_is_neither() {
        let date = d(2024, 3, 11);
        assert!(!is_full_closure(date));
        assert!(early_close_time(date).is_none());
        assert!(lookup(date).is_none());
    }

    #[test]
    fn table_dates_are_unique() {
        let table = holiday_table();
        for (i, a) in table.iter().enumerate() {
            for b in &table[i + 1..] {
                assert_ne!(a.date, b.date, "duplicate holiday entry for {}", a.date);
            }
        }
    }
}
