use chrono::{Datelike, Days, NaiveDate, Weekday};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// An inclusive local-date range recognized in a query, plus the phrase that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub matched: String,
}

impl TemporalRange {
    /// True if a `YYYY-MM-DD` date string falls inside the range. Ranges
    /// with `start > end` match nothing.
    pub fn contains(&self, date: &str) -> bool {
        match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            Ok(d) => self.start <= d && d <= self.end,
            Err(_) => false,
        }
    }

    pub fn start_string(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_string(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

// ---------------------------------------------------------------------------
// Pattern table
// ---------------------------------------------------------------------------

/// What to compute once a pattern matches. Count-bearing variants read
/// capture group 1.
#[derive(Debug, Clone, Copy)]
enum Action {
    /// Fixed day-offset window relative to the reference date.
    Point { start: i64, end: i64 },
    DaysAgo,
    WeeksAgo,
    MonthsAgo,
    LastDays,
    LastWeek,
    ThisWeek,
    LastMonth,
    ThisMonth,
    StartOfWeek,
    StartOfMonth,
    Weekday(Weekday),
    MonthName(u32),
    DateIso,
    DateMdy,
    DateMd,
}

struct Pattern {
    re: Regex,
    action: Action,
}

const NUM_WORDS: &str = "one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|a|an|couple|few";

fn patterns() -> &'static Vec<Pattern> {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut out = Vec::new();
        let mut add = |re: &str, action: Action| {
            out.push(Pattern {
                re: Regex::new(re).expect("temporal pattern must compile"),
                action,
            });
        };

        // Point references. More specific phrasings run before anything a
        // broader pattern could shadow; first match wins.
        add(r"\byesterday\b", Action::Point { start: -1, end: -1 });
        add(r"\btoday\b", Action::Point { start: 0, end: 0 });
        add(r"\bthis\s+morning\b", Action::Point { start: 0, end: 0 });
        add(r"\bthis\s+afternoon\b", Action::Point { start: 0, end: 0 });
        add(r"\bthis\s+evening\b", Action::Point { start: 0, end: 0 });
        add(r"\btonight\b", Action::Point { start: 0, end: 0 });
        add(r"\bthe\s+other\s+day\b", Action::Point { start: -3, end: -1 });

        for (name, day) in [
            ("monday", Weekday::Mon),
            ("tuesday", Weekday::Tue),
            ("wednesday", Weekday::Wed),
            ("thursday", Weekday::Thu),
            ("friday", Weekday::Fri),
            ("saturday", Weekday::Sat),
            ("sunday", Weekday::Sun),
        ] {
            add(&format!(r"\b(?:on|last)\s+{name}\b"), Action::Weekday(day));
        }

        // Literal dates are point references too.
        add(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b", Action::DateIso);
        add(r"\b(\d{1,2})/(\d{1,2})/(\d{2,4})\b", Action::DateMdy);
        add(r"\b(\d{1,2})/(\d{1,2})\b", Action::DateMd);

        // N units ago, digit and word forms. These run before the
        // `last N days` family so the word forms aren't shadowed.
        add(r"\b(\d+)\s+days?\s+ago\b", Action::DaysAgo);
        add(&format!(r"\b({NUM_WORDS})\s+days?\s+ago\b"), Action::DaysAgo);
        add(r"\b(\d+)\s+weeks?\s+ago\b", Action::WeeksAgo);
        add(&format!(r"\b({NUM_WORDS})\s+weeks?\s+ago\b"), Action::WeeksAgo);
        add(r"\b(\d+)\s+months?\s+ago\b", Action::MonthsAgo);
        add(&format!(r"\b({NUM_WORDS})\s+months?\s+ago\b"), Action::MonthsAgo);

        // Week / month ranges
        add(r"\blast\s+week\b", Action::LastWeek);
        add(r"\bthis\s+week\b", Action::ThisWeek);
        add(r"\blast\s+month\b", Action::LastMonth);
        add(r"\bthis\s+month\b", Action::ThisMonth);

        // last/past N days
        add(r"\blast\s+(\d+)\s+days?\b", Action::LastDays);
        add(&format!(r"\blast\s+({NUM_WORDS})\s+days?\b"), Action::LastDays);
        add(r"\bpast\s+(\d+)\s+days?\b", Action::LastDays);
        add(&format!(r"\bpast\s+({NUM_WORDS})\s+days?\b"), Action::LastDays);

        // Period words
        add(r"\brecently\b", Action::Point { start: -7, end: 0 });
        add(r"\bearlier\b", Action::Point { start: -3, end: 0 });
        add(r"\bpreviously\b", Action::Point { start: -14, end: -1 });
        add(r"\bbefore\b", Action::Point { start: -30, end: -1 });

        add(
            r"\b(?:beginning|start)\s+of\s+(?:the\s+)?week\b",
            Action::StartOfWeek,
        );
        add(
            r"\b(?:beginning|start)\s+of\s+(?:the\s+)?month\b",
            Action::StartOfMonth,
        );

        // Month names, then 3-letter abbreviations (plus `sept`). A bare
        // month later than the reference month means last year's.
        let months = [
            "january",
            "february",
            "march",
            "april",
            "may",
            "june",
            "july",
            "august",
            "september",
            "october",
            "november",
            "december",
        ];
        for (i, name) in months.iter().enumerate() {
            add(
                &format!(r"\b(?:in\s+)?{name}\b"),
                Action::MonthName(i as u32 + 1),
            );
        }
        let abbrevs = [
            ("jan", 1),
            ("feb", 2),
            ("mar", 3),
            ("apr", 4),
            ("jun", 6),
            ("jul", 7),
            ("aug", 8),
            ("sept", 9),
            ("sep", 9),
            ("oct", 10),
            ("nov", 11),
            ("dec", 12),
        ];
        for (abbr, month) in abbrevs {
            add(&format!(r"\b(?:in\s+)?{abbr}\b"), Action::MonthName(month));
        }

        out
    })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a natural-language temporal phrase out of a query. Patterns are
/// tried in a fixed order; the first match wins. Returns `None` when the
/// query carries no recognizable time reference.
pub fn parse_temporal(query: &str, reference: NaiveDate) -> Option<TemporalRange> {
    let query_lower = query.to_lowercase();

    for pattern in patterns() {
        let Some(caps) = pattern.re.captures(&query_lower) else {
            continue;
        };
        if let Some((start, end)) = apply(pattern.action, &caps, reference) {
            return Some(TemporalRange {
                start,
                end,
                matched: caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
            });
        }
        // An action can decline (e.g. 13/45 is not a date); keep trying.
    }

    None
}

fn apply(action: Action, caps: &Captures, reference: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    match action {
        Action::Point { start, end } => {
            Some((offset_days(reference, start), offset_days(reference, end)))
        }
        Action::DaysAgo => {
            let n = parse_count(caps.get(1)?.as_str())?;
            let day = offset_days(reference, -(n as i64));
            Some((day, day))
        }
        Action::WeeksAgo => {
            // Deliberately fuzzy: "two weeks ago" means that vicinity,
            // one week either side.
            let n = parse_count(caps.get(1)?.as_str())? as i64;
            Some((
                offset_days(reference, -(n + 1) * 7),
                offset_days(reference, -(n - 1) * 7),
            ))
        }
        Action::MonthsAgo => {
            let n = parse_count(caps.get(1)?.as_str())?;
            let mut year = reference.year();
            let mut month = reference.month() as i32 - n as i32;
            while month <= 0 {
                month += 12;
                year -= 1;
            }
            Some(month_range(year, month as u32))
        }
        Action::LastDays => {
            let n = parse_count(caps.get(1)?.as_str())?;
            Some((offset_days(reference, -(n as i64)), reference))
        }
        Action::LastWeek => {
            let weekday = reference.weekday().num_days_from_monday() as i64;
            Some((
                offset_days(reference, -(weekday + 7)),
                offset_days(reference, -(weekday + 1)),
            ))
        }
        Action::ThisWeek => {
            let weekday = reference.weekday().num_days_from_monday() as i64;
            Some((offset_days(reference, -weekday), reference))
        }
        Action::LastMonth => {
            let (year, month) = if reference.month() == 1 {
                (reference.year() - 1, 12)
            } else {
                (reference.year(), reference.month() - 1)
            };
            Some(month_range(year, month))
        }
        Action::ThisMonth => {
            let first = NaiveDate::from_ymd_opt(reference.year(), reference.month(), 1)?;
            Some((first, reference))
        }
        Action::StartOfWeek => {
            let weekday = reference.weekday().num_days_from_monday() as i64;
            let monday = offset_days(reference, -weekday);
            Some((monday, monday))
        }
        Action::StartOfMonth => {
            let first = NaiveDate::from_ymd_opt(reference.year(), reference.month(), 1)?;
            Some((first, first))
        }
        Action::Weekday(target) => {
            let mut back = (reference.weekday().num_days_from_monday() as i64
                - target.num_days_from_monday() as i64)
                .rem_euclid(7);
            if back == 0 {
                back = 7; // "on friday" said on a Friday means last week's
            }
            let day = offset_days(reference, -back);
            Some((day, day))
        }
        Action::MonthName(month) => {
            let year = if month > reference.month() {
                reference.year() - 1
            } else {
                reference.year()
            };
            Some(month_range(year, month))
        }
        Action::DateIso => {
            let year: i32 = caps.get(1)?.as_str().parse().ok()?;
            let month: u32 = caps.get(2)?.as_str().parse().ok()?;
            let day: u32 = caps.get(3)?.as_str().parse().ok()?;
            let date = NaiveDate::from_ymd_opt(year, month, day)?;
            Some((date, date))
        }
        Action::DateMdy => {
            let month: u32 = caps.get(1)?.as_str().parse().ok()?;
            let day: u32 = caps.get(2)?.as_str().parse().ok()?;
            let mut year: i32 = caps.get(3)?.as_str().parse().ok()?;
            if year < 100 {
                year += if year < 50 { 2000 } else { 1900 };
            }
            let date = NaiveDate::from_ymd_opt(year, month, day)?;
            Some((date, date))
        }
        Action::DateMd => {
            let month: u32 = caps.get(1)?.as_str().parse().ok()?;
            let day: u32 = caps.get(2)?.as_str().parse().ok()?;
            let date = NaiveDate::from_ymd_opt(reference.year(), month, day)?;
            let date = if date > reference {
                NaiveDate::from_ymd_opt(reference.year() - 1, month, day)?
            } else {
                date
            };
            Some((date, date))
        }
    }
}

fn offset_days(date: NaiveDate, days: i64) -> NaiveDate {
    if days >= 0 {
        date.checked_add_days(Days::new(days as u64)).unwrap_or(date)
    } else {
        date.checked_sub_days(Days::new((-days) as u64)).unwrap_or(date)
    }
}

/// First and last day of a calendar month.
fn month_range(year: i32, month: u32) -> (NaiveDate, NaiveDate) {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, 1, 1).expect("january exists"));
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .unwrap_or(first);
    let last = next_first.pred_opt().unwrap_or(first);
    (first, last)
}

/// Digit or word-form count. `couple` is 2, `few` is 3, `a`/`an` are 1.
fn parse_count(s: &str) -> Option<u32> {
    if let Ok(n) = s.parse::<u32>() {
        return Some(n);
    }
    match s {
        "one" | "a" | "an" => Some(1),
        "two" | "couple" => Some(2),
        "three" | "few" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "six" => Some(6),
        "seven" => Some(7),
        "eight" => Some(8),
        "nine" => Some(9),
        "ten" => Some(10),
        "eleven" => Some(11),
        "twelve" => Some(12),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-01-30 is a Friday.
    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 30).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn parse(query: &str) -> Option<TemporalRange> {
        parse_temporal(query, reference())
    }

    #[test]
    fn test_yesterday_and_today() {
        let r = parse("what did we discuss yesterday about auth?").unwrap();
        assert_eq!(r.start, date(2026, 1, 29));
        assert_eq!(r.end, date(2026, 1, 29));
        assert_eq!(r.matched, "yesterday");

        let r = parse("what happened today").unwrap();
        assert_eq!((r.start, r.end), (reference(), reference()));
    }

    #[test]
    fn test_days_ago_digit_and_word() {
        let r = parse("show me the conversation from 3 days ago").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 27), date(2026, 1, 27)));

        let r = parse("a couple days ago").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 28), date(2026, 1, 28)));

        let r = parse("a few days ago").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 27), date(2026, 1, 27)));
    }

    #[test]
    fn test_weeks_ago_is_fuzzy_window() {
        let r = parse("two weeks ago").unwrap();
        assert_eq!(r.start, date(2026, 1, 9)); // three weeks back
        assert_eq!(r.end, date(2026, 1, 23)); // one week back
    }

    #[test]
    fn test_last_week_starts_monday() {
        // Reference is Friday 2026-01-30; its Monday is 2026-01-26.
        let r = parse("what did we decide last week").unwrap();
        assert_eq!(r.start, date(2026, 1, 19));
        assert_eq!(r.end, date(2026, 1, 25));

        let r = parse("this week").unwrap();
        assert_eq!(r.start, date(2026, 1, 26));
        assert_eq!(r.end, reference());
    }

    #[test]
    fn test_months() {
        let r = parse("last month").unwrap();
        assert_eq!((r.start, r.end), (date(2025, 12, 1), date(2025, 12, 31)));

        let r = parse("two months ago").unwrap();
        assert_eq!((r.start, r.end), (date(2025, 11, 1), date(2025, 11, 30)));

        let r = parse("this month").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 1), reference()));
    }

    #[test]
    fn test_weekdays() {
        // Most recent Monday before Friday 2026-01-30
        let r = parse("what happened on monday?").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 26), date(2026, 1, 26)));

        // Same weekday as the reference goes back a full week
        let r = parse("last friday").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 23), date(2026, 1, 23)));
    }

    #[test]
    fn test_literal_dates() {
        let r = parse("conversations from 2026-01-15").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 15), date(2026, 1, 15)));

        let r = parse("around 1/15/26").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 15), date(2026, 1, 15)));

        // MM/DD in the future pivots to last year
        let r = parse("on 11/15").unwrap();
        assert_eq!((r.start, r.end), (date(2025, 11, 15), date(2025, 11, 15)));
    }

    #[test]
    fn test_period_words() {
        let r = parse("what did we decide recently?").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 23), reference()));

        let r = parse("previously discussed").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 16), date(2026, 1, 29)));

        let r = parse("before the refactor").unwrap();
        assert_eq!((r.start, r.end), (date(2025, 12, 31), date(2026, 1, 29)));
    }

    #[test]
    fn test_last_n_days() {
        let r = parse("last 10 days of work").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 20), reference()));

        let r = parse("past few days").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 27), reference()));
    }

    #[test]
    fn test_month_names_and_abbreviations() {
        let r = parse("find discussions from january").unwrap();
        assert_eq!((r.start, r.end), (date(2026, 1, 1), date(2026, 1, 31)));

        // A month later than the reference month is last year's
        let r = parse("in november").unwrap();
        assert_eq!((r.start, r.end), (date(2025, 11, 1), date(2025, 11, 30)));

        let r = parse("back in sept").unwrap();
        assert_eq!((r.start, r.end), (date(2025, 9, 1), date(2025, 9, 30)));
    }

    #[test]
    fn test_first_match_wins_ordering() {
        // "yesterday" is listed before literal dates
        let r = parse("yesterday, not 2026-01-15").unwrap();
        assert_eq!(r.matched, "yesterday");

        // Word-form N-ago beats "last N days" phrasing
        let r = parse("two days ago vs last 9 days").unwrap();
        assert_eq!(r.matched, "two days ago");
    }

    #[test]
    fn test_no_temporal_reference() {
        assert!(parse("when did we talk about auth?").is_none());
        assert!(parse("glicko rating implementation").is_none());
    }

    #[test]
    fn test_invalid_dates_are_skipped() {
        // 13/45 can't be a date; the query has nothing else temporal
        assert!(parse("see item 13/45 in the list").is_none());
    }

    #[test]
    fn test_contains_and_inverted_range() {
        let r = parse("last week").unwrap();
        assert!(r.contains("2026-01-20"));
        assert!(!r.contains("2026-01-26"));
        assert!(!r.contains("not-a-date"));

        let inverted = TemporalRange {
            start: date(2026, 1, 20),
            end: date(2026, 1, 10),
            matched: String::new(),
        };
        assert!(!inverted.contains("2026-01-15"));
    }
}
