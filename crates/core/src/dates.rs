//! Natural-language date and time resolution against the clinic calendar.
//!
//! All relative phrases are anchored to the caller supplied `reference_now`
//! converted into the clinic timezone, so tests and production resolve the
//! same text identically.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::text::{contains_phrase, normalize, word_padded};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateHeuristic {
    ExplicitDate,
    MonthName,
    Weekday,
    Relative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    NoMatch,
    Past,
    InvalidCalendarDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParsedDate {
    Resolved { date: NaiveDate, heuristic: DateHeuristic },
    Unresolved(UnresolvedReason),
}

impl ParsedDate {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Self::Resolved { date, .. } => Some(*date),
            Self::Unresolved(_) => None,
        }
    }
}

/// Calendar date of `reference_now` as seen from the clinic.
pub fn local_today(reference_now: DateTime<Utc>, timezone: Tz) -> NaiveDate {
    reference_now.with_timezone(&timezone).date_naive()
}

/// Resolves free text to a calendar date in the clinic timezone.
///
/// Phrases that refer backwards in time never resolve; they come back as
/// [`UnresolvedReason::Past`] so the caller can ask for a future date.
pub fn resolve(text: &str, reference_now: DateTime<Utc>, timezone: Tz) -> ParsedDate {
    let today = local_today(reference_now, timezone);
    let normalized = normalize(text);
    let padded = word_padded(text);

    if refers_to_past(&padded) {
        return ParsedDate::Unresolved(UnresolvedReason::Past);
    }

    explicit_numeric(&normalized, today)
        .or_else(|| month_name(&padded, today))
        .or_else(|| relative_phrase(&padded, today))
        .or_else(|| weekday_name(&padded, today))
        .unwrap_or(ParsedDate::Unresolved(UnresolvedReason::NoMatch))
}

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("static regex must compile")
});

static DAY_FIRST_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})[/.\-](\d{1,2})(?:[/.\-](\d{4}|\d{2}))?\b")
        .expect("static regex must compile")
});

static IN_DAYS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r" (?:in|after|بعد) (\d{1,3}) (?:days?|ايام|يوم|يومين) ")
        .expect("static regex must compile")
});

const MONTHS: &[(u32, &[&str])] = &[
    (1, &["january", "jan", "يناير", "كانون الثاني"]),
    (2, &["february", "feb", "فبراير", "شباط"]),
    (3, &["march", "mar", "مارس", "اذار"]),
    (4, &["april", "apr", "ابريل", "نيسان"]),
    (5, &["may", "مايو", "ايار"]),
    (6, &["june", "jun", "يونيو", "حزيران"]),
    (7, &["july", "jul", "يوليو", "تموز"]),
    (8, &["august", "aug", "اغسطس", "اب"]),
    (9, &["september", "sept", "sep", "سبتمبر", "ايلول"]),
    (10, &["october", "oct", "اكتوبر", "تشرين الاول"]),
    (11, &["november", "nov", "نوفمبر", "تشرين الثاني"]),
    (12, &["december", "dec", "ديسمبر", "كانون الاول"]),
];

const WEEKDAYS: &[(Weekday, &[&str])] = &[
    (Weekday::Mon, &["monday", "mon", "الاثنين", "الاتنين"]),
    (Weekday::Tue, &["tuesday", "tues", "tue", "الثلاثاء", "الثلاثا"]),
    (Weekday::Wed, &["wednesday", "wed", "الاربعاء", "الاربعا", "اربعاء"]),
    (Weekday::Thu, &["thursday", "thurs", "thur", "thu", "الخميس", "خميس"]),
    (Weekday::Fri, &["friday", "fri", "الجمعه", "جمعه"]),
    (Weekday::Sat, &["saturday", "sat", "السبت", "سبت"]),
    (Weekday::Sun, &["sunday", "sun", "الاحد"]),
];

static MONTH_DAY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r" (\d{{1,2}})(?:st|nd|rd|th)? (?:of )?({}) (?:(\d{{4}}) )?",
        month_alternation()
    ))
    .expect("static regex must compile")
});

static MONTH_NAME_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r" ({}) (\d{{1,2}})(?:st|nd|rd|th)? (?:(\d{{4}}) )?",
        month_alternation()
    ))
    .expect("static regex must compile")
});

fn month_alternation() -> String {
    let mut names: Vec<&str> =
        MONTHS.iter().flat_map(|(_, names)| names.iter().copied()).collect();
    names.sort_by_key(|name| std::cmp::Reverse(name.chars().count()));
    names.join("|")
}

fn month_number(name: &str) -> Option<u32> {
    MONTHS.iter().find(|(_, names)| names.contains(&name)).map(|(month, _)| *month)
}

fn refers_to_past(padded: &str) -> bool {
    const PAST_PHRASES: &[&str] = &[
        "yesterday",
        "last week",
        "last month",
        "امس",
        "مبارح",
        "امبارح",
        "البارحه",
        "الاسبوع الماضي",
    ];
    if PAST_PHRASES.iter().any(|phrase| contains_phrase(padded, phrase)) {
        return true;
    }

    WEEKDAYS.iter().flat_map(|(_, names)| names.iter()).any(|name| {
        contains_phrase(padded, &format!("last {name}"))
            || contains_phrase(padded, &format!("{name} الماضي"))
    })
}

fn explicit_numeric(normalized: &str, today: NaiveDate) -> Option<ParsedDate> {
    if let Some(captures) = ISO_DATE.captures(normalized) {
        let year = captures[1].parse::<i32>().ok()?;
        let month = captures[2].parse::<u32>().ok()?;
        let day = captures[3].parse::<u32>().ok()?;
        return Some(calendar_date(year, month, day, today));
    }

    let captures = DAY_FIRST_DATE.captures(normalized)?;
    let day = captures[1].parse::<u32>().ok()?;
    let month = captures[2].parse::<u32>().ok()?;
    match captures.get(3) {
        Some(year) => {
            let year = expand_year(year.as_str())?;
            Some(calendar_date(year, month, day, today))
        }
        None => Some(yearless_date(month, day, today, DateHeuristic::ExplicitDate)),
    }
}

fn month_name(padded: &str, today: NaiveDate) -> Option<ParsedDate> {
    let (day, month, year) = if let Some(captures) = MONTH_DAY_FIRST.captures(padded) {
        (captures.get(1)?.as_str(), captures.get(2)?.as_str(), captures.get(3))
    } else {
        let captures = MONTH_NAME_FIRST.captures(padded)?;
        (captures.get(2)?.as_str(), captures.get(1)?.as_str(), captures.get(3))
    };

    let day = day.parse::<u32>().ok()?;
    let month = month_number(month)?;
    match year {
        Some(year) => {
            let year = year.as_str().parse::<i32>().ok()?;
            Some(match calendar_date(year, month, day, today) {
                ParsedDate::Resolved { date, .. } => {
                    ParsedDate::Resolved { date, heuristic: DateHeuristic::MonthName }
                }
                unresolved => unresolved,
            })
        }
        None => Some(yearless_date(month, day, today, DateHeuristic::MonthName)),
    }
}

fn relative_phrase(padded: &str, today: NaiveDate) -> Option<ParsedDate> {
    const RELATIVE: &[(&[&str], i64)] = &[
        (&["day after tomorrow", "بعد بكره", "بعد بكرا", "بعد غد", "بعد الغد"], 2),
        (&["tomorrow", "tmrw", "بكره", "بكرا", "غدا", "الغد"], 1),
        (&["today", "tonight", "اليوم", "النهارده"], 0),
        (&["next week", "in a week", "الاسبوع الجاي", "الاسبوع القادم", "بعد اسبوع"], 7),
    ];

    for (phrases, offset) in RELATIVE {
        if phrases.iter().any(|phrase| contains_phrase(padded, phrase)) {
            return Some(ParsedDate::Resolved {
                date: today + Duration::days(*offset),
                heuristic: DateHeuristic::Relative,
            });
        }
    }

    let captures = IN_DAYS.captures(padded)?;
    let offset = captures[1].parse::<i64>().ok()?;
    Some(ParsedDate::Resolved {
        date: today + Duration::days(offset),
        heuristic: DateHeuristic::Relative,
    })
}

fn weekday_name(padded: &str, today: NaiveDate) -> Option<ParsedDate> {
    let target = WEEKDAYS
        .iter()
        .find(|(_, names)| names.iter().any(|name| contains_phrase(padded, name)))
        .map(|(weekday, _)| *weekday)?;

    let current = today.weekday().num_days_from_monday();
    let wanted = target.num_days_from_monday();
    let ahead = match (wanted + 7 - current) % 7 {
        0 => 7,
        days => days,
    };

    Some(ParsedDate::Resolved {
        date: today + Duration::days(i64::from(ahead)),
        heuristic: DateHeuristic::Weekday,
    })
}

fn expand_year(raw: &str) -> Option<i32> {
    let year = raw.parse::<i32>().ok()?;
    Some(if raw.len() == 2 { 2000 + year } else { year })
}

fn calendar_date(year: i32, month: u32, day: u32, today: NaiveDate) -> ParsedDate {
    match NaiveDate::from_ymd_opt(year, month, day) {
        Some(date) if date < today => ParsedDate::Unresolved(UnresolvedReason::Past),
        Some(date) => ParsedDate::Resolved { date, heuristic: DateHeuristic::ExplicitDate },
        None => ParsedDate::Unresolved(UnresolvedReason::InvalidCalendarDate),
    }
}

fn yearless_date(month: u32, day: u32, today: NaiveDate, heuristic: DateHeuristic) -> ParsedDate {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    let candidate = match this_year {
        Some(date) if date >= today => Some(date),
        _ => (1..=4).find_map(|offset| NaiveDate::from_ymd_opt(today.year() + offset, month, day)),
    };

    match candidate {
        Some(date) => ParsedDate::Resolved { date, heuristic },
        None => ParsedDate::Unresolved(UnresolvedReason::InvalidCalendarDate),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DayPeriod {
    Morning,
    Noon,
    Afternoon,
    Evening,
    Night,
}

impl DayPeriod {
    fn default_time(self) -> Option<NaiveTime> {
        let hour = match self {
            Self::Morning => 9,
            Self::Noon => 12,
            Self::Afternoon => 15,
            Self::Evening => 18,
            Self::Night => 20,
        };
        NaiveTime::from_hms_opt(hour, 0, 0)
    }

    fn meridiem(self) -> Meridiem {
        match self {
            Self::Morning => Meridiem::Am,
            _ => Meridiem::Pm,
        }
    }
}

static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2}):(\d{2})\s*(am|pm)?\b").expect("static regex must compile")
});

static MERIDIEM_HOUR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\s*(am|pm)\b").expect("static regex must compile"));

static ARABIC_MARKED_HOUR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\s*(صباحا|الصبح|الصباح|ظهرا|الظهر|عصرا|العصر|مساء|المساء|المسا|بالليل|الليل|ليلا|ص|م)\b")
        .expect("static regex must compile")
});

static AT_HOUR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\bat|\baround|الساعه|ساعه)\s*(\d{1,2})\b|\b(\d{1,2})\s*o'?clock\b")
        .expect("static regex must compile")
});

static LONE_HOUR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,2})\s*$").expect("static regex must compile"));

static ANY_HOUR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\b").expect("static regex must compile"));

/// Resolves free text to a wall-clock time.
///
/// Hours written without a meridiem are read as clinic hours: 1 through 7
/// mean the afternoon, 8 through 12 are taken as written.
pub fn resolve_time(text: &str) -> Option<NaiveTime> {
    let normalized = normalize(text).replace("a.m.", "am").replace("p.m.", "pm");
    let period = day_period(&word_padded(&normalized));

    if let Some(captures) = CLOCK_TIME.captures(&normalized) {
        let hour = captures[1].parse::<u32>().ok()?;
        let minute = captures[2].parse::<u32>().ok()?;
        let meridiem = captures
            .get(3)
            .map(|marker| english_meridiem(marker.as_str()))
            .or_else(|| arabic_marker(&normalized))
            .or_else(|| period.map(DayPeriod::meridiem));
        return clock(hour, minute, meridiem);
    }

    if let Some(captures) = MERIDIEM_HOUR.captures(&normalized) {
        let hour = captures[1].parse::<u32>().ok()?;
        return clock(hour, 0, Some(english_meridiem(&captures[2])));
    }

    if let Some(captures) = ARABIC_MARKED_HOUR.captures(&normalized) {
        let hour = captures[1].parse::<u32>().ok()?;
        let minute = match captures.get(2) {
            Some(minute) => minute.as_str().parse::<u32>().ok()?,
            None => 0,
        };
        return clock(hour, minute, arabic_meridiem(&captures[3]));
    }

    let explicit_hour = AT_HOUR
        .captures(&normalized)
        .and_then(|captures| captures.get(1).or_else(|| captures.get(2)))
        .or_else(|| LONE_HOUR.captures(&normalized).and_then(|captures| captures.get(1)));
    if let Some(hour) = explicit_hour {
        let hour = hour.as_str().parse::<u32>().ok()?;
        return clock(hour, 0, period.map(DayPeriod::meridiem));
    }

    let period = period?;
    if let Some(captures) = ANY_HOUR.captures(&normalized) {
        let hour = captures[1].parse::<u32>().ok()?;
        return clock(hour, 0, Some(period.meridiem()));
    }
    period.default_time()
}

fn day_period(padded: &str) -> Option<DayPeriod> {
    const PERIODS: &[(DayPeriod, &[&str])] = &[
        (DayPeriod::Afternoon, &["afternoon", "بعد الظهر", "العصر", "عصرا"]),
        (DayPeriod::Morning, &["morning", "صباحا", "الصبح", "الصباح"]),
        (DayPeriod::Noon, &["noon", "midday", "الظهر", "ظهرا"]),
        (DayPeriod::Evening, &["evening", "المساء", "مساء", "المسا"]),
        (DayPeriod::Night, &["night", "tonight", "الليل", "ليلا", "بالليل"]),
    ];

    PERIODS
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|phrase| contains_phrase(padded, phrase)))
        .map(|(period, _)| *period)
}

fn english_meridiem(marker: &str) -> Meridiem {
    if marker == "am" {
        Meridiem::Am
    } else {
        Meridiem::Pm
    }
}

fn arabic_meridiem(marker: &str) -> Option<Meridiem> {
    match marker {
        "صباحا" | "الصبح" | "الصباح" | "ص" => Some(Meridiem::Am),
        "" => None,
        _ => Some(Meridiem::Pm),
    }
}

fn arabic_marker(normalized: &str) -> Option<Meridiem> {
    let padded = word_padded(normalized);
    if contains_phrase(&padded, "ص") {
        Some(Meridiem::Am)
    } else if contains_phrase(&padded, "م") {
        Some(Meridiem::Pm)
    } else {
        None
    }
}

fn clock(hour: u32, minute: u32, meridiem: Option<Meridiem>) -> Option<NaiveTime> {
    let hour = match meridiem {
        Some(Meridiem::Am) if hour == 12 => 0,
        Some(Meridiem::Am) if hour < 12 => hour,
        Some(Meridiem::Pm) if hour == 12 => 12,
        Some(Meridiem::Pm) if hour < 12 => hour + 12,
        Some(_) => return None,
        None if (1..=7).contains(&hour) => hour + 12,
        None => hour,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleViolation {
    ClosedWeekday(Weekday),
    OutsideHours,
    NotInFuture,
}

/// Opening hours the booking flow validates dates and times against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusinessHours {
    pub opening: NaiveTime,
    pub closing: NaiveTime,
    pub closed_weekdays: Vec<Weekday>,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            opening: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            closing: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN),
            closed_weekdays: vec![Weekday::Fri],
        }
    }
}

impl BusinessHours {
    pub fn is_open_on(&self, weekday: Weekday) -> bool {
        !self.closed_weekdays.contains(&weekday)
    }

    pub fn check_date(&self, date: NaiveDate, today: NaiveDate) -> Result<(), ScheduleViolation> {
        if date < today {
            return Err(ScheduleViolation::NotInFuture);
        }
        if !self.is_open_on(date.weekday()) {
            return Err(ScheduleViolation::ClosedWeekday(date.weekday()));
        }
        Ok(())
    }

    /// Validates a full slot: open weekday, inside opening hours and strictly
    /// after `reference_now` once placed in the clinic timezone.
    pub fn check_slot(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        reference_now: DateTime<Utc>,
        timezone: Tz,
    ) -> Result<(), ScheduleViolation> {
        self.check_date(date, local_today(reference_now, timezone))?;
        if time < self.opening || time >= self.closing {
            return Err(ScheduleViolation::OutsideHours);
        }

        let starts_at = timezone
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .ok_or(ScheduleViolation::OutsideHours)?;
        if starts_at.with_timezone(&Utc) <= reference_now {
            return Err(ScheduleViolation::NotInFuture);
        }
        Ok(())
    }
}
