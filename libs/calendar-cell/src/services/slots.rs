// libs/calendar-cell/src/services/slots.rs
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use regex::Regex;

use shared_database::supabase::encode_timestamp;

use crate::models::{AppointmentSlot, CalendarError, DoctorAvailability, SlotCounts};

pub const MIN_SLOT_MINUTES: u32 = 5;
pub const MAX_SLOT_MINUTES: u32 = 240;
pub const MAX_BULK_DATES: usize = 366;

static HHMM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("HH:mm pattern compiles"));

// ==============================================================================
// TIME OF DAY
// ==============================================================================

/// `"HH:mm"` (24-hour) to minutes since midnight.
pub fn parse_hhmm(raw: &str) -> Result<u32, CalendarError> {
    let caps = HHMM
        .captures(raw.trim())
        .ok_or_else(|| CalendarError::InvalidTimeFormat(raw.to_string()))?;
    let hours: u32 = caps[1].parse().map_err(|_| CalendarError::InvalidTimeFormat(raw.to_string()))?;
    let minutes: u32 = caps[2].parse().map_err(|_| CalendarError::InvalidTimeFormat(raw.to_string()))?;
    Ok(hours * 60 + minutes)
}

pub fn format_hhmm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// A validated working day: `start < end`, break fully inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub start: u32,
    pub end: u32,
    pub break_window: Option<(u32, u32)>,
}

impl WorkingHours {
    pub fn parse(
        start: &str,
        end: &str,
        break_start: Option<&str>,
        break_end: Option<&str>,
    ) -> Result<Self, CalendarError> {
        let start = parse_hhmm(start)?;
        let end = parse_hhmm(end)?;
        if end <= start {
            return Err(CalendarError::InvalidSchedule(
                "End time must be after start time".to_string(),
            ));
        }

        let break_start = break_start.map(str::trim).filter(|s| !s.is_empty());
        let break_end = break_end.map(str::trim).filter(|s| !s.is_empty());
        let break_window = match (break_start, break_end) {
            (None, None) => None,
            (Some(bs), Some(be)) => {
                let (bs, be) = (parse_hhmm(bs)?, parse_hhmm(be)?);
                if be <= bs || bs < start || be > end {
                    return Err(CalendarError::InvalidSchedule(
                        "Break must end after it starts and lie within working hours".to_string(),
                    ));
                }
                Some((bs, be))
            }
            _ => {
                return Err(CalendarError::InvalidSchedule(
                    "Break start and end times must be given together".to_string(),
                ))
            }
        };

        Ok(Self { start, end, break_window })
    }

    /// Optional-field variant used by request bodies: `None` when neither end is given.
    pub fn parse_optional(
        start: Option<&str>,
        end: Option<&str>,
        break_start: Option<&str>,
        break_end: Option<&str>,
    ) -> Result<Option<Self>, CalendarError> {
        let start = start.map(str::trim).filter(|s| !s.is_empty());
        let end = end.map(str::trim).filter(|s| !s.is_empty());
        match (start, end) {
            (None, None) => Ok(None),
            (Some(s), Some(e)) => Self::parse(s, e, break_start, break_end).map(Some),
            _ => Err(CalendarError::InvalidSchedule(
                "Start and end times must be given together".to_string(),
            )),
        }
    }

    pub fn from_availability(record: &DoctorAvailability) -> Result<Option<Self>, CalendarError> {
        if !record.has_working_hours() {
            return Ok(None);
        }
        Self::parse_optional(
            record.start_time.as_deref(),
            record.end_time.as_deref(),
            record.break_start_time.as_deref(),
            record.break_end_time.as_deref(),
        )
    }

    pub fn start_str(&self) -> String {
        format_hhmm(self.start)
    }

    pub fn end_str(&self) -> String {
        format_hhmm(self.end)
    }

    pub fn break_strs(&self) -> (Option<String>, Option<String>) {
        match self.break_window {
            Some((bs, be)) => (Some(format_hhmm(bs)), Some(format_hhmm(be))),
            None => (None, None),
        }
    }
}

pub fn slot_duration(requested: Option<u32>, default: u32) -> Result<u32, CalendarError> {
    let duration = requested.unwrap_or(default);
    if (MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&duration) {
        Ok(duration)
    } else {
        Err(CalendarError::InvalidSchedule(format!(
            "Slot duration must be between {} and {} minutes",
            MIN_SLOT_MINUTES, MAX_SLOT_MINUTES
        )))
    }
}

// ==============================================================================
// SLOT WALK
// ==============================================================================

/// Fixed-step windows over the working day. A step starting inside the break
/// jumps the cursor to the break end instead of advancing by `duration`.
pub fn slot_windows(hours: &WorkingHours, duration: u32) -> Vec<(u32, u32)> {
    let mut windows = Vec::new();
    if duration == 0 {
        return windows;
    }
    let mut cursor = hours.start;
    while cursor + duration <= hours.end {
        if let Some((break_start, break_end)) = hours.break_window {
            if cursor >= break_start && cursor < break_end {
                cursor = break_end;
                continue;
            }
        }
        windows.push((cursor, cursor + duration));
        cursor += duration;
    }
    windows
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotPlan {
    pub to_create: Vec<(String, String)>,
    pub preserved: usize,
}

/// Windows to insert, skipping any that exactly match a booked slot.
pub fn plan_slots(hours: &WorkingHours, duration: u32, booked: &[AppointmentSlot]) -> SlotPlan {
    let taken: HashSet<(&str, &str)> = booked
        .iter()
        .map(|s| (s.start_time.as_str(), s.end_time.as_str()))
        .collect();

    slot_windows(hours, duration)
        .into_iter()
        .map(|(start, end)| (format_hhmm(start), format_hhmm(end)))
        .fold(SlotPlan::default(), |mut plan, (start, end)| {
            if taken.contains(&(start.as_str(), end.as_str())) {
                plan.preserved += 1;
            } else {
                plan.to_create.push((start, end));
            }
            plan
        })
}

pub fn count_slots<'a, I>(slots: I) -> SlotCounts
where
    I: IntoIterator<Item = &'a AppointmentSlot>,
{
    slots.into_iter().fold(SlotCounts::default(), |mut counts, slot| {
        counts.total += 1;
        if slot.is_booked {
            counts.booked += 1;
        } else {
            counts.available += 1;
        }
        counts
    })
}

/// Appends `[timestamp] note` on its own line, keeping earlier notes.
pub fn append_note(existing: Option<&str>, note: &str, at: DateTime<Utc>) -> String {
    let entry = format!("[{}] {}", at.format("%Y-%m-%d %H:%M"), note);
    match existing.map(str::trim_end).filter(|s| !s.is_empty()) {
        Some(prior) => format!("{}\n{}", prior, entry),
        None => entry,
    }
}

// ==============================================================================
// CALENDAR DAYS
// ==============================================================================

/// Accepts `YYYY-MM-DD` or any RFC 3339 timestamp; the time component is dropped.
pub fn parse_day(raw: &str) -> Result<NaiveDate, CalendarError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc).date_naive()))
        .map_err(|_| CalendarError::InvalidDate(raw.to_string()))
}

/// Parsed, deduplicated, ascending. Empty or oversized lists are rejected.
pub fn parse_days(raw: &[String]) -> Result<Vec<NaiveDate>, CalendarError> {
    if raw.is_empty() {
        return Err(CalendarError::MissingFields(
            "Doctor ID and dates array are required".to_string(),
        ));
    }
    if raw.len() > MAX_BULK_DATES {
        return Err(CalendarError::TooManyDates {
            max: MAX_BULK_DATES,
            got: raw.len(),
        });
    }
    let days: BTreeSet<NaiveDate> = raw.iter().map(|d| parse_day(d)).collect::<Result<_, _>>()?;
    Ok(days.into_iter().collect())
}

pub fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

pub fn day_end(day: NaiveDate) -> DateTime<Utc> {
    let last = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    day.and_time(last).and_utc()
}

/// Normalized storage key for a day.
pub fn encode_day(day: NaiveDate) -> String {
    encode_timestamp(&day_start(day))
}

/// Same-calendar-day match: stored timestamps may carry stray time components.
pub fn day_filter(column: &str, day: NaiveDate) -> String {
    span_filter(column, day, day)
}

pub fn span_filter(column: &str, first: NaiveDate, last: NaiveDate) -> String {
    format!(
        "{col}=gte.{}&{col}=lte.{}",
        encode_timestamp(&day_start(first)),
        encode_timestamp(&day_end(last)),
        col = column
    )
}

/// Same-calendar-day match for any of `days`, as one PostgREST `or` group.
pub fn days_filter(column: &str, days: &[NaiveDate]) -> String {
    let spans: Vec<String> = days
        .iter()
        .map(|day| {
            format!(
                "and({col}.gte.{},{col}.lte.{})",
                encode_timestamp(&day_start(*day)),
                encode_timestamp(&day_end(*day)),
                col = column
            )
        })
        .collect();
    format!("or=({})", spans.join(","))
}

fn days_of_year(year: i32) -> Result<impl Iterator<Item = NaiveDate>, CalendarError> {
    let first = NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| CalendarError::InvalidDate(year.to_string()))?;
    Ok(first.iter_days().take_while(move |d| d.year() == year))
}

pub fn sundays_in_year(year: i32) -> Result<Vec<NaiveDate>, CalendarError> {
    Ok(days_of_year(year)?.filter(|d| d.weekday() == Weekday::Sun).collect())
}

pub fn working_days_in_year(year: i32) -> Result<Vec<NaiveDate>, CalendarError> {
    Ok(days_of_year(year)?.filter(|d| d.weekday() != Weekday::Sun).collect())
}

pub fn year_span(year: i32) -> Result<(NaiveDate, NaiveDate), CalendarError> {
    let first = NaiveDate::from_ymd_opt(year, 1, 1);
    let last = NaiveDate::from_ymd_opt(year, 12, 31);
    first
        .zip(last)
        .ok_or_else(|| CalendarError::InvalidDate(year.to_string()))
}

// ==============================================================================
// UPSERT PLANNING
// ==============================================================================

/// Splits target days into rows to update (by existing id) and rows to insert,
/// matching existing records by calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertPlan {
    pub updates: Vec<(String, NaiveDate)>,
    pub inserts: Vec<NaiveDate>,
}

pub fn index_by_day(existing: &[DoctorAvailability]) -> HashMap<NaiveDate, &DoctorAvailability> {
    let mut by_day = HashMap::new();
    for record in existing {
        by_day.entry(record.day()).or_insert(record);
    }
    by_day
}

pub fn plan_upserts(existing: &[DoctorAvailability], days: &[NaiveDate]) -> UpsertPlan {
    let by_day = index_by_day(existing);
    days.iter().fold(UpsertPlan::default(), |mut plan, day| {
        match by_day.get(day) {
            Some(record) => plan.updates.push((record.id.clone(), *day)),
            None => plan.inserts.push(*day),
        }
        plan
    })
}

/// Whether default hours may be written over an existing record. Holidays,
/// days off and days with different explicit hours are kept unless overriding.
pub fn accepts_default_hours(
    existing: Option<&DoctorAvailability>,
    hours: &WorkingHours,
    override_existing: bool,
) -> bool {
    if override_existing {
        return true;
    }
    let Some(record) = existing else { return true };
    if record.is_holiday || !record.is_available {
        return false;
    }
    match WorkingHours::from_availability(record) {
        Ok(Some(current)) => current == *hours,
        Ok(None) => true,
        Err(_) => false,
    }
}
