//! Date-math expression evaluation
//!
//! Evaluates Elasticsearch-style date math into concrete RFC 3339
//! timestamps:
//!
//! ```text
//! expr     := anchor op* rounding?
//! anchor   := "now" | date "||"
//! op       := ('+' | '-') integer unit
//! rounding := '/' unit
//! unit     := y | M | w | d | h | m | s
//! ```
//!
//! Operations apply left to right with calendar semantics (adding a month
//! to Jan 31 clamps to the last day of February). Rounding truncates to the
//! start of the unit; [`RoundingMode::Up`] instead rounds to the last
//! millisecond of the unit, which range upper bounds use so that
//! `[2024-01-01 TO 2024-01-01||/M]` covers all of January.
//!
//! Anything that is not date math (no `now` anchor and no `||` separator)
//! is not touched.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, Offset,
    SecondsFormat, TimeZone, Timelike, Utc,
};

/// Calendar units accepted in operations and rounding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateUnit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl DateUnit {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'y' => Some(DateUnit::Year),
            'M' => Some(DateUnit::Month),
            'w' => Some(DateUnit::Week),
            'd' => Some(DateUnit::Day),
            'h' | 'H' => Some(DateUnit::Hour),
            'm' => Some(DateUnit::Minute),
            's' => Some(DateUnit::Second),
            _ => None,
        }
    }
}

/// Which way rounding resolves
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RoundingMode {
    /// Start of the unit
    #[default]
    Down,
    /// Last millisecond of the unit
    Up,
}

/// Evaluator pinned to a reference instant and a default timezone
///
/// All `now` anchors resolve against the same instant, so every expression
/// in one query agrees on the time.
#[derive(Clone, Copy, Debug)]
pub struct DateMathEvaluator {
    now: DateTime<FixedOffset>,
}

impl DateMathEvaluator {
    pub fn new(reference: DateTime<Utc>, timezone: FixedOffset) -> Self {
        Self {
            now: reference.with_timezone(&timezone),
        }
    }

    /// Reference from the system clock
    pub fn system(timezone: FixedOffset) -> Self {
        Self::new(Utc::now(), timezone)
    }

    pub fn reference(&self) -> DateTime<FixedOffset> {
        self.now
    }

    /// Whether an expression is date math at all (as opposed to a literal
    /// value this evaluator leaves alone)
    pub fn is_date_math(expr: &str) -> bool {
        expr == "now" || expr.starts_with("now+") || expr.starts_with("now-")
            || expr.starts_with("now/") || expr.contains("||")
    }

    /// Evaluate an expression to an RFC 3339 timestamp
    ///
    /// Returns `None` for anything unparseable; callers leave such values
    /// untouched.
    pub fn evaluate(&self, expr: &str, mode: RoundingMode) -> Option<String> {
        if !Self::is_date_math(expr) {
            return None;
        }

        let (anchor, rest) = self.parse_anchor(expr)?;
        let mut current = anchor;
        let mut rest = rest;

        while !rest.is_empty() {
            let mut chars = rest.chars();
            match chars.next()? {
                sign @ ('+' | '-') => {
                    let digits: String =
                        chars.clone().take_while(|c| c.is_ascii_digit()).collect();
                    if digits.is_empty() {
                        return None;
                    }
                    let amount: i64 = digits.parse().ok()?;
                    let amount = if sign == '-' { -amount } else { amount };
                    let unit = DateUnit::from_char(rest.chars().nth(1 + digits.len())?)?;
                    current = add_unit(current, amount, unit)?;
                    rest = &rest[1 + digits.len() + 1..];
                }
                '/' => {
                    let unit = DateUnit::from_char(chars.next()?)?;
                    // rounding must be the final component
                    if chars.next().is_some() {
                        return None;
                    }
                    current = match mode {
                        RoundingMode::Down => round_down(current, unit)?,
                        RoundingMode::Up => round_up(current, unit)?,
                    };
                    rest = "";
                }
                _ => return None,
            }
        }

        Some(current.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    fn parse_anchor<'e>(&self, expr: &'e str) -> Option<(DateTime<FixedOffset>, &'e str)> {
        if let Some(rest) = expr.strip_prefix("now") {
            return Some((self.now, rest));
        }
        let (date_part, rest) = expr.split_once("||")?;
        Some((self.parse_date(date_part)?, rest))
    }

    /// Accepts RFC 3339, `yyyy-MM-ddTHH:mm[:ss]`, `yyyy-MM-dd`, `yyyy-MM`,
    /// and `yyyy`; naive forms take the evaluator's timezone
    fn parse_date(&self, text: &str) -> Option<DateTime<FixedOffset>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt);
        }
        let tz = self.now.offset().fix();
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                return tz.from_local_datetime(&naive).single();
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return tz.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single();
        }
        // coarse anchors: yyyy-MM and yyyy
        let mut parts = text.splitn(2, '-');
        let year: i32 = parts.next()?.parse().ok()?;
        let month: u32 = match parts.next() {
            Some(m) => m.parse().ok()?,
            None => 1,
        };
        let date = NaiveDate::from_ymd_opt(year, month, 1)?;
        tz.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
    }
}

fn add_unit(
    dt: DateTime<FixedOffset>,
    amount: i64,
    unit: DateUnit,
) -> Option<DateTime<FixedOffset>> {
    match unit {
        DateUnit::Year | DateUnit::Month => {
            let months = if unit == DateUnit::Year {
                amount.checked_mul(12)?
            } else {
                amount
            };
            let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
            if months >= 0 {
                dt.checked_add_months(Months::new(magnitude))
            } else {
                dt.checked_sub_months(Months::new(magnitude))
            }
        }
        DateUnit::Week => dt.checked_add_signed(Duration::try_weeks(amount)?),
        DateUnit::Day => dt.checked_add_signed(Duration::try_days(amount)?),
        DateUnit::Hour => dt.checked_add_signed(Duration::try_hours(amount)?),
        DateUnit::Minute => dt.checked_add_signed(Duration::try_minutes(amount)?),
        DateUnit::Second => dt.checked_add_signed(Duration::try_seconds(amount)?),
    }
}

fn round_down(dt: DateTime<FixedOffset>, unit: DateUnit) -> Option<DateTime<FixedOffset>> {
    let offset = *dt.offset();
    let naive = dt.naive_local();
    let date = naive.date();
    let truncated = match unit {
        DateUnit::Second => naive.with_nanosecond(0)?,
        DateUnit::Minute => naive.with_nanosecond(0)?.with_second(0)?,
        DateUnit::Hour => naive
            .with_nanosecond(0)?
            .with_second(0)?
            .with_minute(0)?,
        DateUnit::Day => date.and_hms_opt(0, 0, 0)?,
        DateUnit::Week => {
            let monday =
                date.checked_sub_signed(Duration::try_days(
                    date.weekday().num_days_from_monday() as i64,
                )?)?;
            monday.and_hms_opt(0, 0, 0)?
        }
        DateUnit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?
            .and_hms_opt(0, 0, 0)?,
        DateUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_hms_opt(0, 0, 0)?,
    };
    offset.from_local_datetime(&truncated).single()
}

fn round_up(dt: DateTime<FixedOffset>, unit: DateUnit) -> Option<DateTime<FixedOffset>> {
    let start = round_down(dt, unit)?;
    let next = add_unit(start, 1, unit)?;
    next.checked_sub_signed(Duration::try_milliseconds(1)?)
}
