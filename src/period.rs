use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Semester {
    #[serde(alias = "ganjil")]
    Odd,
    #[serde(alias = "genap")]
    Even,
}

impl Semester {
    pub fn as_str(self) -> &'static str {
        match self {
            Semester::Odd => "odd",
            Semester::Even => "even",
        }
    }

    pub fn parse(raw: &str) -> Option<Semester> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "odd" | "ganjil" => Some(Semester::Odd),
            "even" | "genap" => Some(Semester::Even),
            _ => None,
        }
    }
}

/// Academic year plus semester. Used to scope teaching assignments and to
/// stamp attendance records at creation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AcademicPeriod {
    pub year: String,
    pub semester: Semester,
}

impl AcademicPeriod {
    /// Builds a period from caller-supplied parts, rejecting year strings that
    /// are not `NNNN/NNNN` with consecutive years.
    pub fn new(year: &str, semester: Semester) -> Result<Self, CoreError> {
        let year = year.trim();
        let Some((a, b)) = year.split_once('/') else {
            return Err(CoreError::BadRequest(format!(
                "academic year must be YYYY/YYYY, got {year:?}"
            )));
        };
        let parse = |s: &str| -> Option<i32> {
            if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        };
        match (parse(a), parse(b)) {
            (Some(first), Some(second)) if second == first + 1 => Ok(Self {
                year: year.to_string(),
                semester,
            }),
            _ => Err(CoreError::BadRequest(format!(
                "academic year must be two consecutive years, got {year:?}"
            ))),
        }
    }
}

impl fmt::Display for AcademicPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.semester.as_str())
    }
}

/// July..=December is the odd semester of `<y>/<y+1>`; January..=June is the
/// even semester of `<y-1>/<y>`.
pub fn resolve(date: NaiveDate) -> AcademicPeriod {
    let y = date.year();
    if date.month() >= 7 {
        AcademicPeriod {
            year: format!("{}/{}", y, y + 1),
            semester: Semester::Odd,
        }
    } else {
        AcademicPeriod {
            year: format!("{}/{}", y - 1, y),
            semester: Semester::Even,
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn current_period(&self) -> AcademicPeriod {
        resolve(self.today())
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Pins the calendar date while timestamps keep moving, so records created
/// under a pinned date still get distinct `updatedAt` values.
pub struct FixedClock {
    date: NaiveDate,
}

impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self { date }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().time();
        self.date.and_time(wall).and_utc()
    }

    fn today(&self) -> NaiveDate {
        self.date
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, CoreError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| CoreError::BadRequest(format!("date must be YYYY-MM-DD, got {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    #[test]
    fn second_half_of_year_is_odd_semester() {
        let p = resolve(d(2025, 9, 1));
        assert_eq!(p.year, "2025/2026");
        assert_eq!(p.semester, Semester::Odd);

        let p = resolve(d(2025, 7, 1));
        assert_eq!(p.year, "2025/2026");
        assert_eq!(p.semester, Semester::Odd);

        let p = resolve(d(2025, 12, 31));
        assert_eq!(p.year, "2025/2026");
        assert_eq!(p.semester, Semester::Odd);
    }

    #[test]
    fn first_half_of_year_is_even_semester_of_previous_start() {
        let p = resolve(d(2026, 1, 1));
        assert_eq!(p.year, "2025/2026");
        assert_eq!(p.semester, Semester::Even);

        let p = resolve(d(2026, 6, 30));
        assert_eq!(p.year, "2025/2026");
        assert_eq!(p.semester, Semester::Even);
    }

    #[test]
    fn year_prefix_matches_calendar_year_only_when_odd() {
        let mut day = d(2024, 1, 1);
        while day < d(2026, 1, 1) {
            let p = resolve(day);
            let first: i32 = p.year[..4].parse().expect("numeric year");
            let odd = (7..=12).contains(&day.month());
            assert_eq!(p.semester == Semester::Odd, odd, "{day}");
            assert_eq!(first == day.year(), odd, "{day}");
            day = day.succ_opt().expect("next day");
        }
    }

    #[test]
    fn fixed_clock_pins_today() {
        let clock = FixedClock::new(d(2025, 9, 1));
        assert_eq!(clock.today(), d(2025, 9, 1));
        assert_eq!(clock.now().date_naive(), d(2025, 9, 1));
        assert_eq!(clock.current_period().year, "2025/2026");
    }

    #[test]
    fn explicit_period_validates_year_shape() {
        assert!(AcademicPeriod::new("2025/2026", Semester::Odd).is_ok());
        assert!(AcademicPeriod::new("2025-2026", Semester::Odd).is_err());
        assert!(AcademicPeriod::new("2025/2027", Semester::Odd).is_err());
        assert!(AcademicPeriod::new("25/26", Semester::Even).is_err());
    }

    #[test]
    fn semester_accepts_original_vocabulary() {
        assert_eq!(Semester::parse("ganjil"), Some(Semester::Odd));
        assert_eq!(Semester::parse("Genap"), Some(Semester::Even));
        assert_eq!(Semester::parse("summer"), None);
        let s: Semester = serde_json::from_str("\"genap\"").expect("alias");
        assert_eq!(s, Semester::Even);
    }
}
