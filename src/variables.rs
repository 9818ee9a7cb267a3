//! Built-in pattern variables.
//!
//! Every built-in is derived from a single local timestamp plus the counter, which
//! keeps evaluation a pure function of the counter state.

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use std::fmt;

/// Widest zero padding any numeric parameter may ask for.
pub const MAX_PAD_WIDTH: usize = 20;

/// Names that are never expected from the caller's context.
pub const RESERVED_NAMES: [&str; 1] = ["TIMESTAMP"];

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const MONTH_NAMES: [&str; 12] = [
    "JANUARY", "FEBRUARY", "MARCH", "APRIL", "MAY", "JUNE", "JULY", "AUGUST", "SEPTEMBER",
    "OCTOBER", "NOVEMBER", "DECEMBER",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinVariable {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Counter,
    Week,
    Quarter,
    WeekYear,
    DayOfWeek,
    DayOfYear,
}

/// How a built-in renders, decided from the token parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableFormat {
    Default,
    Pad(usize),
    ShortYear,
    MonthAbbrev,
    MonthName,
    Ordinal,
    Prefixed(&'static str),
}

impl BuiltinVariable {
    pub const ALL: [BuiltinVariable; 12] = [
        BuiltinVariable::Year,
        BuiltinVariable::Month,
        BuiltinVariable::Day,
        BuiltinVariable::Hour,
        BuiltinVariable::Minute,
        BuiltinVariable::Second,
        BuiltinVariable::Counter,
        BuiltinVariable::Week,
        BuiltinVariable::Quarter,
        BuiltinVariable::WeekYear,
        BuiltinVariable::DayOfWeek,
        BuiltinVariable::DayOfYear,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|builtin| builtin.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinVariable::Year => "YEAR",
            BuiltinVariable::Month => "MONTH",
            BuiltinVariable::Day => "DAY",
            BuiltinVariable::Hour => "HOUR",
            BuiltinVariable::Minute => "MINUTE",
            BuiltinVariable::Second => "SECOND",
            BuiltinVariable::Counter => "COUNTER",
            BuiltinVariable::Week => "WEEK",
            BuiltinVariable::Quarter => "QUARTER",
            BuiltinVariable::WeekYear => "WEEK_YEAR",
            BuiltinVariable::DayOfWeek => "DAY_OF_WEEK",
            BuiltinVariable::DayOfYear => "DAY_OF_YEAR",
        }
    }

    fn default_width(self) -> usize {
        match self {
            BuiltinVariable::Year | BuiltinVariable::WeekYear => 4,
            BuiltinVariable::DayOfYear => 3,
            BuiltinVariable::Quarter | BuiltinVariable::DayOfWeek => 1,
            BuiltinVariable::Counter => 0,
            _ => 2,
        }
    }

    /// Named parameters this variable understands, besides a numeric width.
    pub fn named_formats(self) -> &'static [&'static str] {
        match self {
            BuiltinVariable::Year | BuiltinVariable::WeekYear => &["YY", "YYYY"],
            BuiltinVariable::Month => &["M", "MM", "MON", "MONTH"],
            BuiltinVariable::Day => &["D", "DD", "ST", "ND", "RD", "TH"],
            BuiltinVariable::Quarter => &["Q1", "QTR", "QUARTER"],
            BuiltinVariable::Week => &["W", "WEEK", "WK"],
            _ => &[],
        }
    }

    /// Interprets a token parameter. The error text explains what was expected.
    pub fn parse_param(self, param: Option<&str>) -> Result<VariableFormat, String> {
        let Some(param) = param else {
            return Ok(VariableFormat::Default);
        };

        if !param.is_empty() && param.chars().all(|c| c.is_ascii_digit()) {
            return match param.parse::<usize>() {
                Ok(width) if (1..=MAX_PAD_WIDTH).contains(&width) => Ok(VariableFormat::Pad(width)),
                _ => Err(format!(
                    "{} padding must be between 1 and {}, got {}",
                    self.name(),
                    MAX_PAD_WIDTH,
                    param
                )),
            };
        }

        let format = match (self, param) {
            (BuiltinVariable::Year | BuiltinVariable::WeekYear, "YY") => VariableFormat::ShortYear,
            (BuiltinVariable::Year | BuiltinVariable::WeekYear, "YYYY") => VariableFormat::Default,
            (BuiltinVariable::Month, "M") | (BuiltinVariable::Day, "D") => VariableFormat::Pad(1),
            (BuiltinVariable::Month, "MM") | (BuiltinVariable::Day, "DD") => {
                VariableFormat::Default
            }
            (BuiltinVariable::Month, "MON") => VariableFormat::MonthAbbrev,
            (BuiltinVariable::Month, "MONTH") => VariableFormat::MonthName,
            (BuiltinVariable::Day, "ST" | "ND" | "RD" | "TH") => VariableFormat::Ordinal,
            (BuiltinVariable::Quarter, "Q1") => VariableFormat::Prefixed("Q"),
            (BuiltinVariable::Quarter, "QTR") => VariableFormat::Prefixed("QTR"),
            (BuiltinVariable::Quarter, "QUARTER") => VariableFormat::Prefixed("QUARTER"),
            (BuiltinVariable::Week, "W") => VariableFormat::Prefixed("W"),
            (BuiltinVariable::Week, "WEEK") => VariableFormat::Prefixed("WEEK"),
            (BuiltinVariable::Week, "WK") => VariableFormat::Prefixed("WK"),
            _ => {
                let named = self.named_formats();
                return Err(if named.is_empty() {
                    format!(
                        "{} only accepts a numeric padding between 1 and {}, got `{}`",
                        self.name(),
                        MAX_PAD_WIDTH,
                        param
                    )
                } else {
                    format!(
                        "{} accepts a numeric padding or one of {}, got `{}`",
                        self.name(),
                        named.join("/"),
                        param
                    )
                });
            }
        };
        Ok(format)
    }

    fn numeric_value<Tz: TimeZone>(self, local: &DateTime<Tz>, counter: u64) -> u64 {
        match self {
            BuiltinVariable::Year => local.year().max(0) as u64,
            BuiltinVariable::Month => local.month() as u64,
            BuiltinVariable::Day => local.day() as u64,
            BuiltinVariable::Hour => local.hour() as u64,
            BuiltinVariable::Minute => local.minute() as u64,
            BuiltinVariable::Second => local.second() as u64,
            BuiltinVariable::Counter => counter,
            BuiltinVariable::Week => local.iso_week().week() as u64,
            BuiltinVariable::Quarter => ((local.month() - 1) / 3 + 1) as u64,
            BuiltinVariable::WeekYear => local.iso_week().year().max(0) as u64,
            BuiltinVariable::DayOfWeek => local.weekday().number_from_monday() as u64,
            BuiltinVariable::DayOfYear => local.ordinal() as u64,
        }
    }

    pub fn render<Tz: TimeZone>(
        self,
        format: VariableFormat,
        local: &DateTime<Tz>,
        counter: u64,
    ) -> String {
        let value = self.numeric_value(local, counter);
        match format {
            VariableFormat::Default => pad(value, self.default_width()),
            VariableFormat::Pad(width) => pad(value, width),
            VariableFormat::ShortYear => pad(value % 100, 2),
            VariableFormat::MonthAbbrev => {
                MONTH_ABBREVIATIONS[(local.month0() as usize) % 12].to_string()
            }
            VariableFormat::MonthName => MONTH_NAMES[(local.month0() as usize) % 12].to_string(),
            VariableFormat::Ordinal => format!("{}{}", value, ordinal_suffix(value)),
            VariableFormat::Prefixed(prefix) => {
                format!("{}{}", prefix, pad(value, self.default_width()))
            }
        }
    }

    /// Capture group matching what [`BuiltinVariable::render`] can produce.
    pub fn regex_fragment(self, format: VariableFormat) -> String {
        match format {
            VariableFormat::Default if self == BuiltinVariable::Counter => r"(\d+)".to_string(),
            VariableFormat::Default
                if self == BuiltinVariable::Year || self == BuiltinVariable::WeekYear =>
            {
                r"(\d{4})".to_string()
            }
            VariableFormat::Default => format!(r"(\d{{{}}})", self.default_width()),
            VariableFormat::Pad(width) => format!(r"(\d{{{},}})", width),
            VariableFormat::ShortYear => r"(\d{2})".to_string(),
            VariableFormat::MonthAbbrev => "([A-Z]{3})".to_string(),
            VariableFormat::MonthName => "([A-Z]+)".to_string(),
            VariableFormat::Ordinal => r"(\d{1,2}(?:ST|ND|RD|TH))".to_string(),
            VariableFormat::Prefixed(prefix) => {
                format!(r"({}\d{{{}}})", regex::escape(prefix), self.default_width())
            }
        }
    }
}

impl fmt::Display for BuiltinVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn is_builtin(name: &str) -> bool {
    BuiltinVariable::from_name(name).is_some()
}

fn pad(value: u64, width: usize) -> String {
    format!("{:0width$}", value, width = width)
}

fn ordinal_suffix(value: u64) -> &'static str {
    match (value % 10, value % 100) {
        (_, 11..=13) => "TH",
        (1, _) => "ST",
        (2, _) => "ND",
        (3, _) => "RD",
        _ => "TH",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 14, 5, 9).unwrap()
    }

    fn render(name: &str, param: Option<&str>, when: DateTime<Utc>, counter: u64) -> String {
        let builtin = BuiltinVariable::from_name(name).unwrap();
        let format = builtin.parse_param(param).unwrap();
        builtin.render(format, &when, counter)
    }

    #[test]
    fn test_default_rendering() {
        let when = at(2025, 3, 1);
        assert_eq!(render("YEAR", None, when, 0), "2025");
        assert_eq!(render("MONTH", None, when, 0), "03");
        assert_eq!(render("DAY", None, when, 0), "01");
        assert_eq!(render("HOUR", None, when, 0), "14");
        assert_eq!(render("MINUTE", None, when, 0), "05");
        assert_eq!(render("SECOND", None, when, 0), "09");
        assert_eq!(render("COUNTER", None, when, 7), "7");
        assert_eq!(render("QUARTER", None, when, 0), "1");
        assert_eq!(render("DAY_OF_YEAR", None, when, 0), "060");
        // 2025-03-01 is a Saturday in ISO week 9
        assert_eq!(render("DAY_OF_WEEK", None, when, 0), "6");
        assert_eq!(render("WEEK", None, when, 0), "09");
    }

    #[test]
    fn test_week_year_follows_iso_calendar() {
        // 2024-12-30 belongs to ISO week 1 of 2025
        let when = at(2024, 12, 30);
        assert_eq!(render("YEAR", None, when, 0), "2024");
        assert_eq!(render("WEEK_YEAR", None, when, 0), "2025");
        assert_eq!(render("WEEK", Some("W"), when, 0), "W01");
    }

    #[test]
    fn test_named_formats() {
        let when = at(2025, 8, 22);
        assert_eq!(render("YEAR", Some("YY"), when, 0), "25");
        assert_eq!(render("MONTH", Some("MON"), when, 0), "AUG");
        assert_eq!(render("MONTH", Some("MONTH"), when, 0), "AUGUST");
        assert_eq!(render("MONTH", Some("M"), when, 0), "8");
        assert_eq!(render("DAY", Some("ND"), when, 0), "22ND");
        assert_eq!(render("QUARTER", Some("Q1"), when, 0), "Q3");
        assert_eq!(render("QUARTER", Some("QTR"), when, 0), "QTR3");
        assert_eq!(render("WEEK", Some("WK"), when, 0), "WK34");
        assert_eq!(render("COUNTER", Some("6"), when, 42), "000042");
    }

    #[test]
    fn test_ordinal_suffixes() {
        assert_eq!(ordinal_suffix(1), "ST");
        assert_eq!(ordinal_suffix(2), "ND");
        assert_eq!(ordinal_suffix(3), "RD");
        assert_eq!(ordinal_suffix(11), "TH");
        assert_eq!(ordinal_suffix(12), "TH");
        assert_eq!(ordinal_suffix(21), "ST");
        assert_eq!(ordinal_suffix(30), "TH");
    }

    #[test]
    fn test_parameter_legality() {
        assert!(BuiltinVariable::Counter.parse_param(Some("0")).is_err());
        assert!(BuiltinVariable::Counter.parse_param(Some("21")).is_err());
        assert!(BuiltinVariable::Counter.parse_param(Some("20")).is_ok());
        assert!(BuiltinVariable::Counter.parse_param(Some("YY")).is_err());
        assert!(BuiltinVariable::Month.parse_param(Some("XYZ")).is_err());
        assert!(BuiltinVariable::Month.parse_param(Some("")).is_err());
        assert_eq!(BuiltinVariable::Year.parse_param(Some("YY")), Ok(VariableFormat::ShortYear));
    }

    #[test]
    fn test_padding_never_truncates() {
        assert_eq!(render("COUNTER", Some("2"), at(2025, 1, 1), 12345), "12345");
    }
}
