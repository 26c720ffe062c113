use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Which textual shape produced a timestamp. Decides how it is printed and how the
/// decoder is asked to seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampForm {
    /// `MM:SS`
    Clock,
    /// `HH:MM:SS`
    ClockWithHours,
    /// `12.5s`
    Seconds,
}

/// A normalized position in the video.
///
/// Equality, ordering and hashing only look at the time value, so `[00:05]` and
/// `[00:00:05]` are the same marker.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    millis: u64,
    form: TimestampForm,
}

impl Timestamp {
    pub fn from_clock(hours: u32, minutes: u32, seconds: u32) -> Option<Self> {
        if seconds >= 60 {
            return None;
        }
        if hours > 0 && minutes >= 60 {
            return None;
        }
        let total = hours as u64 * 3600 + minutes as u64 * 60 + seconds as u64;
        let form = if hours > 0 {
            TimestampForm::ClockWithHours
        } else {
            TimestampForm::Clock
        };
        Some(Self {
            millis: total * 1000,
            form,
        })
    }

    /// Parses `MM:SS` or `HH:MM:SS`, each field exactly two digits.
    pub fn parse_clock(text: &str) -> Option<Self> {
        let parts: Vec<&str> = text.trim().split(':').collect();
        if parts.iter().any(|p| p.len() != 2 || !p.bytes().all(|b| b.is_ascii_digit())) {
            return None;
        }
        let nums: Vec<u32> = parts.iter().filter_map(|p| p.parse().ok()).collect();
        match nums.as_slice() {
            [mm, ss] => Self::from_clock(0, *mm, *ss),
            [hh, mm, ss] => {
                if *mm >= 60 {
                    return None;
                }
                let mut ts = Self::from_clock(*hh, *mm, *ss)?;
                ts.form = TimestampForm::ClockWithHours;
                Some(ts)
            }
            _ => None,
        }
    }

    pub fn from_seconds(seconds: f64) -> Option<Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        Some(Self {
            millis: (seconds * 1000.0).round() as u64,
            form: TimestampForm::Seconds,
        })
    }

    /// Accepts any shape a user might type: `[00:05]`, `00:05`, `01:02:03`, `12.5s`, `12.5`.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let unbracketed = trimmed
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .unwrap_or(trimmed);
        if unbracketed.contains(':') {
            return Self::parse_clock(unbracketed);
        }
        let number = unbracketed.strip_suffix('s').unwrap_or(unbracketed);
        Self::from_seconds(number.parse::<f64>().ok()?)
    }

    pub fn form(&self) -> TimestampForm {
        self.form
    }

    pub fn as_millis(&self) -> u64 {
        self.millis
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.millis as f64 / 1000.0
    }

    /// Same form, moved back to `max_seconds` when it points past it.
    pub fn clamped_to(self, max_seconds: f64) -> Self {
        let cap = (max_seconds.max(0.0) * 1000.0).floor() as u64;
        if self.millis <= cap {
            return self;
        }
        Self {
            millis: cap,
            form: self.form,
        }
    }

    pub fn label(&self) -> String {
        let total_secs = self.millis / 1000;
        let (hh, mm, ss) = (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60);
        match self.form {
            TimestampForm::Clock if hh == 0 => format!("{:02}:{:02}", mm, ss),
            TimestampForm::Clock => format!("{:02}:{:02}", hh * 60 + mm, ss),
            TimestampForm::ClockWithHours => format!("{:02}:{:02}:{:02}", hh, mm, ss),
            TimestampForm::Seconds => format!("{}s", seconds_text(self.millis)),
        }
    }

    /// Argument handed to the decoder's `-ss`.
    pub fn seek_arg(&self) -> String {
        match self.form {
            TimestampForm::Seconds => format!("{:.3}", self.as_secs_f64()),
            TimestampForm::Clock | TimestampForm::ClockWithHours => {
                let total_secs = self.millis / 1000;
                format!(
                    "{:02}:{:02}:{:02}",
                    total_secs / 3600,
                    (total_secs % 3600) / 60,
                    total_secs % 60
                )
            }
        }
    }

    /// Filesystem-safe fragment, stable for a given time value.
    pub fn file_stem(&self) -> String {
        self.label().replace([':', '.'], "_")
    }
}

fn seconds_text(millis: u64) -> String {
    if millis % 1000 == 0 {
        return (millis / 1000).to_string();
    }
    let text = format!("{}.{:03}", millis / 1000, millis % 1000);
    text.trim_end_matches('0').to_string()
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.millis == other.millis
    }
}

impl Eq for Timestamp {}

impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.millis.hash(state);
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis.cmp(&other.millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_forms() {
        let ts = Timestamp::parse_clock("01:30").unwrap();
        assert_eq!(ts.as_millis(), 90_000);
        assert_eq!(ts.label(), "01:30");
        assert_eq!(ts.seek_arg(), "00:01:30");

        let long = Timestamp::parse_clock("01:02:03").unwrap();
        assert_eq!(long.as_secs_f64(), 3723.0);
        assert_eq!(long.label(), "01:02:03");
        assert_eq!(long.form(), TimestampForm::ClockWithHours);
    }

    #[test]
    fn rejects_malformed_clock() {
        assert!(Timestamp::parse_clock("99:99").is_none());
        assert!(Timestamp::parse_clock("1:05").is_none());
        assert!(Timestamp::parse_clock("00:0a").is_none());
        assert!(Timestamp::parse_clock("01:60:00").is_none());
    }

    #[test]
    fn seconds_form() {
        let ts = Timestamp::parse("12.5s").unwrap();
        assert_eq!(ts.as_millis(), 12_500);
        assert_eq!(ts.label(), "12.5s");
        assert_eq!(ts.seek_arg(), "12.500");
        assert_eq!(ts.file_stem(), "12_5s");
        assert_eq!(Timestamp::parse("7s").unwrap().label(), "7s");
        assert!(Timestamp::from_seconds(-1.0).is_none());
    }

    #[test]
    fn equality_ignores_form() {
        let a = Timestamp::parse("[00:05]").unwrap();
        let b = Timestamp::parse("00:00:05").unwrap();
        let c = Timestamp::parse("5s").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn clamp_keeps_form() {
        let ts = Timestamp::parse("02:00").unwrap().clamped_to(95.25);
        assert_eq!(ts.as_millis(), 95_250);
        assert_eq!(ts.form(), TimestampForm::Clock);
        assert_eq!(ts.label(), "01:35");
    }
}
