use crate::logw;
use crate::timestamp::Timestamp;
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashSet;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Offset of the action column from the timestamp column in a markdown table row.
const TABLE_ACTION_OFFSET: usize = 1;
/// Offset of the hazard column from the timestamp column.
const TABLE_HAZARD_OFFSET: usize = 2;

const LABEL_TRIM: &[char] = &[' ', '\t', '-', '–', '—', ':', '*', '|'];

/// Generated text for one video and prompt. Never mutated once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft(Arc<str>);

impl Draft {
    pub fn new(text: impl Into<String>) -> Self {
        Self(Arc::from(text.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Draft {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Draft {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Draft {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub timestamp: Timestamp,
    pub label_text: String,
    pub hazard_text: Option<String>,
    /// Lines written directly under the step's marker line (tools, observations).
    pub details: Vec<String>,
    pub(crate) image: Option<PathBuf>,
}

impl Step {
    pub fn new(timestamp: Timestamp, label_text: impl Into<String>) -> Self {
        Self {
            timestamp,
            label_text: label_text.into(),
            hazard_text: None,
            details: Vec::new(),
            image: None,
        }
    }

    pub fn with_hazard(mut self, hazard: impl Into<String>) -> Self {
        let hazard = hazard.into();
        self.hazard_text = if hazard.trim().is_empty() {
            None
        } else {
            Some(hazard)
        };
        self
    }

    /// Extracted still for this step, if one has been produced.
    pub fn image(&self) -> Option<&Path> {
        self.image.as_deref()
    }
}

/// One marker found in a draft, tagged by the textual shape that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerMatch {
    /// `[MM:SS]` or `[HH:MM:SS]`. `anchored` is set when the marker opens the line
    /// (after any list bullet or numbering).
    ClockBracket {
        timestamp: Timestamp,
        text: String,
        anchored: bool,
    },
    /// Markdown table row whose timestamp column holds a clock value.
    TableRow {
        timestamp: Timestamp,
        action: String,
        hazard: Option<String>,
    },
    /// Bare `12.5s` mention, only considered when the draft has no clock markers.
    SecondsOffset { timestamp: Timestamp },
}

impl MarkerMatch {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            MarkerMatch::ClockBracket { timestamp, .. }
            | MarkerMatch::TableRow { timestamp, .. }
            | MarkerMatch::SecondsOffset { timestamp } => *timestamp,
        }
    }

    pub fn into_step(self) -> Step {
        match self {
            MarkerMatch::ClockBracket { timestamp, text, .. } => Step::new(timestamp, text),
            MarkerMatch::TableRow {
                timestamp,
                action,
                hazard,
            } => {
                let step = Step::new(timestamp, action);
                match hazard {
                    Some(h) => step.with_hazard(h),
                    None => step,
                }
            }
            MarkerMatch::SecondsOffset { timestamp } => Step::new(timestamp, String::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepOrder {
    /// First appearance in the draft.
    #[default]
    Appearance,
    /// Numeric time value, stable for equal values.
    Chronological,
}

fn clock_regex() -> Result<&'static Regex> {
    static CLOCK_RE: OnceCell<Regex> = OnceCell::new();
    CLOCK_RE.get_or_try_init(|| {
        Regex::new(r"\[(\d{2}:\d{2}(?::\d{2})?)\]").context("failed to compile clock regex")
    })
}

fn bare_clock_regex() -> Result<&'static Regex> {
    static BARE_RE: OnceCell<Regex> = OnceCell::new();
    BARE_RE.get_or_try_init(|| {
        Regex::new(r"^\d{2}:\d{2}(?::\d{2})?$").context("failed to compile bare clock regex")
    })
}

fn seconds_regex() -> Result<&'static Regex> {
    static SECONDS_RE: OnceCell<Regex> = OnceCell::new();
    SECONDS_RE.get_or_try_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)s\b").context("failed to compile seconds regex")
    })
}

/// Steps in first-appearance order. Duplicate timestamps collapse onto the first
/// occurrence; later text for the same time is dropped.
pub fn parse(draft: &str) -> Vec<Step> {
    parse_ordered(draft, StepOrder::Appearance)
}

pub fn parse_ordered(draft: &str, order: StepOrder) -> Vec<Step> {
    let mut seen = HashSet::new();
    let mut steps: Vec<Step> = scan(draft)
        .into_iter()
        .filter(|m| seen.insert(m.timestamp()))
        .map(MarkerMatch::into_step)
        .collect();

    attach_details(draft, &mut steps);

    if order == StepOrder::Chronological {
        steps.sort_by_key(|s| s.timestamp);
    }
    steps
}

/// Every marker in the draft, duplicates included, in text order.
pub fn scan(draft: &str) -> Vec<MarkerMatch> {
    let clock = match clock_regex() {
        Ok(re) => re,
        Err(err) => {
            logw(format!("Marker scan disabled: {}", err));
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for line in draft.lines() {
        if is_table_line(line) {
            if let Some(row) = scan_table_row(line, clock) {
                out.push(row);
            }
            continue;
        }
        out.extend(scan_clock_line(line, clock));
    }

    if out.is_empty() {
        out = scan_seconds(draft);
    }
    out
}

pub(crate) fn is_table_line(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

/// True when the line is a structured procedure entry rather than prose that merely
/// mentions a time.
pub(crate) fn is_procedure_line(line: &str) -> bool {
    let Ok(clock) = clock_regex() else {
        return false;
    };
    if is_table_line(line) {
        return scan_table_row(line, clock).is_some();
    }
    scan_clock_line(line, clock).iter().any(|m| {
        matches!(m, MarkerMatch::ClockBracket { anchored: true, .. })
    })
}

/// True for a line that continues the step above it: non-blank, no marker of its
/// own, not a table row and not a markdown heading.
pub(crate) fn is_step_detail(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || is_table_line(trimmed) {
        return false;
    }
    clock_regex().is_ok_and(|re| !re.is_match(trimmed))
}

fn anchored_timestamp(line: &str, clock: &Regex) -> Option<Timestamp> {
    if is_table_line(line) {
        return None;
    }
    scan_clock_line(line, clock).into_iter().find_map(|m| match m {
        MarkerMatch::ClockBracket {
            timestamp,
            anchored: true,
            ..
        } => Some(timestamp),
        _ => None,
    })
}

/// Detail lines grouped under the marker line they follow, in text order.
fn collect_details(draft: &str) -> Vec<(Timestamp, Vec<String>)> {
    let Ok(clock) = clock_regex() else {
        return Vec::new();
    };

    let mut out: Vec<(Timestamp, Vec<String>)> = Vec::new();
    let mut open = false;
    for line in draft.lines() {
        if let Some(timestamp) = anchored_timestamp(line, clock) {
            out.push((timestamp, Vec::new()));
            open = true;
            continue;
        }
        if open && is_step_detail(line) {
            if let Some((_, details)) = out.last_mut() {
                details.push(line.trim().to_string());
            }
            continue;
        }
        open = false;
    }
    out
}

/// A repeated marker line keeps its details out of the step, like its text.
fn attach_details(draft: &str, steps: &mut [Step]) {
    let groups = collect_details(draft);
    for step in steps.iter_mut() {
        if let Some((_, details)) = groups.iter().find(|(ts, _)| *ts == step.timestamp) {
            step.details = details.clone();
        }
    }
}

fn split_table_row(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

fn table_cell_timestamp(cell: &str, clock: &Regex) -> Option<Timestamp> {
    let cell = cell.trim_matches('*').trim();
    if let Some(cap) = clock.captures(cell) {
        return Timestamp::parse_clock(&cap[1]);
    }
    let bare = bare_clock_regex().ok()?;
    if bare.is_match(cell) {
        return Timestamp::parse_clock(cell);
    }
    None
}

fn scan_table_row(line: &str, clock: &Regex) -> Option<MarkerMatch> {
    let cells = split_table_row(line);
    let (col, timestamp) = cells
        .iter()
        .enumerate()
        .find_map(|(i, cell)| table_cell_timestamp(cell, clock).map(|ts| (i, ts)))?;

    let action = cells
        .get(col + TABLE_ACTION_OFFSET)
        .cloned()
        .unwrap_or_default();
    let hazard = cells
        .get(col + TABLE_HAZARD_OFFSET)
        .filter(|h| !h.is_empty())
        .cloned();

    Some(MarkerMatch::TableRow {
        timestamp,
        action,
        hazard,
    })
}

/// `Step 3`, `Step 3:`, `step 3.` or `Step 3)`, with an optional closing `**` and
/// colon after it.
fn strip_step_prefix(text: &str) -> Option<&str> {
    let word = text.get(..4)?;
    if !word.eq_ignore_ascii_case("step") {
        return None;
    }
    let rest = text[4..].trim_start();
    let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &rest[digits..];
    let rest = rest.strip_prefix([':', '.', ')']).unwrap_or(rest);
    let rest = rest.strip_prefix("**").unwrap_or(rest);
    Some(rest.strip_prefix(':').unwrap_or(rest))
}

/// Byte offset where the line content starts once bullets, numbering, step labels
/// and bold markers are skipped.
fn line_content_start(line: &str) -> usize {
    let mut rest = line;
    loop {
        let trimmed = rest.trim_start();
        let next = if let Some(r) = trimmed.strip_prefix("**") {
            r
        } else if let Some(r) = strip_step_prefix(trimmed) {
            r
        } else if let Some(r) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .or_else(|| trimmed.strip_prefix("+ "))
            .or_else(|| trimmed.strip_prefix("• "))
        {
            r
        } else {
            let digits = trimmed.bytes().take_while(|b| b.is_ascii_digit()).count();
            let after = &trimmed[digits..];
            match after.strip_prefix(". ").or_else(|| after.strip_prefix(") ")) {
                Some(r) if digits > 0 => r,
                _ => {
                    return line.len() - trimmed.len();
                }
            }
        };
        rest = next;
    }
}

fn clean_label(text: &str) -> String {
    let plain = text.replace('*', "");
    let collapsed = plain.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_matches(LABEL_TRIM).to_string()
}

fn scan_clock_line(line: &str, clock: &Regex) -> Vec<MarkerMatch> {
    let content_start = line_content_start(line);
    let mut out = Vec::new();

    for cap in clock.captures_iter(line) {
        let (Some(whole), Some(inner)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let Some(timestamp) = Timestamp::parse_clock(inner.as_str()) else {
            continue;
        };

        let anchored = whole.start() == content_start;
        let text = if anchored {
            clean_label(&line[whole.end()..])
        } else {
            clean_label(&clock.replace_all(line, ""))
        };
        out.push(MarkerMatch::ClockBracket {
            timestamp,
            text,
            anchored,
        });
    }
    out
}

fn scan_seconds(draft: &str) -> Vec<MarkerMatch> {
    let re = match seconds_regex() {
        Ok(re) => re,
        Err(err) => {
            logw(format!("Seconds scan disabled: {}", err));
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for cap in re.captures_iter(draft) {
        let Some(number) = cap.get(1) else {
            continue;
        };
        let preceding = draft[..number.start()].chars().next_back();
        if preceding.is_some_and(|c| c.is_alphanumeric() || c == '.' || c == ':' || c == '_') {
            continue;
        }
        if let Some(timestamp) = number
            .as_str()
            .parse::<f64>()
            .ok()
            .and_then(Timestamp::from_seconds)
        {
            out.push(MarkerMatch::SecondsOffset { timestamp });
        }
    }
    out
}
