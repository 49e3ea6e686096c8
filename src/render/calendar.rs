//! iCalendar (RFC 5545) documents for match schedules
//!
//! Timed matches are written as UTC instants, converted from the local
//! kick-off with the offset valid on the match's own date. Matches without
//! a kick-off time become all-day events.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::config::CalendarConfig;
use crate::league::date::parse_kickoff;
use crate::league::types::{Location, Match, MatchSeries, Team};
use crate::render::Document;
use crate::render::aggregate::MatchView;

pub const CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

const MAX_LINE_OCTETS: usize = 75;
const UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const DATE_FORMAT: &str = "%Y%m%d";
const PLACEHOLDER_SUMMARY: &str = "No events currently available";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStart {
    At(DateTime<Utc>),
    AllDay(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEnd {
    After(Duration),
    At(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    /// Globally unique and stable across regenerations
    pub uid: String,
    pub start: EventStart,
    /// `None` uses the calendar's default duration
    pub end: Option<EventEnd>,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Identity of a published calendar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarScope {
    /// Stable key for the document UID
    pub key: String,
    /// File name stem
    pub slug: String,
    pub name: String,
}

impl CalendarScope {
    pub fn all_matches(club_name: &str) -> Self {
        Self {
            key: "all-matches".to_string(),
            slug: "all-matches".to_string(),
            name: format!("{} - all matches", club_name),
        }
    }

    /// Keyed by the team uuid so renaming a team keeps the subscription
    pub fn team(team: &Team) -> Self {
        Self {
            key: format!("team-{}", team.uuid),
            slug: team.slug(),
            name: format!("{} - {}", team.club_name, team.name),
        }
    }

    pub fn filename(&self) -> String {
        format!("{}.ics", self.slug)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarOptions {
    pub domain: String,
    pub product_id: String,
    pub default_duration: Duration,
    /// Seconds; also advertised as the refresh interval
    pub max_age: u64,
    pub timezone_name: String,
}

impl CalendarOptions {
    pub fn from_config(config: &CalendarConfig) -> Self {
        Self {
            domain: config.domain.clone(),
            product_id: config.product_id.clone(),
            default_duration: Duration::minutes(config.duration_minutes),
            max_age: config.cache_max_age_secs,
            timezone_name: config.timezone_name.clone(),
        }
    }
}

impl Default for CalendarOptions {
    fn default() -> Self {
        Self::from_config(&CalendarConfig::default())
    }
}

/// Project a match onto a calendar event.
///
/// Returns `None` (and logs) when the date or time cannot be parsed.
pub fn match_event(
    game: &Match,
    series: Option<&MatchSeries>,
    fallback_modified: DateTime<Utc>,
) -> Option<CalendarEvent> {
    let Some(kickoff) = parse_kickoff(&game.date, game.time.as_deref()) else {
        warn!(
            "Skipping match {} with invalid date {:?} / time {:?}",
            game.uuid, game.date, game.time
        );
        return None;
    };

    let start = match kickoff.start() {
        Some(at) => EventStart::At(at.with_timezone(&Utc)),
        None => EventStart::AllDay(kickoff.date),
    };

    let [home, away] = &game.teams;
    let summary = match &game.results {
        Some(results) => format!("{} - {} ({})", home.name, away.name, results.set_points),
        None => format!("{} - {}", home.name, away.name),
    };

    let mut description = Vec::new();
    if let Some(series) = series {
        description.push(series.name.clone());
    }
    if let Some(number) = &game.number {
        description.push(format!("Match {}", number));
    }
    if let Some(results) = &game.results {
        if results.sets.is_empty() {
            description.push(format!("Result: {}", results.set_points));
        } else {
            description.push(format!(
                "Result: {} ({})",
                results.set_points,
                results.sets.join(", ")
            ));
        }
    }
    if let Some(host) = &game.host {
        description.push(format!("Host: {}", host));
    }

    Some(CalendarEvent {
        uid: game.uuid.clone(),
        start,
        end: None,
        summary,
        description: (!description.is_empty()).then(|| description.join("\n")),
        location: game
            .location
            .as_ref()
            .map(Location::display)
            .filter(|l| !l.is_empty()),
        last_modified: series.map_or(fallback_modified, |s| s.results_updated),
    })
}

/// Events for every match of the view in chronological order
pub fn match_events(view: &MatchView) -> Vec<CalendarEvent> {
    view.chronological()
        .filter_map(|game| {
            match_event(
                game,
                view.series.get(&game.match_series_uuid),
                DateTime::<Utc>::default(),
            )
        })
        .collect()
}

/// Render a complete calendar. An empty event list yields one placeholder event.
pub fn generate_calendar(
    scope: &CalendarScope,
    events: &[CalendarEvent],
    options: &CalendarOptions,
    now: DateTime<Utc>,
) -> Document {
    let refresh_minutes = (options.max_age / 60).max(1);

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{}", options.product_id),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
        format!("UID:{}@{}", scope.key, options.domain),
        format!("NAME:{}", escape_text(&scope.name)),
        format!("X-WR-CALNAME:{}", escape_text(&scope.name)),
        format!("X-WR-TIMEZONE:{}", options.timezone_name),
        format!("REFRESH-INTERVAL;VALUE=DURATION:PT{}M", refresh_minutes),
        format!("X-PUBLISHED-TTL:PT{}M", refresh_minutes),
    ];

    if events.is_empty() {
        debug!("No events for calendar {}, writing placeholder", scope.key);
        let placeholder = CalendarEvent {
            uid: format!("placeholder-{}@{}", scope.key, options.domain),
            start: EventStart::AllDay(now.date_naive()),
            end: None,
            summary: PLACEHOLDER_SUMMARY.to_string(),
            description: None,
            location: None,
            last_modified: now,
        };
        push_event(&mut lines, &placeholder, options);
    } else {
        for event in events {
            push_event(&mut lines, event, options);
        }
    }

    lines.push("END:VCALENDAR".to_string());

    let mut body = String::new();
    for line in &lines {
        body.push_str(&fold_line(line));
        body.push_str("\r\n");
    }

    Document {
        content_type: CONTENT_TYPE,
        filename: Some(scope.filename()),
        max_age: options.max_age,
        body,
    }
}

/// Calendar for the matches of an aggregated view
pub fn calendar_for_matches(
    scope: &CalendarScope,
    view: &MatchView,
    options: &CalendarOptions,
    now: DateTime<Utc>,
) -> Document {
    generate_calendar(scope, &match_events(view), options, now)
}

fn push_event(lines: &mut Vec<String>, event: &CalendarEvent, options: &CalendarOptions) {
    let stamp = event.last_modified.format(UTC_FORMAT).to_string();

    lines.push("BEGIN:VEVENT".to_string());
    lines.push(format!("UID:{}", event.uid));
    lines.push(format!("DTSTAMP:{}", stamp));
    lines.push(format!("LAST-MODIFIED:{}", stamp));

    match event.start {
        EventStart::At(start) => {
            let end = match event.end {
                Some(EventEnd::At(end)) => end,
                Some(EventEnd::After(duration)) => start + duration,
                None => start + options.default_duration,
            };
            lines.push(format!("DTSTART:{}", start.format(UTC_FORMAT)));
            lines.push(format!("DTEND:{}", end.format(UTC_FORMAT)));
        }
        EventStart::AllDay(date) => {
            let end = date.succ_opt().unwrap_or(date);
            lines.push(format!("DTSTART;VALUE=DATE:{}", date.format(DATE_FORMAT)));
            lines.push(format!("DTEND;VALUE=DATE:{}", end.format(DATE_FORMAT)));
        }
    }

    lines.push(format!("SUMMARY:{}", escape_text(&event.summary)));
    if let Some(description) = &event.description {
        lines.push(format!("DESCRIPTION:{}", escape_text(description)));
    }
    if let Some(location) = &event.location {
        lines.push(format!("LOCATION:{}", escape_text(location)));
    }
    lines.push("END:VEVENT".to_string());
}

/// Escape a TEXT value (RFC 5545 section 3.3.11)
pub fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                escaped.push_str("\\n");
            }
            c => escaped.push(c),
        }
    }
    escaped
}

/// Inverse of [`escape_text`]
pub fn unescape_text(value: &str) -> String {
    let mut text = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => text.push('\n'),
            Some(other) => text.push(other),
            None => text.push('\\'),
        }
    }
    text
}

/// Fold a content line at 75 octets without splitting UTF-8 sequences
pub fn fold_line(line: &str) -> String {
    if line.len() <= MAX_LINE_OCTETS {
        return line.to_string();
    }

    let mut folded = String::with_capacity(line.len() + line.len() / MAX_LINE_OCTETS * 3);
    let mut used = 0;
    for c in line.chars() {
        let len = c.len_utf8();
        if used + len > MAX_LINE_OCTETS {
            folded.push_str("\r\n ");
            // The leading space counts towards the next line
            used = 1;
        }
        folded.push(c);
        used += len;
    }
    folded
}

/// Join folded lines back into logical content lines
pub fn unfold(text: &str) -> String {
    text.replace("\r\n ", "").replace("\r\n\t", "")
}

/// `webcal://` subscription link for an http(s) calendar URL
pub fn webcal_url(url: &str) -> String {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("webcal://"))
        .unwrap_or(url);
    format!("webcal://{}", rest)
}
