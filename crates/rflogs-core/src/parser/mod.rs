//! Streaming reader for test-execution reports (`output.xml`).
//!
//! The report is walked once, front to back, through a bounded read buffer.
//! Suite, test and keyword elements each close with a `<status>` child; the
//! elapsed time of that status is attributed to the element when it closes.
//! Aggregate counts come from the `All Tests` row of `<statistics><total>`.
//!
//! Compressed input is detected from the gzip magic bytes, see [`source`].

pub mod source;

use crate::model::{ElementKind, ParsedStats, Verdict};
use crate::timing::TimingCollector;
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{BufReader, Read};
use thiserror::Error;

pub use source::ReportStream;

const ALL_TESTS_LABEL: &str = "All Tests";

/// Upper bound for a single `elapsed` attribute (one year).
const MAX_ELAPSED_SECS: f64 = 366.0 * 24.0 * 3600.0;

#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Size of the read buffer between the (decompressed) byte stream and
    /// the XML reader (default: 64KB)
    pub buffer_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read report: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error at position {pos}: {message}")]
    Xml { pos: usize, message: String },

    #[error("report ended inside an open element (depth {depth})")]
    Truncated { depth: usize },

    #[error("report has no root element")]
    Empty,

    #[error("invalid elapsed time '{value}'")]
    Elapsed { value: String },

    #[error("invalid timestamp '{value}'")]
    Timestamp { value: String },

    #[error("invalid '{attr}' count '{value}' in statistics")]
    Count { attr: &'static str, value: String },
}

/// Result of a parse. A failure part-way through still carries whatever
/// was accumulated up to that point, with the verdict set to `error`.
#[derive(Debug)]
pub enum ParseOutcome {
    Complete(ParsedStats),
    Partial { stats: ParsedStats, cause: ParseError },
}

impl ParseOutcome {
    pub fn stats(&self) -> &ParsedStats {
        match self {
            ParseOutcome::Complete(stats) => stats,
            ParseOutcome::Partial { stats, .. } => stats,
        }
    }

    pub fn into_stats(self) -> ParsedStats {
        match self {
            ParseOutcome::Complete(stats) => stats,
            ParseOutcome::Partial { stats, .. } => stats,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ParseOutcome::Complete(_))
    }

    pub fn error(&self) -> Option<&ParseError> {
        match self {
            ParseOutcome::Complete(_) => None,
            ParseOutcome::Partial { cause, .. } => Some(cause),
        }
    }
}

pub fn parse_report_bytes(data: &[u8]) -> ParseOutcome {
    parse_report(data, &ParserConfig::default())
}

pub fn parse_report<R: Read>(input: R, config: &ParserConfig) -> ParseOutcome {
    let mut walker = Walker::default();

    let result = ReportStream::open(input)
        .map_err(ParseError::from)
        .and_then(|stream| {
            let compressed = stream.is_compressed();
            tracing::debug!(event = "report_open", compressed);
            let buffered = BufReader::with_capacity(config.buffer_size.max(1), stream);
            walker.walk(Reader::from_reader(buffered))
        });

    match result {
        Ok(()) => match walker.finish(false) {
            Ok(stats) => ParseOutcome::Complete(stats),
            Err((stats, cause)) => partial(stats, cause),
        },
        Err(cause) => {
            let stats = match walker.finish(true) {
                Ok(stats) => stats,
                Err((stats, _)) => stats,
            };
            partial(stats, cause)
        }
    }
}

fn partial(mut stats: ParsedStats, cause: ParseError) -> ParseOutcome {
    stats.verdict = Verdict::Error;
    tracing::warn!(
        event = "report_parse_failed",
        error = %cause,
        total_tests = stats.total_tests,
    );
    ParseOutcome::Partial { stats, cause }
}

/// Counts from the `All Tests` row, kept as raw attribute text until the
/// label is known.
#[derive(Default)]
struct PendingStat {
    pass: Option<String>,
    fail: Option<String>,
    skip: Option<String>,
    label: String,
}

#[derive(Default)]
struct Walker {
    stats: ParsedStats,
    timing: TimingCollector,
    depth: usize,
    seen_root: bool,

    suites: Vec<String>,
    keywords: Vec<String>,
    current_test: Option<String>,
    current_status: Option<String>,

    in_statistics: bool,
    in_total: bool,
    pending_stat: Option<PendingStat>,

    pending_elapsed: Option<String>,
    pending_legacy: Option<(String, String)>,
    last_elapsed: f64,
    last_start: Option<String>,
}

impl Walker {
    fn walk<B: std::io::BufRead>(&mut self, mut reader: Reader<B>) -> Result<(), ParseError> {
        let mut buf = Vec::with_capacity(8192);
        loop {
            buf.clear();
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| xml_error(&reader, e))?;
            match event {
                Event::Start(e) => {
                    self.depth += 1;
                    self.seen_root = true;
                    self.on_start(&e).map_err(|err| xml_error(&reader, err))?;
                }
                Event::Empty(e) => {
                    self.seen_root = true;
                    self.on_start(&e).map_err(|err| xml_error(&reader, err))?;
                    self.on_end(e.name().as_ref())?;
                }
                Event::End(e) => {
                    self.depth = self.depth.saturating_sub(1);
                    self.on_end(e.name().as_ref())?;
                }
                Event::Text(t) => {
                    if let Some(stat) = self.pending_stat.as_mut() {
                        let text = t.unescape().map_err(|err| xml_error(&reader, err))?;
                        stat.label.push_str(&text);
                    }
                }
                Event::CData(t) => {
                    if let Some(stat) = self.pending_stat.as_mut() {
                        stat.label.push_str(&String::from_utf8_lossy(&t));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if self.depth > 0 {
            return Err(ParseError::Truncated { depth: self.depth });
        }
        if !self.seen_root {
            return Err(ParseError::Empty);
        }
        Ok(())
    }

    fn on_start(&mut self, e: &BytesStart<'_>) -> Result<(), quick_xml::Error> {
        match e.name().as_ref() {
            b"statistics" => self.in_statistics = true,
            b"total" if self.in_statistics => self.in_total = true,
            b"stat" if self.in_total => {
                self.pending_stat = Some(PendingStat {
                    pass: attr(e, b"pass")?,
                    fail: attr(e, b"fail")?,
                    skip: attr(e, b"skip")?,
                    label: String::new(),
                });
            }
            // the statistics block has its own <suite> section of <stat> rows
            _ if self.in_statistics => {}
            b"suite" => self.suites.push(attr(e, b"name")?.unwrap_or_default()),
            b"test" => {
                self.current_test = attr(e, b"name")?;
                self.current_status = None;
            }
            b"kw" => {
                let name = attr(e, b"name")?.unwrap_or_default();
                let qualified = match attr(e, b"owner")? {
                    Some(owner) if !owner.is_empty() => format!("{owner}.{name}"),
                    _ => name,
                };
                self.keywords.push(qualified);
            }
            b"status" => self.on_status(e)?,
            _ => {}
        }
        Ok(())
    }

    fn on_status(&mut self, e: &BytesStart<'_>) -> Result<(), quick_xml::Error> {
        self.current_status = attr(e, b"status")?;
        let elapsed = attr(e, b"elapsed")?;
        let start = attr(e, b"start")?;

        // Pre-7.0 reports carry starttime/endtime instead of start/elapsed.
        if start.is_none() && elapsed.is_none() {
            if let (Some(s), Some(end)) = (attr(e, b"starttime")?, attr(e, b"endtime")?) {
                self.pending_legacy = Some((s, end));
                return Ok(());
            }
        }
        self.pending_legacy = None;
        self.pending_elapsed = elapsed;
        self.last_start = start;
        Ok(())
    }

    fn on_end(&mut self, name: &[u8]) -> Result<(), ParseError> {
        match name {
            b"statistics" => {
                self.in_statistics = false;
                self.in_total = false;
            }
            b"total" if self.in_statistics => self.in_total = false,
            b"stat" if self.in_total => {
                if let Some(stat) = self.pending_stat.take() {
                    self.apply_stat(stat)?;
                }
            }
            _ if self.in_statistics => {}
            b"status" => self.close_status()?,
            b"suite" => {
                let full = self.suites.join(".");
                if !full.is_empty() {
                    self.timing.push(ElementKind::Suite, full, self.last_elapsed);
                }
                self.suites.pop();
            }
            b"test" => {
                let name = self.current_test.take().unwrap_or_default();
                let mut full = self.suites.join(".");
                if !self.suites.is_empty() {
                    full.push('.');
                }
                full.push_str(&name);
                self.timing.push(ElementKind::Test, full, self.last_elapsed);

                if self.current_status.as_deref() == Some("FAIL") && !name.is_empty() {
                    self.stats.failed_test_names.push(name);
                }
                self.current_status = None;
            }
            b"kw" => {
                if let Some(name) = self.keywords.pop() {
                    self.timing.push(ElementKind::Keyword, name, self.last_elapsed);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close_status(&mut self) -> Result<(), ParseError> {
        if let Some((start, end)) = self.pending_legacy.take() {
            // combined outputs carry `N/A` on the synthetic top suite
            match (parse_timestamp(&start), parse_timestamp(&end)) {
                (Ok(s), Ok(e)) => {
                    self.last_elapsed =
                        (e - s).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
                    self.last_start = Some(start);
                }
                _ => {
                    self.last_elapsed = 0.0;
                    self.last_start = None;
                }
            }
            return Ok(());
        }

        self.last_elapsed = match self.pending_elapsed.take() {
            Some(v) => parse_elapsed(&v)?,
            None => 0.0,
        };
        Ok(())
    }

    fn apply_stat(&mut self, stat: PendingStat) -> Result<(), ParseError> {
        if stat.label.trim() != ALL_TESTS_LABEL {
            return Ok(());
        }
        let passed = count(stat.pass, "pass")?;
        let failed = count(stat.fail, "fail")?;
        let skipped = count(stat.skip, "skip")?;

        self.stats.passed = passed;
        self.stats.failed = failed;
        self.stats.skipped = skipped;
        self.stats.total_tests = passed.saturating_add(failed).saturating_add(skipped);
        tracing::debug!(
            event = "report_statistics",
            passed,
            failed,
            skipped
        );
        Ok(())
    }

    /// Derive verdict, start/end time and timing summaries. `failed` skips
    /// the verdict since the caller overrides it with `error`.
    fn finish(self, failed: bool) -> Result<ParsedStats, (ParsedStats, ParseError)> {
        let Walker {
            mut stats,
            timing,
            last_start,
            last_elapsed,
            ..
        } = self;

        stats.timing = timing.finish();
        if !failed {
            stats.verdict = if stats.failed == 0 {
                Verdict::Pass
            } else {
                Verdict::Fail
            };
        }

        if let Some(raw) = last_start {
            match parse_timestamp(&raw) {
                Ok(start) => {
                    let micros = (last_elapsed * 1_000_000.0).round() as i64;
                    let Some(end) =
                        start.checked_add_signed(chrono::Duration::microseconds(micros))
                    else {
                        let value = last_elapsed.to_string();
                        return Err((stats, ParseError::Elapsed { value }));
                    };
                    stats.start_time = Some(start);
                    stats.end_time = Some(end);
                }
                Err(e) => return Err((stats, e)),
            }
        }
        Ok(stats)
    }
}

fn xml_error<B>(reader: &Reader<B>, err: quick_xml::Error) -> ParseError {
    match err {
        quick_xml::Error::Io(io) => ParseError::Io(std::io::Error::new(io.kind(), io.to_string())),
        other => ParseError::Xml {
            pos: reader.buffer_position(),
            message: other.to_string(),
        },
    }
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() == name {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Seconds; anything that is not a finite value in `0..=MAX_ELAPSED_SECS`
/// is rejected.
fn parse_elapsed(raw: &str) -> Result<f64, ParseError> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && (0.0..=MAX_ELAPSED_SECS).contains(&v) => Ok(v),
        _ => Err(ParseError::Elapsed {
            value: raw.to_string(),
        }),
    }
}

fn count(raw: Option<String>, attr: &'static str) -> Result<u32, ParseError> {
    match raw {
        None => Ok(0),
        Some(v) => v
            .trim()
            .parse::<u32>()
            .map_err(|_| ParseError::Count { attr, value: v }),
    }
}

/// Accepts RFC 3339, zone-less ISO 8601 (`2024-05-01T12:00:00.123456`) and
/// the pre-7.0 `20240501 12:00:00.123` form. Zone-less values are UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y%m%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(ParseError::Timestamp {
        value: raw.to_string(),
    })
}
