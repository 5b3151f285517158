use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    #[default]
    Unknown,
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Unknown => "unknown",
            Verdict::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "pass" => Verdict::Pass,
            "fail" => Verdict::Fail,
            "error" => Verdict::Error,
            _ => Verdict::Unknown, // Default fallback
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level of the report tree a timing sample belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Suite,
    Test,
    Keyword,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Suite => "suite",
            ElementKind::Test => "test",
            ElementKind::Keyword => "keyword",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "suite" => Some(ElementKind::Suite),
            "test" => Some(ElementKind::Test),
            "keyword" => Some(ElementKind::Keyword),
            _ => None,
        }
    }
}

/// Summary of every elapsed-time sample recorded for one qualified element.
/// Times are in seconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TimingStats {
    pub total_time: f64,
    pub call_count: u32,
    pub average_time: f64,
    pub median_time: f64,
    pub std_deviation: f64,
}

/// kind -> qualified name -> stats
pub type TimingBreakdown = BTreeMap<ElementKind, BTreeMap<String, TimingStats>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParsedStats {
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub verdict: Verdict,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_test_names: Vec<String>,
    #[serde(default)]
    pub timing: TimingBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub retention_days: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunInfo {
    pub id: String,
    pub project_id: String,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<FileInfo>,
    pub total_tests: Option<u32>,
    pub passed: Option<u32>,
    pub failed: Option<u32>,
    pub skipped: Option<u32>,
    pub verdict: Option<Verdict>,
    pub tags: BTreeMap<String, String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_test_names: Vec<String>,
    /// Left empty by list views.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub timing: TimingBreakdown,
}

/// One page of a run listing plus the unpaginated match count.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunPage {
    pub runs: Vec<RunInfo>,
    pub total: u64,
}

impl RunPage {
    /// Offset of the following page, if any rows remain past this one.
    pub fn next_offset(&self, limit: u32, offset: u32) -> Option<u32> {
        let next = u64::from(offset) + u64::from(limit);
        if limit > 0 && next < self.total {
            u32::try_from(next).ok()
        } else {
            None
        }
    }
}

/// A run whose retention window has elapsed, together with one of its files
/// (if any) so the caller can remove the stored object as well.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurgeCandidate {
    pub run_id: String,
    pub file_path: Option<String>,
}
