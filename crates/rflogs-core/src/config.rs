use crate::parser::ParserConfig;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub db_path: PathBuf,
    pub artifact_root: PathBuf,
    pub workers: usize,
    pub queue_depth: usize,
    pub read_buffer: usize,
    pub log_level: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".rflogs/rflogs.db"),
            artifact_root: PathBuf::from(".rflogs/artifacts"),
            workers: 2,
            queue_depth: 64,
            read_buffer: ParserConfig::default().buffer_size,
            log_level: "info".to_string(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|k| env::var(k).ok())
    }

    /// Defaults overridden by whatever `var` returns. Unparseable numbers
    /// and zero sizes keep the default.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = var("RFLOGS_DB") {
            cfg.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("RFLOGS_ARTIFACT_ROOT") {
            cfg.artifact_root = PathBuf::from(v);
        }
        if let Some(n) = positive(var("RFLOGS_WORKERS")) {
            cfg.workers = n;
        }
        if let Some(n) = positive(var("RFLOGS_QUEUE_DEPTH")) {
            cfg.queue_depth = n;
        }
        if let Some(n) = positive(var("RFLOGS_READ_BUFFER")) {
            cfg.read_buffer = n;
        }
        if let Some(v) = var("RFLOGS_LOG") {
            cfg.log_level = v;
        }
        cfg
    }

    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            buffer_size: self.read_buffer,
        }
    }
}

fn positive(v: Option<String>) -> Option<usize> {
    v.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
}
