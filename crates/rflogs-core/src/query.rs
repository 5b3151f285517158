//! Tag filters for run listings, compiled into parameterised SQL.
//!
//! Every filter becomes a typed [`Predicate`]; [`RunQuery::compile`] renders
//! the predicates into joins and where-clauses with numbered placeholders.
//! Only generated aliases (`t0`, `t1`, ...) are spliced into the SQL text,
//! user input always travels as a bound parameter.

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// Query keys that control paging instead of filtering.
const PAGING_KEYS: [&str; 2] = ["limit", "offset"];

/// Pseudo-tag that filters on the run verdict.
pub const VERDICT_KEY: &str = "verdict";

/// Ordered key -> value filters, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilters(Vec<(String, String)>);

impl TagFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter. A later filter for the same key (ignoring case)
    /// replaces the earlier one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Builds filters from raw request parameters: paging keys and empty
    /// values are dropped, keys are lower-cased.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filters = Self::new();
        for (k, v) in pairs {
            let key = k.as_ref().to_lowercase();
            let value = v.as_ref();
            if PAGING_KEYS.contains(&key.as_str()) || value.is_empty() {
                continue;
            }
            filters.insert(key, value);
        }
        filters
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn predicates(&self) -> Vec<Predicate> {
        self.0
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case(VERDICT_KEY) {
                    Predicate::Verdict(v.clone())
                } else {
                    Predicate::Tag {
                        key: k.clone(),
                        value: v.clone(),
                    }
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Case-insensitive match on the run's verdict column.
    Verdict(String),
    /// Run has a tag with this key (ignoring case) and exactly this value.
    Tag { key: String, value: String },
}

/// Compiled `FROM ... WHERE ...` fragment plus its bound parameters.
#[derive(Debug, Clone)]
pub struct RunQuery {
    joins: Vec<String>,
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl RunQuery {
    pub fn compile(project_id: &str, predicates: &[Predicate]) -> Self {
        let mut q = RunQuery {
            joins: Vec::new(),
            clauses: Vec::new(),
            params: Vec::new(),
        };
        let p = q.bind(project_id);
        q.clauses.push(format!("r.project_id = {p}"));

        for pred in predicates {
            match pred {
                Predicate::Verdict(v) => {
                    let p = q.bind(v);
                    q.clauses.push(format!("LOWER(r.verdict) = LOWER({p})"));
                }
                Predicate::Tag { key, value } => {
                    // one join per tag so each filter constrains its own row
                    let alias = format!("t{}", q.joins.len());
                    let pk = q.bind(key);
                    let pv = q.bind(value);
                    q.joins.push(format!(
                        "JOIN run_tags {alias} ON {alias}.run_id = r.id \
                         AND LOWER({alias}.key) = LOWER({pk}) AND {alias}.value = {pv}"
                    ));
                }
            }
        }
        q
    }

    fn bind(&mut self, v: &str) -> String {
        self.params.push(Value::Text(v.to_string()));
        format!("?{}", self.params.len())
    }

    fn from_clause(&self) -> String {
        let mut sql = String::from("FROM runs r");
        for j in &self.joins {
            sql.push(' ');
            sql.push_str(j);
        }
        sql.push_str(" WHERE ");
        sql.push_str(&self.clauses.join(" AND "));
        sql
    }

    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(DISTINCT r.id) {}", self.from_clause())
    }

    /// Page of distinct run ids, newest first. Limit and offset are the two
    /// parameters after [`RunQuery::params`].
    pub fn page_sql(&self) -> String {
        let n = self.params.len();
        format!(
            "SELECT DISTINCT r.id, r.created_at, r.rowid {} \
             ORDER BY r.created_at DESC, r.rowid DESC LIMIT ?{} OFFSET ?{}",
            self.from_clause(),
            n + 1,
            n + 2
        )
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn page_params(&self, limit: u32, offset: u32) -> Vec<Value> {
        let mut out = self.params.clone();
        out.push(Value::Integer(i64::from(limit)));
        out.push(Value::Integer(i64::from(offset)));
        out
    }
}
