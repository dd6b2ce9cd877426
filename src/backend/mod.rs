//! Read/insert access to the hosted relational backend.
//!
//! Queries are built as plain values and rendered into PostgREST URL
//! parameters by [`Query::to_params`], so filter logic is testable without
//! a network.

pub mod models;
pub mod supabase;

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

pub use models::{Employee, Event, NewEvent, NewTask, Table, Task};
pub use supabase::SupabaseClient;

/// One result row, column name to value.
pub type Row = serde_json::Map<String, Value>;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, BackendError>;

    /// Insert one row and return what the backend stored.
    async fn insert(&self, table: Table, row: Row) -> Result<Vec<Row>, BackendError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    Timeout,
    Transport(String),
    /// The backend answered with an error status.
    Api { status: u16, message: String },
    Decode(String),
}

impl BackendError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "query timed out"),
            Self::Transport(e) => write!(f, "connection error: {e}"),
            Self::Api { status, message } => write!(f, "API error {status}: {message}"),
            Self::Decode(e) => write!(f, "unexpected response: {e}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// PostgREST filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    Is,
    In,
    Cs,
    Cd,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::Ilike => "ilike",
            Self::Is => "is",
            Self::In => "in",
            Self::Cs => "cs",
            Self::Cd => "cd",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub operator: Operator,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self { column: column.into(), operator, value: FilterValue::Text(value.into()) }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    /// Case-insensitive substring match.
    pub fn ilike(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(column, Operator::Ilike, value)
    }

    pub fn is_in(column: impl Into<String>, values: Vec<String>) -> Self {
        Self { column: column.into(), operator: Operator::In, value: FilterValue::List(values) }
    }

    /// Right-hand side of `column=<op>.<value>`.
    fn render(&self, nested: bool) -> String {
        let op = self.operator.as_str();
        match (&self.value, self.operator) {
            (FilterValue::Text(v), Operator::Like | Operator::Ilike) => {
                let pattern = if v.contains(['*', '%']) { v.clone() } else { format!("*{v}*") };
                let pattern = if nested { quote(&pattern) } else { pattern };
                format!("{op}.{pattern}")
            }
            (FilterValue::Text(v), Operator::In) => {
                let items: Vec<String> = v.split(',').map(|s| quote(s.trim())).collect();
                format!("{op}.({})", items.join(","))
            }
            (FilterValue::Text(v), Operator::Cs | Operator::Cd) => format!("{op}.{{{v}}}"),
            (FilterValue::Text(v), _) => {
                let v = if nested { quote(v) } else { v.clone() };
                format!("{op}.{v}")
            }
            (FilterValue::List(items), Operator::Cs | Operator::Cd) => {
                let items: Vec<String> = items.iter().map(|s| quote(s)).collect();
                format!("{op}.{{{}}}", items.join(","))
            }
            (FilterValue::List(items), _) => {
                let items: Vec<String> = items.iter().map(|s| quote(s)).collect();
                format!("{op}.({})", items.join(","))
            }
        }
    }
}

/// Double-quote values containing PostgREST reserved characters.
fn quote(value: &str) -> String {
    if value.is_empty() || value.contains([',', '.', ':', '(', ')', '"', '\\', ' ', '{', '}']) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub columns: String,
    /// Combined with AND.
    pub filters: Vec<Filter>,
    /// Combined with OR, as one extra AND term.
    pub any_of: Vec<Filter>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn select(table: Table) -> Self {
        Self {
            table,
            columns: "*".to_string(),
            filters: Vec::new(),
            any_of: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: &str) -> Self {
        self.columns = columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        if self.columns.is_empty() {
            self.columns = "*".to_string();
        }
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn any_of(mut self, filters: Vec<Filter>) -> Self {
        self.any_of = filters;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order = Some((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// PostgREST query parameters; the row limit never exceeds `max_rows`.
    pub fn to_params(&self, max_rows: usize) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];

        for f in &self.filters {
            params.push((f.column.clone(), f.render(false)));
        }

        if !self.any_of.is_empty() {
            let terms: Vec<String> = self
                .any_of
                .iter()
                .map(|f| format!("{}.{}", f.column, f.render(true)))
                .collect();
            params.push(("or".to_string(), format!("({})", terms.join(","))));
        }

        if let Some((column, direction)) = &self.order {
            let dir = match direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            params.push(("order".to_string(), format!("{column}.{dir}.nullslast")));
        }

        let limit = self.limit.map_or(max_rows, |l| l.min(max_rows));
        params.push(("limit".to_string(), limit.to_string()));
        params
    }
}
