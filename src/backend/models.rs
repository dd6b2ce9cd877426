//! Typed views over backend rows and the payloads of the write commands.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::backend::{Direction, Filter, FilterValue, Operator, Query, Row};

/// Tables the bot is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Employees,
    Events,
    Tasks,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employees => "employees",
            Self::Events => "events",
            Self::Tasks => "tasks",
        }
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "employees" => Ok(Self::Employees),
            "events" => Ok(Self::Events),
            "tasks" => Ok(Self::Tasks),
            other => Err(format!("unknown table '{other}' (expected employees, events or tasks)")),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column names used by the lookups.
pub mod columns {
    pub const EMPLOYEE_NAME: &str = "name";
    pub const EMPLOYEE_DEPARTMENT: &str = "department";
    pub const EMPLOYEE_POSITION: &str = "position";

    pub const EVENT_TITLE: &str = "title";
    pub const EVENT_DESCRIPTION: &str = "description";
    pub const EVENT_DATE: &str = "date";
    pub const EVENT_TYPE: &str = "type";
    pub const EVENT_LOCATION: &str = "location";

    pub const TASK_TITLE: &str = "title";
    pub const TASK_DESCRIPTION: &str = "description";
    pub const TASK_PROJECT: &str = "project";
}

/// Accepts strings, numbers or null where a text column is expected.
fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Employee {
    #[serde(alias = "full_name")]
    pub name: String,
    #[serde(default, alias = "department_name", deserialize_with = "lenient_text")]
    pub department: Option<String>,
    #[serde(default, alias = "job_title", deserialize_with = "lenient_text")]
    pub position: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub phone_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub hire_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Event {
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub location: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient_text")]
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Task {
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub project: Option<String>,
}

/// Decode a row into a typed record, ignoring rows that do not fit.
pub fn from_row<T: for<'de> Deserialize<'de>>(row: &Row) -> Option<T> {
    serde_json::from_value(Value::Object(row.clone())).ok()
}

/// Parse a `DD.MM.YYYY` date. Other phrasings are not interpreted.
pub fn parse_entity_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%d.%m.%Y").ok()
}

/// Dates typed by users in commands: `DD.MM.YYYY` or ISO.
fn parse_command_date(s: &str) -> Option<NaiveDate> {
    parse_entity_date(s).or_else(|| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("поле '{field}' не может быть пустым"))
    } else {
        Ok(())
    }
}

/// Payload of `/add_event`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub date: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
}

#[derive(Serialize)]
struct EventRow<'a> {
    title: &'a str,
    description: Option<&'a str>,
    date: String,
    time: Option<&'a str>,
    location: Option<&'a str>,
    #[serde(rename = "type")]
    event_type: &'a str,
}

impl NewEvent {
    /// Validate and convert into an insertable row.
    pub fn into_row(self) -> Result<Row, String> {
        non_empty("title", &self.title)?;
        let date = parse_command_date(&self.date)
            .ok_or_else(|| format!("дата '{}' должна быть в формате ДД.ММ.ГГГГ", self.date))?;
        let row = EventRow {
            title: self.title.trim(),
            description: self.description.as_deref(),
            date: date.format("%Y-%m-%d").to_string(),
            time: self.time.as_deref(),
            location: self.location.as_deref(),
            event_type: self.event_type.as_deref().unwrap_or("corporate"),
        };
        to_row(&row)
    }
}

const TASK_STATUSES: [&str; 3] = ["pending", "in_progress", "completed"];
const TASK_PRIORITIES: [&str; 3] = ["low", "medium", "high"];

/// Payload of `/add_task`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assignee_id: Option<i64>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Serialize)]
struct TaskRow<'a> {
    title: &'a str,
    description: Option<&'a str>,
    assignee_id: Option<i64>,
    due_date: Option<String>,
    status: &'a str,
    priority: &'a str,
    project: Option<&'a str>,
}

impl NewTask {
    pub fn into_row(self) -> Result<Row, String> {
        non_empty("title", &self.title)?;
        let status = self.status.as_deref().unwrap_or("pending");
        if !TASK_STATUSES.contains(&status) {
            return Err(format!("статус '{status}' не поддерживается ({})", TASK_STATUSES.join(", ")));
        }
        let priority = self.priority.as_deref().unwrap_or("medium");
        if !TASK_PRIORITIES.contains(&priority) {
            return Err(format!(
                "приоритет '{priority}' не поддерживается ({})",
                TASK_PRIORITIES.join(", ")
            ));
        }
        let due_date = match self.due_date.as_deref() {
            Some(raw) => Some(
                parse_command_date(raw)
                    .ok_or_else(|| format!("срок '{raw}' должен быть в формате ДД.ММ.ГГГГ"))?
                    .format("%Y-%m-%d")
                    .to_string(),
            ),
            None => None,
        };
        let row = TaskRow {
            title: self.title.trim(),
            description: self.description.as_deref(),
            assignee_id: self.assignee_id,
            due_date,
            status,
            priority,
            project: self.project.as_deref(),
        };
        to_row(&row)
    }
}

fn to_row<T: Serialize>(value: &T) -> Result<Row, String> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("row must be an object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Structured query accepted by `/query` and `/db_query`.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseQuery {
    pub table: String,
    #[serde(default = "default_columns", deserialize_with = "columns_list")]
    pub select_columns: String,
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterCondition {
    pub column: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
}

fn default_columns() -> String {
    "*".to_string()
}

fn columns_list<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Columns {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Columns::deserialize(d)? {
        Columns::One(s) => s,
        Columns::Many(list) => list.join(", "),
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl DatabaseQuery {
    /// Validate against the allowed tables and build the backend query.
    pub fn into_query(self) -> Result<Query, String> {
        let table: Table = self.table.parse()?;
        let mut query = Query::select(table).columns(&self.select_columns);

        for condition in self.filters {
            if condition.column.trim().is_empty() {
                return Err("фильтр без имени колонки".to_string());
            }
            let filter = match (&condition.value, condition.operator) {
                (Value::Array(items), Operator::In) => {
                    Filter::is_in(condition.column, items.iter().map(scalar_text).collect())
                }
                (Value::Array(items), operator) => Filter {
                    column: condition.column,
                    operator,
                    value: FilterValue::List(items.iter().map(scalar_text).collect()),
                },
                (other, operator) => Filter::new(condition.column, operator, scalar_text(other)),
            };
            query = query.filter(filter);
        }

        if let Some(order) = self.order_by {
            query = query.order_by(order.column, order.direction);
        }

        match self.limit {
            Some(limit) if limit <= 0 => return Err("limit должен быть больше нуля".to_string()),
            Some(limit) => query = query.limit(limit as usize),
            None => {}
        }

        Ok(query)
    }
}
