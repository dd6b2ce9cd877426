//! Backend lookups driven by a classified intent.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::models::{columns, parse_entity_date};
use crate::backend::{Backend, Filter, Query, Row, Table};
use crate::nlu::{Entities, Intent};

/// What a lookup found, for one request only.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ContextData {
    pub found: bool,
    pub data: Vec<Row>,
    /// Entities actually used as filters.
    pub query_params: Entities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The intent needs criteria the user did not give; nothing was queried.
    #[serde(skip)]
    pub missing_criteria: bool,
}

impl ContextData {
    fn missing_criteria() -> Self {
        Self { missing_criteria: true, ..Self::default() }
    }
}

pub struct ContextLookup {
    backend: Arc<dyn Backend>,
}

/// Entity value, treating blank strings as absent.
fn entity<'a>(entities: &'a Entities, key: &str) -> Option<&'a str> {
    entities.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Like [`entity`], recording the value in `used`.
fn take(entities: &Entities, used: &mut Entities, key: &str) -> Option<String> {
    let value = entity(entities, key)?;
    used.insert(key.to_string(), value.to_string());
    Some(value.to_string())
}

impl ContextLookup {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Run the lookup for `intent`. Backend failures are reported in `error`.
    pub async fn fetch(&self, intent: Intent, entities: &Entities) -> ContextData {
        let Some((query, used)) = build_query(intent, entities) else {
            return match intent {
                Intent::GeneralQuestion | Intent::Unknown => ContextData::default(),
                _ => {
                    info!("{intent}: no usable criteria in {entities:?}");
                    ContextData::missing_criteria()
                }
            };
        };

        match self.backend.select(&query).await {
            Ok(data) => {
                info!("{intent}: {} row(s) from {}", data.len(), query.table);
                ContextData { found: !data.is_empty(), data, query_params: used, ..ContextData::default() }
            }
            Err(e) => {
                warn!("{intent}: lookup in {} failed: {e}", query.table);
                ContextData { query_params: used, error: Some(e.to_string()), ..ContextData::default() }
            }
        }
    }
}

/// Query for `intent`, plus the entities it filters on.
///
/// `None` means nothing should be queried: either the intent needs no data,
/// or an employee search has no criteria. Event and task lookups without
/// criteria list everything up to the row cap.
pub fn build_query(intent: Intent, entities: &Entities) -> Option<(Query, Entities)> {
    let mut used = Entities::new();

    let query = match intent {
        Intent::FindEmployee | Intent::FindByPosition | Intent::FindByDepartment | Intent::Availability => {
            let name = take(entities, &mut used, "employee_name");
            let department = take(entities, &mut used, "department");
            // Availability is looked up by person or team; position is ignored
            let position = if intent == Intent::Availability { None } else { take(entities, &mut used, "position") };
            if intent == Intent::Availability {
                // Carried to the composer so it can mention the day
                take(entities, &mut used, "date");
            }

            let required = match intent {
                Intent::FindByPosition => position.is_some(),
                Intent::FindByDepartment => department.is_some(),
                _ => name.is_some() || department.is_some() || position.is_some(),
            };
            if !required {
                return None;
            }

            let mut query = Query::select(Table::Employees);
            if let Some(name) = name {
                query = query.filter(Filter::ilike(columns::EMPLOYEE_NAME, name));
            }
            if let Some(department) = department {
                query = query.filter(Filter::ilike(columns::EMPLOYEE_DEPARTMENT, department));
            }
            if let Some(position) = position {
                query = query.filter(Filter::ilike(columns::EMPLOYEE_POSITION, position));
            }
            query
        }
        Intent::EventInfo => {
            let mut query = Query::select(Table::Events).order_by(columns::EVENT_DATE, Default::default());
            if let Some(date) = entity(entities, "date") {
                match parse_entity_date(date) {
                    Some(day) => {
                        used.insert("date".to_string(), date.to_string());
                        query = query.filter(Filter::eq(columns::EVENT_DATE, day.format("%Y-%m-%d").to_string()));
                    }
                    None => info!("dropping date {date:?}: not DD.MM.YYYY"),
                }
            }
            if let Some(kind) = take(entities, &mut used, "event_type") {
                query = query.filter(Filter::eq(columns::EVENT_TYPE, kind));
            }
            if let Some(location) = take(entities, &mut used, "location") {
                query = query.filter(Filter::ilike(columns::EVENT_LOCATION, location));
            }
            query
        }
        Intent::TaskInfo => {
            let mut query = Query::select(Table::Tasks);
            if let Some(keyword) = take(entities, &mut used, "task_keyword") {
                query = query.filter(Filter::ilike(columns::TASK_DESCRIPTION, keyword));
            }
            if let Some(project) = take(entities, &mut used, "project") {
                query = query.filter(Filter::ilike(columns::TASK_PROJECT, project));
            }
            query
        }
        Intent::GeneralQuestion | Intent::Unknown => return None,
    };

    Some((query, used))
}
