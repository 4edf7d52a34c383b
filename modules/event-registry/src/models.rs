use chrono::{DateTime, Utc};
use event_bus::EventMessage;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical registration of a generated event
///
/// Created once per `original_event_id` and never updated.
/// `processed_at` is stamped together with `registered_at`, so
/// `processed_at >= registered_at` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredEvent {
    pub id: Uuid,
    pub original_event_id: Uuid,
    pub event_type: String,
    pub service_name: String,
    pub payload: String,
    /// Copied from the source event
    pub created_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl RegisteredEvent {
    /// Registration for `message`, stamped at `now`
    pub fn from_message(message: &EventMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_event_id: message.event_id,
            event_type: message.event_type.clone(),
            service_name: message.service_name.clone(),
            payload: message.payload.clone(),
            created_at: message.created_at,
            registered_at: now,
            processed_at: now,
        }
    }
}

/// Optional constraints for the filtered listing
///
/// Date bounds are inclusive and apply to `created_at`. Empty strings are
/// treated as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub event_type: Option<String>,
    pub service_name: Option<String>,
}

impl EventFilter {
    /// Same filter with empty strings dropped
    pub fn normalized(&self) -> Self {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());

        Self {
            start_date: self.start_date,
            end_date: self.end_date,
            event_type: non_empty(&self.event_type),
            service_name: non_empty(&self.service_name),
        }
    }

    pub fn matches(&self, event: &RegisteredEvent) -> bool {
        let filter = self.normalized();

        filter.start_date.map_or(true, |start| event.created_at >= start)
            && filter.end_date.map_or(true, |end| event.created_at <= end)
            && filter
                .event_type
                .as_deref()
                .map_or(true, |t| event.event_type == t)
            && filter
                .service_name
                .as_deref()
                .map_or(true, |s| event.service_name == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    CreatedAt,
    RegisteredAt,
    ProcessedAt,
    EventType,
    ServiceName,
}

impl SortField {
    /// Column backing the field; only these names ever reach SQL
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::RegisteredAt => "registered_at",
            SortField::ProcessedAt => "processed_at",
            SortField::EventType => "event_type",
            SortField::ServiceName => "service_name",
        }
    }

    fn compare(&self, a: &RegisteredEvent, b: &RegisteredEvent) -> Ordering {
        match self {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::RegisteredAt => a.registered_at.cmp(&b.registered_at),
            SortField::ProcessedAt => a.processed_at.cmp(&b.processed_at),
            SortField::EventType => a.event_type.cmp(&b.event_type),
            SortField::ServiceName => a.service_name.cmp(&b.service_name),
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createdAt" => Ok(SortField::CreatedAt),
            "registeredAt" => Ok(SortField::RegisteredAt),
            "processedAt" => Ok(SortField::ProcessedAt),
            "eventType" => Ok(SortField::EventType),
            "serviceName" => Ok(SortField::ServiceName),
            other => Err(format!("unknown sort field: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction: {}", other)),
        }
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Page index (0-based), page size and ordering
///
/// Defaults to the first page of 20, newest `created_at` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub sort: SortField,
    pub direction: SortDirection,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            sort: SortField::default(),
            direction: SortDirection::default(),
        }
    }
}

impl PageRequest {
    /// A page size of 0 is raised to 1
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.max(1),
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, sort: SortField, direction: SortDirection) -> Self {
        self.sort = sort;
        self.direction = direction;
        self
    }

    pub fn offset(&self) -> i64 {
        self.page as i64 * self.size as i64
    }

    /// Order `events` per this request; ties fall back to `id`
    pub fn sort(&self, events: &mut [RegisteredEvent]) {
        events.sort_by(|a, b| {
            let ordering = self.sort.compare(a, b).then_with(|| a.id.cmp(&b.id));
            match self.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub current_page: u32,
    pub total_items: i64,
    pub total_pages: u32,
    pub page_size: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_items: i64) -> Self {
        let size = i64::from(request.size.max(1));
        let total_pages =
            u32::try_from((total_items.max(0) + size - 1) / size).unwrap_or(u32::MAX);

        Self {
            content,
            current_page: request.page,
            total_items,
            total_pages,
            page_size: request.size,
            has_next: request.page.saturating_add(1) < total_pages,
            has_previous: request.page > 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub service_name: String,
    pub total_registered_events: i64,
}
