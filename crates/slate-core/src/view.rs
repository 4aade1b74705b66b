//! Derived task views: filter, then sort, then paginate.
//!
//! Nothing here is persisted. Views are recomputed from the task list on
//! every query.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::str::FromStr;

use serde_json::Value;
use tracing::trace;

use crate::task::{Priority, Status, Task};

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Case-insensitive title substring. Empty matches everything.
    pub title: String,
    /// `None` means "all".
    pub priority: Option<Priority>,
    /// `None` means "all".
    pub status: Option<Status>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        let title_ok = self.title.is_empty()
            || task
                .title
                .to_lowercase()
                .contains(&self.title.to_lowercase());
        let priority_ok = self.priority.is_none_or(|p| p == task.priority);
        let status_ok = self.status.is_none_or(|s| s == task.status);
        title_ok && priority_ok && status_ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Id,
    Title,
    Priority,
    Status,
    Field(String),
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        if key.is_empty() {
            anyhow::bail!("sort key cannot be empty");
        }
        Ok(match key.to_ascii_lowercase().as_str() {
            "id" => SortKey::Id,
            "title" => SortKey::Title,
            "priority" | "pri" => SortKey::Priority,
            "status" => SortKey::Status,
            _ => SortKey::Field(key.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewQuery {
    pub filter: TaskFilter,
    pub sort: Option<SortSpec>,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

impl Default for ViewQuery {
    fn default() -> Self {
        Self {
            filter: TaskFilter::default(),
            sort: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    /// Number of items before slicing.
    pub total_items: usize,
    pub total_pages: usize,
}

pub fn filter_tasks<'a>(tasks: &'a [Task], filter: &TaskFilter) -> Vec<&'a Task> {
    tasks.iter().filter(|task| filter.matches(task)).collect()
}

/// Stable sort. Ties keep their incoming order.
pub fn sort_tasks(tasks: &mut [&Task], sort: Option<&SortSpec>) {
    let Some(spec) = sort else {
        return;
    };
    tasks.sort_by(|a, b| {
        let ord = compare_by_key(a, b, &spec.key);
        match spec.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    });
}

pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Page<T> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(page_size);

    let start = (page - 1).saturating_mul(page_size).min(total_items);
    let end = start.saturating_add(page_size).min(total_items);

    Page {
        items: items[start..end].to_vec(),
        page,
        page_size,
        total_items,
        total_pages,
    }
}

#[tracing::instrument(skip(tasks, query), fields(total = tasks.len(), page = query.page))]
pub fn run_view<'a>(tasks: &'a [Task], query: &ViewQuery) -> Page<&'a Task> {
    let mut rows = filter_tasks(tasks, &query.filter);
    sort_tasks(&mut rows, query.sort.as_ref());
    let page = paginate(&rows, query.page, query.page_size);
    trace!(
        matched = page.total_items,
        shown = page.items.len(),
        "computed view"
    );
    page
}

fn compare_by_key(a: &Task, b: &Task, key: &SortKey) -> Ordering {
    match key {
        SortKey::Id => a.id.cmp(&b.id),
        SortKey::Title => a.title.cmp(&b.title),
        SortKey::Priority => a.priority.cmp(&b.priority),
        SortKey::Status => a.status.cmp(&b.status),
        SortKey::Field(name) => compare_values(a.field(name), b.field(name)),
    }
}

/// Missing values sort first. Values of different kinds compare as equal.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Query plus row selection, with the reset rules of the task table:
/// changing the filter, sort or page size clears the selection, and a page
/// size change jumps back to page 1.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    query: ViewQuery,
    selected: BTreeSet<i64>,
}

impl ViewState {
    pub fn new(query: ViewQuery) -> Self {
        Self {
            query,
            selected: BTreeSet::new(),
        }
    }

    pub fn query(&self) -> &ViewQuery {
        &self.query
    }

    pub fn selection(&self) -> &BTreeSet<i64> {
        &self.selected
    }

    pub fn set_filter(&mut self, filter: TaskFilter) {
        self.query.filter = filter;
        self.selected.clear();
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) {
        self.query.sort = sort;
        self.selected.clear();
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.query.page_size = page_size.max(1);
        self.query.page = 1;
        self.selected.clear();
    }

    pub fn set_page(&mut self, page: usize) {
        self.query.page = page.max(1);
    }

    pub fn select(&mut self, id: i64) {
        self.selected.insert(id);
    }

    pub fn toggle(&mut self, id: i64) {
        if !self.selected.remove(&id) {
            self.selected.insert(id);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }
}
