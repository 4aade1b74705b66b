use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::bootstrap::{SeedSource, load_seed};
use crate::fields::{CustomField, FieldRegistry, backfill};
use crate::form::{AssignmentError, TaskDraft};
use crate::history::History;
use crate::ops::{self, IdGenerator};
use crate::storage::{KeyValueStore, LoadStatus, SaveStatus, TaskStorage};
use crate::task::Task;
use crate::view::{DEFAULT_PAGE_SIZE, ViewQuery, ViewState};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Maximum snapshots kept for undo. `0` keeps everything.
    pub history_limit: usize,
    pub page_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// User-facing confirmation of a finished action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Created(i64),
    Updated(i64),
    Deleted(i64),
    BulkDeleted(usize),
    FieldsSaved { fields: usize, backfilled: usize },
    Undone,
    Redone,
}

impl Notice {
    pub fn is_deletion(&self) -> bool {
        matches!(self, Notice::Deleted(_) | Notice::BulkDeleted(_))
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Created(id) => write!(f, "Created task {id}."),
            Notice::Updated(id) => write!(f, "Updated task {id}."),
            Notice::Deleted(id) => write!(f, "Deleted task {id}."),
            Notice::BulkDeleted(count) => write!(f, "Deleted {count} task(s)."),
            Notice::FieldsSaved { fields, backfilled } => write!(
                f,
                "Saved {fields} custom field(s); filled {backfilled} missing value(s)."
            ),
            Notice::Undone => f.write_str("Undo completed."),
            Notice::Redone => f.write_str("Redo completed."),
        }
    }
}

/// Result of a destructive action that needs confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done(Notice),
    Cancelled,
    NotFound,
}

/// Synchronous yes/no gate in front of destructive actions.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Approves every prompt (`--yes`, or `confirm = off`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }
}

/// Holder of the current task list. No validation, no derived data.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

impl TaskStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn set(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }
}

/// Everything one user session works on: the task list, its undo history,
/// the declared custom fields, the table view state and the storage they
/// are persisted to. Every mutation is persisted before it returns.
#[derive(Debug)]
pub struct Session<S> {
    storage: TaskStorage<S>,
    store: TaskStore,
    history: History,
    fields: FieldRegistry,
    ids: IdGenerator,
    view: ViewState,
    last_save: SaveStatus,
}

impl<S: KeyValueStore> Session<S> {
    /// Load the session from `store`. When the store holds no readable task
    /// list (missing or corrupt) and a seed source is given, the seed is
    /// fetched once.
    #[instrument(skip_all)]
    pub fn open(store: S, options: &SessionOptions, seed: Option<&dyn SeedSource>) -> Self {
        let mut storage = TaskStorage::new(store);
        let (mut tasks, status) = storage.load_with_status();
        let mut ids = IdGenerator::new();
        ids.observe(tasks.iter().map(|t| t.id));

        let mut last_save = SaveStatus::Saved;
        if matches!(status, LoadStatus::Missing | LoadStatus::Failed(_))
            && let Some(source) = seed
        {
            tasks = load_seed(source, &mut ids);
            if !tasks.is_empty() {
                last_save = storage.save(&tasks);
            }
        }

        let fields = storage.load_fields();
        ids.observe(fields.iter().map(|f| f.id));

        let history = match storage.load_history().and_then(History::restore) {
            Some(history) if history.current() == tasks.as_slice() => {
                debug!(
                    cursor = history.cursor(),
                    len = history.len(),
                    "restored persisted history"
                );
                history
            }
            Some(_) => {
                warn!("persisted history does not match stored tasks; starting fresh");
                History::seed(tasks.clone())
            }
            None => History::seed(tasks.clone()),
        }
        .with_limit(options.history_limit);

        info!(
            tasks = tasks.len(),
            fields = fields.len(),
            history = history.len(),
            "session opened"
        );

        let view = ViewState::new(ViewQuery {
            page_size: options.page_size.max(1),
            ..ViewQuery::default()
        });

        Self {
            storage,
            store: TaskStore::new(tasks),
            history,
            fields: FieldRegistry::new(fields),
            ids,
            view,
            last_save,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        self.store.tasks()
    }

    pub fn task(&self, id: i64) -> Option<&Task> {
        self.tasks().iter().find(|t| t.id == id)
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ViewState {
        &mut self.view
    }

    /// Status of the most recent write to storage.
    pub fn last_save(&self) -> &SaveStatus {
        &self.last_save
    }

    pub fn storage(&self) -> &TaskStorage<S> {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage.into_inner()
    }

    pub fn next_id(&mut self) -> i64 {
        self.ids.next()
    }

    pub fn new_draft(&self, title: impl Into<String>) -> TaskDraft {
        TaskDraft::new(title, self.fields.fields())
    }

    #[instrument(skip(self, draft), fields(title = %draft.title))]
    pub fn create(&mut self, draft: TaskDraft) -> Result<Notice, AssignmentError> {
        let id = self.ids.next();
        let task = draft.into_task(id)?;
        let next = ops::append_task(self.tasks(), task);
        self.commit(next);
        info!(id, "task created");
        Ok(Notice::Created(id))
    }

    /// Replace the task with the same id. Unknown ids are a silent no-op.
    #[instrument(skip(self, task), fields(id = task.id))]
    pub fn update(&mut self, task: Task) -> Option<Notice> {
        let id = task.id;
        let Some(next) = ops::replace_task(self.tasks(), task) else {
            debug!("no task with this id; nothing updated");
            return None;
        };
        self.commit(next);
        Some(Notice::Updated(id))
    }

    #[instrument(skip(self, confirm))]
    pub fn delete(&mut self, id: i64, confirm: &mut dyn Confirm) -> Outcome {
        let Some(task) = self.task(id) else {
            return Outcome::NotFound;
        };
        let prompt = format!("Delete task {id} \"{}\"?", task.title);
        if !confirm.confirm(&prompt) {
            debug!("delete declined");
            return Outcome::Cancelled;
        }
        let Some(next) = ops::remove_task(self.tasks(), id) else {
            return Outcome::NotFound;
        };
        self.commit(next);
        Outcome::Done(Notice::Deleted(id))
    }

    /// Remove every task in `ids` as a single undoable step.
    #[instrument(skip(self, ids, confirm), fields(requested = ids.len()))]
    pub fn bulk_delete(&mut self, ids: &BTreeSet<i64>, confirm: &mut dyn Confirm) -> Outcome {
        let matching = self.tasks().iter().filter(|t| ids.contains(&t.id)).count();
        if matching == 0 {
            return Outcome::NotFound;
        }
        let prompt = format!("Delete {matching} selected task(s)?");
        if !confirm.confirm(&prompt) {
            debug!("bulk delete declined");
            return Outcome::Cancelled;
        }
        let (next, removed) = ops::remove_tasks(self.tasks(), ids);
        self.commit(next);
        self.view.clear_selection();
        info!(removed, "bulk delete");
        Outcome::Done(Notice::BulkDeleted(removed))
    }

    /// Bulk delete whatever is currently selected in the view.
    pub fn delete_selected(&mut self, confirm: &mut dyn Confirm) -> Outcome {
        let selected = self.view.selection().clone();
        self.bulk_delete(&selected, confirm)
    }

    #[instrument(skip(self))]
    pub fn undo(&mut self) -> Option<Notice> {
        let snapshot = self.history.undo()?.to_vec();
        self.store.set(snapshot);
        self.persist();
        Some(Notice::Undone)
    }

    #[instrument(skip(self))]
    pub fn redo(&mut self) -> Option<Notice> {
        let snapshot = self.history.redo()?.to_vec();
        self.store.set(snapshot);
        self.persist();
        Some(Notice::Redone)
    }

    /// Replace the declared fields and give existing tasks defaults for any
    /// field they lack. A backfill that changes tasks is one undoable step.
    #[instrument(skip(self, fields), fields(count = fields.len()))]
    pub fn save_fields(&mut self, fields: Vec<CustomField>) -> Notice {
        self.ids.observe(fields.iter().map(|f| f.id));
        let mut next = self.tasks().to_vec();
        let backfilled = backfill(&mut next, &fields);
        self.fields = FieldRegistry::new(fields);

        let fields_status = self.storage.save_fields(self.fields.fields());
        if backfilled > 0 {
            self.commit(next);
            if !fields_status.is_saved() {
                self.last_save = fields_status;
            }
        } else {
            self.last_save = fields_status;
        }

        Notice::FieldsSaved {
            fields: self.fields.fields().len(),
            backfilled,
        }
    }

    fn commit(&mut self, next: Vec<Task>) {
        self.history.push(next.clone());
        self.store.set(next);
        self.persist();
    }

    fn persist(&mut self) {
        let tasks_status = self.storage.save(self.store.tasks());
        let history_status = self.storage.save_history(&self.history.to_record());
        self.last_save = match (tasks_status, history_status) {
            (SaveStatus::Saved, SaveStatus::Saved) => SaveStatus::Saved,
            (SaveStatus::Failed(reason), _) | (_, SaveStatus::Failed(reason)) => {
                SaveStatus::Failed(reason)
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::fields::FieldType;
    use crate::storage::{FIELDS_KEY, MemoryStore, StorageError, TASKS_KEY};
    use crate::task::{Priority, Status};

    struct Decline;

    impl Confirm for Decline {
        fn confirm(&mut self, _prompt: &str) -> bool {
            false
        }
    }

    struct Recording(Vec<String>);

    impl Confirm for Recording {
        fn confirm(&mut self, prompt: &str) -> bool {
            self.0.push(prompt.to_string());
            true
        }
    }

    fn session_with(titles: &[&str]) -> Session<MemoryStore> {
        let tasks: Vec<Task> = titles
            .iter()
            .enumerate()
            .map(|(idx, title)| Task::new(idx as i64 + 1, *title))
            .collect();
        let mut store = MemoryStore::new();
        store.insert_raw(TASKS_KEY, &serde_json::to_string(&tasks).expect("encode"));
        Session::open(store, &SessionOptions::default(), None)
    }

    #[test]
    fn create_then_undo_end_to_end() {
        let mut session = session_with(&["Existing"]);
        assert!(!session.history().can_undo());

        let mut draft = session.new_draft("Buy milk");
        draft.priority = Priority::None;
        draft.status = Status::NotStarted;
        let notice = session.create(draft).expect("valid draft");

        let Notice::Created(id) = notice else {
            panic!("expected a created notice, got {notice:?}");
        };
        assert_eq!(session.tasks().len(), 2);
        assert!(id > 1);
        assert_eq!(session.task(id).map(|t| t.title.as_str()), Some("Buy milk"));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history().cursor(), 1);

        assert_eq!(session.undo(), Some(Notice::Undone));
        assert_eq!(session.tasks().len(), 1);
        assert_eq!(session.tasks()[0].title, "Existing");
        assert_eq!(session.history().cursor(), 0);

        assert_eq!(session.redo(), Some(Notice::Redone));
        assert!(session.task(id).is_some());
    }

    #[test]
    fn update_unknown_id_is_silent_noop() {
        let mut session = session_with(&["a"]);
        assert_eq!(session.update(Task::new(404, "ghost")), None);
        assert_eq!(session.history().len(), 1);

        let mut edited = session.tasks()[0].clone();
        edited.status = Status::Completed;
        assert_eq!(session.update(edited), Some(Notice::Updated(1)));
        assert_eq!(session.tasks()[0].status, Status::Completed);
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn declined_delete_changes_nothing() {
        let mut session = session_with(&["a", "b"]);
        assert_eq!(session.delete(1, &mut Decline), Outcome::Cancelled);
        assert_eq!(session.tasks().len(), 2);
        assert_eq!(session.history().len(), 1);

        assert_eq!(session.delete(77, &mut AssumeYes), Outcome::NotFound);

        let outcome = session.delete(1, &mut AssumeYes);
        assert_eq!(outcome, Outcome::Done(Notice::Deleted(1)));
        assert!(Notice::Deleted(1).is_deletion());
        assert_eq!(session.tasks().len(), 1);
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn bulk_delete_is_one_history_entry() {
        let titles: Vec<String> = (1..=10).map(|n| format!("task {n}")).collect();
        let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
        let mut session = session_with(&refs);

        for id in [2, 5, 9] {
            session.view_mut().select(id);
        }
        let mut confirm = Recording(Vec::new());
        let outcome = session.delete_selected(&mut confirm);

        assert_eq!(outcome, Outcome::Done(Notice::BulkDeleted(3)));
        assert_eq!(confirm.0, vec!["Delete 3 selected task(s)?".to_string()]);
        assert_eq!(session.tasks().len(), 7);
        assert!(session.view().selection().is_empty());
        assert_eq!(session.history().len(), 2);

        session.undo();
        assert_eq!(session.tasks().len(), 10);
    }

    #[test]
    fn declined_bulk_delete_keeps_selection() {
        let mut session = session_with(&["a", "b", "c"]);
        session.view_mut().select(1);
        session.view_mut().select(3);
        assert_eq!(session.delete_selected(&mut Decline), Outcome::Cancelled);
        assert_eq!(session.view().selection().len(), 2);
        assert_eq!(session.tasks().len(), 3);
    }

    #[test]
    fn saving_fields_backfills_and_can_be_undone() {
        let mut session = session_with(&["a", "b"]);
        let mut registry = session.fields().clone();
        let id = session.next_id();
        registry
            .add_field("points", FieldType::Number, id)
            .expect("valid name");

        let notice = session.save_fields(registry.into_fields());
        assert_eq!(
            notice,
            Notice::FieldsSaved {
                fields: 1,
                backfilled: 2
            }
        );
        assert!(
            session
                .tasks()
                .iter()
                .all(|t| t.field("points") == Some(&json!(0)))
        );
        assert_eq!(session.history().len(), 2);

        session.undo();
        assert!(session.tasks().iter().all(|t| t.field("points").is_none()));
        assert_eq!(session.fields().fields().len(), 1);
    }

    #[test]
    fn new_drafts_include_declared_fields() {
        let mut session = session_with(&[]);
        let id = session.next_id();
        let mut registry = session.fields().clone();
        registry
            .add_field("billable", FieldType::Checkbox, id)
            .expect("valid name");
        session.save_fields(registry.into_fields());

        let draft = session.new_draft("Invoice");
        assert_eq!(draft.fields.get("billable"), Some(&json!(false)));
        // No tasks existed, so nothing was backfilled and no undo step added.
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn state_survives_reopening_the_store() {
        let mut session = session_with(&["a"]);
        let draft = session.new_draft("b");
        session.create(draft).expect("valid draft");
        session.undo();

        let store = session.into_storage();
        let mut reopened = Session::open(store, &SessionOptions::default(), None);
        assert_eq!(reopened.tasks().len(), 1);
        assert_eq!(reopened.history().cursor(), 0);
        assert_eq!(reopened.redo(), Some(Notice::Redone));
        assert_eq!(reopened.tasks().len(), 2);
    }

    #[test]
    fn failed_writes_are_observable_but_state_stays() {
        let mut session = Session::open(MemoryStore::with_quota(64), &SessionOptions::default(), None);
        let draft = session.new_draft("A task whose title is long enough to blow the quota");
        session.create(draft).expect("valid draft");

        assert!(matches!(session.last_save(), SaveStatus::Failed(_)));
        assert_eq!(session.tasks().len(), 1);
        assert!(session.storage().inner().raw(TASKS_KEY).is_none());
    }

    /// Rejects every write except field definitions.
    struct FieldsOnly(MemoryStore);

    impl KeyValueStore for FieldsOnly {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            if key != FIELDS_KEY {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed: value.len(),
                    quota: 0,
                });
            }
            self.0.set(key, value)
        }
    }

    #[test]
    fn successful_field_save_clears_an_earlier_failure() {
        let mut inner = MemoryStore::new();
        inner.insert_raw(TASKS_KEY, r#"[{"id":1,"title":"a","points":0}]"#);
        let mut session = Session::open(FieldsOnly(inner), &SessionOptions::default(), None);

        let mut edited = session.tasks()[0].clone();
        edited.title = "renamed".into();
        session.update(edited);
        assert!(matches!(session.last_save(), SaveStatus::Failed(_)));

        let mut registry = session.fields().clone();
        let id = session.next_id();
        registry
            .add_field("points", FieldType::Number, id)
            .expect("valid name");
        let notice = session.save_fields(registry.into_fields());

        assert_eq!(
            notice,
            Notice::FieldsSaved {
                fields: 1,
                backfilled: 0
            }
        );
        assert_eq!(session.last_save(), &SaveStatus::Saved);
    }

    #[test]
    fn corrupt_task_list_falls_back_to_seed() {
        struct Seed;
        impl SeedSource for Seed {
            fn fetch(&self) -> anyhow::Result<Vec<serde_json::Value>> {
                Ok(vec![json!({"id": 3, "title": "Seeded"})])
            }
        }

        let mut store = MemoryStore::new();
        store.insert_raw(TASKS_KEY, "{not json");
        let session = Session::open(store, &SessionOptions::default(), Some(&Seed as &dyn SeedSource));

        assert_eq!(session.tasks().len(), 1);
        assert_eq!(session.tasks()[0].title, "Seeded");
        assert!(
            session
                .storage()
                .inner()
                .raw(TASKS_KEY)
                .is_some_and(|raw| raw.contains("Seeded"))
        );
    }

    #[test]
    fn seed_is_used_only_when_storage_is_empty() {
        struct Seed;
        impl SeedSource for Seed {
            fn fetch(&self) -> anyhow::Result<Vec<serde_json::Value>> {
                Ok(vec![json!({"id": 3, "title": "Seeded"})])
            }
        }

        let fresh = Session::open(MemoryStore::new(), &SessionOptions::default(), Some(&Seed as &dyn SeedSource));
        assert_eq!(fresh.tasks().len(), 1);
        assert_eq!(fresh.tasks()[0].title, "Seeded");
        assert!(fresh.storage().inner().raw(TASKS_KEY).is_some());

        let mut store = MemoryStore::new();
        store.insert_raw(TASKS_KEY, "[]");
        let existing = Session::open(store, &SessionOptions::default(), Some(&Seed as &dyn SeedSource));
        assert!(existing.tasks().is_empty());
    }
}
