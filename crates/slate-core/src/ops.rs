//! Pure task-list transitions. Each takes the current list and returns the
//! next one; persistence and history are the session's job.

use std::collections::BTreeSet;

use crate::task::Task;

pub fn append_task(tasks: &[Task], task: Task) -> Vec<Task> {
    let mut next = tasks.to_vec();
    next.push(task);
    next
}

/// Replace the task with the same id. `None` when no task matches.
pub fn replace_task(tasks: &[Task], task: Task) -> Option<Vec<Task>> {
    let idx = tasks.iter().position(|t| t.id == task.id)?;
    let mut next = tasks.to_vec();
    next[idx] = task;
    Some(next)
}

/// `None` when no task has `id`.
pub fn remove_task(tasks: &[Task], id: i64) -> Option<Vec<Task>> {
    if !tasks.iter().any(|t| t.id == id) {
        return None;
    }
    Some(tasks.iter().filter(|t| t.id != id).cloned().collect())
}

/// Drop every task whose id is in `ids`, in one pass. Returns the new list
/// and the number removed.
pub fn remove_tasks(tasks: &[Task], ids: &BTreeSet<i64>) -> (Vec<Task>, usize) {
    let next: Vec<Task> = tasks
        .iter()
        .filter(|t| !ids.contains(&t.id))
        .cloned()
        .collect();
    let removed = tasks.len() - next.len();
    (next, removed)
}

/// Hands out task ids: the current time in milliseconds, bumped so that every
/// id is strictly greater than the last one issued and than any known id.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    last: i64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure future ids sort after everything in `ids`.
    pub fn observe<I: IntoIterator<Item = i64>>(&mut self, ids: I) {
        if let Some(max) = ids.into_iter().max() {
            self.last = self.last.max(max);
        }
    }

    pub fn next_at(&mut self, now_millis: i64) -> i64 {
        let id = now_millis.max(self.last.saturating_add(1));
        self.last = id;
        id
    }

    pub fn next(&mut self) -> i64 {
        self.next_at(chrono::Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[i64]) -> Vec<Task> {
        ids.iter().map(|id| Task::new(*id, format!("t{id}"))).collect()
    }

    fn ids(tasks: &[Task]) -> Vec<i64> {
        tasks.iter().map(|t| t.id).collect()
    }

    #[test]
    fn append_leaves_input_untouched() {
        let before = list(&[1, 2]);
        let after = append_task(&before, Task::new(3, "t3"));
        assert_eq!(ids(&before), vec![1, 2]);
        assert_eq!(ids(&after), vec![1, 2, 3]);
    }

    #[test]
    fn replace_matches_by_id() {
        let before = list(&[1, 2, 3]);
        let after = replace_task(&before, Task::new(2, "renamed")).expect("id 2 exists");
        assert_eq!(after[1].title, "renamed");
        assert_eq!(ids(&after), vec![1, 2, 3]);
        assert!(replace_task(&before, Task::new(42, "ghost")).is_none());
    }

    #[test]
    fn remove_single_and_many() {
        let before = list(&[1, 2, 3, 4]);
        assert_eq!(ids(&remove_task(&before, 3).expect("id 3 exists")), vec![1, 2, 4]);
        assert!(remove_task(&before, 99).is_none());

        let selection: BTreeSet<i64> = [1, 4, 99].into_iter().collect();
        let (after, removed) = remove_tasks(&before, &selection);
        assert_eq!(ids(&after), vec![2, 3]);
        assert_eq!(removed, 2);
    }

    #[test]
    fn ids_never_collide_within_one_millisecond() {
        let mut ids = IdGenerator::new();
        let a = ids.next_at(1_700_000_000_000);
        let b = ids.next_at(1_700_000_000_000);
        let c = ids.next_at(1_699_999_999_000);
        assert_eq!(a, 1_700_000_000_000);
        assert_eq!(b, a + 1);
        assert_eq!(c, b + 1);
    }

    #[test]
    fn observed_ids_push_generator_forward() {
        let mut ids = IdGenerator::new();
        ids.observe([5_000, 9_000, 7_000]);
        assert_eq!(ids.next_at(1_000), 9_001);
        assert_eq!(ids.next_at(20_000), 20_000);
    }
}
