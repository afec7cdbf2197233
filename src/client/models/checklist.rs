use crate::common::{ChecklistItem, ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.done as f64 * 100.0 / self.total as f64
        }
    }
}

pub fn validate_item(item: &ChecklistItem) -> ClientResult<()> {
    if item.task.trim().is_empty() {
        return Err(ClientError::validation("task description is required"));
    }
    Ok(())
}

/// Shared to-do list of a group.
#[derive(Debug, Clone, Default)]
pub struct Checklist {
    items: Vec<ChecklistItem>,
}

impl Checklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ChecklistItem] {
        &self.items
    }

    pub fn item(&self, item_id: i64) -> Option<&ChecklistItem> {
        self.items.iter().find(|i| i.item_id == Some(item_id))
    }

    pub fn replace_all(&mut self, items: Vec<ChecklistItem>) {
        self.items = items;
    }

    pub fn progress(&self) -> Progress {
        Progress { done: self.items.iter().filter(|i| i.done).count(), total: self.items.len() }
    }

    pub fn assigned_to<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a ChecklistItem> + 'a {
        self.items.iter().filter(move |i| i.assigned_to == user_id)
    }

    /// Flips the item locally and returns its new state.
    pub fn toggle(&mut self, item_id: i64) -> Option<bool> {
        let item = self.items.iter_mut().find(|i| i.item_id == Some(item_id))?;
        item.done = !item.done;
        Some(item.done)
    }

    /// Undoes an optimistic toggle if the item still shows `expected`.
    pub fn revert_toggle(&mut self, item_id: i64, expected: bool) {
        if let Some(item) = self.items.iter_mut().find(|i| i.item_id == Some(item_id)) {
            if item.done == expected {
                item.done = !expected;
            }
        }
    }

    /// Inserts or replaces by id.
    pub fn upsert(&mut self, item: ChecklistItem) {
        match item.item_id.and_then(|id| self.items.iter().position(|i| i.item_id == Some(id))) {
            Some(index) => self.items[index] = item,
            None => self.items.push(item),
        }
    }

    pub fn remove(&mut self, item_id: i64) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.item_id != Some(item_id));
        self.items.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, task: &str, done: bool) -> ChecklistItem {
        ChecklistItem { item_id: Some(id), done, ..ChecklistItem::new(task, "u1") }
    }

    #[test]
    fn toggle_and_revert() {
        let mut list = Checklist::new();
        list.replace_all(vec![item(1, "Book hotel", false)]);
        assert_eq!(list.toggle(1), Some(true));
        list.revert_toggle(1, true);
        assert!(!list.item(1).unwrap().done);
        assert_eq!(list.toggle(99), None);
    }

    #[test]
    fn progress_counts_done_items() {
        let mut list = Checklist::new();
        assert_eq!(list.progress().percent(), 0.0);
        list.replace_all(vec![item(1, "a", true), item(2, "b", false), item(3, "c", true), item(4, "d", false)]);
        let p = list.progress();
        assert_eq!((p.done, p.total), (2, 4));
        assert_eq!(p.percent(), 50.0);
    }

    #[test]
    fn upsert_replaces_by_id() {
        let mut list = Checklist::new();
        list.upsert(item(1, "a", false));
        list.upsert(item(1, "renamed", false));
        list.upsert(item(2, "b", false));
        assert_eq!(list.items().len(), 2);
        assert_eq!(list.item(1).unwrap().task, "renamed");
        assert!(list.remove(2));
        assert!(!list.remove(2));
    }

    #[test]
    fn blank_task_is_invalid() {
        assert!(validate_item(&ChecklistItem::new("  ", "u1")).is_err());
        assert!(validate_item(&ChecklistItem::new("Pack", "u1")).is_ok());
    }
}
