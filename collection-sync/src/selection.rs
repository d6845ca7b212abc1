use crate::entity::EntityId;
use indexmap::IndexSet;
use std::collections::HashSet;

/// Ids picked for bulk operations, in the order they were picked.
///
/// The set itself knows nothing about the cache. The cache calls
/// [`SelectionSet::retain_visible`] whenever its visible view changes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionSet {
    ids: IndexSet<EntityId>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips membership of `id`. Returns whether it is selected afterwards.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.shift_remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    /// Selects every visible id, or clears the selection when every visible
    /// id is already selected.
    pub fn select_all<'a, I>(&mut self, visible: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let visible: IndexSet<&str> = visible.into_iter().collect();
        let all_selected = !self.ids.is_empty()
            && self.ids.len() == visible.len()
            && visible.iter().all(|id| self.ids.contains(*id));

        if all_selected {
            self.ids.clear();
        } else {
            self.ids = visible.into_iter().map(String::from).collect();
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.shift_remove(id)
    }

    /// Drops every id that is no longer visible. Returns how many were dropped.
    pub fn retain_visible(&mut self, visible: &HashSet<&str>) -> usize {
        let before = self.ids.len();
        self.ids.retain(|id| visible.contains(id.as_str()));
        before - self.ids.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.ids.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle() {
        let mut selection = SelectionSet::new();
        assert!(selection.toggle("a"));
        assert!(selection.toggle("b"));
        assert!(!selection.toggle("a"));
        assert_eq!(selection.ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_select_all_is_symmetric() {
        let mut selection = SelectionSet::new();
        let visible = ["a", "b", "c"];

        selection.select_all(visible);
        assert_eq!(selection.len(), 3);

        selection.select_all(visible);
        assert!(selection.is_empty());

        // A partial selection is completed, not cleared
        selection.toggle("b");
        selection.select_all(visible);
        assert_eq!(selection.ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_select_all_over_empty_view() {
        let mut selection = SelectionSet::new();
        selection.select_all(std::iter::empty());
        assert!(selection.is_empty());
        selection.select_all(std::iter::empty());
        assert!(selection.is_empty());
    }

    #[test]
    fn test_retain_visible() {
        let mut selection = SelectionSet::new();
        selection.select_all(["a", "b", "c"]);

        let visible = HashSet::from(["a", "c", "d"]);
        assert_eq!(selection.retain_visible(&visible), 1);
        assert_eq!(selection.ids(), vec!["a", "c"]);
    }
}
