use std::fmt::Debug;

pub type EntityId = String;

/// A primary entity held by a [`RelationshipCache`](crate::cache::RelationshipCache).
///
/// `Related` is the eagerly joined part of the entity: an owned collection
/// (a guardian's children) or a derived flag (a notification's read state).
pub trait Entity: Clone + Debug + PartialEq + Send + Sync + 'static {
    type Related: Clone + Debug + Default + PartialEq + Send + Sync + 'static;

    fn id(&self) -> &str;

    fn related(&self) -> &Self::Related;

    fn set_related(&mut self, related: Self::Related);

    /// Whether any searchable field contains `needle`. `needle` is lowercase.
    fn matches_search(&self, needle: &str) -> bool;

    /// Type tag used by the type filter, if the entity has one.
    fn kind(&self) -> Option<&str> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

/// Describes which slice of a collection is visible.
///
/// `scope` is handed to the collection source (it selects e.g. the sent or
/// received folder). Everything else is applied client-side.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewFilter {
    pub scope: Option<String>,
    pub search: Option<String>,
    pub kind: Option<String>,
    pub page: Option<Page>,
}

impl ViewFilter {
    pub fn scoped<S: Into<String>>(scope: S) -> Self {
        ViewFilter {
            scope: Some(scope.into()),
            ..Default::default()
        }
    }

    pub fn with_search<S: Into<String>>(mut self, search: S) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_kind<S: Into<String>>(mut self, kind: S) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.page = Some(Page { offset, limit });
        self
    }

    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        let matches_search = match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(search) => entity.matches_search(&search.to_lowercase()),
        };
        let matches_kind = match self.kind.as_deref() {
            None | Some("all") => true,
            Some(kind) => entity.kind() == Some(kind),
        };
        matches_search && matches_kind
    }

    /// Filters, then paginates.
    pub fn visible<'a, E, I>(&self, entities: I) -> Vec<&'a E>
    where
        E: Entity,
        I: IntoIterator<Item = &'a E>,
    {
        let matching = entities.into_iter().filter(|e| self.matches(*e));
        match self.page {
            Some(page) => matching.skip(page.offset).take(page.limit).collect(),
            None => matching.collect(),
        }
    }
}

/// Case-insensitive substring match over a set of optional fields.
pub fn any_field_contains<'a, I>(fields: I, needle: &str) -> bool
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    fields
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::Item;

    #[test]
    fn test_search_and_kind() {
        let items = vec![
            Item::new("1", "Field trip", "info"),
            Item::new("2", "Payment overdue", "alert"),
            Item::new("3", "Trip cancelled", "alert"),
        ];

        let filter = ViewFilter::default().with_search("  TRIP ");
        let ids: Vec<_> = filter.visible(&items).iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["1", "3"]);

        let filter = filter.with_kind("alert");
        let ids: Vec<_> = filter.visible(&items).iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["3"]);

        let filter = ViewFilter::default().with_kind("all");
        assert_eq!(filter.visible(&items).len(), 3);
    }

    #[test]
    fn test_pagination_after_filter() {
        let items: Vec<Item> = (0..10)
            .map(|i| Item::new(&i.to_string(), "x", if i % 2 == 0 { "even" } else { "odd" }))
            .collect();

        let filter = ViewFilter::default().with_kind("even").with_page(1, 2);
        let ids: Vec<_> = filter.visible(&items).iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["2", "4"]);
    }
}
