//! Hash-based indexes over `file_path`, `task_id`, `tag`, and `type`, scoped
//! to a single project by construction.

use hashbrown::{HashMap, HashSet};

/// A filter query; each present field narrows the result, absent fields
/// contribute no constraint.
#[derive(Debug, Default, Clone)]
pub struct MetadataFilter<'a> {
    pub file_path: Option<&'a str>,
    pub task_id: Option<&'a str>,
    pub tag: Option<&'a str>,
    pub type_: Option<&'a str>,
}

impl<'a> MetadataFilter<'a> {
    pub fn is_empty(&self) -> bool {
        self.file_path.is_none() && self.task_id.is_none() && self.tag.is_none() && self.type_.is_none()
    }
}

#[derive(Debug, Default)]
pub struct MetadataIndex {
    by_file: HashMap<String, HashSet<String>>,
    by_task: HashMap<String, HashSet<String>>,
    by_tag: HashMap<String, HashSet<String>>,
    by_type: HashMap<String, HashSet<String>>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patches all four maps to reflect the segment's attributes.
    #[allow(clippy::too_many_arguments)]
    pub fn index<'a>(
        &mut self,
        id: &str,
        file_path: Option<&str>,
        task_id: Option<&str>,
        tags: impl IntoIterator<Item = &'a str>,
        type_: &str,
    ) {
        if let Some(file_path) = file_path {
            self.by_file.entry(file_path.to_string()).or_default().insert(id.to_string());
        }
        if let Some(task_id) = task_id {
            self.by_task.entry(task_id.to_string()).or_default().insert(id.to_string());
        }
        for tag in tags {
            self.by_tag.entry(tag.to_string()).or_default().insert(id.to_string());
        }
        self.by_type.entry(type_.to_string()).or_default().insert(id.to_string());
    }

    /// Undoes [`MetadataIndex::index`] for `id`, dropping any map entries
    /// that become empty.
    pub fn remove<'a>(
        &mut self,
        id: &str,
        file_path: Option<&str>,
        task_id: Option<&str>,
        tags: impl IntoIterator<Item = &'a str>,
        type_: &str,
    ) {
        if let Some(file_path) = file_path {
            remove_from(&mut self.by_file, file_path, id);
        }
        if let Some(task_id) = task_id {
            remove_from(&mut self.by_task, task_id, id);
        }
        for tag in tags {
            remove_from(&mut self.by_tag, tag, id);
        }
        remove_from(&mut self.by_type, type_, id);
    }

    /// Returns `None` when `filter` has no constraints (caller should treat
    /// that as "all ids"); otherwise the intersection of matching sets, which
    /// may be empty.
    pub fn filter(&self, filter: &MetadataFilter<'_>) -> Option<HashSet<String>> {
        if filter.is_empty() {
            return None;
        }

        let mut sets: Vec<&HashSet<String>> = Vec::new();
        if let Some(file_path) = filter.file_path {
            sets.push(self.by_file.get(file_path).map_or(&EMPTY, |s| s));
        }
        if let Some(task_id) = filter.task_id {
            sets.push(self.by_task.get(task_id).map_or(&EMPTY, |s| s));
        }
        if let Some(tag) = filter.tag {
            sets.push(self.by_tag.get(tag).map_or(&EMPTY, |s| s));
        }
        if let Some(type_) = filter.type_ {
            sets.push(self.by_type.get(type_).map_or(&EMPTY, |s| s));
        }

        sets.sort_by_key(|s| s.len());
        let mut iter = sets.into_iter();
        let mut result = iter.next().cloned().unwrap_or_default();
        for set in iter {
            result.retain(|id| set.contains(id));
            if result.is_empty() {
                break;
            }
        }
        Some(result)
    }
}

static EMPTY: std::sync::LazyLock<HashSet<String>> = std::sync::LazyLock::new(HashSet::new);

fn remove_from(map: &mut HashMap<String, HashSet<String>>, key: &str, id: &str) {
    if let Some(set) = map.get_mut(key) {
        set.remove(id);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_filter_single_field() {
        let mut index = MetadataIndex::new();
        index.index("s1", Some("src/lib.rs"), None, [], "code");
        let hits = index
            .filter(&MetadataFilter {
                file_path: Some("src/lib.rs"),
                ..Default::default()
            })
            .unwrap();
        assert!(hits.contains("s1"));
    }

    #[test]
    fn filter_intersects_across_fields() {
        let mut index = MetadataIndex::new();
        index.index("s1", Some("a.rs"), Some("task-1"), ["urgent"], "code");
        index.index("s2", Some("a.rs"), Some("task-2"), ["urgent"], "code");

        let hits = index
            .filter(&MetadataFilter {
                file_path: Some("a.rs"),
                task_id: Some("task-1"),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.contains("s1"));
    }

    #[test]
    fn empty_filter_returns_none() {
        let index = MetadataIndex::new();
        assert!(index.filter(&MetadataFilter::default()).is_none());
    }

    #[test]
    fn remove_drops_empty_buckets() {
        let mut index = MetadataIndex::new();
        index.index("s1", Some("a.rs"), None, ["x"], "note");
        index.remove("s1", Some("a.rs"), None, ["x"], "note");
        assert!(
            index
                .filter(&MetadataFilter {
                    file_path: Some("a.rs"),
                    ..Default::default()
                })
                .unwrap()
                .is_empty()
        );
    }
}
