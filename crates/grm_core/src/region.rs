//! Region tree index: read-only traversal over the administrative
//! region forest.
//!
//! All upward walks are bounded by [`MAX_TREE_DEPTH`]; a walk that
//! exceeds it means the configured parent graph has a cycle and is
//! reported as [`GrmError::CyclicRegionGraph`], never looped on.

use std::collections::{HashMap, HashSet};

use crate::error::GrmError;
use crate::model::{AdministrativeRegion, RegionId};

/// Ceiling on any parent-chain walk. Real deployments configure 4-6
/// levels; anything deeper than this is a corrupt graph.
pub const MAX_TREE_DEPTH: usize = 32;

/// Read interface over stored administrative regions.
pub trait RegionStore {
    fn get(&self, id: &str) -> Result<Option<AdministrativeRegion>, GrmError>;
    fn children(&self, parent_id: &str) -> Result<Vec<AdministrativeRegion>, GrmError>;
    /// The single region with no parent.
    fn root(&self) -> Result<AdministrativeRegion, GrmError>;
}

/// Traversal operations over a [`RegionStore`].
pub struct RegionTree<'a> {
    store: &'a dyn RegionStore,
}

impl<'a> RegionTree<'a> {
    pub fn new(store: &'a dyn RegionStore) -> Self {
        Self { store }
    }

    /// Fetch a region, treating absence as a fatal lookup failure.
    pub fn get_required(&self, id: &str) -> Result<AdministrativeRegion, GrmError> {
        self.store
            .get(id)?
            .ok_or_else(|| GrmError::RegionNotFound(id.to_string()))
    }

    /// Single-step ancestor lookup. `None` at the root.
    pub fn parent(
        &self,
        region: &AdministrativeRegion,
    ) -> Result<Option<AdministrativeRegion>, GrmError> {
        match &region.parent_id {
            Some(parent_id) => Ok(Some(self.get_required(parent_id)?)),
            None => Ok(None),
        }
    }

    /// Walk parent links until a region with the given level label is
    /// found. Falls back to the root if the level never appears on the
    /// chain; this is the routing fallback, not an error.
    pub fn ancestor_at_level(
        &self,
        region: &AdministrativeRegion,
        level: &str,
    ) -> Result<AdministrativeRegion, GrmError> {
        let mut current = region.clone();
        for _ in 0..MAX_TREE_DEPTH {
            if current.level == level {
                return Ok(current);
            }
            match self.parent(&current)? {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
        Err(GrmError::CyclicRegionGraph {
            start: region.id.clone(),
        })
    }

    /// Every region transitively parented by `parent_id`, excluding the
    /// region itself. Order follows the store's child ordering and is
    /// stable for membership purposes only.
    pub fn descendants(&self, parent_id: &str) -> Result<Vec<RegionId>, GrmError> {
        let mut ids = Vec::new();
        let mut seen: HashSet<RegionId> = HashSet::new();
        let mut stack = vec![parent_id.to_string()];
        while let Some(current) = stack.pop() {
            for child in self.store.children(&current)? {
                // A revisit means the configured graph is not a forest.
                if !seen.insert(child.id.clone()) {
                    return Err(GrmError::CyclicRegionGraph {
                        start: parent_id.to_string(),
                    });
                }
                stack.push(child.id.clone());
                ids.push(child.id);
            }
        }
        Ok(ids)
    }

    /// True if `child_id` equals `ancestor_id` or has it on its
    /// ancestor chain.
    pub fn is_descendant_of(&self, child_id: &str, ancestor_id: &str) -> Result<bool, GrmError> {
        if child_id == ancestor_id {
            return Ok(true);
        }
        let mut current = self.get_required(child_id)?;
        for _ in 0..MAX_TREE_DEPTH {
            match self.parent(&current)? {
                Some(parent) => {
                    if parent.id == ancestor_id {
                        return Ok(true);
                    }
                    current = parent;
                }
                None => return Ok(false),
            }
        }
        Err(GrmError::CyclicRegionGraph {
            start: child_id.to_string(),
        })
    }

    /// Walk upward and return the last region crossed before reaching
    /// `boundary` (or before reaching the root when no boundary is
    /// given). Buckets a fine-grained region under a coarser reporting
    /// region.
    pub fn base_region_at_or_below(
        &self,
        region_id: &str,
        boundary: Option<&str>,
    ) -> Result<RegionId, GrmError> {
        let mut base = region_id.to_string();
        let mut current = self.get_required(region_id)?;
        for _ in 0..MAX_TREE_DEPTH {
            match self.parent(&current)? {
                Some(parent) => {
                    base = current.id.clone();
                    if boundary == Some(parent.id.as_str()) {
                        return Ok(base);
                    }
                    current = parent;
                }
                None => return Ok(base),
            }
        }
        Err(GrmError::CyclicRegionGraph {
            start: region_id.to_string(),
        })
    }

    /// Comma-joined names of the region and its ancestors, finest
    /// first. Used in audit/notification text.
    pub fn qualified_name(&self, region_id: &str) -> Result<String, GrmError> {
        let mut names = Vec::new();
        let mut current = self.get_required(region_id)?;
        for _ in 0..MAX_TREE_DEPTH {
            names.push(current.name.clone());
            match self.parent(&current)? {
                Some(parent) => current = parent,
                None => return Ok(names.join(", ")),
            }
        }
        Err(GrmError::CyclicRegionGraph {
            start: region_id.to_string(),
        })
    }
}

/// In-memory region store, used in tests and by import tooling.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRegionStore {
    regions: HashMap<RegionId, AdministrativeRegion>,
}

impl InMemoryRegionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: AdministrativeRegion) {
        self.regions.insert(region.id.clone(), region);
    }
}

impl FromIterator<AdministrativeRegion> for InMemoryRegionStore {
    fn from_iter<T: IntoIterator<Item = AdministrativeRegion>>(iter: T) -> Self {
        let mut store = Self::new();
        for region in iter {
            store.insert(region);
        }
        store
    }
}

impl RegionStore for InMemoryRegionStore {
    fn get(&self, id: &str) -> Result<Option<AdministrativeRegion>, GrmError> {
        Ok(self.regions.get(id).cloned())
    }

    fn children(&self, parent_id: &str) -> Result<Vec<AdministrativeRegion>, GrmError> {
        let mut children: Vec<_> = self
            .regions
            .values()
            .filter(|r| r.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    fn root(&self) -> Result<AdministrativeRegion, GrmError> {
        self.regions
            .values()
            .find(|r| r.parent_id.is_none())
            .cloned()
            .ok_or_else(|| GrmError::Store("region forest has no root".into()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn region(id: &str, level: &str, parent: Option<&str>) -> AdministrativeRegion {
        AdministrativeRegion {
            id: id.to_string(),
            name: id.to_uppercase(),
            level: level.to_string(),
            parent_id: parent.map(str::to_string),
            latitude: None,
            longitude: None,
        }
    }

    /// Nation -> District d1 -> Sector s1 -> Cells c1, c2
    ///                        -> Sector s2
    pub(crate) fn sample_store() -> InMemoryRegionStore {
        InMemoryRegionStore::from_iter([
            region("nation", "NATION", None),
            region("d1", "DISTRICT", Some("nation")),
            region("s1", "SECTOR", Some("d1")),
            region("s2", "SECTOR", Some("d1")),
            region("c1", "CELL", Some("s1")),
            region("c2", "CELL", Some("s1")),
        ])
    }

    #[test]
    fn test_parent_of_root_is_none() {
        let store = sample_store();
        let tree = RegionTree::new(&store);
        let root = store.root().unwrap();
        assert!(tree.parent(&root).unwrap().is_none());
        let c1 = tree.get_required("c1").unwrap();
        assert_eq!(tree.parent(&c1).unwrap().unwrap().id, "s1");
    }

    #[test]
    fn test_ancestor_at_level_identity() {
        let store = sample_store();
        let tree = RegionTree::new(&store);
        let s1 = tree.get_required("s1").unwrap();
        assert_eq!(tree.ancestor_at_level(&s1, "SECTOR").unwrap().id, "s1");
    }

    #[test]
    fn test_ancestor_at_level_walks_up() {
        let store = sample_store();
        let tree = RegionTree::new(&store);
        let c1 = tree.get_required("c1").unwrap();
        assert_eq!(tree.ancestor_at_level(&c1, "DISTRICT").unwrap().id, "d1");
    }

    #[test]
    fn test_ancestor_at_level_falls_back_to_root() {
        let store = sample_store();
        let tree = RegionTree::new(&store);
        let c1 = tree.get_required("c1").unwrap();
        let found = tree.ancestor_at_level(&c1, "PROVINCE").unwrap();
        assert_eq!(found.id, "nation");
    }

    #[test]
    fn test_descendants_excludes_self() {
        let store = sample_store();
        let tree = RegionTree::new(&store);
        let mut ids = tree.descendants("d1").unwrap();
        ids.sort();
        assert_eq!(ids, vec!["c1", "c2", "s1", "s2"]);
        assert!(!ids.contains(&"d1".to_string()));
        assert!(tree.descendants("c1").unwrap().is_empty());
    }

    #[test]
    fn test_is_descendant_of() {
        let store = sample_store();
        let tree = RegionTree::new(&store);
        assert!(tree.is_descendant_of("c1", "c1").unwrap());
        assert!(tree.is_descendant_of("c1", "d1").unwrap());
        assert!(tree.is_descendant_of("c1", "nation").unwrap());
        assert!(!tree.is_descendant_of("d1", "c1").unwrap());
        assert!(!tree.is_descendant_of("c1", "s2").unwrap());
    }

    #[test]
    fn test_base_region_at_or_below() {
        let store = sample_store();
        let tree = RegionTree::new(&store);
        // Bucketed under the district boundary: the sector is the base.
        assert_eq!(
            tree.base_region_at_or_below("c1", Some("d1")).unwrap(),
            "s1"
        );
        // No boundary: the region just below the root.
        assert_eq!(tree.base_region_at_or_below("c1", None).unwrap(), "d1");
    }

    #[test]
    fn test_missing_region_is_fatal() {
        let store = sample_store();
        let tree = RegionTree::new(&store);
        assert!(matches!(
            tree.get_required("nowhere"),
            Err(GrmError::RegionNotFound(_))
        ));
    }

    #[test]
    fn test_cyclic_graph_is_detected() {
        let store = InMemoryRegionStore::from_iter([
            region("a", "SECTOR", Some("b")),
            region("b", "DISTRICT", Some("a")),
        ]);
        let tree = RegionTree::new(&store);
        let a = tree.get_required("a").unwrap();
        assert!(matches!(
            tree.ancestor_at_level(&a, "NATION"),
            Err(GrmError::CyclicRegionGraph { .. })
        ));
        assert!(matches!(
            tree.descendants("a"),
            Err(GrmError::CyclicRegionGraph { .. })
        ));
        assert!(matches!(
            tree.is_descendant_of("a", "nowhere"),
            Err(GrmError::CyclicRegionGraph { .. })
        ));
    }

    #[test]
    fn test_qualified_name_joins_chain() {
        let store = sample_store();
        let tree = RegionTree::new(&store);
        assert_eq!(tree.qualified_name("c1").unwrap(), "C1, S1, D1, NATION");
    }
}
