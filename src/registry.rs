//! Attached-device registry and the enumeration diff

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use hidwatch_transport::DeviceDescriptor;

use crate::device::DeviceHandle;

/// Attached devices keyed by path
pub(crate) type DeviceMap = BTreeMap<String, Arc<DeviceHandle>>;

/// Outcome of diffing one enumeration against the registry
pub(crate) struct Reconciliation {
    /// The registry after this enumeration
    pub(crate) next: DeviceMap,
    /// Newly seen devices, in enumeration order
    pub(crate) attached: Vec<DeviceDescriptor>,
    /// Handles whose path no longer enumerates, in path order
    pub(crate) detached: Vec<Arc<DeviceHandle>>,
}

/// Diff `current` against `previous`
///
/// Still-attached paths keep their existing handle, open or not. New paths
/// get an unopened handle from `make_handle`. A path reported more than
/// once keeps its first descriptor.
pub(crate) fn reconcile(
    previous: &DeviceMap,
    current: Vec<DeviceDescriptor>,
    mut make_handle: impl FnMut(DeviceDescriptor) -> DeviceHandle,
) -> Reconciliation {
    let mut next = DeviceMap::new();
    let mut attached = Vec::new();

    for descriptor in current {
        let Entry::Vacant(slot) = next.entry(descriptor.path.clone()) else {
            continue;
        };
        match previous.get(&descriptor.path) {
            Some(existing) => {
                slot.insert(Arc::clone(existing));
            }
            None => {
                slot.insert(Arc::new(make_handle(descriptor.clone())));
                attached.push(descriptor);
            }
        }
    }

    let present: HashSet<&str> = next.keys().map(String::as_str).collect();
    let detached = previous
        .iter()
        .filter(|(path, _)| !present.contains(path.as_str()))
        .map(|(_, handle)| Arc::clone(handle))
        .collect();

    Reconciliation {
        next,
        attached,
        detached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidwatch_transport::mock::MockBackend;
    use hidwatch_transport::HidBackend;

    fn desc(path: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(path, 0x1234, 0x5678)
    }

    fn run(
        backend: &Arc<dyn HidBackend>,
        previous: &DeviceMap,
        current: &[&str],
    ) -> Reconciliation {
        let current = current.iter().map(|p| desc(p)).collect();
        reconcile(previous, current, |d| {
            DeviceHandle::new(d, Arc::clone(backend))
        })
    }

    fn paths(map: &DeviceMap) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_first_enumeration_attaches_everything() {
        let backend: Arc<dyn HidBackend> = Arc::new(MockBackend::new());
        let result = run(&backend, &DeviceMap::new(), &["b", "a"]);
        assert_eq!(paths(&result.next), vec!["a", "b"]);
        assert_eq!(result.attached, vec![desc("b"), desc("a")]);
        assert!(result.detached.is_empty());
        assert!(result.next.values().all(|h| !h.is_open()));
    }

    #[test]
    fn test_same_snapshot_twice_is_empty_delta() {
        let backend: Arc<dyn HidBackend> = Arc::new(MockBackend::new());
        let first = run(&backend, &DeviceMap::new(), &["a", "b"]);
        let second = run(&backend, &first.next, &["a", "b"]);
        assert!(second.attached.is_empty());
        assert!(second.detached.is_empty());
        assert_eq!(paths(&second.next), vec!["a", "b"]);
    }

    #[test]
    fn test_diff_reports_full_delta_and_keeps_open_state() {
        let mock = MockBackend::new();
        for path in ["A", "B", "C"] {
            mock.attach(desc(path));
        }
        let backend: Arc<dyn HidBackend> = Arc::new(mock.clone());

        let first = run(&backend, &DeviceMap::new(), &["A", "B"]);
        let b = Arc::clone(&first.next["B"]);
        assert!(b.open());

        let second = run(&backend, &first.next, &["B", "C"]);
        assert_eq!(second.attached, vec![desc("C")]);
        assert_eq!(second.detached.len(), 1);
        assert_eq!(second.detached[0].path(), "A");
        assert_eq!(paths(&second.next), vec!["B", "C"]);

        assert!(Arc::ptr_eq(&second.next["B"], &b));
        assert!(second.next["B"].is_open());
        assert!(!second.next["C"].is_open());
        assert_eq!(mock.close_count(), 0);
    }

    #[test]
    fn test_duplicate_paths_keep_first_descriptor() {
        let backend: Arc<dyn HidBackend> = Arc::new(MockBackend::new());
        let current = vec![
            desc("a").with_product("first"),
            desc("a").with_product("second"),
        ];
        let result = reconcile(&DeviceMap::new(), current, |d| {
            DeviceHandle::new(d, Arc::clone(&backend))
        });
        assert_eq!(result.attached.len(), 1);
        assert_eq!(
            result.next["a"].descriptor().product.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_empty_enumeration_detaches_everything() {
        let backend: Arc<dyn HidBackend> = Arc::new(MockBackend::new());
        let first = run(&backend, &DeviceMap::new(), &["a", "b"]);
        let second = run(&backend, &first.next, &[]);
        assert!(second.next.is_empty());
        let detached: Vec<&str> = second.detached.iter().map(|h| h.path()).collect();
        assert_eq!(detached, vec!["a", "b"]);
    }
}
