//! Complete-state bundle of whole objects.

use std::collections::BTreeMap;

use globalhub_core::{CoreError, CoreResult, KubeObject, Version};

use crate::bundle::Bundle;

/// Rewrites an object before it is stored (strip status, add annotations).
pub type Manipulator<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Every live object of one kind, keyed by uid.
///
/// An update only counts as a change when the resource version moved, so a
/// resync of unchanged objects does not trigger a send.
pub struct GenericStatusBundle<T: KubeObject> {
    objects: BTreeMap<String, T>,
    manipulate: Option<Manipulator<T>>,
    version: Version,
}

impl<T: KubeObject> GenericStatusBundle<T> {
    pub fn new() -> Self {
        GenericStatusBundle {
            objects: BTreeMap::new(),
            manipulate: None,
            version: Version::new(),
        }
    }

    pub fn with_manipulator(manipulate: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        GenericStatusBundle {
            manipulate: Some(Box::new(manipulate)),
            ..Self::new()
        }
    }

    pub fn objects(&self) -> impl Iterator<Item = &T> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<T: KubeObject> Default for GenericStatusBundle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: KubeObject> Bundle<T> for GenericStatusBundle<T> {
    fn update_object(&mut self, obj: &T) {
        let uid = obj.meta().uid.clone();

        if let Some(existing) = self.objects.get(&uid) {
            if existing.meta().resource_version == obj.meta().resource_version {
                return;
            }
        }

        let mut stored = obj.clone();
        if let Some(manipulate) = &self.manipulate {
            manipulate(&mut stored);
        }

        self.objects.insert(uid, stored);
        self.version.incr();
    }

    fn delete_object(&mut self, obj: &T) {
        if self.objects.remove(&obj.meta().uid).is_some() {
            self.version.incr();
        }
    }

    fn bundle_version(&self) -> Version {
        self.version
    }

    fn payload(&self) -> CoreResult<serde_json::Value> {
        let objects: Vec<&T> = self.objects.values().collect();
        serde_json::to_value(objects).map_err(|e| CoreError::encode("status bundle", e))
    }

    fn post_send(&mut self) {
        self.version.next();
    }
}
