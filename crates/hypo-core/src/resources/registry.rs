use std::collections::BTreeMap;
use std::sync::Arc;

use crate::resources::ExclusiveResource;

/// Named exclusive resources. Every lookup of one name yields the same lock.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, Arc<ExclusiveResource>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str) -> Arc<ExclusiveResource> {
        self.resources
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ExclusiveResource::new(name)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ExclusiveResource>> {
        self.resources.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ResourceRegistry;

    #[test]
    fn same_name_resolves_to_same_lock() {
        let mut registry = ResourceRegistry::new();
        let first = registry.register("git");
        let second = registry.register("git");
        let other = registry.register("disk");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("missing").is_none());
    }
}
