use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::runtime::ObjectRef;

/// Interned `java/lang/String` objects, one per distinct content.
#[derive(Debug, Default)]
pub struct StringTable {
    map: Mutex<HashMap<Arc<str>, ObjectRef>>,
}

impl StringTable {
    pub(in crate::runtime) fn new() -> Self {
        Self::default()
    }

    /// Returns the interned object for `string`, creating it with `create` on first use.
    pub(in crate::runtime) fn intern(
        &self,
        string: &str,
        create: impl FnOnce(Arc<str>) -> ObjectRef,
    ) -> ObjectRef {
        let mut map = self.map.lock();
        if let Some(entry) = map.get(string) {
            return entry.clone();
        }
        let key: Arc<str> = Arc::from(string);
        let object = create(Arc::clone(&key));
        map.insert(key, object.clone());
        object
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}
