use msf_core::{AttributeStore, ByteCount, HostError, ItemId, META_KEY};

/// The cached file size attribute, stored as a decimal string under [`META_KEY`].
#[derive(Clone, Copy)]
pub struct DerivedAttributeStore<'a> {
    attributes: &'a dyn AttributeStore,
}

impl<'a> DerivedAttributeStore<'a> {
    pub fn new(attributes: &'a dyn AttributeStore) -> Self {
        Self { attributes }
    }

    /// True when any value is stored, zero and unparseable values included.
    pub fn has(&self, id: ItemId) -> Result<bool, HostError> {
        Ok(self.attributes.get_attribute(id, META_KEY)?.is_some())
    }

    pub fn get(&self, id: ItemId) -> Result<Option<ByteCount>, HostError> {
        Ok(self
            .attributes
            .get_attribute(id, META_KEY)?
            .and_then(|raw| raw.trim().parse::<ByteCount>().ok()))
    }

    pub fn set(&self, id: ItemId, bytes: ByteCount) -> Result<(), HostError> {
        self.attributes
            .set_attribute(id, META_KEY, &bytes.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use msf_storage::{LibraryStore, NewItem};

    fn store_with_item() -> (LibraryStore, ItemId) {
        let store = LibraryStore::open_in_memory().expect("open db");
        let now = Utc
            .with_ymd_and_hms(2026, 3, 2, 8, 0, 0)
            .single()
            .expect("valid timestamp");
        let id = store
            .insert_item(&NewItem::attachment("a.jpg"), now)
            .expect("insert");
        (store, id)
    }

    #[test]
    fn zero_counts_as_present() {
        let (store, id) = store_with_item();
        let attrs = DerivedAttributeStore::new(&store);

        assert!(!attrs.has(id).expect("has"));
        assert_eq!(attrs.get(id).expect("get"), None);

        attrs.set(id, 0).expect("set");
        assert!(attrs.has(id).expect("has"));
        assert_eq!(attrs.get(id).expect("get"), Some(0));
    }

    #[test]
    fn repeated_set_with_same_value_is_a_no_op() {
        let (store, id) = store_with_item();
        let attrs = DerivedAttributeStore::new(&store);

        attrs.set(id, 4096).expect("first");
        attrs.set(id, 4096).expect("second");
        assert_eq!(
            store.get_attribute(id, META_KEY).expect("raw").as_deref(),
            Some("4096")
        );

        attrs.set(id, 10).expect("overwrite");
        assert_eq!(attrs.get(id).expect("get"), Some(10));
    }

    #[test]
    fn garbage_value_is_present_but_unreadable() {
        let (store, id) = store_with_item();
        store.set_attribute(id, META_KEY, "n/a").expect("raw set");

        let attrs = DerivedAttributeStore::new(&store);
        assert!(attrs.has(id).expect("has"));
        assert_eq!(attrs.get(id).expect("get"), None);
    }
}
