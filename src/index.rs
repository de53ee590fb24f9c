//! The image index: which image id belongs to which subject at which size.
//!
//! The index is bidirectional. Forward lookups answer storefront reads
//! (`product 42 at preview size → image 1187`); the reverse direction lets a
//! backend that only knows an id (a file name) recover the variant the
//! payload was stored as.
//!
//! Product and web mappings live in separate tables. Reconfiguration throws
//! away the product table wholesale and rebuilds it from a [`snapshot`],
//! while the web table (logo, icons, banners) is never touched by it.
//!
//! [`snapshot`]: ImageIndex::snapshot

use crate::types::{ImageId, SizeVariant, SubjectKey};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexError {
    #[error("image id {id} is already mapped to {subject} at {variant}")]
    IdInUse {
        id: ImageId,
        subject: SubjectKey,
        variant: SizeVariant,
    },
    #[error("web image name must not be empty")]
    EmptyWebName,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    products: HashMap<(u64, SizeVariant), ImageId>,
    web: HashMap<(String, SizeVariant), ImageId>,
    reverse: HashMap<ImageId, (SubjectKey, SizeVariant)>,
}

impl Tables {
    fn forward(&self, subject: &SubjectKey, variant: SizeVariant) -> Option<ImageId> {
        match subject {
            SubjectKey::Product(id) => self.products.get(&(*id, variant)).copied(),
            SubjectKey::Web(name) => self.web.get(&(name.clone(), variant)).copied(),
        }
    }

    fn insert_forward(&mut self, subject: &SubjectKey, variant: SizeVariant, id: ImageId) -> Option<ImageId> {
        match subject {
            SubjectKey::Product(pid) => self.products.insert((*pid, variant), id),
            SubjectKey::Web(name) => self.web.insert((name.clone(), variant), id),
        }
    }
}

/// Thread-safe `(subject, variant) → image id` mapping.
///
/// Shared as `Arc<ImageIndex>` between the controller, the generation worker,
/// the storage backends and the provider. Every operation takes the internal
/// lock once, so a reader sees either the whole of a mapping change or none
/// of it.
#[derive(Debug, Default)]
pub struct ImageIndex {
    tables: RwLock<Tables>,
}

impl ImageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent copy of the current mappings. Later changes to either
    /// index are invisible to the other.
    pub fn snapshot(&self) -> ImageIndex {
        ImageIndex {
            tables: RwLock::new(self.read().clone()),
        }
    }

    /// Map `subject` at `variant` to `id`.
    ///
    /// Replaces any previous id for the same pair (the old id is dropped from
    /// the reverse table). Fails if `id` is already mapped to a different
    /// pair; re-setting an identical mapping is a no-op.
    pub fn set_mapping(
        &self,
        subject: impl Into<SubjectKey>,
        id: ImageId,
        variant: SizeVariant,
    ) -> Result<(), IndexError> {
        let subject = subject.into();
        if let SubjectKey::Web(name) = &subject
            && name.is_empty()
        {
            return Err(IndexError::EmptyWebName);
        }

        let mut tables = self.write();
        if let Some((owner, owner_variant)) = tables.reverse.get(&id)
            && (owner != &subject || *owner_variant != variant)
        {
            return Err(IndexError::IdInUse {
                id,
                subject: owner.clone(),
                variant: *owner_variant,
            });
        }

        if let Some(previous) = tables.insert_forward(&subject, variant, id)
            && previous != id
        {
            tables.reverse.remove(&previous);
        }
        tables.reverse.insert(id, (subject, variant));
        Ok(())
    }

    pub fn image_id(&self, subject: &SubjectKey, variant: SizeVariant) -> Option<ImageId> {
        self.read().forward(subject, variant)
    }

    pub fn has_image(&self, subject: &SubjectKey, variant: SizeVariant) -> bool {
        self.image_id(subject, variant).is_some()
    }

    /// Reverse lookup: which subject and variant an id was stored for.
    pub fn subject_of(&self, id: ImageId) -> Option<(SubjectKey, SizeVariant)> {
        self.read().reverse.get(&id).cloned()
    }

    /// Drop every product mapping. Web mappings are left untouched.
    pub fn remove_product_mappings(&self) {
        let mut tables = self.write();
        let product_ids: Vec<ImageId> = tables.products.drain().map(|(_, id)| id).collect();
        for id in product_ids {
            tables.reverse.remove(&id);
        }
    }

    /// Every web-image id, across all variants.
    pub fn all_web_image_ids(&self) -> HashSet<ImageId> {
        self.read().web.values().copied().collect()
    }

    /// Web-image ids stored at one variant.
    pub fn web_image_ids(&self, variant: SizeVariant) -> HashSet<ImageId> {
        self.read()
            .web
            .iter()
            .filter(|((_, v), _)| *v == variant)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Product ids that have an image at `variant`, ascending.
    pub fn products_with_image(&self, variant: SizeVariant) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .read()
            .products
            .keys()
            .filter(|(_, v)| *v == variant)
            .map(|(pid, _)| *pid)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn product_mapping_count(&self) -> usize {
        self.read().products.len()
    }

    pub fn web_mapping_count(&self) -> usize {
        self.read().web.len()
    }

    pub fn len(&self) -> usize {
        self.read().reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("image index lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("image index lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> SizeVariant {
        SizeVariant::Full
    }

    #[test]
    fn set_and_get_product_mapping() {
        let index = ImageIndex::new();
        index.set_mapping(7u64, 100, full()).unwrap();

        assert_eq!(index.image_id(&SubjectKey::Product(7), full()), Some(100));
        assert_eq!(index.image_id(&SubjectKey::Product(7), SizeVariant::Icon), None);
        assert!(index.has_image(&SubjectKey::Product(7), full()));
        assert_eq!(index.subject_of(100), Some((SubjectKey::Product(7), full())));
    }

    #[test]
    fn product_and_web_keys_do_not_collide() {
        let index = ImageIndex::new();
        index.set_mapping(1u64, 10, full()).unwrap();
        index.set_mapping("1", 11, full()).unwrap();

        assert_eq!(index.image_id(&SubjectKey::Product(1), full()), Some(10));
        assert_eq!(index.image_id(&SubjectKey::Web("1".into()), full()), Some(11));
        assert_eq!(index.product_mapping_count(), 1);
        assert_eq!(index.web_mapping_count(), 1);
    }

    #[test]
    fn replacing_a_mapping_frees_the_old_id() {
        let index = ImageIndex::new();
        index.set_mapping(5u64, 1, full()).unwrap();
        index.set_mapping(5u64, 2, full()).unwrap();

        assert_eq!(index.image_id(&SubjectKey::Product(5), full()), Some(2));
        assert_eq!(index.subject_of(1), None);
        assert_eq!(index.len(), 1);
        // The freed id may now be used elsewhere.
        index.set_mapping(6u64, 1, full()).unwrap();
    }

    #[test]
    fn id_cannot_serve_two_pairs() {
        let index = ImageIndex::new();
        index.set_mapping(5u64, 1, full()).unwrap();

        let err = index.set_mapping(6u64, 1, full()).unwrap_err();
        assert_eq!(
            err,
            IndexError::IdInUse {
                id: 1,
                subject: SubjectKey::Product(5),
                variant: full()
            }
        );
        let err = index.set_mapping(5u64, 1, SizeVariant::Icon).unwrap_err();
        assert!(matches!(err, IndexError::IdInUse { .. }));
        // Identical re-insert is fine.
        index.set_mapping(5u64, 1, full()).unwrap();
    }

    #[test]
    fn empty_web_name_rejected() {
        let index = ImageIndex::new();
        assert_eq!(
            index.set_mapping("", 1, full()),
            Err(IndexError::EmptyWebName)
        );
        assert!(index.is_empty());
    }

    #[test]
    fn snapshot_is_independent() {
        let index = ImageIndex::new();
        index.set_mapping(1u64, 10, full()).unwrap();
        let copy = index.snapshot();

        index.remove_product_mappings();
        index.set_mapping(2u64, 20, full()).unwrap();

        assert_eq!(copy.image_id(&SubjectKey::Product(1), full()), Some(10));
        assert!(!copy.has_image(&SubjectKey::Product(2), full()));
        assert!(!index.has_image(&SubjectKey::Product(1), full()));

        copy.set_mapping(3u64, 30, full()).unwrap();
        assert!(!index.has_image(&SubjectKey::Product(3), full()));
    }

    #[test]
    fn remove_product_mappings_keeps_web_images() {
        let index = ImageIndex::new();
        index.set_mapping(1u64, 10, full()).unwrap();
        index.set_mapping(1u64, 11, SizeVariant::Icon).unwrap();
        index.set_mapping("logo", 12, full()).unwrap();
        index.set_mapping("icon", 13, SizeVariant::Icon).unwrap();

        index.remove_product_mappings();

        assert_eq!(index.product_mapping_count(), 0);
        assert_eq!(index.subject_of(10), None);
        assert_eq!(index.subject_of(11), None);
        assert_eq!(index.image_id(&SubjectKey::from("logo"), full()), Some(12));
        assert_eq!(index.image_id(&SubjectKey::from("icon"), SizeVariant::Icon), Some(13));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn web_image_id_queries() {
        let index = ImageIndex::new();
        index.set_mapping("logo", 1, full()).unwrap();
        index.set_mapping("icon", 2, SizeVariant::Icon).unwrap();
        index.set_mapping(9u64, 3, full()).unwrap();

        assert_eq!(index.all_web_image_ids(), HashSet::from([1, 2]));
        assert_eq!(index.web_image_ids(full()), HashSet::from([1]));
        assert_eq!(index.products_with_image(full()), vec![9]);
    }
}
