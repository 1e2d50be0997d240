//! Mutation Ledger - Save/Restore Of Scene Properties
//!
//! Every property an export rewrites is recorded here before the write, and
//! put back exactly once after the job descriptor is on disk.

use crate::scene::{PropertyHandle, SceneAccessor, SceneError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRestore {
    pub target: PropertyHandle,
    pub original_value: String,
}

#[derive(Debug, Default)]
pub struct MutationLedger {
    pending: Vec<PendingRestore>,
}

impl MutationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the current value, writes `value`, and records the original.
    /// Nothing is recorded when the write fails.
    pub fn apply(
        &mut self,
        scene: &mut dyn SceneAccessor,
        target: PropertyHandle,
        value: &str,
    ) -> Result<(), SceneError> {
        let original_value = target.get(scene)?;
        target.set(scene, value)?;
        log::debug!("mutated {} = {:?} (was {:?})", target, value, original_value);
        self.pending.push(PendingRestore { target, original_value });
        Ok(())
    }

    /// Restores every entry, newest first, and empties the ledger.
    ///
    /// All entries are attempted even when one fails; the first failure is
    /// returned afterwards.
    pub fn restore_all(&mut self, scene: &mut dyn SceneAccessor) -> Result<usize, SceneError> {
        let mut first_error = None;
        let mut restored = 0;
        while let Some(entry) = self.pending.pop() {
            match entry.target.set(scene, &entry.original_value) {
                Ok(()) => {
                    log::debug!("restored {} = {:?}", entry.target, entry.original_value);
                    restored += 1;
                }
                Err(e) => {
                    log::warn!("failed to restore {}: {}", entry.target, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(restored),
        }
    }

    pub fn pending(&self) -> &[PendingRestore] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryScene;
    use crate::scene::{DataBlockKind, OwnerRef};
    use serde_json::json;

    fn scene() -> MemoryScene {
        MemoryScene::from_value(json!({
            "project": {"filepath": "/p/shot.blend", "scene_name": "Scene", "host_version": "3.6.0"},
            "file_blocks": [
                {"kind": "image", "name": "wood", "filepath": "/p/tex/wood.png"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_apply_then_restore_round_trip() {
        let mut scene = scene();
        let mut ledger = MutationLedger::new();
        let owner = OwnerRef::DataBlock { kind: DataBlockKind::Image, name: "wood".into() };

        ledger
            .apply(&mut scene, PropertyHandle::filepath(owner.clone()), "X:\\alice\\tex\\wood.png")
            .unwrap();
        assert_eq!(scene.file_blocks()[0].filepath, "X:\\alice\\tex\\wood.png");
        assert_eq!(ledger.len(), 1);

        assert_eq!(ledger.restore_all(&mut scene).unwrap(), 1);
        assert_eq!(scene.file_blocks()[0].filepath, "/p/tex/wood.png");
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_double_mutation_restores_original() {
        let mut scene = scene();
        let mut ledger = MutationLedger::new();
        let handle = PropertyHandle::filepath(OwnerRef::DataBlock {
            kind: DataBlockKind::Image,
            name: "wood".into(),
        });

        ledger.apply(&mut scene, handle.clone(), "first").unwrap();
        ledger.apply(&mut scene, handle, "second").unwrap();
        ledger.restore_all(&mut scene).unwrap();
        assert_eq!(scene.file_blocks()[0].filepath, "/p/tex/wood.png");
    }

    #[test]
    fn test_failed_write_is_not_recorded() {
        let mut scene = scene();
        let mut ledger = MutationLedger::new();
        let handle = PropertyHandle::filepath(OwnerRef::Volume { name: "missing".into() });
        assert!(ledger.apply(&mut scene, handle, "x").is_err());
        assert!(ledger.is_empty());
    }
}
