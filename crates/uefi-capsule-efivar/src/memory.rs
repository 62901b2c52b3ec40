//! In-memory variable store.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use uefi_capsule_errors::{CapsuleError, Result};
use uuid::Uuid;

use crate::store::{EfivarStore, Variable, VariableAttributes};

/// Variable store held entirely in memory.
///
/// Used by tests and by dry runs of the CLI. An instance created with
/// [`MemoryEfivars::unsupported`] reports the store as unavailable, which
/// models a kernel booted without efivars.
#[derive(Debug, Default)]
pub struct MemoryEfivars {
    vars: Mutex<BTreeMap<(Uuid, String), Variable>>,
    unsupported: bool,
}

impl MemoryEfivars {
    /// Create an empty, supported store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose [`EfivarStore::supported`] check fails.
    pub fn unsupported() -> Self {
        Self {
            vars: Mutex::new(BTreeMap::new()),
            unsupported: true,
        }
    }

    /// Number of variables held.
    pub fn len(&self) -> usize {
        self.vars.lock().len()
    }

    /// Whether the store holds no variables.
    pub fn is_empty(&self) -> bool {
        self.vars.lock().is_empty()
    }

    /// Names of all variables in `guid`, sorted.
    pub fn names(&self, guid: &Uuid) -> Vec<String> {
        self.vars
            .lock()
            .keys()
            .filter(|(g, _)| g == guid)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

impl EfivarStore for MemoryEfivars {
    fn supported(&self) -> Result<()> {
        if self.unsupported {
            return Err(CapsuleError::not_supported("kernel efivars support missing"));
        }
        Ok(())
    }

    fn read_variable(&self, guid: &Uuid, name: &str) -> Result<Variable> {
        self.vars
            .lock()
            .get(&(*guid, name.to_string()))
            .cloned()
            .ok_or_else(|| CapsuleError::not_found(format!("EFI variable {name}-{guid} not found")))
    }

    fn write_variable(
        &self,
        guid: &Uuid,
        name: &str,
        data: &[u8],
        attributes: VariableAttributes,
    ) -> Result<()> {
        self.vars.lock().insert(
            (*guid, name.to_string()),
            Variable {
                attributes,
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    fn delete_variable(&self, guid: &Uuid, name: &str) -> Result<()> {
        self.vars.lock().remove(&(*guid, name.to_string()));
        Ok(())
    }

    fn space_used(&self) -> Result<u64> {
        let total = self
            .vars
            .lock()
            .iter()
            .map(|((_, name), var)| (name.len() + var.data.len()) as u64)
            .sum();
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid;

    #[test]
    fn test_write_replace_delete() -> Result<()> {
        let store = MemoryEfivars::new();
        store.write_variable(&guid::FWUPDATE, "a", &[1], VariableAttributes::NV_BS_RT)?;
        store.write_variable(&guid::FWUPDATE, "a", &[2, 3], VariableAttributes::NV_BS_RT)?;
        assert_eq!(store.len(), 1);
        assert_eq!(store.read_variable(&guid::FWUPDATE, "a")?.data, vec![2, 3]);

        store.delete_variable(&guid::FWUPDATE, "a")?;
        store.delete_variable(&guid::FWUPDATE, "a")?;
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_namespaces_are_separate() -> Result<()> {
        let store = MemoryEfivars::new();
        store.write_variable(&guid::FWUPDATE, "x", &[], VariableAttributes::NV_BS_RT)?;
        assert!(store.exists(&guid::FWUPDATE, "x"));
        assert!(!store.exists(&guid::UX_CAPSULE, "x"));
        assert_eq!(store.names(&guid::FWUPDATE), vec!["x".to_string()]);
        Ok(())
    }

    #[test]
    fn test_unsupported() {
        assert!(MemoryEfivars::unsupported().supported().is_err());
        assert!(MemoryEfivars::new().supported().is_ok());
    }
}
