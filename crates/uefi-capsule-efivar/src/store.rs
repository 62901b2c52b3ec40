//! The variable-store trait and variable attributes.

use bitflags::bitflags;
use uefi_capsule_errors::{CapsuleError, Result};
use uuid::Uuid;

use crate::guid;

bitflags! {
    /// UEFI variable attributes.
    ///
    /// efivarfs stores these as the first four bytes (little-endian) of every
    /// variable file.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VariableAttributes: u32 {
        /// Survives a reset
        const NON_VOLATILE                          = 0x0000_0001;
        /// Readable from boot services
        const BOOTSERVICE_ACCESS                    = 0x0000_0002;
        /// Readable from the OS at runtime
        const RUNTIME_ACCESS                        = 0x0000_0004;
        /// Hardware error record
        const HARDWARE_ERROR_RECORD                 = 0x0000_0008;
        /// Deprecated count-based authenticated write
        const AUTHENTICATED_WRITE_ACCESS            = 0x0000_0010;
        /// Time-based authenticated write
        const TIME_BASED_AUTHENTICATED_WRITE_ACCESS = 0x0000_0020;
        /// Append instead of replace
        const APPEND_WRITE                          = 0x0000_0040;
    }
}

impl VariableAttributes {
    /// Non-volatile, boot-service and runtime access: the attribute set used
    /// for update-info variables.
    pub const NV_BS_RT: Self = Self::NON_VOLATILE
        .union(Self::BOOTSERVICE_ACCESS)
        .union(Self::RUNTIME_ACCESS);
}

/// A variable as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Attributes stored with the variable
    pub attributes: VariableAttributes,
    /// Variable payload
    pub data: Vec<u8>,
}

/// Access to firmware NVRAM variables.
///
/// Reads of a missing variable fail with `NotFound`; deleting a missing
/// variable succeeds.
pub trait EfivarStore {
    /// Check that the store is usable on this system.
    fn supported(&self) -> Result<()>;

    /// Read a variable.
    fn read_variable(&self, guid: &Uuid, name: &str) -> Result<Variable>;

    /// Create or replace a variable.
    fn write_variable(
        &self,
        guid: &Uuid,
        name: &str,
        data: &[u8],
        attributes: VariableAttributes,
    ) -> Result<()>;

    /// Remove a variable if it exists.
    fn delete_variable(&self, guid: &Uuid, name: &str) -> Result<()>;

    /// Total bytes of NVRAM currently used by variables.
    fn space_used(&self) -> Result<u64>;

    /// Whether a variable exists.
    fn exists(&self, guid: &Uuid, name: &str) -> bool {
        self.read_variable(guid, name).is_ok()
    }
}

impl<T: EfivarStore + ?Sized> EfivarStore for &T {
    fn supported(&self) -> Result<()> {
        (**self).supported()
    }

    fn read_variable(&self, guid: &Uuid, name: &str) -> Result<Variable> {
        (**self).read_variable(guid, name)
    }

    fn write_variable(
        &self,
        guid: &Uuid,
        name: &str,
        data: &[u8],
        attributes: VariableAttributes,
    ) -> Result<()> {
        (**self).write_variable(guid, name, data, attributes)
    }

    fn delete_variable(&self, guid: &Uuid, name: &str) -> Result<()> {
        (**self).delete_variable(guid, name)
    }

    fn space_used(&self) -> Result<u64> {
        (**self).space_used()
    }
}

/// Whether secure boot is enabled.
///
/// Fails with `NotSupported` when the platform does not expose the
/// `SecureBoot` variable at all.
pub fn secure_boot_enabled(store: &impl EfivarStore) -> Result<bool> {
    let var = store
        .read_variable(&guid::EFI_GLOBAL, "SecureBoot")
        .map_err(|e| CapsuleError::not_supported(format!("SecureBoot is not available: {e}")))?;
    Ok(var.data.first() == Some(&1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryEfivars;

    #[test]
    fn test_nv_bs_rt_bits() {
        assert_eq!(VariableAttributes::NV_BS_RT.bits(), 0x7);
    }

    #[test]
    fn test_secure_boot_states() -> Result<()> {
        let store = MemoryEfivars::new();
        assert!(secure_boot_enabled(&store).is_err());

        store.write_variable(
            &guid::EFI_GLOBAL,
            "SecureBoot",
            &[0],
            VariableAttributes::NV_BS_RT,
        )?;
        assert!(!secure_boot_enabled(&store)?);

        store.write_variable(
            &guid::EFI_GLOBAL,
            "SecureBoot",
            &[1],
            VariableAttributes::NV_BS_RT,
        )?;
        assert!(secure_boot_enabled(&store)?);
        Ok(())
    }
}
