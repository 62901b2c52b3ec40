//! Linux efivarfs backend
//!
//! Each variable is a file named `<name>-<guid>` whose first four bytes are
//! the attributes (little-endian) followed by the payload. A write must reach
//! the kernel as a single `write(2)` of attributes and payload together.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;
use uefi_capsule_errors::{CapsuleError, Result};
use uuid::Uuid;

use crate::store::{EfivarStore, Variable, VariableAttributes};

/// Default efivarfs mount point.
pub const DEFAULT_EFIVARS_DIR: &str = "/sys/firmware/efi/efivars";

/// Variable store backed by an efivarfs mount.
#[derive(Debug, Clone)]
pub struct Efivarfs {
    dir: PathBuf,
}

impl Default for Efivarfs {
    fn default() -> Self {
        Self::new(DEFAULT_EFIVARS_DIR)
    }
}

impl Efivarfs {
    /// Create a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The efivarfs directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, guid: &Uuid, name: &str) -> PathBuf {
        self.dir.join(format!("{name}-{}", guid.hyphenated()))
    }
}

impl EfivarStore for Efivarfs {
    fn supported(&self) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(CapsuleError::not_supported(format!(
                "kernel efivars support missing: {}",
                self.dir.display()
            )));
        }
        Ok(())
    }

    fn read_variable(&self, guid: &Uuid, name: &str) -> Result<Variable> {
        let path = self.path_for(guid, name);
        let raw = fs::read(&path)
            .map_err(|e| CapsuleError::io(format!("failed to read {}", path.display()), e))?;
        let (attr_bytes, data) = raw.split_first_chunk::<4>().ok_or_else(|| {
            CapsuleError::invalid_data(format!("EFI variable {name} is too small"))
        })?;
        Ok(Variable {
            attributes: VariableAttributes::from_bits_retain(u32::from_le_bytes(*attr_bytes)),
            data: data.to_vec(),
        })
    }

    fn write_variable(
        &self,
        guid: &Uuid,
        name: &str,
        data: &[u8],
        attributes: VariableAttributes,
    ) -> Result<()> {
        let path = self.path_for(guid, name);
        let mut buf = Vec::with_capacity(data.len().saturating_add(4));
        buf.extend_from_slice(&attributes.bits().to_le_bytes());
        buf.extend_from_slice(data);

        // efivarfs cannot shrink a variable in place
        if !attributes.contains(VariableAttributes::APPEND_WRITE) && path.exists() {
            self.delete_variable(guid, name)?;
        }

        debug!(path = ?path, size = data.len(), "writing EFI variable");
        let mut file = fs::OpenOptions::new()
            .append(attributes.contains(VariableAttributes::APPEND_WRITE))
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CapsuleError::io(format!("failed to open {}", path.display()), e))?;
        file.write_all(&buf)
            .map_err(|e| CapsuleError::io(format!("failed to write {}", path.display()), e))?;
        Ok(())
    }

    fn delete_variable(&self, guid: &Uuid, name: &str) -> Result<()> {
        let path = self.path_for(guid, name);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = ?path, "deleted EFI variable");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CapsuleError::io(
                format!("failed to delete {}", path.display()),
                e,
            )),
        }
    }

    fn space_used(&self) -> Result<u64> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| CapsuleError::io(format!("failed to list {}", self.dir.display()), e))?;
        let mut total = 0u64;
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_file() {
                total = total.saturating_add(meta.len());
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid;
    use tempfile::TempDir;

    fn store() -> Result<(TempDir, Efivarfs)> {
        let dir = TempDir::new()?;
        let store = Efivarfs::new(dir.path());
        Ok((dir, store))
    }

    #[test]
    fn test_file_layout() -> Result<()> {
        let (dir, store) = store()?;
        store.write_variable(&guid::FWUPDATE, "fwupd-test", b"abc", VariableAttributes::NV_BS_RT)?;

        let file = dir
            .path()
            .join("fwupd-test-0abba7dc-e516-4167-bbf5-4d9d1c739416");
        let raw = fs::read(file)?;
        assert_eq!(raw, vec![7, 0, 0, 0, b'a', b'b', b'c']);
        Ok(())
    }

    #[test]
    fn test_read_back() -> Result<()> {
        let (_dir, store) = store()?;
        store.write_variable(&guid::FWUPDATE, "x", &[9, 8], VariableAttributes::NON_VOLATILE)?;
        let var = store.read_variable(&guid::FWUPDATE, "x")?;
        assert_eq!(var.attributes, VariableAttributes::NON_VOLATILE);
        assert_eq!(var.data, vec![9, 8]);
        assert_eq!(store.space_used()?, 6);
        Ok(())
    }

    #[test]
    fn test_missing_variable_is_not_found() -> Result<()> {
        let (_dir, store) = store()?;
        let err = store.read_variable(&guid::FWUPDATE, "absent");
        assert!(matches!(err, Err(CapsuleError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_delete_missing_is_ok() -> Result<()> {
        let (_dir, store) = store()?;
        store.delete_variable(&guid::FWUPDATE, "absent")?;
        Ok(())
    }

    #[test]
    fn test_truncated_variable() -> Result<()> {
        let (dir, store) = store()?;
        fs::write(
            dir.path()
                .join("short-0abba7dc-e516-4167-bbf5-4d9d1c739416"),
            [1, 2],
        )?;
        let err = store.read_variable(&guid::FWUPDATE, "short");
        assert!(matches!(err, Err(CapsuleError::InvalidData(_))));
        Ok(())
    }

    #[test]
    fn test_unsupported_without_dir() {
        let store = Efivarfs::new("/nonexistent/efivars");
        assert!(matches!(
            store.supported(),
            Err(CapsuleError::NotSupported(_))
        ));
    }
}
