//! Screen geometry: the EFI framebuffer size and the boot logo position.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::debug;
use uefi_capsule_errors::{CapsuleError, Result, ResultExt};

use crate::bitmap;
use crate::sysfs;

/// A width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Create a resolution.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether `self` fits inside `screen` in both dimensions.
    pub fn fits_within(&self, screen: Resolution) -> bool {
        self.width <= screen.width && self.height <= screen.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Read the framebuffer size from the efi-framebuffer driver directory.
pub fn framebuffer_size(dir: &Path) -> Result<Resolution> {
    if !dir.is_dir() {
        return Err(CapsuleError::not_supported("EFI framebuffer not found"));
    }
    let width = sysfs::read_u32(&dir.join("width"))?;
    let height = sysfs::read_u32(&dir.join("height"))?;
    if width == 0 || height == 0 {
        return Err(CapsuleError::not_supported(format!(
            "EFI framebuffer has invalid size {width}x{height}"
        )));
    }
    debug!("framebuffer size {width} x{height}");
    Ok(Resolution::new(width, height))
}

/// The platform boot logo as described by the ACPI BGRT.
///
/// Only a successfully validated table produces a value; an absent or
/// malformed table means UX capsules are unsupported on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bgrt {
    /// Logo left edge
    pub x_offset: u32,
    /// Logo top edge
    pub y_offset: u32,
    /// Logo width
    pub width: u32,
    /// Logo height
    pub height: u32,
}

impl Bgrt {
    /// Read and validate the BGRT attributes under `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(CapsuleError::not_supported("BGRT is not supported"));
        }
        let kind = sysfs::read_u64(&dir.join("type"))?;
        if kind != 0 {
            return Err(CapsuleError::not_supported(format!(
                "BGRT type was {kind}"
            )));
        }
        let version = sysfs::read_u64(&dir.join("version"))?;
        if version != 1 {
            return Err(CapsuleError::not_supported(format!(
                "BGRT version was {version}"
            )));
        }
        let status = sysfs::read_u64(&dir.join("status"))?;
        if status & 1 != 1 {
            return Err(CapsuleError::not_supported(format!(
                "BGRT status was {status}"
            )));
        }
        let x_offset = sysfs::read_u32(&dir.join("xoffset"))?;
        let y_offset = sysfs::read_u32(&dir.join("yoffset"))?;

        let image_path = dir.join("image");
        let image = fs::read(&image_path).map_err(|e| {
            CapsuleError::io(format!("failed to read {}", image_path.display()), e)
        })?;
        let logo = bitmap::parse(&image).prefix_err("BGRT image invalid: ")?;

        Ok(Self {
            x_offset,
            y_offset,
            width: logo.width,
            height: logo.height,
        })
    }

    /// First row below the logo.
    pub fn bottom(&self) -> u32 {
        self.y_offset.saturating_add(self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uefi_capsule_test_helpers::fixtures::{self, BgrtFixture, FakeFirmwareTree};
    use uefi_capsule_test_helpers::must;

    #[test]
    fn test_fits_within() {
        let screen = Resolution::new(1000, 700);
        assert!(Resolution::new(800, 600).fits_within(screen));
        assert!(!Resolution::new(1024, 600).fits_within(screen));
        assert!(!Resolution::new(640, 768).fits_within(screen));
        assert_eq!(screen.to_string(), "1000x700");
    }

    #[test]
    fn test_framebuffer_size() -> Result<()> {
        let tree = must(FakeFirmwareTree::new());
        let dir = tree.path(fixtures::FRAMEBUFFER);
        assert!(matches!(
            framebuffer_size(&dir),
            Err(CapsuleError::NotSupported(_))
        ));

        must(tree.with_framebuffer(1920, 1080));
        assert_eq!(framebuffer_size(&dir)?, Resolution::new(1920, 1080));

        must(tree.with_framebuffer(0, 1080));
        assert!(matches!(
            framebuffer_size(&dir),
            Err(CapsuleError::NotSupported(ref m)) if m == "EFI framebuffer has invalid size 0x1080"
        ));
        Ok(())
    }

    #[test]
    fn test_bgrt_load() -> Result<()> {
        let tree = must(FakeFirmwareTree::new());
        let dir = tree.path(fixtures::SYSFS_FIRMWARE).join("acpi/bgrt");
        assert!(matches!(Bgrt::load(&dir), Err(CapsuleError::NotSupported(ref m)) if m == "BGRT is not supported"));

        must(tree.with_bgrt(BgrtFixture::default()));
        let bgrt = Bgrt::load(&dir)?;
        assert_eq!(bgrt.x_offset, 123);
        assert_eq!(bgrt.y_offset, 456);
        assert_eq!((bgrt.width, bgrt.height), (54, 24));
        assert_eq!(bgrt.bottom(), 480);
        Ok(())
    }

    #[test]
    fn test_bgrt_rejects_bad_status() {
        let tree = must(FakeFirmwareTree::new());
        must(tree.with_bgrt(BgrtFixture {
            status: 0,
            ..BgrtFixture::default()
        }));
        let dir = tree.path(fixtures::SYSFS_FIRMWARE).join("acpi/bgrt");
        assert!(matches!(
            Bgrt::load(&dir),
            Err(CapsuleError::NotSupported(ref m)) if m == "BGRT status was 0"
        ));
    }
}
