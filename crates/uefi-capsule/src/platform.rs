//! Platform identification from DMI and the hardware IDs derived from it.
//!
//! Hardware IDs are name-based (v5) UUIDs over `&`-joined DMI values encoded
//! as UTF-16LE, so quirks can match a whole vendor or one exact model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::sysfs;

/// Namespace of every hardware ID.
pub const HWID_NAMESPACE: Uuid = uuid::uuid!("70ffd812-4c7f-4c7d-0000-000000000000");

/// Manufacturer-only hardware ID of Lenovo machines.
pub const HWID_LENOVO: Uuid = uuid::uuid!("6de5d951-d755-576b-bd09-c5cf66b27234");

/// DMI fields used for identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DmiKey {
    /// System manufacturer
    Manufacturer,
    /// Product family
    Family,
    /// Product name
    ProductName,
    /// Product SKU
    ProductSku,
    /// Baseboard manufacturer
    BaseboardManufacturer,
    /// Baseboard product
    BaseboardProduct,
    /// BIOS vendor
    BiosVendor,
    /// BIOS version
    BiosVersion,
    /// Chassis type, in hexadecimal
    EnclosureKind,
}

impl DmiKey {
    /// Every key, in display order.
    pub const ALL: [DmiKey; 9] = [
        DmiKey::Manufacturer,
        DmiKey::Family,
        DmiKey::ProductName,
        DmiKey::ProductSku,
        DmiKey::BaseboardManufacturer,
        DmiKey::BaseboardProduct,
        DmiKey::BiosVendor,
        DmiKey::BiosVersion,
        DmiKey::EnclosureKind,
    ];

    /// Attribute file name under `/sys/class/dmi/id`.
    pub fn sysfs_name(&self) -> &'static str {
        match self {
            DmiKey::Manufacturer => "sys_vendor",
            DmiKey::Family => "product_family",
            DmiKey::ProductName => "product_name",
            DmiKey::ProductSku => "product_sku",
            DmiKey::BaseboardManufacturer => "board_vendor",
            DmiKey::BaseboardProduct => "board_name",
            DmiKey::BiosVendor => "bios_vendor",
            DmiKey::BiosVersion => "bios_version",
            DmiKey::EnclosureKind => "chassis_type",
        }
    }
}

impl fmt::Display for DmiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// HardwareID-3 to HardwareID-14; the earlier ones need SMBIOS release fields.
const HWID_RECIPES: &[&[DmiKey]] = &[
    &[
        DmiKey::Manufacturer,
        DmiKey::Family,
        DmiKey::ProductName,
        DmiKey::ProductSku,
        DmiKey::BaseboardManufacturer,
        DmiKey::BaseboardProduct,
    ],
    &[
        DmiKey::Manufacturer,
        DmiKey::Family,
        DmiKey::ProductName,
        DmiKey::ProductSku,
    ],
    &[DmiKey::Manufacturer, DmiKey::Family, DmiKey::ProductName],
    &[
        DmiKey::Manufacturer,
        DmiKey::ProductSku,
        DmiKey::BaseboardManufacturer,
        DmiKey::BaseboardProduct,
    ],
    &[DmiKey::Manufacturer, DmiKey::ProductSku],
    &[
        DmiKey::Manufacturer,
        DmiKey::ProductName,
        DmiKey::BaseboardManufacturer,
        DmiKey::BaseboardProduct,
    ],
    &[DmiKey::Manufacturer, DmiKey::ProductName],
    &[
        DmiKey::Manufacturer,
        DmiKey::Family,
        DmiKey::BaseboardManufacturer,
        DmiKey::BaseboardProduct,
    ],
    &[DmiKey::Manufacturer, DmiKey::Family],
    &[DmiKey::Manufacturer, DmiKey::EnclosureKind],
    &[
        DmiKey::Manufacturer,
        DmiKey::BaseboardManufacturer,
        DmiKey::BaseboardProduct,
    ],
    &[DmiKey::Manufacturer],
];

/// The hardware ID of an already joined value string.
pub fn hwid_for(value: &str) -> Uuid {
    let utf16: Vec<u8> = value.encode_utf16().flat_map(u16::to_le_bytes).collect();
    Uuid::new_v5(&HWID_NAMESPACE, &utf16)
}

/// DMI values of the running machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlatformInfo {
    values: BTreeMap<DmiKey, String>,
}

impl PlatformInfo {
    /// Read whatever DMI attributes exist under `dmi_dir`.
    pub fn load(dmi_dir: &Path) -> Self {
        let mut info = Self::default();
        for key in DmiKey::ALL {
            let path = dmi_dir.join(key.sysfs_name());
            match sysfs::read_string(&path) {
                Ok(value) if key == DmiKey::EnclosureKind => {
                    if let Ok(kind) = value.parse::<u32>() {
                        info.set(key, format!("{kind:x}"));
                    }
                }
                Ok(value) => info.set(key, value),
                Err(e) => debug!("no DMI {key}: {e}"),
            }
        }
        info
    }

    /// Set a value; empty values are ignored.
    pub fn set(&mut self, key: DmiKey, value: impl Into<String>) {
        let value = value.into();
        let value = value.trim();
        if !value.is_empty() {
            self.values.insert(key, value.to_string());
        }
    }

    /// Builder form of [`PlatformInfo::set`].
    pub fn with(mut self, key: DmiKey, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// A DMI value.
    pub fn value(&self, key: DmiKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Every hardware ID whose inputs are all known, most specific first.
    pub fn hwids(&self) -> Vec<Uuid> {
        HWID_RECIPES
            .iter()
            .filter_map(|keys| {
                let parts: Option<Vec<&str>> = keys.iter().map(|k| self.value(*k)).collect();
                parts.map(|parts| hwid_for(&parts.join("&")))
            })
            .collect()
    }

    /// Whether `hwid` matches this machine.
    pub fn has_hwid(&self, hwid: &Uuid) -> bool {
        self.hwids().contains(hwid)
    }
}
