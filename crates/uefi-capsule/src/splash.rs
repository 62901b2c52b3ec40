//! Splash image selection and loading
//!
//! Pre-rendered splash bitmaps ship in a fixed set of sizes. The best size
//! for a screen is the one leaving the fewest border pixels; the image itself
//! is found in the locale tree and stored gzip-compressed.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;
use uefi_capsule_errors::{CapsuleError, Result, ResultExt};

use crate::display::Resolution;

/// Sizes the splash images are rendered at, ascending.
pub const SPLASH_CATALOG: [Resolution; 8] = [
    Resolution::new(640, 480),
    Resolution::new(800, 600),
    Resolution::new(1024, 768),
    Resolution::new(1920, 1080),
    Resolution::new(3840, 2160),
    Resolution::new(5120, 2880),
    Resolution::new(5688, 3200),
    Resolution::new(7680, 4320),
];

/// Locale tree used when the configured one is not an absolute path.
pub const FALLBACK_LOCALE_DIR: &str = "/usr/share/locale";

/// Pick the catalog entry that fits `screen` with the fewest border pixels.
///
/// Entries larger than the screen in either dimension are skipped. On equal
/// borders the earlier entry wins, so the result is deterministic.
pub fn select_splash_size(screen: Resolution, catalog: &[Resolution]) -> Result<Resolution> {
    let mut best: Option<(u64, Resolution)> = None;
    for candidate in catalog.iter().filter(|c| c.fits_within(screen)) {
        let border = screen.area() - candidate.area();
        if best.is_none_or(|(lowest, _)| border < lowest) {
            best = Some((border, *candidate));
        }
    }
    best.map(|(_, size)| size)
        .ok_or_else(|| CapsuleError::not_supported("failed to find a suitable image to use"))
}

/// Finds compressed splash images under `<locale_dir>/<lang>/LC_IMAGES`.
#[derive(Debug, Clone)]
pub struct SplashLocator {
    locale_dir: PathBuf,
    languages: Vec<String>,
}

impl SplashLocator {
    /// Create a locator over `languages`, most preferred first.
    pub fn new(locale_dir: impl Into<PathBuf>, languages: Vec<String>) -> Self {
        let mut locale_dir = locale_dir.into();
        if !locale_dir.is_absolute() {
            locale_dir = PathBuf::from(FALLBACK_LOCALE_DIR);
        }
        Self {
            locale_dir,
            languages,
        }
    }

    /// The locale tree searched.
    pub fn locale_dir(&self) -> &Path {
        &self.locale_dir
    }

    /// Path of the first existing image of `size` across the languages.
    ///
    /// Codeset-qualified `.UTF-8` variants are skipped; the images are only
    /// installed under plain language names.
    pub fn find(&self, size: Resolution) -> Result<PathBuf> {
        let basename = format!("fwupd-{}-{}.bmp.gz", size.width, size.height);
        for lang in &self.languages {
            if lang.ends_with(".UTF-8") {
                continue;
            }
            let path = self.locale_dir.join(lang).join("LC_IMAGES").join(&basename);
            if path.exists() {
                return Ok(path);
            }
            debug!("no {} found", path.display());
        }
        Err(CapsuleError::not_supported(format!(
            "failed to get splash file for {} in {}",
            self.languages.join(","),
            self.locale_dir.display()
        )))
    }

    /// Find and decompress the image of `size`.
    pub fn load(&self, size: Resolution) -> Result<Vec<u8>> {
        let path = self.find(size)?;
        let compressed = fs::read(&path)
            .map_err(|e| CapsuleError::io(format!("failed to read {}", path.display()), e))?;
        decompress(&compressed)
    }
}

/// Gunzip `compressed` into memory.
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut buf = Vec::new();
    decoder
        .read_to_end(&mut buf)
        .prefix_err("failed to decompress file: ")?;
    debug!("decompressed image to {}kb", buf.len() / 1024);
    Ok(buf)
}

/// Preferred language names from the process environment.
pub fn language_names() -> Vec<String> {
    language_names_from(|key| std::env::var(key).ok())
}

/// Preferred language names from an environment lookup.
///
/// The first non-empty of `LANGUAGE`, `LC_ALL`, `LC_MESSAGES` and `LANG` is
/// split on `:`; each locale expands into its less specific variants and the
/// list ends with `C`.
pub fn language_names_from(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let value = ["LANGUAGE", "LC_ALL", "LC_MESSAGES", "LANG"]
        .into_iter()
        .filter_map(&lookup)
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "C".to_string());

    let mut names: Vec<String> = Vec::new();
    for locale in value.split(':').filter(|l| !l.is_empty()) {
        for variant in locale_variants(locale) {
            if !names.contains(&variant) {
                names.push(variant);
            }
        }
    }
    if !names.iter().any(|n| n == "C") {
        names.push("C".to_string());
    }
    names
}

/// Expand `lang_TERRITORY.codeset@modifier` from most to least specific.
fn locale_variants(locale: &str) -> Vec<String> {
    let (rest, modifier) = split_at_char(locale, '@');
    let (rest, codeset) = split_at_char(rest, '.');
    let (language, territory) = split_at_char(rest, '_');

    let mut variants = Vec::new();
    // most specific first: territory outranks codeset, modifier outranks both
    for mask in (0u8..8).rev() {
        let with_modifier = mask & 4 != 0;
        let with_territory = mask & 2 != 0;
        let with_codeset = mask & 1 != 0;
        if (with_modifier && modifier.is_none())
            || (with_territory && territory.is_none())
            || (with_codeset && codeset.is_none())
        {
            continue;
        }
        let mut name = language.to_string();
        if let Some(t) = territory.filter(|_| with_territory) {
            name.push_str(t);
        }
        if let Some(c) = codeset.filter(|_| with_codeset) {
            name.push_str(c);
        }
        if let Some(m) = modifier.filter(|_| with_modifier) {
            name.push_str(m);
        }
        variants.push(name);
    }
    variants
}

// Split before the first `sep`, keeping the separator on the tail.
fn split_at_char(s: &str, sep: char) -> (&str, Option<&str>) {
    match s.find(sep) {
        Some(idx) => {
            let (head, tail) = s.split_at(idx);
            (head, Some(tail))
        }
        None => (s, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uefi_capsule_test_helpers::fixtures::{self, FakeFirmwareTree, bmp, gzip};
    use uefi_capsule_test_helpers::must;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_exact_match() -> Result<()> {
        let size = select_splash_size(Resolution::new(1920, 1080), &SPLASH_CATALOG)?;
        assert_eq!(size, Resolution::new(1920, 1080));
        Ok(())
    }

    #[test]
    fn test_largest_fitting() -> Result<()> {
        let size = select_splash_size(Resolution::new(1000, 700), &SPLASH_CATALOG)?;
        assert_eq!(size, Resolution::new(800, 600));
        Ok(())
    }

    #[test]
    fn test_huge_screen_takes_largest() -> Result<()> {
        let size = select_splash_size(Resolution::new(10000, 10000), &SPLASH_CATALOG)?;
        assert_eq!(size, Resolution::new(7680, 4320));
        Ok(())
    }

    #[test]
    fn test_too_small_screen() {
        let err = select_splash_size(Resolution::new(639, 480), &SPLASH_CATALOG);
        assert!(matches!(
            err,
            Err(CapsuleError::NotSupported(ref m)) if m == "failed to find a suitable image to use"
        ));
    }

    #[test]
    fn test_tie_keeps_first_entry() -> Result<()> {
        let catalog = [Resolution::new(200, 100), Resolution::new(100, 200)];
        let size = select_splash_size(Resolution::new(200, 200), &catalog)?;
        assert_eq!(size, Resolution::new(200, 100));
        Ok(())
    }

    #[test]
    fn test_language_variants() {
        let names = language_names_from(env(&[("LANG", "en_GB.UTF-8")]));
        assert_eq!(names, vec!["en_GB.UTF-8", "en_GB", "en.UTF-8", "en", "C"]);

        let names = language_names_from(env(&[("LANGUAGE", "de_DE@euro:fr"), ("LANG", "en_US")]));
        assert_eq!(
            names,
            vec!["de_DE@euro", "de@euro", "de_DE", "de", "fr", "C"]
        );

        assert_eq!(language_names_from(env(&[])), vec!["C"]);
        assert_eq!(
            language_names_from(env(&[("LANGUAGE", ""), ("LC_ALL", "C")])),
            vec!["C"]
        );
    }

    #[test]
    fn test_locator_finds_and_decompresses() -> Result<()> {
        let tree = must(FakeFirmwareTree::new());
        must(tree.with_splash("en", 800, 600));
        let locator = SplashLocator::new(
            tree.path(fixtures::LOCALE),
            vec!["en_GB.UTF-8".into(), "en_GB".into(), "en".into(), "C".into()],
        );
        let path = locator.find(Resolution::new(800, 600))?;
        assert!(path.ends_with("en/LC_IMAGES/fwupd-800-600.bmp.gz"));
        assert_eq!(locator.load(Resolution::new(800, 600))?, bmp(800, 600));
        Ok(())
    }

    #[test]
    fn test_locator_skips_utf8_variants() -> Result<()> {
        let tree = must(FakeFirmwareTree::new());
        must(tree.with_splash("en.UTF-8", 640, 480));
        let locator = SplashLocator::new(tree.path(fixtures::LOCALE), vec!["en.UTF-8".into()]);
        let err = locator.find(Resolution::new(640, 480));
        let expected = format!(
            "failed to get splash file for en.UTF-8 in {}",
            tree.path(fixtures::LOCALE).display()
        );
        assert!(matches!(err, Err(CapsuleError::NotSupported(ref m)) if *m == expected));
        Ok(())
    }

    #[test]
    fn test_relative_locale_dir_falls_back() {
        let locator = SplashLocator::new("share/locale", vec![]);
        assert_eq!(locator.locale_dir(), Path::new(FALLBACK_LOCALE_DIR));
    }

    #[test]
    fn test_decompress_garbage() -> Result<()> {
        let err = decompress(b"definitely not gzip");
        assert!(err.is_err_and(|e| e.to_string().starts_with("failed to decompress file: ")));

        let big = vec![0x42u8; 3 * 1024 * 1024];
        assert_eq!(decompress(&gzip(&big)?)?, big);
        Ok(())
    }
}
