//! Category classification and destination naming for organized imports

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::hash_engine::Fingerprint;

/// Highest numeric suffix tried before giving up on a destination name
pub const MAX_NAME_ATTEMPTS: usize = 1000;

pub const DEFAULT_FALLBACK_CATEGORY: &str = "other";

/// Maps a source file to the category folder it is placed under
pub trait FileClassifier: Send + Sync {
    fn category_for(&self, path: &Path) -> String;
}

/// Classifies files by lowercase extension
#[derive(Debug, Clone)]
pub struct ExtensionClassifier {
    categories: HashMap<String, String>,
    fallback: String,
}

impl Default for ExtensionClassifier {
    fn default() -> Self {
        let categories = [
            ("stl", "stl"),
            ("obj", "obj"),
            ("3mf", "3mf"),
            ("ply", "ply"),
            ("gltf", "gltf"),
            ("glb", "gltf"),
            ("fbx", "fbx"),
            ("step", "step"),
            ("stp", "step"),
            ("amf", "amf"),
            ("blend", "blend"),
            ("dae", "dae"),
            ("scad", "scad"),
        ]
        .into_iter()
        .map(|(ext, folder)| (ext.to_string(), folder.to_string()))
        .collect();

        Self {
            categories,
            fallback: DEFAULT_FALLBACK_CATEGORY.to_string(),
        }
    }
}

impl ExtensionClassifier {
    /// Classifier with no extension mappings; everything lands in `fallback`
    pub fn empty(fallback: impl Into<String>) -> Self {
        Self {
            categories: HashMap::new(),
            fallback: folder_name(&fallback.into()),
        }
    }

    /// Add or replace the folder for an extension (leading dot optional)
    pub fn with_category(mut self, extension: &str, folder: &str) -> Self {
        let ext = extension.trim_start_matches('.').to_lowercase();
        self.categories.insert(ext, folder_name(folder));
        self
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = folder_name(fallback);
        self
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }
}

impl FileClassifier for ExtensionClassifier {
    fn category_for(&self, path: &Path) -> String {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| self.categories.get(&ext).cloned())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Sanitized folder name, falling back to the default category when nothing usable remains
fn folder_name(raw: &str) -> String {
    let name = sanitize_filename(raw);
    if name.is_empty() {
        DEFAULT_FALLBACK_CATEGORY.to_string()
    } else {
        name
    }
}

/// Sanitize a filename to remove characters that are invalid on common filesystems
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\\' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .trim()
        .to_string()
}

/// Candidate destination paths in preference order:
/// `name.ext`, `name_<fp8>.ext`, then `name_<fp8>_<n>.ext`.
pub fn destination_candidates<'a>(
    directory: &'a Path,
    file_name: &str,
    fingerprint: &Fingerprint,
) -> impl Iterator<Item = PathBuf> + use<'a> {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let short = fingerprint.short();

    let plain = std::iter::once(file_name.to_string());
    let tagged = std::iter::once(format!("{stem}_{short}{extension}"));
    let numbered = (1..=MAX_NAME_ATTEMPTS).map(move |n| format!("{stem}_{short}_{n}{extension}"));

    plain.chain(tagged).chain(numbered).map(move |name| directory.join(name))
}
