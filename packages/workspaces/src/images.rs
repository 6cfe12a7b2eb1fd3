// ABOUTME: Language to workspace image lookup
// ABOUTME: Unknown or missing languages resolve to the base image instead of failing

use std::collections::HashMap;

const BASE_FLAVOR: &str = "base";

/// Language aliases and the image flavor serving them
const LANGUAGE_FLAVORS: &[(&str, &str)] = &[
    ("python", "python"),
    ("java", "java"),
    ("nodejs", "nodejs"),
    ("javascript", "nodejs"),
    ("js", "nodejs"),
    ("typescript", "nodejs"),
    ("ts", "nodejs"),
    ("cpp", "cpp"),
    ("c++", "cpp"),
    ("c", "cpp"),
    ("sql", "sql"),
    ("mysql", "sql"),
    ("postgresql", "sql"),
    ("postgres", "sql"),
    ("sqlite", "sql"),
    ("base", BASE_FLAVOR),
];

/// Fixed language → image table with a default fallback
#[derive(Debug, Clone)]
pub struct ImageCatalog {
    images: HashMap<String, String>,
    default_image: String,
}

impl ImageCatalog {
    /// Build the catalog for images published as `{prefix}/{flavor}:{tag}`
    pub fn new(prefix: &str, tag: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let image = |flavor: &str| format!("{}/{}:{}", prefix, flavor, tag);

        let images = LANGUAGE_FLAVORS
            .iter()
            .map(|(language, flavor)| (language.to_string(), image(flavor)))
            .collect();

        Self {
            images,
            default_image: image(BASE_FLAVOR),
        }
    }

    /// Image for `language`, matched case-insensitively
    pub fn resolve(&self, language: Option<&str>) -> &str {
        language
            .map(|l| l.trim().to_lowercase())
            .and_then(|l| self.images.get(&l))
            .unwrap_or(&self.default_image)
    }

    pub fn default_image(&self) -> &str {
        &self.default_image
    }
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self::new("dockeride", "latest")
    }
}
