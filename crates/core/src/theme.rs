//! Themes select which prompt vocabulary is generated, which store file
//! backs the run, and how artifacts and uploaded entities are labelled.
//!
//! One theme maps to exactly one job database (`<id>.db`), so switching
//! themes never mixes progress between datasets.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// Theme used when none is configured.
pub const DEFAULT_THEME_ID: &str = "cats";

/// Maximum length of a theme identifier.
const MAX_ID_LEN: usize = 64;

/// A named prompt dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    /// Stable identifier; also the store file stem.
    pub id: String,
    /// Human-readable name used in banners and logs.
    pub name: String,
    /// Prefix for generated artifact file names.
    pub output_prefix: String,
    /// `app` attribute attached to uploaded entities.
    pub app_name: String,
    pub components: PromptComponents,
}

/// Ordered word lists combined into prompts.
///
/// An empty string inside `accessories` or `backgrounds` means "omit this
/// part" for that combination. The required lists must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptComponents {
    pub subjects: Vec<String>,
    #[serde(default)]
    pub accessories: Vec<String>,
    pub styles: Vec<String>,
    pub colors: Vec<String>,
    #[serde(default)]
    pub backgrounds: Vec<String>,
    pub qualities: Vec<String>,
}

impl Theme {
    /// Check that the theme can safely name a store file and produce at
    /// least one prompt.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.is_empty() || self.id.len() > MAX_ID_LEN {
            return Err(CoreError::Validation(format!(
                "theme id must be 1-{MAX_ID_LEN} characters"
            )));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::Validation(format!(
                "theme id '{}' may only contain ASCII letters, digits, '-' and '_'",
                self.id
            )));
        }
        if self.output_prefix.trim().is_empty() {
            return Err(CoreError::Validation("output_prefix must not be empty".into()));
        }
        if self.app_name.trim().is_empty() {
            return Err(CoreError::Validation("app_name must not be empty".into()));
        }

        let required = [
            ("subjects", &self.components.subjects),
            ("styles", &self.components.styles),
            ("colors", &self.components.colors),
            ("qualities", &self.components.qualities),
        ];
        for (name, list) in required {
            if list.is_empty() {
                return Err(CoreError::Validation(format!(
                    "theme '{}' has no {name}",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// File name of the artifact generated for `job_id`.
    pub fn artifact_file_name(&self, job_id: DbId) -> String {
        format!("{}_{}.png", self.output_prefix, job_id)
    }
}

/// Resolve a built-in theme by id.
pub fn builtin(id: &str) -> Result<Theme, CoreError> {
    match id {
        "cats" => Ok(cats()),
        other => Err(CoreError::UnknownTheme(other.to_string())),
    }
}

/// Load and validate a theme from a JSON file.
pub fn load_from_file(path: &Path) -> Result<Theme, CoreError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let theme: Theme = serde_json::from_str(&raw).map_err(|source| CoreError::Json {
        path: path.display().to_string(),
        source,
    })?;
    theme.validate()?;
    Ok(theme)
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn cats() -> Theme {
    Theme {
        id: "cats".into(),
        name: "Crypto Cats".into(),
        output_prefix: "cat".into(),
        app_name: "CCats".into(),
        components: PromptComponents {
            subjects: words(&[
                "cat",
                "kitten",
                "fluffy cat",
                "sleek cat",
                "fat cat",
                "elegant cat",
                "mysterious cat",
                "majestic cat",
                "playful kitten",
                "wise old cat",
            ]),
            accessories: words(&[
                "wearing golden blockchain necklace",
                "with bitcoin earrings",
                "wearing ethereum pendant",
                "with VR headset",
                "wearing hacker hoodie",
                "with laser eyes",
                "wearing crown made of circuit boards",
                "with glowing crypto wallet",
                "wearing NFT collar",
                "with holographic glasses",
                "wearing LED collar",
                "with mechanical wings",
                "wearing space helmet",
                "with diamond claws",
                "wearing ninja mask",
                "",
            ]),
            styles: words(&[
                "cyberpunk style",
                "anime style",
                "realistic photography",
                "neon art style",
                "vaporwave aesthetic",
                "pixel art style",
                "oil painting style",
                "watercolor style",
                "3D render",
                "comic book style",
                "synthwave style",
                "steampunk style",
                "minimalist style",
                "psychedelic art",
                "low poly art",
                "ukiyo-e japanese art",
            ]),
            colors: words(&[
                "golden and purple colors",
                "neon pink and blue",
                "green matrix colors",
                "orange and black",
                "silver and cyan",
                "red and gold",
                "black and neon green",
                "white and holographic",
                "rainbow iridescent",
                "dark purple and gold",
                "electric blue",
                "sunset orange and pink",
            ]),
            backgrounds: words(&[
                "blockchain network background",
                "crypto trading charts background",
                "neon city skyline",
                "digital matrix rain",
                "space with galaxies",
                "abstract geometric shapes",
                "futuristic server room",
                "glowing circuit board",
                "tokyo street at night",
                "floating in cyberspace",
                "ancient temple with tech",
                "underwater tech city",
                "",
            ]),
            qualities: words(&[
                "4k, highly detailed",
                "8k, ultra detailed",
                "masterpiece, best quality",
                "photorealistic, sharp focus",
                "cinematic lighting, detailed",
                "studio lighting, professional",
            ]),
        },
    }
}
