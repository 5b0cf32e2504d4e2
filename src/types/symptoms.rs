//! Patient-reported symptom flags

use serde::{Deserialize, Serialize};

const ITCH_KEYWORDS: &[&str] = &["itch", "itchy", "itching", "pruritus"];
const BLEED_KEYWORDS: &[&str] = &["bleed", "bleeding", "blood"];
const GREW_KEYWORDS: &[&str] = &["grew", "growing", "enlarged", "bigger", "growth", "size increase"];
const ELEVATION_KEYWORDS: &[&str] = &["elevated", "raised", "bump", "elevation", "lump"];

/// Four independent symptom flags. Missing flags mean "not reported".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SymptomFlags {
    pub itch: bool,
    pub bleed: bool,
    pub grew: bool,
    pub elevation: bool,
}

impl SymptomFlags {
    pub fn new(itch: bool, bleed: bool, grew: bool, elevation: bool) -> Self {
        Self {
            itch,
            bleed,
            grew,
            elevation,
        }
    }

    /// Derive flags from a free-text description by keyword matching.
    pub fn from_description(description: &str) -> Self {
        let text = description.to_lowercase();
        let mentions = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

        Self {
            itch: mentions(ITCH_KEYWORDS),
            bleed: mentions(BLEED_KEYWORDS),
            grew: mentions(GREW_KEYWORDS),
            elevation: mentions(ELEVATION_KEYWORDS),
        }
    }

    /// Number of flags set (0-4)
    pub fn danger_count(&self) -> u8 {
        [self.itch, self.bleed, self.grew, self.elevation]
            .iter()
            .filter(|&&flag| flag)
            .count() as u8
    }

    /// Union of two flag sets
    pub fn union(self, other: SymptomFlags) -> Self {
        Self {
            itch: self.itch || other.itch,
            bleed: self.bleed || other.bleed,
            grew: self.grew || other.grew,
            elevation: self.elevation || other.elevation,
        }
    }
}
