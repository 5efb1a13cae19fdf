//! Hazard dictionary: known mispronunciation-prone terms
//!
//! A small TOML file mapping surface forms to their trusted readings. The
//! pipeline consults it before any cross-source comparison (a listed term is
//! corrected even when every extractor agrees on the wrong reading), and the
//! offline aggregator grows it from accumulated patch decisions.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::Score;

/// Confidence assigned to a term on its first confirmed correction.
const INITIAL_CONFIDENCE: f32 = 0.6;
/// Confidence gained per additional confirmation.
const CONFIRMATION_STEP: f32 = 0.1;
/// Aggregated confidence never exceeds this; certainty requires a human.
const CONFIDENCE_CEILING: f32 = 0.95;

/// One dictionary entry. Entries never expire; a term that stopped being
/// mispronounced simply stops matching anything risky.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardEntry {
    /// Trusted reading in katakana.
    pub corrected_reading: String,
    pub confidence: Score,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// The persisted dictionary, keyed by surface form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardDictionary {
    pub version: u32,
    #[serde(default)]
    pub terms: BTreeMap<String, HazardEntry>,
}

impl Default for HazardDictionary {
    fn default() -> Self {
        HazardDictionary { version: 1, terms: BTreeMap::new() }
    }
}

impl HazardDictionary {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let dict: HazardDictionary = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("hazard dictionary {}: {e}", path.display())))?;
        info!(path = %path.display(), terms = dict.terms.len(), "loaded hazard dictionary");
        Ok(dict)
    }

    /// Load when a path is configured and the file exists; otherwise start
    /// empty. A configured-but-missing file is worth a warning, not a
    /// failure, so first runs work before any dictionary has been built.
    pub fn load_or_empty(path: Option<&Path>) -> Self {
        match path {
            None => HazardDictionary::default(),
            Some(p) if !p.exists() => {
                warn!(path = %p.display(), "hazard dictionary not found, starting empty");
                HazardDictionary::default()
            }
            Some(p) => match Self::load(p) {
                Ok(dict) => dict,
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "hazard dictionary unreadable, starting empty");
                    HazardDictionary::default()
                }
            },
        }
    }

    /// Write the dictionary as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("serialize hazard dictionary: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn lookup(&self, surface: &str) -> Option<&HazardEntry> {
        self.terms.get(surface)
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Upsert a term from aggregated patch decisions.
    ///
    /// `confirmations` is the number of times this surface was corrected to
    /// `reading` across audit logs. Confidence starts at 0.6 and grows 0.1
    /// per additional confirmation, capped at 0.95. Merging an existing
    /// entry keeps the higher confidence and the later `last_seen`; a
    /// conflicting reading replaces the old one only when it arrives with
    /// strictly higher confidence.
    pub fn absorb_confirmations(
        &mut self,
        surface: &str,
        reading: &str,
        confirmations: usize,
        last_seen: DateTime<Utc>,
    ) {
        if confirmations == 0 {
            return;
        }
        let gained = INITIAL_CONFIDENCE + CONFIRMATION_STEP * (confirmations as f32 - 1.0);
        let confidence = Score::new(gained.min(CONFIDENCE_CEILING));

        match self.terms.get_mut(surface) {
            Some(entry) if entry.corrected_reading == reading => {
                entry.confidence = entry.confidence.max(confidence);
                if last_seen > entry.last_seen {
                    entry.last_seen = last_seen;
                }
            }
            Some(entry) => {
                if confidence > entry.confidence {
                    info!(
                        surface,
                        old_reading = %entry.corrected_reading,
                        new_reading = %reading,
                        "hazard reading superseded"
                    );
                    entry.corrected_reading = reading.to_string();
                    entry.confidence = confidence;
                    entry.last_seen = last_seen;
                }
            }
            None => {
                self.terms.insert(
                    surface.to_string(),
                    HazardEntry {
                        corrected_reading: reading.to_string(),
                        confidence,
                        notes: None,
                        last_seen,
                    },
                );
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
