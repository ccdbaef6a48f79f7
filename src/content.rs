//! Content catalogs
//!
//! Read-only narrative pools consumed by the simulation engine. Templates use
//! `{victim}`, `{killer}` and `{player}` placeholders. A catalog can be loaded
//! from a JSON file; otherwise a small built-in catalog is used.

use crate::errors::{ConfigurationError, SurvivalResult};
use crate::types::{NarrativeCategory, ParticipantId};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCatalog {
    /// Ordered narrative stages; rounds past the end reuse the last one
    pub stages: Vec<String>,
    pub environmental: Vec<String>,
    pub self_inflicted: Vec<String>,
    pub sabotage: Vec<String>,
    pub revival: Vec<String>,
    pub flavor: Vec<String>,
    /// Image always shown on the first round
    pub locked_image: String,
    /// Pool drawn from (shuffled bag) on later rounds
    pub images: Vec<String>,
    /// Participant credited with an image use whenever that image is shown
    #[serde(default)]
    pub image_rewards: HashMap<String, ParticipantId>,
}

impl ContentCatalog {
    /// Load a catalog from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> SurvivalResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let catalog: ContentCatalog = serde_json::from_str(&content).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to parse catalog {}: {}", path.display(), e))
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> SurvivalResult<()> {
        let required = [
            ("stages", self.stages.is_empty()),
            ("environmental", self.environmental.is_empty()),
            ("self_inflicted", self.self_inflicted.is_empty()),
            ("sabotage", self.sabotage.is_empty()),
        ];
        for (field, empty) in required {
            if empty {
                return Err(ConfigurationError::MissingRequired(format!("content.{}", field)).into());
            }
        }
        Ok(())
    }

    pub fn templates(&self, category: NarrativeCategory) -> &[String] {
        match category {
            NarrativeCategory::Environmental => &self.environmental,
            NarrativeCategory::SelfInflicted => &self.self_inflicted,
            NarrativeCategory::Sabotage => &self.sabotage,
        }
    }

    pub fn has_revival_content(&self) -> bool {
        !self.revival.is_empty()
    }

    /// Stage for a zero-based round index, clamped to the last stage
    pub fn stage(&self, round_index: usize) -> &str {
        match self.stages.len() {
            0 => "",
            len => &self.stages[round_index.min(len - 1)],
        }
    }

    pub fn image_reward(&self, image: &str) -> Option<&ParticipantId> {
        self.image_rewards.get(image)
    }
}

impl Default for ContentCatalog {
    fn default() -> Self {
        let lines = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            stages: lines(&[
                "The gates lock behind everyone.",
                "Night falls over the arena.",
                "The storm closes in.",
                "Supplies are running out.",
                "Only the strongest remain.",
            ]),
            environmental: lines(&[
                "{victim} wandered into the fog and never came back.",
                "{victim} was swept away by a flash flood.",
                "{victim} stepped on a loose rock and fell off the cliff.",
            ]),
            self_inflicted: lines(&[
                "{victim} tried to eat an unidentified mushroom.",
                "{victim} tripped over their own trap.",
                "{victim} fell asleep on guard duty. Permanently.",
            ]),
            sabotage: lines(&[
                "{killer} pushed {victim} into the ravine.",
                "{killer} poisoned {victim}'s water supply.",
                "{killer} ambushed {victim} at the river crossing.",
            ]),
            revival: lines(&[
                "{player} crawled back out of the rubble!",
                "{player} was only pretending. They're back!",
            ]),
            flavor: lines(&[
                "{player} is building a suspiciously large fort.",
                "{player} found a map. It is upside down.",
                "{player} hums quietly while sharpening a stick.",
                "{player} has not blinked in an hour.",
            ]),
            locked_image: "stage-locked.png".to_string(),
            images: lines(&["stage-forest.png", "stage-cave.png", "stage-ruins.png", "stage-storm.png"]),
            image_rewards: HashMap::new(),
        }
    }
}

/// Fill a narrative template
pub fn render_template(template: &str, victim: Option<&str>, killer: Option<&str>, player: Option<&str>) -> String {
    let mut out = template.to_string();
    if let Some(victim) = victim {
        out = out.replace("{victim}", victim);
    }
    if let Some(killer) = killer {
        out = out.replace("{killer}", killer);
    }
    if let Some(player) = player {
        out = out.replace("{player}", player);
    }
    out
}

/// Shuffled bag of stage images; every image is drawn once before any repeats
#[derive(Debug, Clone)]
pub struct ImageBag {
    pool: Vec<String>,
    remaining: Vec<String>,
}

impl ImageBag {
    pub fn new(pool: Vec<String>) -> Self {
        Self {
            pool,
            remaining: Vec::new(),
        }
    }

    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<String> {
        if self.remaining.is_empty() {
            if self.pool.is_empty() {
                return None;
            }
            self.remaining = self.pool.clone();
            self.remaining.shuffle(rng);
        }
        self.remaining.pop()
    }
}
