//! Typed sparse patches per record kind.
//!
//! Each `Some` field overwrites the matching JSON key of a
//! [`DefinitionRecord`]; `None` leaves it untouched.

use serde::{Deserialize, Serialize};

use crate::{
    record::{DefinitionRecord, StageWaves},
    types::Kind,
};

/// Sparse patch for character records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CharacterPatch {
    /// Display name.
    pub name: Option<String>,
    /// Description text.
    pub description: Option<String>,
    /// Rarity tier.
    pub rarity: Option<i64>,
    /// `stats.hp`.
    pub hp: Option<f64>,
    /// `stats.attack`.
    pub attack: Option<f64>,
    /// `stats.defense`.
    pub defense: Option<f64>,
    /// `stats.moveSpeed`.
    pub move_speed: Option<f64>,
    /// `stats.attackInterval`.
    pub attack_interval: Option<f64>,
}

impl CharacterPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut DefinitionRecord) {
        if let Some(v) = &self.name {
            rec.set_field("name", v.clone());
        }
        if let Some(v) = &self.description {
            rec.set_field("description", v.clone());
        }
        if let Some(v) = self.rarity {
            rec.set_field("rarity", v);
        }
        if let Some(v) = self.hp {
            rec.set_nested("stats", "hp", v);
        }
        if let Some(v) = self.attack {
            rec.set_nested("stats", "attack", v);
        }
        if let Some(v) = self.defense {
            rec.set_nested("stats", "defense", v);
        }
        if let Some(v) = self.move_speed {
            rec.set_nested("stats", "moveSpeed", v);
        }
        if let Some(v) = self.attack_interval {
            rec.set_nested("stats", "attackInterval", v);
        }
    }
}

/// Sparse patch for stage records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StagePatch {
    /// Display name.
    pub name: Option<String>,
    /// Description text.
    pub description: Option<String>,
    /// Background image path.
    pub background_path: Option<String>,
    /// Allied base health.
    pub base_health: Option<f64>,
    /// Enemy base health.
    pub enemy_base_health: Option<f64>,
    /// Time limit in seconds (0 = unlimited).
    pub time_limit: Option<f64>,
    /// Full replacement of the ordered wave list.
    pub waves: Option<StageWaves>,
}

impl StagePatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut DefinitionRecord) -> Result<(), serde_json::Error> {
        if let Some(v) = &self.name {
            rec.set_field("name", v.clone());
        }
        if let Some(v) = &self.description {
            rec.set_field("description", v.clone());
        }
        if let Some(v) = &self.background_path {
            rec.set_field("backgroundPath", v.clone());
        }
        if let Some(v) = self.base_health {
            rec.set_field("baseHealth", v);
        }
        if let Some(v) = self.enemy_base_health {
            rec.set_field("enemyBaseHealth", v);
        }
        if let Some(v) = self.time_limit {
            rec.set_field("timeLimit", v);
        }
        if let Some(waves) = &self.waves {
            rec.set_waves(waves)?;
        }
        Ok(())
    }
}

/// Sparse patch for UI layout records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UiLayoutPatch {
    /// Display name.
    pub name: Option<String>,
    /// Design-time width.
    pub base_width: Option<i64>,
    /// Design-time height.
    pub base_height: Option<i64>,
}

impl UiLayoutPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut DefinitionRecord) {
        if let Some(v) = &self.name {
            rec.set_field("name", v.clone());
        }
        if let Some(v) = self.base_width {
            rec.set_field("baseWidth", v);
        }
        if let Some(v) = self.base_height {
            rec.set_field("baseHeight", v);
        }
    }
}

/// Sparse patch for skill records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SkillPatch {
    /// Display name.
    pub name: Option<String>,
    /// Description text.
    pub description: Option<String>,
    /// Cooldown in seconds.
    pub cooldown: Option<f64>,
    /// Activation probability in `0.0..=1.0`.
    pub activation_chance: Option<f64>,
    /// Maximum number of targets.
    pub max_targets: Option<i64>,
    /// Targeting mode (`self`, `single_enemy`, `area`, ...).
    pub target_type: Option<String>,
}

impl SkillPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut DefinitionRecord) {
        if let Some(v) = &self.name {
            rec.set_field("name", v.clone());
        }
        if let Some(v) = &self.description {
            rec.set_field("description", v.clone());
        }
        if let Some(v) = self.cooldown {
            rec.set_field("cooldown", v);
        }
        if let Some(v) = self.activation_chance {
            rec.set_field("activationChance", v.clamp(0.0, 1.0));
        }
        if let Some(v) = self.max_targets {
            rec.set_field("maxTargets", v);
        }
        if let Some(v) = &self.target_type {
            rec.set_field("targetType", v.clone());
        }
    }
}

/// Sparse patch for sound records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SoundPatch {
    /// Display name.
    pub name: Option<String>,
    /// Playback volume.
    pub volume: Option<f64>,
    /// Playback pitch.
    pub pitch: Option<f64>,
    /// Loop flag.
    pub looping: Option<bool>,
    /// Mixer group.
    pub group: Option<String>,
}

impl SoundPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut DefinitionRecord) {
        if let Some(v) = &self.name {
            rec.set_field("name", v.clone());
        }
        if let Some(v) = self.volume {
            rec.set_field("volume", v);
        }
        if let Some(v) = self.pitch {
            rec.set_field("pitch", v);
        }
        if let Some(v) = self.looping {
            rec.set_field("loop", v);
        }
        if let Some(v) = &self.group {
            rec.set_field("group", v.clone());
        }
    }
}

/// Sparse patch for effect records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EffectPatch {
    /// Display name.
    pub name: Option<String>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// Particle cap.
    pub max_particles: Option<i64>,
}

impl EffectPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut DefinitionRecord) {
        if let Some(v) = &self.name {
            rec.set_field("name", v.clone());
        }
        if let Some(v) = self.duration {
            rec.set_field("duration", v);
        }
        if let Some(v) = self.max_particles {
            rec.set_field("maxParticles", v);
        }
    }
}

/// Patch tagged with the kind it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordPatch {
    /// Character fields.
    Character(CharacterPatch),
    /// Stage fields.
    Stage(StagePatch),
    /// UI layout fields.
    UiLayout(UiLayoutPatch),
    /// Skill fields.
    Skill(SkillPatch),
    /// Sound fields.
    Sound(SoundPatch),
    /// Effect fields.
    Effect(EffectPatch),
}

impl RecordPatch {
    /// Kind this patch targets.
    pub fn kind(&self) -> Kind {
        match self {
            RecordPatch::Character(_) => Kind::Character,
            RecordPatch::Stage(_) => Kind::Stage,
            RecordPatch::UiLayout(_) => Kind::UiLayout,
            RecordPatch::Skill(_) => Kind::Skill,
            RecordPatch::Sound(_) => Kind::Sound,
            RecordPatch::Effect(_) => Kind::Effect,
        }
    }

    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        match self {
            RecordPatch::Character(p) => p.is_empty(),
            RecordPatch::Stage(p) => p.is_empty(),
            RecordPatch::UiLayout(p) => p.is_empty(),
            RecordPatch::Skill(p) => p.is_empty(),
            RecordPatch::Sound(p) => p.is_empty(),
            RecordPatch::Effect(p) => p.is_empty(),
        }
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut DefinitionRecord) -> Result<(), serde_json::Error> {
        match self {
            RecordPatch::Character(p) => p.apply_to(rec),
            RecordPatch::Stage(p) => p.apply_to(rec)?,
            RecordPatch::UiLayout(p) => p.apply_to(rec),
            RecordPatch::Skill(p) => p.apply_to(rec),
            RecordPatch::Sound(p) => p.apply_to(rec),
            RecordPatch::Effect(p) => p.apply_to(rec),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn character_patch_writes_nested_stats() {
        let mut rec = DefinitionRecord::from_value(json!({"id": "c", "stats": {"hp": 100.0}})).unwrap();
        CharacterPatch {
            attack: Some(20.0),
            ..CharacterPatch::default()
        }
        .apply_to(&mut rec);
        assert_eq!(
            rec.into_value(),
            json!({"id": "c", "stats": {"hp": 100.0, "attack": 20.0}})
        );
    }

    #[test]
    fn empty_patch_is_noop() {
        let patch = RecordPatch::Sound(SoundPatch::default());
        assert!(patch.is_empty());
        let mut rec = DefinitionRecord::with_id("s");
        let before = rec.clone();
        patch.apply_to(&mut rec).unwrap();
        assert_eq!(rec, before);
    }
}
