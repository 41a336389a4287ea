//! Maps free-form model identifiers onto the tiers the engine understands.

use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelTier {
    Opus,
    Haiku,
    #[default]
    Sonnet,
}

impl ModelTier {
    /// Case-sensitive substring match; anything unrecognised is sonnet.
    pub fn from_requested(model: Option<&str>) -> Self {
        match model {
            Some(m) if m.contains("opus") => ModelTier::Opus,
            Some(m) if m.contains("haiku") => ModelTier::Haiku,
            _ => ModelTier::Sonnet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Opus => "opus",
            ModelTier::Haiku => "haiku",
            ModelTier::Sonnet => "sonnet",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
