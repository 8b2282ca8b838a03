use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag identifying a mini-game type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameType {
    Trivia,
    PriceGuess,
}

impl GameType {
    pub const ALL: &[GameType] = &[GameType::Trivia, GameType::PriceGuess];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trivia => "trivia",
            Self::PriceGuess => "price-guess",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|g| g.as_str() == s)
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_roundtrip_through_strings() {
        for game in GameType::ALL {
            assert_eq!(GameType::from_str_opt(game.as_str()), Some(*game));
            let json = serde_json::to_string(game).unwrap();
            assert_eq!(json, format!("\"{game}\""));
        }
        assert_eq!(GameType::from_str_opt("golf"), None);
    }
}
