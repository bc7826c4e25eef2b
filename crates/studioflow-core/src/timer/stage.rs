use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One phase of the creative workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idea,
    Script,
    Review,
    Record,
    Edit,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Idea,
        Stage::Script,
        Stage::Review,
        Stage::Record,
        Stage::Edit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idea => "idea",
            Stage::Script => "script",
            Stage::Review => "review",
            Stage::Record => "record",
            Stage::Edit => "edit",
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Stage::Idea
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idea" => Ok(Stage::Idea),
            "script" => Ok(Stage::Script),
            "review" => Ok(Stage::Review),
            "record" => Ok(Stage::Record),
            "edit" => Ok(Stage::Edit),
            _ => Err(ValidationError::InvalidStage(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Record".parse::<Stage>().unwrap(), Stage::Record);
        assert_eq!(" edit ".parse::<Stage>().unwrap(), Stage::Edit);
    }

    #[test]
    fn rejects_unknown_stage() {
        assert_eq!(
            "publish".parse::<Stage>(),
            Err(ValidationError::InvalidStage("publish".into()))
        );
    }

    #[test]
    fn display_matches_serde_name() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
        }
    }
}
