use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Important,
    Junk,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Important, Label::Junk];

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Important => "important",
            Label::Junk => "junk",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "important" | "i" => Ok(Label::Important),
            "junk" | "j" => Ok(Label::Junk),
            other => Err(ValidationError::UnknownLabel(other.to_string())),
        }
    }
}
