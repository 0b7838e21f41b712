//! Batch command kinds.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Create,
    Update,
    Delete,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Create => "create",
            CommandKind::Update => "update",
            CommandKind::Delete => "delete",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(CommandKind::Create),
            "update" => Ok(CommandKind::Update),
            "delete" => Ok(CommandKind::Delete),
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands_only() {
        assert_eq!("create".parse::<CommandKind>(), Ok(CommandKind::Create));
        assert_eq!("delete".parse::<CommandKind>(), Ok(CommandKind::Delete));
        assert!("Create".parse::<CommandKind>().is_err());
        assert!("upsert".parse::<CommandKind>().is_err());
    }
}
