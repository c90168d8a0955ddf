//! Diagnostics reported by fields and models about their own declaration.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// One problem found by a `check()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckMessage {
    pub level: Level,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// What the message is about, such as `app.Record.data`.
    pub obj: String,
    /// A stable identifier, such as `jsl_field.E001`.
    pub id: String,
}

impl CheckMessage {
    pub fn error(msg: impl Into<String>, obj: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            msg: msg.into(),
            hint: None,
            obj: obj.into(),
            id: id.into(),
        }
    }

    pub fn warning(msg: impl Into<String>, obj: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            ..Self::error(msg, obj, id)
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_serious(&self) -> bool {
        self.level >= Level::Error
    }
}

impl fmt::Display for CheckMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ({}) {}", self.obj, self.id, self.msg)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n\tHINT: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_hint() {
        let msg = CheckMessage::error("bad schema", "app.Record.data", "jsl_field.E001")
            .with_hint("define the schema first");
        assert_eq!(
            msg.to_string(),
            "app.Record.data: (jsl_field.E001) bad schema\n\tHINT: define the schema first"
        );
        assert!(msg.is_serious());
        assert!(!CheckMessage::warning("meh", "x", "y").is_serious());
    }
}
