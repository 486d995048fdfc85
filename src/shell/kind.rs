//! Session kinds and the interpreters they spawn.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which singleton a session occupies in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// The system shell.
    Plain,
    /// A privilege-escalation interpreter such as `su`.
    Elevated,
    /// A caller-chosen interpreter.
    Custom,
}

impl SessionKind {
    pub const ALL: [SessionKind; 3] = [Self::Plain, Self::Elevated, Self::Custom];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Elevated => "elevated",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An interpreter to spawn: program path plus fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellProgram {
    pub program: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ShellProgram {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ShellProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SessionKind::Elevated).unwrap(), "\"elevated\"");
        let kind: SessionKind = serde_json::from_str("\"custom\"").unwrap();
        assert_eq!(kind, SessionKind::Custom);
    }

    #[test]
    fn test_program_display() {
        assert_eq!(ShellProgram::new("/bin/sh").to_string(), "/bin/sh");
        assert_eq!(
            ShellProgram::with_args("sudo", ["-S", "sh"]).to_string(),
            "sudo -S sh"
        );
    }
}
