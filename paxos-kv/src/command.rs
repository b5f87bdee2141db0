//! Text command parsing.
//!
//! Turns lines like `put apple fruit` into a [`TextCommand`]. Used by the
//! legacy line protocol and by the `client` subcommand. Method names are
//! case-insensitive; keys and values are passed through untouched and
//! lowercased later by the replica.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextCommand {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown method type: {0}.")]
    UnknownMethod(String),
    #[error("Invalid input: {0}.")]
    InvalidInput(String),
}

impl TextCommand {
    /// Parses `<method> <key> [value]`, split on whitespace.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        Self::from_parts(&parts).map_err(|err| match err {
            ParseError::InvalidInput(_) => ParseError::InvalidInput(line.trim().to_string()),
            other => other,
        })
    }

    /// Parses already-split arguments, as handed over by the command line.
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Result<Self, ParseError> {
        let invalid = || {
            let joined: Vec<&str> = parts.iter().map(|part| part.as_ref()).collect();
            ParseError::InvalidInput(joined.join(" "))
        };

        let Some(method) = parts.first() else {
            return Err(invalid());
        };
        if parts.len() != 2 && parts.len() != 3 {
            return Err(invalid());
        }

        let arg = |i: usize| parts[i].as_ref().to_string();
        match (method.as_ref().to_lowercase().as_str(), parts.len()) {
            ("put", 3) => Ok(TextCommand::Put {
                key: arg(1),
                value: arg(2),
            }),
            ("get", 2) => Ok(TextCommand::Get { key: arg(1) }),
            ("delete", 2) => Ok(TextCommand::Delete { key: arg(1) }),
            ("put" | "get" | "delete", _) => Err(invalid()),
            (other, _) => Err(ParseError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_methods() {
        assert!(matches!(
            TextCommand::parse("PUT apple fruit"),
            Ok(TextCommand::Put { key, value }) if key == "apple" && value == "fruit"
        ));
        assert!(matches!(
            TextCommand::parse("pUt email 123@gmail.com"),
            Ok(TextCommand::Put { key, value }) if key == "email" && value == "123@gmail.com"
        ));
        assert!(matches!(
            TextCommand::parse("gEt orange"),
            Ok(TextCommand::Get { key }) if key == "orange"
        ));
        assert!(matches!(
            TextCommand::parse("delETe APPLE"),
            Ok(TextCommand::Delete { key }) if key == "APPLE"
        ));
    }

    #[test]
    fn test_wrong_arity() {
        assert_eq!(
            TextCommand::parse("put apple"),
            Err(ParseError::InvalidInput("put apple".into()))
        );
        assert!(TextCommand::parse("get a b").is_err());
        assert!(TextCommand::parse("delete").is_err());
        assert!(TextCommand::parse("").is_err());
        assert!(TextCommand::parse("   ").is_err());
        assert!(TextCommand::parse("put a b c").is_err());
    }

    #[test]
    fn test_unknown_method() {
        assert_eq!(
            TextCommand::parse("POST a b"),
            Err(ParseError::UnknownMethod("post".into()))
        );
    }

    #[test]
    fn test_from_parts() {
        let parts = vec!["put".to_string(), "k".to_string(), "v".to_string()];
        assert_eq!(
            TextCommand::from_parts(&parts),
            Ok(TextCommand::Put {
                key: "k".into(),
                value: "v".into()
            })
        );
    }
}
