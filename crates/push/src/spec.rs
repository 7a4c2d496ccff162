//! Parsing of `target:channel` push specs.

use crate::error::PushError;
use crate::types::BuildTarget;

/// Splits a spec into `(target, channel)`.
///
/// The spec is lower-cased first. It must hold exactly one `:` with
/// non-empty text on both sides.
pub fn parse_spec(spec: &str) -> Result<(String, String), PushError> {
    let spec = spec.to_lowercase();
    let tokens: Vec<&str> = spec.split(':').collect();

    match tokens.as_slice() {
        [_] => Err(PushError::Spec(format!(
            "{spec}, missing channel (examples: {spec}:windows-32-beta, {spec}:linux-64)"
        ))),
        [target, channel] if !target.is_empty() && !channel.is_empty() => {
            Ok((target.to_string(), channel.to_string()))
        }
        _ => Err(PushError::Spec(format!(
            "{spec}, expected something of the form user/page:channel"
        ))),
    }
}

impl BuildTarget {
    pub fn parse(spec: &str, user_version: &str) -> Result<Self, PushError> {
        let (target, channel) = parse_spec(spec)?;
        Ok(Self {
            target,
            channel,
            user_version: user_version.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_and_channel() {
        let (target, channel) = parse_spec("user/game:linux-64").unwrap();
        assert_eq!(target, "user/game");
        assert_eq!(channel, "linux-64");
    }

    #[test]
    fn lowercases_input() {
        let (target, channel) = parse_spec("User/Game:Windows-Beta").unwrap();
        assert_eq!(target, "user/game");
        assert_eq!(channel, "windows-beta");
    }

    #[test]
    fn missing_channel_shows_examples() {
        let msg = parse_spec("user/game").unwrap_err().to_string();
        assert!(msg.contains("missing channel"), "{msg}");
        assert!(msg.contains("user/game:windows-32-beta"), "{msg}");
        assert!(msg.contains("user/game:linux-64"), "{msg}");
    }

    #[test]
    fn too_many_tokens_is_generic() {
        let msg = parse_spec("a:b:c").unwrap_err().to_string();
        assert!(msg.contains("expected something of the form user/page:channel"));
        assert!(!msg.contains("missing channel"));
    }

    #[test]
    fn empty_tokens_are_rejected() {
        for spec in [":linux", "user/game:", ":", ""] {
            let err = parse_spec(spec).unwrap_err();
            assert!(matches!(err, PushError::Spec(_)), "{spec:?} should fail");
        }
    }

    #[test]
    fn build_target_keeps_version() {
        let target = BuildTarget::parse("user/game:osx", "1.4.2").unwrap();
        assert_eq!(target.user_version, "1.4.2");
        assert_eq!(target.channel, "osx");
    }
}
