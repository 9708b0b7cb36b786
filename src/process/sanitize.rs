//! Argument and voice-name validation

use crate::error::ArgumentViolation;

/// Longest argument accepted for any executable
pub const MAX_ARGUMENT_LEN: usize = 1000;

/// Longest voice name accepted
pub const MAX_VOICE_LEN: usize = 100;

/// Characters never allowed in an argument
const FORBIDDEN_CHARS: &[char] = &[';', '&', '|', '`', '$', '<', '>'];

/// Characters additionally refused in a voice name
const FORBIDDEN_VOICE_CHARS: &[char] = &['"', '\''];

/// Check a single argument against the character and length rules
///
/// Parentheses, spaces and path separators are allowed; shell
/// metacharacters and every control character (including NUL, newline and
/// carriage return) are not.
pub fn validate_argument(arg: &str) -> Result<(), ArgumentViolation> {
    if let Some(c) = arg
        .chars()
        .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control())
    {
        return Err(ArgumentViolation::ForbiddenCharacter(c));
    }

    let len = arg.chars().count();
    if len > MAX_ARGUMENT_LEN {
        return Err(ArgumentViolation::TooLong {
            len,
            max: MAX_ARGUMENT_LEN,
        });
    }

    Ok(())
}

/// A validated synthesis voice name
///
/// Enhanced voices such as `Zoe (Enhanced)` are accepted. Anything that
/// could be mistaken for a flag, a path or a quoted fragment is not.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Voice(String);

impl Voice {
    /// Validate a voice name
    pub fn parse(name: &str) -> Result<Self, ArgumentViolation> {
        if name.trim().is_empty() {
            return Err(ArgumentViolation::Empty);
        }

        validate_argument(name)?;

        if let Some(c) = name.chars().find(|c| FORBIDDEN_VOICE_CHARS.contains(c)) {
            return Err(ArgumentViolation::ForbiddenCharacter(c));
        }

        let len = name.chars().count();
        if len > MAX_VOICE_LEN {
            return Err(ArgumentViolation::TooLong {
                len,
                max: MAX_VOICE_LEN,
            });
        }

        if name.contains("..") || name.contains('/') || name.contains('\\') {
            return Err(ArgumentViolation::PathComponent);
        }

        if name.starts_with('-') {
            return Err(ArgumentViolation::DisallowedFlag(name.to_string()));
        }

        if name.matches('(').count() != name.matches(')').count() {
            return Err(ArgumentViolation::UnbalancedParentheses);
        }

        Ok(Self(name.to_string()))
    }

    /// The voice name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Voice {
    type Err = ArgumentViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
