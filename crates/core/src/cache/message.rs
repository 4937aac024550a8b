use std::fmt;
use std::str::FromStr;

use super::CacheError;

const OP_EVICT: &str = "EVICT";
const OP_CLEAR: &str = "CLEAR";
const OP_CLEAR_ALL: &str = "CLEAR_ALL";

/// A cross-instance invalidation event.
///
/// The wire form is a single whitespace-delimited line:
///
/// ```text
/// EVICT <cacheName> <key>
/// CLEAR <cacheName>
/// CLEAR_ALL
/// ```
///
/// Opcodes are case-insensitive on the way in and upper-case on the way out.
/// Tokens past the expected arguments are ignored, so keys cannot contain
/// whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationMessage {
    Evict { cache: String, key: String },
    Clear { cache: String },
    ClearAll,
}

impl InvalidationMessage {
    pub fn evict(cache: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Evict {
            cache: cache.into(),
            key: key.into(),
        }
    }

    pub fn clear(cache: impl Into<String>) -> Self {
        Self::Clear {
            cache: cache.into(),
        }
    }

    /// Returns false when peers would parse the wire form into a different
    /// message, i.e. a cache name or key is empty or contains whitespace.
    pub fn is_wire_safe(&self) -> bool {
        fn token(s: &str) -> bool {
            !s.is_empty() && !s.contains(char::is_whitespace)
        }
        match self {
            Self::Evict { cache, key } => token(cache) && token(key),
            Self::Clear { cache } => token(cache),
            Self::ClearAll => true,
        }
    }

    /// Lower-case operation label, used for logs and metrics.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Evict { .. } => "evict",
            Self::Clear { .. } => "clear",
            Self::ClearAll => "clear_all",
        }
    }
}

impl fmt::Display for InvalidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evict { cache, key } => write!(f, "{} {} {}", OP_EVICT, cache, key),
            Self::Clear { cache } => write!(f, "{} {}", OP_CLEAR, cache),
            Self::ClearAll => f.write_str(OP_CLEAR_ALL),
        }
    }
}

impl FromStr for InvalidationMessage {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let Some(op) = parts.next() else {
            return Err(CacheError::MalformedMessage("empty message".to_string()));
        };

        match op.to_ascii_uppercase().as_str() {
            OP_CLEAR_ALL => Ok(Self::ClearAll),
            OP_CLEAR => match parts.next() {
                Some(cache) => Ok(Self::clear(cache)),
                None => Err(CacheError::MalformedMessage(format!(
                    "CLEAR requires <cacheName>: {}",
                    s.trim()
                ))),
            },
            OP_EVICT => match (parts.next(), parts.next()) {
                (Some(cache), Some(key)) => Ok(Self::evict(cache, key)),
                _ => Err(CacheError::MalformedMessage(format!(
                    "EVICT requires <cacheName> <key>: {}",
                    s.trim()
                ))),
            },
            other => Err(CacheError::MalformedMessage(format!(
                "unknown operation: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_evict() {
        let msg: InvalidationMessage = "EVICT price p1".parse().unwrap();
        assert_eq!(msg, InvalidationMessage::evict("price", "p1"));
    }

    #[test]
    fn test_parse_is_case_insensitive_and_trims() {
        let msg: InvalidationMessage = "  clear\tprice \n".parse().unwrap();
        assert_eq!(msg, InvalidationMessage::clear("price"));

        let msg: InvalidationMessage = "Clear_All".parse().unwrap();
        assert_eq!(msg, InvalidationMessage::ClearAll);
    }

    #[test]
    fn test_whitespace_in_key_is_not_wire_safe() {
        let msg = InvalidationMessage::evict("price", "a b");
        assert!(!msg.is_wire_safe());
        // Peers would evict "a" instead.
        assert_eq!(
            msg.to_string().parse::<InvalidationMessage>().unwrap(),
            InvalidationMessage::evict("price", "a")
        );

        assert!(!InvalidationMessage::evict("price", "").is_wire_safe());
        assert!(!InvalidationMessage::clear("price list").is_wire_safe());
        assert!(InvalidationMessage::evict("price", "a::b").is_wire_safe());
        assert!(InvalidationMessage::ClearAll.is_wire_safe());
    }

    #[test]
    fn test_parse_ignores_extra_tokens() {
        let msg: InvalidationMessage = "EVICT price p1 trailing".parse().unwrap();
        assert_eq!(msg, InvalidationMessage::evict("price", "p1"));
    }

    #[test]
    fn test_parse_rejects_missing_arguments() {
        assert!(matches!(
            "EVICT price".parse::<InvalidationMessage>(),
            Err(CacheError::MalformedMessage(_))
        ));
        assert!(matches!(
            "CLEAR".parse::<InvalidationMessage>(),
            Err(CacheError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_and_empty() {
        let err = "UNKNOWN price k1".parse::<InvalidationMessage>().unwrap_err();
        assert_eq!(
            err,
            CacheError::MalformedMessage("unknown operation: UNKNOWN".to_string())
        );
        assert!("".parse::<InvalidationMessage>().is_err());
        assert!("   ".parse::<InvalidationMessage>().is_err());
    }

    #[test]
    fn test_display_matches_wire_format() {
        assert_eq!(
            InvalidationMessage::evict("price", "p1").to_string(),
            "EVICT price p1"
        );
        assert_eq!(InvalidationMessage::clear("price").to_string(), "CLEAR price");
        assert_eq!(InvalidationMessage::ClearAll.to_string(), "CLEAR_ALL");
    }
}
