//! Turns the presentation host's `/view/text.json` body into a semantic signal.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),
    #[error("payload has unexpected shape: {0}")]
    Unexpected(&'static str),
}

/// What the presentation host is projecting right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Verse,
    Music,
    Other,
}

impl Classification {
    /// Monitored layers must be hidden. Lyrics take the screen just like a verse.
    pub fn hides_layers(self) -> bool {
        matches!(self, Self::Verse | Self::Music)
    }

    /// Monitoring should switch itself off. Independent of [`hides_layers`].
    ///
    /// [`hides_layers`]: Classification::hides_layers
    pub fn requests_deactivation(self, disable_on_music: bool) -> bool {
        disable_on_music && self == Self::Music
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Verse => "verse",
            Self::Music => "music",
            Self::Other => "other",
        }
    }
}

pub fn classify(raw: &[u8]) -> Result<Classification, ParseError> {
    let doc: Value =
        serde_json::from_slice(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let root = doc
        .as_object()
        .ok_or(ParseError::Unexpected("root is not an object"))?;
    let map = root
        .get("map")
        .and_then(Value::as_object)
        .ok_or(ParseError::Unexpected("missing `map` object"))?;

    let Some(kind) = map.get("type").and_then(Value::as_str) else {
        return Ok(Classification::Other);
    };
    debug!("presentation type: {:?}", kind);

    if kind.eq_ignore_ascii_case("BIBLE") {
        Ok(Classification::Verse)
    } else if kind.eq_ignore_ascii_case("MUSIC") {
        Ok(Classification::Music)
    } else {
        Ok(Classification::Other)
    }
}

/// [`classify`], failing open: bad data never toggles anything.
pub fn classify_or_other(raw: &[u8]) -> Classification {
    classify(raw).unwrap_or_else(|e| {
        warn!("Ignoring presentation payload: {}", e);
        Classification::Other
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bible_and_music_case_insensitive() {
        assert_eq!(
            classify(br#"{"map":{"type":"BIBLE"}}"#),
            Ok(Classification::Verse)
        );
        assert_eq!(
            classify(br#"{"map":{"type":"bible","text":"John 3:16"}}"#),
            Ok(Classification::Verse)
        );
        assert_eq!(
            classify(br#"{"map":{"type":"Music"}}"#),
            Ok(Classification::Music)
        );
    }

    #[test]
    fn other_types_and_missing_type() {
        assert_eq!(
            classify(br#"{"map":{"type":"TEXT"}}"#),
            Ok(Classification::Other)
        );
        assert_eq!(
            classify(br#"{"map":{"type":"BIBLE "}}"#),
            Ok(Classification::Other)
        );
        assert_eq!(classify(br#"{"map":{}}"#), Ok(Classification::Other));
        assert_eq!(
            classify(br#"{"map":{"type":7}}"#),
            Ok(Classification::Other)
        );
    }

    #[test]
    fn malformed_and_unexpected() {
        assert!(matches!(classify(b""), Err(ParseError::Malformed(_))));
        assert!(matches!(
            classify(b"<html>nope</html>"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(classify(b"{}"), Err(ParseError::Unexpected(_))));
        assert!(matches!(classify(b"[1,2]"), Err(ParseError::Unexpected(_))));
        assert!(matches!(
            classify(br#"{"map":"BIBLE"}"#),
            Err(ParseError::Unexpected(_))
        ));
    }

    #[test]
    fn bad_payloads_fail_open() {
        for raw in [&b""[..], b"{}", b"\xff\xfe", b"null"] {
            assert_eq!(classify_or_other(raw), Classification::Other);
        }
    }

    #[test]
    fn derived_effects_are_independent() {
        assert!(Classification::Verse.hides_layers());
        assert!(Classification::Music.hides_layers());
        assert!(!Classification::Other.hides_layers());

        assert!(Classification::Music.requests_deactivation(true));
        assert!(!Classification::Music.requests_deactivation(false));
        assert!(!Classification::Verse.requests_deactivation(true));
        assert!(!Classification::Other.requests_deactivation(true));
    }
}
