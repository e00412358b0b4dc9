//! Transcoder gate: pick the outgoing audio encoding.
//!
//! The recorder capability is whatever the capture layer can report. When it
//! can't report anything the gate answers `None` and the caller falls back to
//! [`DEFAULT_MIME_TYPE`], which the gateway always understands.

/// Encoding the gateway assumes when the client doesn't say otherwise.
pub const DEFAULT_MIME_TYPE: &str = "audio/webm";

/// Preference order used when the configuration doesn't override it.
pub const DEFAULT_MIME_PREFERENCES: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
    "audio/mp4",
];

/// Answers whether the local recorder can produce a given encoding.
pub trait RecorderCapability {
    fn is_type_supported(&self, mime_type: &str) -> bool;
}

impl<F> RecorderCapability for F
where
    F: Fn(&str) -> bool,
{
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self(mime_type)
    }
}

/// Capability backed by a fixed list, for capture layers that know up front
/// what they emit (e.g. a pre-encoded file source).
#[derive(Debug, Clone, Default)]
pub struct StaticCapability {
    supported: Vec<String>,
}

impl StaticCapability {
    pub fn new<I, S>(supported: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported: supported.into_iter().map(Into::into).collect(),
        }
    }
}

impl RecorderCapability for StaticCapability {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported
            .iter()
            .any(|s| s.eq_ignore_ascii_case(mime_type.trim()))
    }
}

/// First preference the capability accepts. `None` when no capability is
/// available or nothing in the list is supported.
pub fn select_mime_type<S: AsRef<str>>(
    preferences: &[S],
    capability: Option<&dyn RecorderCapability>,
) -> Option<String> {
    let capability = capability?;
    preferences
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .find(|p| capability.is_type_supported(p))
        .map(str::to_string)
}

/// [`select_mime_type`] with the default-encoding fallback applied.
pub fn negotiate_mime_type<S: AsRef<str>>(
    preferences: &[S],
    capability: Option<&dyn RecorderCapability>,
) -> String {
    select_mime_type(preferences, capability).unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}

/// File suffix the gateway associates with an encoding.
pub fn file_suffix(mime_type: &str) -> &'static str {
    let base = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "audio/ogg" => "ogg",
        "audio/mp4" => "m4a",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        _ => "webm",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_supported_wins() {
        let cap = StaticCapability::new(["audio/ogg;codecs=opus", "audio/webm"]);
        let picked = select_mime_type(DEFAULT_MIME_PREFERENCES, Some(&cap));
        assert_eq!(picked.as_deref(), Some("audio/webm"));
    }

    #[test]
    fn missing_capability_is_none() {
        assert_eq!(select_mime_type(DEFAULT_MIME_PREFERENCES, None), None);
        assert_eq!(
            negotiate_mime_type(DEFAULT_MIME_PREFERENCES, None),
            DEFAULT_MIME_TYPE
        );
    }

    #[test]
    fn nothing_supported_degrades_to_default() {
        let cap = |_: &str| false;
        assert_eq!(select_mime_type(&["audio/flac"], Some(&cap)), None);
        assert_eq!(negotiate_mime_type(&["audio/flac"], Some(&cap)), "audio/webm");
    }

    #[test]
    fn closure_capability() {
        let cap = |m: &str| m.starts_with("audio/mp4");
        assert_eq!(
            select_mime_type(DEFAULT_MIME_PREFERENCES, Some(&cap)).as_deref(),
            Some("audio/mp4")
        );
    }

    #[test]
    fn suffixes() {
        assert_eq!(file_suffix("audio/webm;codecs=opus"), "webm");
        assert_eq!(file_suffix("audio/mpeg"), "mp3");
        assert_eq!(file_suffix("audio/ogg"), "ogg");
        assert_eq!(file_suffix("application/unknown"), "webm");
    }
}
