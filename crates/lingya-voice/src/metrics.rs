//! Rolling energy / pitch / emotion state for the external visualizer.
//!
//! Samples are partial: a field that is absent from a sample keeps its
//! previous value. Emotion can also be derived from the tag list attached to
//! an assistant reply.

use crate::protocol::MetricsPayload;
use serde::{Deserialize, Serialize};

/// Label reported when no emotion has ever been observed.
pub const NEUTRAL_EMOTION: &str = "neutral";

/// Emotion categories derivable from reply tags, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Angry,
    Sad,
    Happy,
    Soft,
    Curious,
}

impl Emotion {
    pub fn label(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Sad => "sad",
            Emotion::Happy => "happy",
            Emotion::Soft => "soft",
            Emotion::Curious => "curious",
        }
    }
}

/// First category wins.
const TAG_TABLE: &[(Emotion, &[&str])] = &[
    (Emotion::Angry, &["angry", "furious", "power"]),
    (Emotion::Sad, &["cry", "sad", "tear", "sigh"]),
    (Emotion::Happy, &["happy", "excited", "laugh", "cheer"]),
    (Emotion::Soft, &["soft", "whisper", "gentle"]),
    (Emotion::Curious, &["curious", "wonder"]),
];

/// Match reply tags against the keyword table. A tag matches a keyword when
/// it contains it, case-insensitively.
pub fn emotion_from_tags<S: AsRef<str>>(tags: &[S]) -> Option<Emotion> {
    let lowered: Vec<String> = tags.iter().map(|t| t.as_ref().to_lowercase()).collect();
    TAG_TABLE
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|k| lowered.iter().any(|tag| tag.contains(k)))
        })
        .map(|(emotion, _)| *emotion)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyMetrics {
    pub avg_energy: f64,
    pub peak_energy: f64,
    pub emotion: Option<String>,
    pub pitch_hz: Option<f64>,
    pub emotion_confidence: Option<f64>,
    /// Speech-to-text latency of the last transcript, when reported.
    pub stt_latency_ms: Option<u64>,
}

#[derive(Debug, Default)]
pub struct MetricsAggregator {
    state: EnergyMetrics,
    tags: Vec<String>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &EnergyMetrics {
        &self.state
    }

    /// Tags of the most recent assistant reply.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn emotion_label(&self) -> &str {
        self.state.emotion.as_deref().unwrap_or(NEUTRAL_EMOTION)
    }

    /// Overwrite only the fields present in `sample`.
    pub fn merge(&mut self, sample: &MetricsPayload) -> &EnergyMetrics {
        if let Some(avg) = sample.avg_energy {
            self.state.avg_energy = avg;
        }
        if let Some(peak) = sample.peak_energy {
            self.state.peak_energy = peak;
        }
        if let Some(emotion) = sample.emotion_estimate.as_deref() {
            let emotion = emotion.trim();
            if !emotion.is_empty() {
                self.state.emotion = Some(emotion.to_lowercase());
            }
        }
        if let Some(pitch) = sample.pitch_hz {
            self.state.pitch_hz = Some(pitch);
        }
        if let Some(confidence) = sample.emotion_confidence {
            self.state.emotion_confidence = Some(confidence);
        }
        if let Some(latency) = sample.latency_ms {
            self.state.stt_latency_ms = Some(latency);
        }
        &self.state
    }

    /// Derive emotion from reply tags. No match keeps the previous emotion.
    pub fn apply_tags(&mut self, tags: &[String]) -> Option<Emotion> {
        self.tags = tags.to_vec();
        let derived = emotion_from_tags(tags);
        if let Some(emotion) = derived {
            self.state.emotion = Some(emotion.label().to_string());
        }
        derived
    }

    /// A reply started playing: raise the visual energy to a floor.
    pub fn pulse_for_playback(&mut self) {
        self.state.avg_energy = self.state.avg_energy.max(55.0);
        self.state.peak_energy = self.state.peak_energy.max(75.0);
    }

    /// Playback ended or failed: let the energy fall back.
    pub fn decay_after_playback(&mut self) {
        self.state.avg_energy *= 0.6;
        self.state.peak_energy *= 0.6;
    }

    /// Energy the visualizer should use for the speaking layer.
    pub fn speaking_energy(&self, is_speaking: bool) -> f64 {
        fallback_energy(self.state.avg_energy, is_speaking, 45.0)
    }

    /// Energy the visualizer should use for the playback layer.
    pub fn playback_energy(&self, is_speaking: bool) -> f64 {
        fallback_energy(self.state.peak_energy, is_speaking, 40.0)
    }
}

fn fallback_energy(value: f64, is_speaking: bool, speaking_floor: f64) -> f64 {
    if value > 0.0 {
        value
    } else if is_speaking {
        speaking_floor
    } else {
        5.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_sample_keeps_other_fields() {
        let mut agg = MetricsAggregator::new();
        agg.merge(&MetricsPayload {
            avg_energy: Some(10.0),
            peak_energy: Some(30.0),
            emotion_estimate: Some("Calm".into()),
            pitch_hz: Some(180.0),
            ..Default::default()
        });
        let state = agg.merge(&MetricsPayload {
            avg_energy: Some(22.0),
            ..Default::default()
        });
        assert_eq!(state.avg_energy, 22.0);
        assert_eq!(state.peak_energy, 30.0);
        assert_eq!(state.emotion.as_deref(), Some("calm"));
        assert_eq!(state.pitch_hz, Some(180.0));
    }

    #[test]
    fn tag_priority_prefers_anger() {
        assert_eq!(emotion_from_tags(&["furious", "power"]), Some(Emotion::Angry));
        assert_eq!(emotion_from_tags(&["laughing", "sighs"]), Some(Emotion::Sad));
        assert_eq!(emotion_from_tags(&["Whispering"]), Some(Emotion::Soft));
        assert_eq!(emotion_from_tags(&["pause"]), None);
        assert_eq!(emotion_from_tags::<&str>(&[]), None);
    }

    #[test]
    fn tags_override_stale_emotion() {
        let mut agg = MetricsAggregator::new();
        agg.merge(&MetricsPayload {
            emotion_estimate: Some("happy".into()),
            ..Default::default()
        });
        let derived = agg.apply_tags(&["furious".to_string(), "power".to_string()]);
        assert_eq!(derived, Some(Emotion::Angry));
        assert_eq!(agg.emotion_label(), "angry");
    }

    #[test]
    fn unmatched_tags_keep_previous_or_neutral() {
        let mut agg = MetricsAggregator::new();
        agg.apply_tags(&["breath".to_string()]);
        assert_eq!(agg.emotion_label(), NEUTRAL_EMOTION);
        agg.apply_tags(&["curious".to_string()]);
        agg.apply_tags(&["breath".to_string()]);
        assert_eq!(agg.emotion_label(), "curious");
    }

    #[test]
    fn playback_pulse_and_decay() {
        let mut agg = MetricsAggregator::new();
        assert_eq!(agg.speaking_energy(false), 5.0);
        assert_eq!(agg.speaking_energy(true), 45.0);
        assert_eq!(agg.playback_energy(true), 40.0);
        agg.pulse_for_playback();
        assert_eq!(agg.snapshot().avg_energy, 55.0);
        assert_eq!(agg.snapshot().peak_energy, 75.0);
        agg.decay_after_playback();
        assert!((agg.snapshot().avg_energy - 33.0).abs() < 1e-9);
        assert!((agg.snapshot().peak_energy - 45.0).abs() < 1e-9);
    }
}
