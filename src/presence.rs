use regex::Regex;
use serde_json::{json, Value};

/// A single labeled link shown under the presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceButton {
    pub label: String,
    pub url: String,
}

/// The payload pushed per tick. Rebuilt every tick; nothing here outlives
/// the publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub details: String,
    /// Open-document label, empty when none is known.
    pub state: String,
    /// Unix seconds; drives the client's "elapsed" display. Reset only on
    /// label transitions so the session length reads continuously.
    pub started_at: i64,
    /// Public URL of the freshest uploaded capture, if any upload has
    /// succeeded so far.
    pub large_image: Option<String>,
    pub large_image_text: String,
    pub small_image_key: String,
    pub small_image_text: String,
    pub button: Option<PresenceButton>,
}

impl PresenceRecord {
    /// The activity object for a SET_ACTIVITY command.
    ///
    /// Empty strings are omitted entirely; the transport rejects
    /// zero-length fields.
    pub fn activity_payload(&self) -> Value {
        let mut activity = serde_json::Map::new();

        if !self.details.is_empty() {
            activity.insert("details".into(), json!(self.details));
        }
        if !self.state.is_empty() {
            activity.insert("state".into(), json!(self.state));
        }
        activity.insert("timestamps".into(), json!({ "start": self.started_at }));

        let mut assets = serde_json::Map::new();
        if let Some(url) = &self.large_image {
            assets.insert("large_image".into(), json!(url));
        }
        if !self.large_image_text.is_empty() {
            assets.insert("large_text".into(), json!(self.large_image_text));
        }
        if !self.small_image_key.is_empty() {
            assets.insert("small_image".into(), json!(self.small_image_key));
        }
        if !self.small_image_text.is_empty() {
            assets.insert("small_text".into(), json!(self.small_image_text));
        }
        if !assets.is_empty() {
            activity.insert("assets".into(), Value::Object(assets));
        }

        if let Some(button) = &self.button {
            activity.insert(
                "buttons".into(),
                json!([{ "label": button.label, "url": button.url }]),
            );
        }

        Value::Object(activity)
    }
}

/// Tracks the observed label across ticks and owns the started-at
/// timestamp.
///
/// The timestamp resets on, and only on, the tick where the label differs
/// from the last *published* label; the label itself is committed only
/// after a successful publish, so a failed publish retries the transition
/// next tick.
#[derive(Debug)]
pub struct ActivityTracker {
    last_published_label: String,
    started_at: i64,
}

impl ActivityTracker {
    pub fn new(now: i64) -> Self {
        Self {
            last_published_label: String::new(),
            started_at: now,
        }
    }

    /// Compare `label` against the last published label and reset the
    /// timestamp on a transition. Returns whether the label changed.
    pub fn prepare(&mut self, label: &str, now: i64) -> bool {
        let changed = !self.last_published_label.eq_ignore_ascii_case(label);
        if changed {
            self.started_at = now;
        }
        changed
    }

    /// Commit `label` after a successful publish.
    pub fn mark_published(&mut self, label: &str) {
        self.last_published_label = label.to_string();
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }
}

/// Derive the open-document label from a window title.
///
/// `pattern`'s first capture group wins ("artwork.clip - CLIP STUDIO PAINT"
/// -> "artwork.clip"); a non-matching title is used whole.
pub fn document_label(title: &str, pattern: &Regex) -> String {
    pattern
        .captures(title)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(title)
        .trim()
        .to_string()
}
