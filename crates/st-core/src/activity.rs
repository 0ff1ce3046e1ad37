//! Per-page user activity detection.
//!
//! The detector is a two-state machine (`Active` ⇄ `Inactive`) fed by page
//! events. It emits an [`ActivitySignal`] on every state change and whenever
//! tracked media starts playing. Time is always passed in by the caller.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Thresholds for activity detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityConfig {
    /// Idle time after which the user is considered inactive. The transition
    /// happens only once idle time strictly exceeds this value.
    /// Default: 30000 (30 seconds).
    pub idle_threshold_ms: i64,

    /// How often the host runs the idle check.
    /// Default: 10000 (10 seconds).
    pub check_interval_ms: i64,
}

impl ActivityConfig {
    /// Period of the idle check. Negative values count as zero.
    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::try_from(self.check_interval_ms).unwrap_or(0))
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: 30_000, // 30 seconds
            check_interval_ms: 10_000, // 10 seconds
        }
    }
}

/// Whether the user is currently considered active on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Active,
    Inactive,
}

/// Notification emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivitySignal {
    UserActive,
    UserInactive,
    MediaPlaying,
}

/// DOM events that count as user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    MouseDown,
    MouseMove,
    Click,
    Scroll,
    KeyDown,
    TouchStart,
    TouchEnd,
    TouchMove,
    Wheel,
    Input,
    Change,
    Focus,
    Blur,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// A media element on the page, identified by a page-local id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaElement {
    pub kind: MediaKind,
    pub id: u32,
}

/// An event observed on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageEvent {
    /// The user interacted with the page.
    Interaction { kind: InteractionKind },
    /// A media element was found, either on load or added to the page later.
    MediaFound { media: MediaElement, playing: bool },
    MediaPlay { media: MediaElement },
    MediaPause { media: MediaElement },
    MediaEnded { media: MediaElement },
    VisibilityChanged { hidden: bool },
}

/// Receiver for activity signals.
pub trait SignalSink {
    fn emit(&mut self, signal: ActivitySignal);
}

impl SignalSink for Vec<ActivitySignal> {
    fn emit(&mut self, signal: ActivitySignal) {
        self.push(signal);
    }
}

/// Activity state machine for a single page.
#[derive(Debug)]
pub struct ActivityDetector<S> {
    config: ActivityConfig,
    state: ActivityState,
    last_activity: DateTime<Utc>,
    /// Tracked media elements and whether each one is playing.
    media: HashMap<MediaElement, bool>,
    sink: S,
}

impl<S: SignalSink> ActivityDetector<S> {
    /// Creates a detector for a page that loaded at `now`. Pages start active.
    pub fn new(config: ActivityConfig, sink: S, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: ActivityState::Active,
            last_activity: now,
            media: HashMap::new(),
            sink,
        }
    }

    pub const fn state(&self) -> ActivityState {
        self.state
    }

    pub const fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn video_playing(&self) -> bool {
        self.any_playing(MediaKind::Video)
    }

    pub fn audio_playing(&self) -> bool {
        self.any_playing(MediaKind::Audio)
    }

    pub fn media_playing(&self) -> bool {
        self.media.values().any(|playing| *playing)
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }

    fn any_playing(&self, kind: MediaKind) -> bool {
        self.media
            .iter()
            .any(|(media, playing)| media.kind == kind && *playing)
    }

    /// Applies a page event observed at `now`.
    pub fn handle(&mut self, event: &PageEvent, now: DateTime<Utc>) {
        match event {
            PageEvent::Interaction { .. } => self.record_activity(now),
            PageEvent::MediaFound { media, playing } => {
                self.media.insert(*media, *playing);
                if *playing {
                    self.sink.emit(ActivitySignal::MediaPlaying);
                }
            }
            PageEvent::MediaPlay { media } => {
                if self.set_playing(*media, true) {
                    self.sink.emit(ActivitySignal::MediaPlaying);
                }
            }
            PageEvent::MediaPause { media } | PageEvent::MediaEnded { media } => {
                if self.set_playing(*media, false) {
                    self.check_idle(now);
                }
            }
            PageEvent::VisibilityChanged { hidden: true } => {
                self.state = ActivityState::Inactive;
                self.sink.emit(ActivitySignal::UserInactive);
            }
            PageEvent::VisibilityChanged { hidden: false } => self.record_activity(now),
        }
    }

    /// Runs the periodic idle check.
    ///
    /// Transitions to `Inactive` only when idle time exceeds the threshold and
    /// no tracked media is playing.
    pub fn check_idle(&mut self, now: DateTime<Utc>) {
        let idle = now - self.last_activity;
        if idle <= Duration::milliseconds(self.config.idle_threshold_ms) || self.media_playing() {
            return;
        }
        if self.state == ActivityState::Active {
            self.state = ActivityState::Inactive;
            tracing::debug!(idle_ms = idle.num_milliseconds(), "user went idle");
            self.sink.emit(ActivitySignal::UserInactive);
        }
    }

    fn record_activity(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        if self.state == ActivityState::Inactive {
            self.state = ActivityState::Active;
            self.sink.emit(ActivitySignal::UserActive);
        }
    }

    /// Returns false when the element is not tracked.
    fn set_playing(&mut self, media: MediaElement, playing: bool) -> bool {
        match self.media.get_mut(&media) {
            Some(state) => {
                *state = playing;
                true
            }
            None => {
                tracing::debug!(?media, "ignoring event for untracked media element");
                false
            }
        }
    }
}
