//! Per-domain time accounting.
//!
//! The accountant follows the focused browser tab. Every focus change and
//! every save tick flushes the whole seconds elapsed since the last flush into
//! the domain that held focus during that interval.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::resolve_domain;

/// Browser tab identifier.
pub type TabId = i64;

/// Accumulated seconds per domain awaiting submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteTimes(BTreeMap<String, u64>);

impl SiteTimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `seconds` to `domain`. Zero is a no-op and creates no entry.
    pub fn add(&mut self, domain: &str, seconds: u64) {
        if seconds == 0 {
            return;
        }
        *self.0.entry(domain.to_string()).or_insert(0) += seconds;
    }

    pub fn get(&self, domain: &str) -> Option<u64> {
        self.0.get(domain).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of domains with accumulated time.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn total_seconds(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(domain, seconds)| (domain.as_str(), *seconds))
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Removes a submitted snapshot from the map.
    ///
    /// Time added after the snapshot was taken stays in the map; domains whose
    /// remaining time drops to zero are removed.
    pub fn settle(&mut self, submitted: &Self) {
        for (domain, seconds) in submitted.iter() {
            if let Some(current) = self.0.get_mut(domain) {
                *current = current.saturating_sub(seconds);
                if *current == 0 {
                    self.0.remove(domain);
                }
            }
        }
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for SiteTimes {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut times = Self::new();
        for (domain, seconds) in iter {
            let domain: String = domain.into();
            times.add(&domain, seconds);
        }
        times
    }
}

/// Site times captured for submission.
///
/// A snapshot remembers which generation of the map it was taken from, so a
/// map cleared after the capture is never settled against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    site_times: SiteTimes,
    generation: u64,
}

impl Snapshot {
    pub const fn site_times(&self) -> &SiteTimes {
        &self.site_times
    }

    pub fn is_empty(&self) -> bool {
        self.site_times.is_empty()
    }
}

/// A tab focus or navigation event reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    /// A tab became the active tab. `url` is `None` when the browser could
    /// not report it.
    Activated { tab: TabId, url: Option<String> },
    /// A tab changed. `url` is only present when the URL itself changed.
    Updated { tab: TabId, url: Option<String> },
}

/// Tracks the focused domain and accumulates time per domain.
#[derive(Debug, Clone)]
pub struct TimeAccountant {
    active_tab: Option<TabId>,
    focused: Option<String>,
    focus_started: DateTime<Utc>,
    site_times: SiteTimes,
    /// Bumped whenever the map is discarded.
    generation: u64,
}

impl TimeAccountant {
    /// Creates an accountant with nothing focused.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            active_tab: None,
            focused: None,
            focus_started: now,
            site_times: SiteTimes::new(),
            generation: 0,
        }
    }

    pub fn focused_domain(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub const fn active_tab(&self) -> Option<TabId> {
        self.active_tab
    }

    pub const fn focus_started(&self) -> DateTime<Utc> {
        self.focus_started
    }

    pub const fn site_times(&self) -> &SiteTimes {
        &self.site_times
    }

    /// Flushes the time elapsed since the last flush into the focused domain.
    ///
    /// Only whole seconds are added, but the clock is reset to `now` even when
    /// nothing was added. Returns the number of seconds added.
    pub fn record_elapsed(&mut self, now: DateTime<Utc>) -> u64 {
        let Some(domain) = self.focused.as_deref() else {
            return 0;
        };

        let seconds = u64::try_from((now - self.focus_started).num_seconds()).unwrap_or(0);
        self.site_times.add(domain, seconds);
        self.focus_started = now;
        seconds
    }

    /// Moves focus to `domain` after flushing the outgoing domain.
    pub fn focus_changed(&mut self, domain: Option<String>, now: DateTime<Utc>) {
        self.record_elapsed(now);
        if self.focused != domain {
            tracing::debug!(from = ?self.focused, to = ?domain, "focus changed");
        }
        self.focused = domain;
        self.focus_started = now;
    }

    /// Applies a browser tab event.
    pub fn handle_tab_event(&mut self, event: &TabEvent, now: DateTime<Utc>) {
        match event {
            TabEvent::Activated { tab, url } => {
                self.active_tab = Some(*tab);
                self.focus_changed(url.as_deref().and_then(resolve_domain), now);
            }
            TabEvent::Updated { tab, url } => {
                if self.active_tab != Some(*tab) {
                    return;
                }
                let Some(url) = url else {
                    return;
                };
                self.focus_changed(resolve_domain(url), now);
            }
        }
    }

    /// Captures the current map for submission.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            site_times: self.site_times.clone(),
            generation: self.generation,
        }
    }

    /// Removes a successfully submitted snapshot from the map.
    ///
    /// A snapshot taken before the last [`discard`](Self::discard) is ignored;
    /// everything in the map was recorded after it.
    pub fn settle(&mut self, submitted: &Snapshot) {
        if submitted.generation != self.generation {
            tracing::debug!(
                sites = submitted.site_times.len(),
                "map was cleared during submission, nothing to settle"
            );
            return;
        }
        self.site_times.settle(&submitted.site_times);
    }

    /// Drops all accumulated time.
    pub fn discard(&mut self) {
        self.site_times.clear();
        self.generation = self.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone};

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::seconds(seconds)
    }

    fn ts_ms(millis: i64) -> DateTime<Utc> {
        ts(0) + Duration::milliseconds(millis)
    }

    fn focus(accountant: &mut TimeAccountant, domain: &str, at: DateTime<Utc>) {
        accountant.focus_changed(Some(domain.to_string()), at);
    }

    #[test]
    fn test_focus_switch_then_tick() {
        let mut accountant = TimeAccountant::new(ts(0));
        focus(&mut accountant, "a.example.com", ts(0));
        focus(&mut accountant, "b.example.com", ts(10));

        assert_eq!(accountant.site_times().get("a.example.com"), Some(10));
        assert_eq!(accountant.site_times().len(), 1);

        accountant.record_elapsed(ts(40));
        assert_eq!(accountant.site_times().get("a.example.com"), Some(10));
        assert_eq!(accountant.site_times().get("b.example.com"), Some(30));
    }

    #[test]
    fn test_record_elapsed_without_focus_is_noop() {
        let mut accountant = TimeAccountant::new(ts(0));
        assert_eq!(accountant.record_elapsed(ts(30)), 0);
        assert!(accountant.site_times().is_empty());
        assert_eq!(accountant.focus_started(), ts(0));
    }

    #[test]
    fn test_sub_second_flush_still_advances_clock() {
        let mut accountant = TimeAccountant::new(ts(0));
        focus(&mut accountant, "a.example.com", ts(0));

        assert_eq!(accountant.record_elapsed(ts_ms(900)), 0);
        assert_eq!(accountant.focus_started(), ts_ms(900));
        assert!(accountant.site_times().is_empty());

        // The discarded 900ms is not carried into the next interval.
        assert_eq!(accountant.record_elapsed(ts_ms(2_500)), 1);
        assert_eq!(accountant.site_times().get("a.example.com"), Some(1));
    }

    #[test]
    fn test_intervals_are_floored_individually() {
        let mut accountant = TimeAccountant::new(ts(0));
        focus(&mut accountant, "a.example.com", ts(0));
        focus(&mut accountant, "b.example.com", ts_ms(1_700));
        focus(&mut accountant, "a.example.com", ts_ms(2_200));
        accountant.record_elapsed(ts_ms(4_100));

        // a: floor(1.7) + floor(1.9) = 2; b: floor(0.5) = 0
        assert_eq!(accountant.site_times().get("a.example.com"), Some(2));
        assert_eq!(accountant.site_times().get("b.example.com"), None);
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let mut accountant = TimeAccountant::new(ts(10));
        focus(&mut accountant, "a.example.com", ts(10));
        assert_eq!(accountant.record_elapsed(ts(5)), 0);
        assert!(accountant.site_times().is_empty());
        assert_eq!(accountant.focus_started(), ts(5));
    }

    #[test]
    fn test_focus_on_unresolvable_domain_stops_accounting() {
        let mut accountant = TimeAccountant::new(ts(0));
        focus(&mut accountant, "a.example.com", ts(0));
        accountant.focus_changed(None, ts(5));
        accountant.record_elapsed(ts(60));

        assert_eq!(accountant.site_times().get("a.example.com"), Some(5));
        assert_eq!(accountant.site_times().total_seconds(), 5);
        assert_eq!(accountant.focused_domain(), None);
    }

    #[test]
    fn test_tab_activation_resolves_domain() {
        let mut accountant = TimeAccountant::new(ts(0));
        accountant.handle_tab_event(
            &TabEvent::Activated {
                tab: 7,
                url: Some("https://Docs.RS/serde".to_string()),
            },
            ts(0),
        );
        assert_eq!(accountant.active_tab(), Some(7));
        assert_eq!(accountant.focused_domain(), Some("docs.rs"));

        accountant.handle_tab_event(
            &TabEvent::Activated {
                tab: 8,
                url: Some("about:blank".to_string()),
            },
            ts(12),
        );
        assert_eq!(accountant.focused_domain(), None);
        assert_eq!(accountant.site_times().get("docs.rs"), Some(12));
    }

    #[test]
    fn test_tab_update_only_applies_to_active_tab() {
        let mut accountant = TimeAccountant::new(ts(0));
        accountant.handle_tab_event(
            &TabEvent::Activated {
                tab: 1,
                url: Some("https://a.example.com/".to_string()),
            },
            ts(0),
        );

        // Background tab navigating does not move focus.
        accountant.handle_tab_event(
            &TabEvent::Updated {
                tab: 2,
                url: Some("https://b.example.com/".to_string()),
            },
            ts(3),
        );
        assert_eq!(accountant.focused_domain(), Some("a.example.com"));
        assert!(accountant.site_times().is_empty());

        // Update without a URL change (e.g. title or loading status).
        accountant.handle_tab_event(&TabEvent::Updated { tab: 1, url: None }, ts(4));
        assert_eq!(accountant.focus_started(), ts(0));

        accountant.handle_tab_event(
            &TabEvent::Updated {
                tab: 1,
                url: Some("https://c.example.com/".to_string()),
            },
            ts(9),
        );
        assert_eq!(accountant.focused_domain(), Some("c.example.com"));
        assert_eq!(accountant.site_times().get("a.example.com"), Some(9));
    }

    #[test]
    fn test_settle_keeps_time_added_after_snapshot() {
        let mut accountant = TimeAccountant::new(ts(0));
        focus(&mut accountant, "a.example.com", ts(0));
        accountant.record_elapsed(ts(20));
        let snapshot = accountant.snapshot();

        accountant.record_elapsed(ts(25));
        accountant.settle(&snapshot);

        assert_eq!(accountant.site_times().get("a.example.com"), Some(5));
    }

    #[test]
    fn test_settle_empties_map_when_nothing_changed() {
        let mut accountant = TimeAccountant::new(ts(0));
        focus(&mut accountant, "a.example.com", ts(0));
        focus(&mut accountant, "b.example.com", ts(10));
        accountant.record_elapsed(ts(40));
        let snapshot = accountant.snapshot();

        accountant.settle(&snapshot);
        assert!(accountant.site_times().is_empty());

        // Accumulation restarts from zero.
        accountant.record_elapsed(ts(43));
        assert_eq!(accountant.site_times().get("b.example.com"), Some(3));
        assert_eq!(accountant.site_times().get("a.example.com"), None);
    }

    #[test]
    fn test_settle_after_discard_keeps_new_time() {
        let mut accountant = TimeAccountant::new(ts(0));
        focus(&mut accountant, "a.example.com", ts(0));
        accountant.record_elapsed(ts(30));
        let snapshot = accountant.snapshot();

        accountant.discard();
        accountant.record_elapsed(ts(50));
        accountant.settle(&snapshot);

        assert_eq!(accountant.site_times().get("a.example.com"), Some(20));
    }

    #[test]
    fn test_snapshot_after_discard_settles_normally() {
        let mut accountant = TimeAccountant::new(ts(0));
        focus(&mut accountant, "a.example.com", ts(0));
        accountant.record_elapsed(ts(10));
        accountant.discard();

        accountant.record_elapsed(ts(25));
        let snapshot = accountant.snapshot();
        accountant.record_elapsed(ts(28));
        accountant.settle(&snapshot);

        assert_eq!(accountant.site_times().get("a.example.com"), Some(3));
    }

    #[test]
    fn test_discard_keeps_focus() {
        let mut accountant = TimeAccountant::new(ts(0));
        focus(&mut accountant, "a.example.com", ts(0));
        accountant.record_elapsed(ts(10));
        accountant.discard();

        assert!(accountant.site_times().is_empty());
        assert_eq!(accountant.focused_domain(), Some("a.example.com"));
    }

    #[test]
    fn test_site_times_serializes_as_plain_map() {
        let times: SiteTimes = [("b.example.com", 30), ("a.example.com", 10), ("zero.example", 0)]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&times).unwrap();
        assert_eq!(json, r#"{"a.example.com":10,"b.example.com":30}"#);
    }
}
