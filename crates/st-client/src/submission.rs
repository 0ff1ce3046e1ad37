//! Submission gates and server probes.
//!
//! A submission cycle works on a snapshot of the accumulated site times and
//! never touches the owner's state directly. It returns a [`CycleReport`]
//! describing the cache changes and what should happen to the accumulated
//! map; the owner applies it once the cycle completes. Anything accumulated
//! while a cycle is in flight is therefore kept for the next one.
//!
//! Gates, in order:
//! 1. Nothing accumulated: no network traffic at all.
//! 2. Server not known to be reachable: liveness probe, abort (keeping the
//!    data) if it fails.
//! 3. No known user: identity probe, abort and discard the data if nobody is
//!    logged in.

use st_core::{Snapshot, TimeAccountant};

use crate::{ActivityReport, ClientError, LogOutcome, MonitorApi, UserId};

/// Cached knowledge about the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkState {
    /// True if the last liveness probe succeeded and no request failed since.
    pub server_reachable: bool,
    /// The user the server reported as logged in.
    pub user: Option<UserId>,
}

impl LinkState {
    pub fn apply(&mut self, update: &LinkUpdate) {
        if let Some(reachable) = update.server_reachable {
            self.server_reachable = reachable;
        }
        if let Some(user) = &update.user {
            self.user.clone_from(user);
        }
    }
}

/// Changes to a [`LinkState`]. `None` fields leave the cached value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkUpdate {
    pub server_reachable: Option<bool>,
    pub user: Option<Option<UserId>>,
}

impl LinkUpdate {
    pub const fn is_empty(&self) -> bool {
        self.server_reachable.is_none() && self.user.is_none()
    }

    /// Folds a later update into this one; later values win.
    fn merge(&mut self, later: Self) {
        if later.server_reachable.is_some() {
            self.server_reachable = later.server_reachable;
        }
        if later.user.is_some() {
            self.user = later.user;
        }
    }
}

/// Result of a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Whether the probe confirmed what it asked for.
    pub ok: bool,
    pub update: LinkUpdate,
}

/// Liveness probe (`GET /ping`).
///
/// On success the server is marked reachable and an identity included in the
/// reply is cached. A non-2xx answer changes nothing. A transport failure
/// marks the server unreachable and forgets the user.
pub async fn check_server<A: MonitorApi + Sync>(api: &A) -> Probe {
    match api.ping().await {
        Ok(user) => {
            tracing::debug!(user = ?user, "server reachable");
            Probe {
                ok: true,
                update: LinkUpdate {
                    server_reachable: Some(true),
                    user: user.map(Some),
                },
            }
        }
        Err(ClientError::Status { status }) => {
            tracing::warn!(status, "liveness probe answered with an error status");
            Probe {
                ok: false,
                update: LinkUpdate::default(),
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "server unreachable");
            Probe {
                ok: false,
                update: LinkUpdate {
                    server_reachable: Some(false),
                    user: Some(None),
                },
            }
        }
    }
}

/// Identity probe (`GET /current_user`).
///
/// A reply without an identity clears the cached user. Failures change
/// nothing.
pub async fn check_user<A: MonitorApi + Sync>(api: &A) -> Probe {
    match api.current_user().await {
        Ok(Some(user)) => {
            tracing::info!(user = %user, "user authenticated");
            Probe {
                ok: true,
                update: LinkUpdate {
                    server_reachable: None,
                    user: Some(Some(user)),
                },
            }
        }
        Ok(None) => {
            tracing::warn!("no user logged in on the monitor server");
            Probe {
                ok: false,
                update: LinkUpdate {
                    server_reachable: None,
                    user: Some(None),
                },
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to check current user");
            Probe {
                ok: false,
                update: LinkUpdate::default(),
            }
        }
    }
}

/// What to do with the accumulated map after a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing was accumulated; no request was made.
    Skipped,
    /// Transient failure; keep everything for the next cycle.
    Retained,
    /// The snapshot was accepted and must be removed from the map.
    Settled(Snapshot),
    /// No authenticated user; drop everything.
    Discarded,
}

impl Disposition {
    pub fn apply(&self, accountant: &mut TimeAccountant) {
        match self {
            Self::Skipped | Self::Retained => {}
            Self::Settled(submitted) => accountant.settle(submitted),
            Self::Discarded => accountant.discard(),
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Retained => "retained",
            Self::Settled(_) => "settled",
            Self::Discarded => "discarded",
        }
    }
}

/// Outcome of a submission cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub link: LinkUpdate,
    pub disposition: Disposition,
}

impl CycleReport {
    pub fn apply(&self, link: &mut LinkState, accountant: &mut TimeAccountant) {
        link.apply(&self.link);
        self.disposition.apply(accountant);
    }
}

/// Runs one submission cycle for `snapshot`.
///
/// `link` is the cached state at the time the cycle started; probes run by
/// the cycle are reflected in the returned report.
pub async fn submit_cycle<A: MonitorApi + Sync>(
    api: &A,
    link: &LinkState,
    snapshot: Snapshot,
    timestamp_ms: i64,
) -> CycleReport {
    let mut update = LinkUpdate::default();
    if snapshot.is_empty() {
        return CycleReport {
            link: update,
            disposition: Disposition::Skipped,
        };
    }

    let mut view = link.clone();

    if !view.server_reachable {
        let probe = check_server(api).await;
        view.apply(&probe.update);
        update.merge(probe.update);
        if !probe.ok {
            tracing::info!(
                sites = snapshot.site_times().len(),
                "server unavailable, keeping site times"
            );
            return CycleReport {
                link: update,
                disposition: Disposition::Retained,
            };
        }
    }

    if view.user.is_none() {
        let probe = check_user(api).await;
        view.apply(&probe.update);
        update.merge(probe.update);
    }
    let Some(user) = view.user else {
        tracing::warn!(
            sites = snapshot.site_times().len(),
            "submission cancelled, no user logged in; discarding site times"
        );
        return CycleReport {
            link: update,
            disposition: Disposition::Discarded,
        };
    };

    tracing::debug!(
        user = %user,
        sites = snapshot.site_times().len(),
        "submitting site times"
    );
    let report = ActivityReport {
        site_times: snapshot.site_times().clone(),
        timestamp: timestamp_ms,
    };

    let outcome = api.log_activity(&report).await;
    let disposition = match outcome {
        Ok(LogOutcome::Accepted { receipt }) => {
            tracing::info!(
                user = %user,
                sites = report.site_times.len(),
                seconds = report.site_times.total_seconds(),
                receipt = ?receipt,
                "site times submitted"
            );
            Disposition::Settled(snapshot)
        }
        Ok(LogOutcome::Forbidden { message }) => {
            tracing::warn!(%message, "server refused submission; discarding site times");
            update.merge(LinkUpdate {
                server_reachable: None,
                user: Some(None),
            });
            Disposition::Discarded
        }
        Err(err) => {
            tracing::warn!(error = %err, "submission failed, keeping site times");
            update.merge(LinkUpdate {
                server_reachable: Some(false),
                user: None,
            });
            Disposition::Retained
        }
    };

    CycleReport {
        link: update,
        disposition,
    }
}
