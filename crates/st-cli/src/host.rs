//! The native messaging host.
//!
//! One event loop owns all tracking state: the time accountant, the cached
//! server link and one activity detector per page. Browser messages, timers
//! and finished background requests are all handled on that loop, so nothing
//! needs a lock. Scheduled submissions and probes run as background tasks on
//! a snapshot and hand their reports back to the loop.
//!
//! Activity signals from pages travel over a typed channel. Their consumer
//! logs them; they do not influence accounting.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use st_client::{
    CycleReport, HttpMonitor, LinkState, LinkUpdate, MonitorApi, check_server, check_user,
    submit_cycle,
};
use st_core::{
    ActivityConfig, ActivityDetector, ActivitySignal, PageEvent, SignalSink, TabEvent, TabId,
    TimeAccountant,
};

use crate::Config;
use crate::native::{self, ControlCommand, HostMessage, HostReply, StatusSnapshot};

/// Capacity of the queue between the stdin reader and the event loop.
const INBOX_CAPACITY: usize = 64;

type SignalSender = mpsc::UnboundedSender<(TabId, ActivitySignal)>;

/// Forwards a page's activity signals to the host, tagged with its tab.
#[derive(Debug)]
struct ChannelSink {
    tab: TabId,
    tx: SignalSender,
}

impl SignalSink for ChannelSink {
    fn emit(&mut self, signal: ActivitySignal) {
        if self.tx.send((self.tab, signal)).is_err() {
            tracing::trace!(tab = self.tab, ?signal, "signal dropped, host is shutting down");
        }
    }
}

/// Timer periods for the event loop.
#[derive(Debug, Clone, Copy)]
struct Schedule {
    save: Duration,
    submit: Duration,
    user_check: Duration,
    status: Duration,
    startup_delay: Duration,
}

impl Schedule {
    const fn from_config(config: &Config) -> Self {
        Self {
            save: Duration::from_secs(config.save_interval_secs),
            submit: Duration::from_secs(config.submit_interval_secs),
            user_check: Duration::from_secs(config.user_check_interval_secs),
            status: Duration::from_secs(config.status_interval_secs),
            startup_delay: Duration::from_secs(config.startup_probe_delay_secs),
        }
    }
}

/// Work finished by a background task.
#[derive(Debug)]
enum Completed {
    Cycle(CycleReport),
    Probes(Vec<LinkUpdate>),
}

/// Tracking state for one browser session.
#[derive(Debug)]
pub struct Host<A> {
    api: A,
    schedule: Schedule,
    activity: ActivityConfig,
    accountant: TimeAccountant,
    link: LinkState,
    pages: HashMap<TabId, ActivityDetector<ChannelSink>>,
    signal_tx: SignalSender,
    signal_rx: mpsc::UnboundedReceiver<(TabId, ActivitySignal)>,
    tasks: JoinSet<Completed>,
}

impl<A> Host<A>
where
    A: MonitorApi + Clone + Send + Sync + 'static,
{
    pub fn new(config: &Config, api: A, now: DateTime<Utc>) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            api,
            schedule: Schedule::from_config(config),
            activity: config.activity(),
            accountant: TimeAccountant::new(now),
            link: LinkState::default(),
            pages: HashMap::new(),
            signal_tx,
            signal_rx,
            tasks: JoinSet::new(),
        }
    }

    /// Runs until the browser closes `reader`, or the process is interrupted.
    pub async fn run<R, W>(mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let (inbox_tx, mut inbox) = mpsc::channel(INBOX_CAPACITY);
        let reader_task = tokio::spawn(read_messages(reader, inbox_tx));

        let mut save = every(self.schedule.save);
        let mut submit = every(self.schedule.submit);
        let mut user_check = every(self.schedule.user_check);
        let mut status = every(self.schedule.status);
        let mut idle_check = every(self.activity.check_interval());
        let startup = tokio::time::sleep(self.schedule.startup_delay);
        tokio::pin!(startup);
        let mut probed = false;

        tracing::info!("site time tracking started");

        loop {
            tokio::select! {
                message = inbox.recv() => {
                    let Some(message) = message else {
                        tracing::info!("browser disconnected");
                        break;
                    };
                    self.handle_message(message, &mut writer).await?;
                }
                _ = save.tick() => {
                    self.accountant.record_elapsed(Utc::now());
                }
                _ = submit.tick() => self.spawn_submit(),
                _ = user_check.tick() => self.spawn_user_check(),
                _ = status.tick() => self.log_status(),
                _ = idle_check.tick() => self.check_idle(Utc::now()),
                () = &mut startup, if !probed => {
                    probed = true;
                    self.spawn_startup_probe();
                }
                Some(joined) = self.tasks.join_next() => match joined {
                    Ok(completed) => self.apply(completed),
                    Err(err) => tracing::warn!(error = %err, "background task failed"),
                },
                Some((tab, signal)) = self.signal_rx.recv() => {
                    tracing::info!(tab, ?signal, "activity signal");
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "failed to listen for interrupt");
                    }
                    tracing::info!("interrupted");
                    break;
                }
            }
        }

        reader_task.abort();
        Ok(())
    }

    async fn handle_message<W>(&mut self, message: HostMessage, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let now = Utc::now();
        match message {
            HostMessage::TabActivated { tab_id, url } => {
                let event = TabEvent::Activated { tab: tab_id, url };
                self.accountant.handle_tab_event(&event, now);
            }
            HostMessage::TabUpdated { tab_id, url } => {
                let event = TabEvent::Updated { tab: tab_id, url };
                self.accountant.handle_tab_event(&event, now);
            }
            HostMessage::Page { tab_id, event } => self.page_event(tab_id, &event, now),
            HostMessage::PageUnload { tab_id } => {
                if self.pages.remove(&tab_id).is_some() {
                    tracing::debug!(tab = tab_id, "page unloaded");
                }
            }
            HostMessage::Control { command } => {
                let reply = self.control(command).await;
                native::write_frame(writer, &reply)
                    .await
                    .context("failed to write reply to browser")?;
            }
        }
        Ok(())
    }

    fn page_event(&mut self, tab: TabId, event: &PageEvent, now: DateTime<Utc>) {
        let activity = &self.activity;
        let signal_tx = &self.signal_tx;
        let detector = self.pages.entry(tab).or_insert_with(|| {
            let sink = ChannelSink {
                tab,
                tx: signal_tx.clone(),
            };
            ActivityDetector::new(activity.clone(), sink, now)
        });
        detector.handle(event, now);
    }

    fn check_idle(&mut self, now: DateTime<Utc>) {
        for detector in self.pages.values_mut() {
            detector.check_idle(now);
        }
    }

    async fn control(&mut self, command: ControlCommand) -> HostReply {
        tracing::debug!(?command, "control command");
        match command {
            ControlCommand::Status => HostReply::Status(self.status()),
            ControlCommand::ForceSend => {
                let snapshot = self.accountant.snapshot();
                let timestamp = Utc::now().timestamp_millis();
                let report = submit_cycle(&self.api, &self.link, snapshot, timestamp).await;
                report.apply(&mut self.link, &mut self.accountant);
                HostReply::Submitted {
                    outcome: report.disposition.as_str(),
                }
            }
            ControlCommand::CheckUser => {
                let probe = check_user(&self.api).await;
                self.link.apply(&probe.update);
                HostReply::UserChecked {
                    logged_in: probe.ok,
                }
            }
            ControlCommand::CheckServer => {
                let probe = check_server(&self.api).await;
                self.link.apply(&probe.update);
                HostReply::ServerChecked {
                    reachable: probe.ok,
                }
            }
            ControlCommand::ClearData => {
                self.accountant.discard();
                tracing::info!("site times cleared");
                HostReply::Cleared
            }
        }
    }

    fn status(&self) -> StatusSnapshot {
        let site_times = self.accountant.site_times().clone();
        StatusSnapshot {
            server_reachable: self.link.server_reachable,
            user_id: self.link.user.as_ref().map(ToString::to_string),
            focused_domain: self.accountant.focused_domain().map(str::to_string),
            focus_started: self.accountant.focus_started(),
            tracked_sites: site_times.len(),
            site_times,
            pages: self.pages.len(),
        }
    }

    fn log_status(&self) {
        tracing::info!(
            server_reachable = self.link.server_reachable,
            user = ?self.link.user,
            focused = ?self.accountant.focused_domain(),
            tracked_sites = self.accountant.site_times().len(),
            "status"
        );
    }

    fn spawn_submit(&mut self) {
        let api = self.api.clone();
        let link = self.link.clone();
        let snapshot = self.accountant.snapshot();
        let timestamp = Utc::now().timestamp_millis();
        self.tasks.spawn(async move {
            Completed::Cycle(submit_cycle(&api, &link, snapshot, timestamp).await)
        });
    }

    fn spawn_user_check(&mut self) {
        let api = self.api.clone();
        self.tasks
            .spawn(async move { Completed::Probes(vec![check_user(&api).await.update]) });
    }

    fn spawn_startup_probe(&mut self) {
        let api = self.api.clone();
        self.tasks.spawn(async move {
            let server = check_server(&api).await.update;
            let user = check_user(&api).await.update;
            Completed::Probes(vec![server, user])
        });
    }

    fn apply(&mut self, completed: Completed) {
        match completed {
            Completed::Cycle(report) => {
                report.apply(&mut self.link, &mut self.accountant);
                tracing::debug!(
                    disposition = report.disposition.as_str(),
                    "submission cycle finished"
                );
            }
            Completed::Probes(updates) => {
                for update in &updates {
                    self.link.apply(update);
                }
            }
        }
    }
}

/// Runs the host over stdin/stdout against the configured server.
pub async fn run_stdio(config: &Config) -> Result<()> {
    let api = HttpMonitor::new(&config.server_url, config.request_timeout())
        .context("failed to create monitor client")?;
    tracing::debug!(server = %api.base_url(), "using monitor server");

    let host = Host::new(config, api, Utc::now());
    host.run(tokio::io::stdin(), tokio::io::stdout()).await
}

/// A ticking interval whose first tick is one period from now.
fn every(period: Duration) -> Interval {
    let period = period.max(Duration::from_secs(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Reads frames from the browser until it disconnects.
async fn read_messages<R>(mut reader: R, inbox: mpsc::Sender<HostMessage>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match native::read_frame(&mut reader).await {
            Ok(Some(body)) => match native::parse_message(&body) {
                Ok(message) => {
                    if inbox.send(message).await.is_err() {
                        break;
                    }
                }
                Err(err) => tracing::warn!(error = %err, "skipping undecodable message"),
            },
            Ok(None) => break,
            Err(err) => {
                tracing::error!(error = %err, "failed to read from browser");
                break;
            }
        }
    }
}
