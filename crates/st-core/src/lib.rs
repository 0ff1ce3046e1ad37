//! Core domain logic for the site time tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Domain resolution: mapping page URLs to accounting keys
//! - Accounting: accumulating focused seconds per domain
//! - Activity detection: deriving an active/inactive signal from page events

pub mod accountant;
pub mod activity;
pub mod domain;

pub use accountant::{SiteTimes, Snapshot, TabEvent, TabId, TimeAccountant};
pub use activity::{
    ActivityConfig, ActivityDetector, ActivitySignal, ActivityState, InteractionKind,
    MediaElement, MediaKind, PageEvent, SignalSink,
};
pub use domain::resolve_domain;
