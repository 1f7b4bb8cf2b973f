//! Gotify push subscription client.
//!
//! A [`stream::ConnectionController`] keeps one live stream open, hands every
//! message to the [`router::MessageRouter`], and on each (re)connect lets the
//! [`reconciler::BacklogReconciler`] replay directives that arrived while it
//! was offline. The [`ledger::ProcessedLedger`] makes sure a directive is
//! acted on once, whichever path delivered it.

pub mod consts;
pub mod control;
pub mod core;
pub mod diagnostics;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod messages;
pub mod model;
pub mod notifications;
pub mod reconciler;
pub mod router;
pub mod settings;
pub mod stream;
pub mod tabs;
pub mod transport;
