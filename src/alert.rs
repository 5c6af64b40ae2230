//! Alert decision and delivery.
//!
//! Transports (chat bots, mail) live outside this crate behind the
//! [`Notifier`] trait. Delivery is best-effort: a failing notifier is
//! logged and never fails the cycle.

use std::path::Path;

use crate::merge::MergeTotals;
use crate::output::AlertReport;
use crate::session::RoundSnapshot;

/// Errors raised while rendering or delivering an alert.
#[derive(thiserror::Error, Debug)]
pub enum AlertError {
    #[error("Alert rendering failed: {0}")]
    Render(#[from] askama::Error),

    #[error("Alert delivery via {transport} failed: {message}")]
    Delivery { transport: String, message: String },
}

/// A destination for alert reports.
pub trait Notifier {
    /// Short transport name used in logs.
    fn name(&self) -> &str;

    /// Delivers one report, optionally with the run log attached.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Delivery`] if the transport rejects the message.
    fn send(&self, subject: &str, body: &str, attachment: Option<&Path>) -> Result<(), AlertError>;
}

/// Writes alerts to the application log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn send(&self, subject: &str, body: &str, attachment: Option<&Path>) -> Result<(), AlertError> {
        log::warn!("{subject}\n{body}");
        if let Some(path) = attachment {
            log::debug!("Alert attachment: {}", path.display());
        }
        Ok(())
    }
}

/// Whether this cycle differs materially from the previous one: the
/// unresolved set changed, or anything was copied, failed or conflicted.
#[must_use]
pub fn change_detected(previous: &RoundSnapshot, current: &RoundSnapshot, totals: &MergeTotals) -> bool {
    current.differs_from(previous) || totals.has_activity()
}

/// Alerts need planned, failed or conflicting files and a detected change.
#[must_use]
pub fn should_alert(planned_files: u64, totals: &MergeTotals, changed: bool) -> bool {
    let activity = planned_files > 0 || totals.failed_files > 0 || totals.conflict_files > 0;
    activity && changed
}

/// Renders `report` and hands it to every notifier. Returns how many
/// accepted it.
pub fn deliver(notifiers: &[Box<dyn Notifier>], report: &AlertReport, attachment: Option<&Path>) -> usize {
    let body = match report.to_text() {
        Ok(body) => body,
        Err(e) => {
            log::warn!("{}", AlertError::from(e));
            return 0;
        }
    };
    let subject = report.subject();

    notifiers
        .iter()
        .filter(|n| match n.send(&subject, &body, attachment) {
            Ok(()) => {
                log::debug!("Alert sent via {}", n.name());
                true
            }
            Err(e) => {
                log::warn!("{e}");
                false
            }
        })
        .count()
}
