//! Workflow restart resolution
//!
//! The restart annotation carries either an RFC3339 timestamp (one-shot)
//! or a duration (recurring: the scheduled time is re-derived from the
//! last workflow end time).

use chrono::{DateTime, Duration, Utc};

use katachi_api::{Application, ApplicationStatus};

/// Parsed form of the restart annotation
#[derive(Clone, Debug, PartialEq)]
pub enum RestartSpec {
    /// Restart once at this time
    At(DateTime<Utc>),
    /// Restart this long after each workflow end
    Every(Duration),
}

/// Parse the annotation value; `None` when it is neither an RFC3339
/// timestamp nor a duration
pub fn parse_restart_annotation(value: &str) -> Option<RestartSpec> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(RestartSpec::At(at.with_timezone(&Utc)));
    }
    parse_duration(value).map(RestartSpec::Every)
}

/// Durations in the `30s` / `5m` / `2h` / `1d` form, simple sums like
/// `1h30m` included
fn parse_duration(value: &str) -> Option<Duration> {
    let mut total = Duration::zero();
    let mut digits = String::new();
    let mut saw_unit = false;
    for c in value.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: i64 = digits.parse().ok()?;
        digits.clear();
        total = total
            + match c {
                's' => Duration::seconds(amount),
                'm' => Duration::minutes(amount),
                'h' => Duration::hours(amount),
                'd' => Duration::days(amount),
                _ => return None,
            };
        saw_unit = true;
    }
    if !digits.is_empty() || !saw_unit || total <= Duration::zero() {
        return None;
    }
    Some(total)
}

/// Resolve the annotation into `status.workflowRestartScheduledAt`
///
/// One-shot timestamps are taken as-is. Durations derive the next restart
/// from the last workflow end time, so they recur.
pub fn resolve_scheduled_restart(app: &Application, status: &mut ApplicationStatus) {
    let Some(raw) = app.workflow_restart_annotation() else {
        return;
    };
    let Some(spec) = parse_restart_annotation(raw) else {
        return;
    };
    match spec {
        RestartSpec::At(at) => {
            status.workflow_restart_scheduled_at = Some(at.to_rfc3339());
        }
        RestartSpec::Every(interval) => {
            if status.workflow_restart_scheduled_at.is_some() {
                return;
            }
            let Some(end) = status
                .workflow
                .as_ref()
                .and_then(|w| w.end_time.as_deref())
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            else {
                return;
            };
            status.workflow_restart_scheduled_at =
                Some((end.with_timezone(&Utc) + interval).to_rfc3339());
        }
    }
}

/// Whether a resolved restart time has elapsed
pub fn restart_due(status: &ApplicationStatus, now: DateTime<Utc>) -> bool {
    status
        .workflow_restart_scheduled_at
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc) <= now)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_timestamps() {
        let spec = parse_restart_annotation("2026-03-01T12:00:00Z").unwrap();
        assert!(matches!(spec, RestartSpec::At(_)));
    }

    #[test]
    fn parses_durations() {
        assert_eq!(
            parse_restart_annotation("30s"),
            Some(RestartSpec::Every(Duration::seconds(30)))
        );
        assert_eq!(
            parse_restart_annotation("1h30m"),
            Some(RestartSpec::Every(Duration::minutes(90)))
        );
        assert_eq!(parse_restart_annotation("1w"), None);
        assert_eq!(parse_restart_annotation("later"), None);
        assert_eq!(parse_restart_annotation("0s"), None);
    }

    #[test]
    fn duration_restart_derives_from_workflow_end() {
        let mut app = Application::new("demo", Default::default());
        app.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                katachi_api::ANNOTATION_WORKFLOW_RESTART.to_string(),
                "1h".to_string(),
            );
        let mut status = ApplicationStatus::default();

        // no workflow end yet: nothing scheduled
        resolve_scheduled_restart(&app, &mut status);
        assert!(status.workflow_restart_scheduled_at.is_none());

        let end = Utc::now() - Duration::hours(2);
        status.workflow = Some(katachi_api::WorkflowStatus {
            finished: true,
            end_time: Some(end.to_rfc3339()),
            ..Default::default()
        });
        resolve_scheduled_restart(&app, &mut status);
        assert!(status.workflow_restart_scheduled_at.is_some());
        assert!(restart_due(&status, Utc::now()));
    }

    #[test]
    fn future_restart_is_not_due() {
        let mut status = ApplicationStatus::default();
        status.workflow_restart_scheduled_at =
            Some((Utc::now() + Duration::hours(1)).to_rfc3339());
        assert!(!restart_due(&status, Utc::now()));
    }
}
