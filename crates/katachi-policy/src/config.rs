//! Per-output-type refresh configuration
//!
//! A policy template may return a `config` block controlling, per output
//! type, whether the cached rendering is reused or refreshed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use katachi_template::TemplateError;

/// The four output types a policy can produce
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputKind {
    Spec,
    Labels,
    Annotations,
    Ctx,
}

impl OutputKind {
    pub const ALL: [OutputKind; 4] = [
        OutputKind::Spec,
        OutputKind::Labels,
        OutputKind::Annotations,
        OutputKind::Ctx,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputKind::Spec => "spec",
            OutputKind::Labels => "labels",
            OutputKind::Annotations => "annotations",
            OutputKind::Ctx => "ctx",
        }
    }
}

/// Refresh mode for one output type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Re-render on every reconciliation, still writing the cache
    #[default]
    Always,
    /// Use the cached output, subject to app-hash and cascade invalidation
    Never,
    /// Re-render once `interval` has elapsed since the last rendering
    Periodic,
}

/// Refresh rule for one output type
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefreshRule {
    #[serde(default)]
    pub mode: RefreshMode,
    /// Refresh interval in seconds, required for periodic mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// One-shot refresh regardless of mode
    #[serde(default)]
    pub force_refresh: bool,
}

impl RefreshRule {
    /// Whether the cached data rendered at `rendered_at` must be re-rendered
    pub fn should_refresh(&self, rendered_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.force_refresh {
            return true;
        }
        match self.mode {
            RefreshMode::Always => true,
            RefreshMode::Never => false,
            RefreshMode::Periodic => {
                let interval = Duration::seconds(self.interval.unwrap_or(0) as i64);
                now.signed_duration_since(rendered_at) >= interval
            }
        }
    }

    fn validate(&self, field: &str) -> Result<(), TemplateError> {
        if self.mode == RefreshMode::Periodic && self.interval.unwrap_or(0) == 0 {
            return Err(TemplateError::validate(
                format!("{}.interval", field),
                "periodic refresh requires interval > 0",
            ));
        }
        Ok(())
    }
}

/// Refresh rules per output type
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefreshConfig {
    #[serde(default)]
    pub spec: RefreshRule,
    #[serde(default)]
    pub labels: RefreshRule,
    #[serde(default)]
    pub annotations: RefreshRule,
    #[serde(default)]
    pub ctx: RefreshRule,
}

/// The `config` block of a rendered policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// Disabling here is equivalent to `enabled: false` at the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl PolicyConfig {
    pub fn rule(&self, kind: OutputKind) -> &RefreshRule {
        match kind {
            OutputKind::Spec => &self.refresh.spec,
            OutputKind::Labels => &self.refresh.labels,
            OutputKind::Annotations => &self.refresh.annotations,
            OutputKind::Ctx => &self.refresh.ctx,
        }
    }

    /// Reject rules that can never fire
    pub fn validate(&self) -> Result<(), TemplateError> {
        self.refresh.spec.validate("config.refresh.spec")?;
        self.refresh.labels.validate("config.refresh.labels")?;
        self.refresh.annotations.validate("config.refresh.annotations")?;
        self.refresh.ctx.validate("config.refresh.ctx")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_with_zero_interval_is_rejected_naming_the_field() {
        let config: PolicyConfig = serde_json::from_value(serde_json::json!({
            "refresh": {"spec": {"mode": "periodic", "interval": 0}}
        }))
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("config.refresh.spec.interval"));
    }

    #[test]
    fn unknown_config_field_is_rejected() {
        let result: Result<PolicyConfig, _> = serde_json::from_value(serde_json::json!({
            "refresh": {"spec": {"mode": "never"}},
            "transformType": "merge"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn refresh_decisions() {
        let now = Utc::now();
        let recent = now - Duration::seconds(30);
        let old = now - Duration::seconds(120);

        let always = RefreshRule { mode: RefreshMode::Always, ..Default::default() };
        assert!(always.should_refresh(recent, now));

        let never = RefreshRule { mode: RefreshMode::Never, ..Default::default() };
        assert!(!never.should_refresh(old, now));

        let periodic = RefreshRule {
            mode: RefreshMode::Periodic,
            interval: Some(60),
            ..Default::default()
        };
        assert!(!periodic.should_refresh(recent, now));
        assert!(periodic.should_refresh(old, now));

        let forced = RefreshRule {
            mode: RefreshMode::Never,
            force_refresh: true,
            ..Default::default()
        };
        assert!(forced.should_refresh(recent, now));
    }

    #[test]
    fn default_mode_is_always() {
        let rule = RefreshRule::default();
        assert_eq!(rule.mode, RefreshMode::Always);
    }
}
