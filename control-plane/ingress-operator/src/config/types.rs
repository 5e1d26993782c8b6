use std::time::Duration;

use envconfig::Envconfig;

pub const DEFAULT_ROUTER_IMAGE: &str = "quay.io/openshift/origin-haproxy-router:latest";
/// Upper bound for the event window: one week.
pub const MAX_EVENT_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace holding IngressController resources.
    /// Env: INGRESS_OPERATOR_NAMESPACE
    #[envconfig(
        from = "INGRESS_OPERATOR_NAMESPACE",
        default = "openshift-ingress-operator"
    )]
    pub namespace: String,

    /// Namespace where router workloads and their dependents live.
    /// Env: INGRESS_OPERATOR_ROUTER_NAMESPACE
    #[envconfig(
        from = "INGRESS_OPERATOR_ROUTER_NAMESPACE",
        default = "openshift-ingress"
    )]
    pub router_namespace: String,

    #[envconfig(from = "INGRESS_OPERATOR_IMAGE")]
    pub router_image: Option<String>,

    /// Operator release reported on the ClusterOperator record.
    /// Env: RELEASE_VERSION
    #[envconfig(from = "RELEASE_VERSION")]
    pub release_version: Option<String>,

    #[envconfig(from = "INGRESS_OPERATOR_LB_POLL_SECS", default = "15")]
    pub lb_poll_secs: u64,

    #[envconfig(from = "INGRESS_OPERATOR_ERROR_REQUEUE_SECS", default = "30")]
    pub error_requeue_secs: u64,

    /// How far back router namespace events are considered for status.
    /// Env: INGRESS_OPERATOR_EVENT_WINDOW_SECS
    #[envconfig(from = "INGRESS_OPERATOR_EVENT_WINDOW_SECS", default = "600")]
    pub event_window_secs: u64,

    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "openshift-ingress-operator".into(),
            router_namespace: "openshift-ingress".into(),
            router_image: None,
            release_version: None,
            lb_poll_secs: 15,
            error_requeue_secs: 30,
            event_window_secs: 600,
            http_port: 8088,
        }
    }
}

impl OperatorConfig {
    /// Fill values derived from others while respecting explicit env settings.
    ///
    /// Rules:
    /// - router image falls back to the stock haproxy router
    /// - release version falls back to the crate version
    /// - zero poll/requeue intervals are raised to one second
    /// - the event window is capped at [`MAX_EVENT_WINDOW_SECS`]
    pub fn apply_defaults(mut self) -> Self {
        if self.router_image.as_deref().is_none_or(str::is_empty) {
            self.router_image = Some(DEFAULT_ROUTER_IMAGE.to_string());
        }
        if self.release_version.as_deref().is_none_or(str::is_empty) {
            self.release_version = Some(env!("CARGO_PKG_VERSION").to_string());
        }
        self.lb_poll_secs = self.lb_poll_secs.max(1);
        self.error_requeue_secs = self.error_requeue_secs.max(1);
        self.event_window_secs =
            self.event_window_secs.min(MAX_EVENT_WINDOW_SECS);
        self
    }

    pub fn router_image(&self) -> &str {
        self.router_image.as_deref().unwrap_or(DEFAULT_ROUTER_IMAGE)
    }

    pub fn release_version(&self) -> &str {
        self.release_version.as_deref().unwrap_or_default()
    }

    pub fn lb_poll_interval(&self) -> Duration {
        Duration::from_secs(self.lb_poll_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    pub fn event_window(&self) -> Duration {
        Duration::from_secs(self.event_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_image_and_version() {
        let cfg = OperatorConfig::default().apply_defaults();
        assert_eq!(cfg.router_image(), DEFAULT_ROUTER_IMAGE);
        assert_eq!(cfg.release_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn defaults_respect_env_overrides() {
        let cfg = OperatorConfig {
            router_image: Some("registry.local/router:1".into()),
            release_version: Some("4.1.0".into()),
            ..Default::default()
        }
        .apply_defaults();
        assert_eq!(cfg.router_image(), "registry.local/router:1");
        assert_eq!(cfg.release_version(), "4.1.0");
    }

    #[test]
    fn zero_intervals_are_raised() {
        let cfg = OperatorConfig {
            lb_poll_secs: 0,
            error_requeue_secs: 0,
            ..Default::default()
        }
        .apply_defaults();
        assert_eq!(cfg.lb_poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.error_requeue(), Duration::from_secs(1));
    }

    #[test]
    fn oversized_event_window_is_capped() {
        let cfg = OperatorConfig {
            event_window_secs: u64::MAX,
            ..Default::default()
        }
        .apply_defaults();
        assert_eq!(
            cfg.event_window(),
            Duration::from_secs(MAX_EVENT_WINDOW_SECS)
        );
        let untouched = OperatorConfig::default().apply_defaults();
        assert_eq!(untouched.event_window(), Duration::from_secs(600));
    }
}
