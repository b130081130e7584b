//! SSL certificate tracking
//!
//! Certificates are discovered by probing enabled hyperlinks. The probe and the mail
//! transport are external collaborators behind [`CertificateProbe`] and [`Notifier`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

pub mod jobs;

pub use jobs::{
    check_all, check_one, mark_expired, send_expiry_notifications, spawn_scheduler, CheckSummary, NotificationSummary,
};

const CRITICAL_DAYS: i64 = 7;
const WARNING_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Valid,
    Warning,
    Critical,
    Expired,
    Unknown,
}

impl CertificateStatus {
    pub fn from_days(days_until_expiry: Option<i64>) -> Self {
        match days_until_expiry {
            None => CertificateStatus::Unknown,
            Some(days) if days < 0 => CertificateStatus::Expired,
            Some(days) if days < CRITICAL_DAYS => CertificateStatus::Critical,
            Some(days) if days < WARNING_DAYS => CertificateStatus::Warning,
            Some(_) => CertificateStatus::Valid,
        }
    }
}

/// Whole days until `expiry`, rounded down (anything already past is negative).
pub fn days_until(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expiry - now).num_seconds().div_euclid(86_400)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub expiry_date: Option<DateTime<Utc>>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub is_valid: bool,
}

#[async_trait]
pub trait CertificateProbe: Send + Sync {
    async fn is_reachable(&self, url: &str) -> bool;

    async fn probe(&self, url: &str) -> anyhow::Result<ProbeResult>;
}

/// Probe used when no network prober is configured: every URL is unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledProbe;

#[async_trait]
impl CertificateProbe for DisabledProbe {
    async fn is_reachable(&self, url: &str) -> bool {
        tracing::debug!(url, "certificate probe disabled");
        false
    }

    async fn probe(&self, url: &str) -> anyhow::Result<ProbeResult> {
        anyhow::bail!("certificate probe disabled, cannot inspect {url}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiryNotice {
    pub certificate_id: Uuid,
    pub server_name: String,
    pub url: String,
    pub days: i64,
    pub expiry_date: DateTime<Utc>,
    pub issuer: String,
    pub recipients: Vec<String>,
}

impl ExpiryNotice {
    pub fn subject(&self) -> String {
        let host = hostname_of(&self.url).unwrap_or_else(|| self.url.clone());
        format!("SSL Certificate Expiring in {} days: {}", self.days, host)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: &ExpiryNotice) -> anyhow::Result<()>;
}

/// Writes notices to the log instead of mailing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: &ExpiryNotice) -> anyhow::Result<()> {
        tracing::info!(
            certificate_id = %notice.certificate_id,
            recipients = ?notice.recipients,
            expiry_date = %notice.expiry_date,
            "{}",
            notice.subject()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslSettings {
    /// Day offsets before expiry at which notices go out
    pub notification_days: Vec<i64>,
    pub check_interval: Duration,
    pub scheduler_enabled: bool,
}

impl Default for SslSettings {
    fn default() -> Self {
        Self {
            notification_days: vec![30, 14, 7, 3, 1],
            check_interval: Duration::from_secs(3600),
            scheduler_enabled: true,
        }
    }
}

impl SslSettings {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let notification_days = match std::env::var("SSL_NOTIFICATION_DAYS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| part.parse::<i64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| {
                    AppError::configuration("SSL_NOTIFICATION_DAYS must be a comma separated list of integers")
                })?,
            Err(_) => defaults.notification_days,
        };

        let check_interval = std::env::var("SSL_CHECK_INTERVAL_SECS")
            .map(|val| val.parse::<u64>())
            .unwrap_or(Ok(defaults.check_interval.as_secs()))
            .map_err(|_| AppError::configuration("SSL_CHECK_INTERVAL_SECS must be a valid integer"))?;

        let scheduler_enabled = std::env::var("SSL_SCHEDULER")
            .map(|val| !matches!(val.to_ascii_lowercase().as_str(), "off" | "0" | "false"))
            .unwrap_or(true);

        Ok(Self {
            notification_days,
            check_interval: Duration::from_secs(check_interval.max(1)),
            scheduler_enabled,
        })
    }
}

/// Prefixes `https://` when the URL has no scheme.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Host part of a URL, without scheme, credentials or port.
pub fn hostname_of(url: &str) -> Option<String> {
    let normalized = normalize_url(url);
    let rest = normalized.split_once("://").map(|(_, rest)| rest)?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host_port = authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority);
    let host = host_port.split(':').next().unwrap_or(host_port);
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn status_thresholds() {
        assert_eq!(CertificateStatus::from_days(None), CertificateStatus::Unknown);
        assert_eq!(CertificateStatus::from_days(Some(-1)), CertificateStatus::Expired);
        assert_eq!(CertificateStatus::from_days(Some(0)), CertificateStatus::Critical);
        assert_eq!(CertificateStatus::from_days(Some(6)), CertificateStatus::Critical);
        assert_eq!(CertificateStatus::from_days(Some(7)), CertificateStatus::Warning);
        assert_eq!(CertificateStatus::from_days(Some(29)), CertificateStatus::Warning);
        assert_eq!(CertificateStatus::from_days(Some(30)), CertificateStatus::Valid);
    }

    #[test]
    fn days_until_rounds_down() {
        let now = Utc::now();
        assert_eq!(days_until(now + ChronoDuration::hours(36), now), 1);
        assert_eq!(days_until(now - ChronoDuration::hours(12), now), -1);
        assert_eq!(days_until(now, now), 0);
    }

    #[test]
    fn urls_are_normalized() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(hostname_of("example.com:8443/path").as_deref(), Some("example.com"));
        assert_eq!(hostname_of("https://user@Example.com/x").as_deref(), Some("example.com"));
        assert_eq!(hostname_of("https://"), None);
    }

    #[test]
    fn notice_subject_names_the_host() {
        let notice = ExpiryNotice {
            certificate_id: Uuid::new_v4(),
            server_name: "web-01".into(),
            url: "https://Shop.example.com:8443/login".into(),
            days: 7,
            expiry_date: Utc::now(),
            issuer: "Test CA".into(),
            recipients: vec![],
        };
        assert_eq!(notice.subject(), "SSL Certificate Expiring in 7 days: shop.example.com");
    }

    #[test]
    fn default_settings() {
        let settings = SslSettings::default();
        assert_eq!(settings.notification_days, vec![30, 14, 7, 3, 1]);
        assert_eq!(settings.check_interval, Duration::from_secs(3600));
        assert!(settings.scheduler_enabled);
    }
}
