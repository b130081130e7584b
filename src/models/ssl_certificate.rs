use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::{ResourceType, Scoped};
use crate::errors::AppError;
use crate::ssl::CertificateStatus;
use crate::utils::{parse_opt_uuid, parse_uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Notified,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SslCertificate {
    pub id: Uuid,
    pub hyperlink_id: Uuid,
    pub url: String,
    pub server_id: Uuid,
    pub expiry_date: Option<DateTime<Utc>>,
    pub last_checked: DateTime<Utc>,
    pub notification_status: NotificationStatus,
    pub issuer: String,
    pub subject: String,
    pub is_valid: bool,
    /// Department of the server behind the hyperlink
    pub department_id: Option<Uuid>,
    pub status: CertificateStatus,
    pub days_until_expiry: Option<i64>,
}

impl SslCertificate {
    /// Recomputes the derived status fields against `now`.
    pub fn evaluated_at(mut self, now: DateTime<Utc>) -> Self {
        self.days_until_expiry = self.expiry_date.map(|expiry| crate::ssl::days_until(expiry, now));
        self.status = CertificateStatus::from_days(self.days_until_expiry);
        self
    }
}

impl Auditable for SslCertificate {
    fn resource_type() -> ResourceType {
        ResourceType::SslCertificate
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn snapshot_repr(&self) -> String {
        format!("SSL for {}", self.url)
    }

    fn excluded_fields() -> &'static [&'static str] {
        &["url", "server_id", "department_id", "status", "days_until_expiry"]
    }
}

impl Scoped for SslCertificate {
    fn department_id(&self) -> Option<Uuid> {
        self.department_id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSslCertificate {
    pub id: String,
    pub hyperlink_id: String,
    pub url: String,
    pub server_id: String,
    pub expiry_date: Option<DateTime<Utc>>,
    pub last_checked: DateTime<Utc>,
    pub notification_status: NotificationStatus,
    pub issuer: String,
    pub subject: String,
    pub is_valid: bool,
    pub department_id: Option<String>,
}

pub const SSL_CERTIFICATE_COLUMNS: &str = "c.id, c.hyperlink_id, l.url, l.server_id, c.expiry_date, c.last_checked, c.notification_status, c.issuer, c.subject, c.is_valid, s.department_id";

impl TryFrom<DbSslCertificate> for SslCertificate {
    type Error = AppError;

    fn try_from(value: DbSslCertificate) -> Result<Self, Self::Error> {
        let certificate = SslCertificate {
            id: parse_uuid(&value.id)?,
            hyperlink_id: parse_uuid(&value.hyperlink_id)?,
            url: value.url,
            server_id: parse_uuid(&value.server_id)?,
            expiry_date: value.expiry_date,
            last_checked: value.last_checked,
            notification_status: value.notification_status,
            issuer: value.issuer,
            subject: value.subject,
            is_valid: value.is_valid,
            department_id: parse_opt_uuid(value.department_id.as_deref())?,
            status: CertificateStatus::Unknown,
            days_until_expiry: None,
        };
        Ok(certificate.evaluated_at(Utc::now()))
    }
}

/// Certificates bucketed by expiry status.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct CertificateGroups {
    pub critical: Vec<SslCertificate>,
    pub warning: Vec<SslCertificate>,
    pub valid: Vec<SslCertificate>,
    pub expired: Vec<SslCertificate>,
    pub unknown: Vec<SslCertificate>,
}

impl CertificateGroups {
    pub fn from_certificates(certificates: impl IntoIterator<Item = SslCertificate>) -> Self {
        let mut groups = CertificateGroups::default();
        for certificate in certificates {
            let bucket = match certificate.status {
                CertificateStatus::Critical => &mut groups.critical,
                CertificateStatus::Warning => &mut groups.warning,
                CertificateStatus::Valid => &mut groups.valid,
                CertificateStatus::Expired => &mut groups.expired,
                CertificateStatus::Unknown => &mut groups.unknown,
            };
            bucket.push(certificate);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn certificate(expiry: Option<DateTime<Utc>>) -> SslCertificate {
        SslCertificate {
            id: Uuid::new_v4(),
            hyperlink_id: Uuid::new_v4(),
            url: "https://example.com".into(),
            server_id: Uuid::new_v4(),
            expiry_date: expiry,
            last_checked: Utc::now(),
            notification_status: NotificationStatus::Pending,
            issuer: String::new(),
            subject: String::new(),
            is_valid: true,
            department_id: None,
            status: CertificateStatus::Unknown,
            days_until_expiry: None,
        }
    }

    #[test]
    fn groups_follow_days_to_expiry() {
        let now = Utc::now();
        let certificates = [
            certificate(Some(now + Duration::days(3) + Duration::hours(1))),
            certificate(Some(now + Duration::days(20) + Duration::hours(1))),
            certificate(Some(now + Duration::days(90))),
            certificate(Some(now - Duration::days(2))),
            certificate(None),
        ]
        .map(|c| c.evaluated_at(now));

        let groups = CertificateGroups::from_certificates(certificates);
        assert_eq!(groups.critical.len(), 1);
        assert_eq!(groups.warning.len(), 1);
        assert_eq!(groups.valid.len(), 1);
        assert_eq!(groups.expired.len(), 1);
        assert_eq!(groups.unknown.len(), 1);
        assert_eq!(groups.critical[0].days_until_expiry, Some(3));
    }
}
