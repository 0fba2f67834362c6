//! Quota key selection.

use super::request::AdmissionRequest;

/// Where a quota identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaSource {
    /// Authenticated user id
    User,
    /// Client network address
    Address,
}

/// Per-caller limits, one for each kind of identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub per_user: i64,
    pub per_address: i64,
}

/// The bucket a request is charged against and the size of that bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    /// Store key: the decimal user id or the rendered IP address
    pub identifier: String,
    pub limit: i64,
    pub source: QuotaSource,
}

impl Quota {
    /// Pick the quota for a request.
    ///
    /// An authenticated user is limited by user id with the per-user limit;
    /// anyone else by client address with the per-address limit. A rendered
    /// IP always contains `.` or `:`, so the two kinds never share a key.
    pub fn resolve(request: &AdmissionRequest, limits: &QuotaLimits) -> Self {
        match request.authenticated_user() {
            Some(user_id) => Self {
                identifier: user_id.to_string(),
                limit: limits.per_user,
                source: QuotaSource::User,
            },
            None => Self {
                identifier: request.client_addr.to_string(),
                limit: limits.per_address,
                source: QuotaSource::Address,
            },
        }
    }
}

impl std::fmt::Display for Quota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.source {
            QuotaSource::User => "user",
            QuotaSource::Address => "address",
        };
        write!(f, "{}:{}", kind, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: QuotaLimits = QuotaLimits {
        per_user: 50,
        per_address: 10,
    };

    #[test]
    fn test_user_quota() {
        let request = AdmissionRequest::new("/api", "10.0.0.1".parse().unwrap()).with_user_id(123);
        let quota = Quota::resolve(&request, &LIMITS);

        assert_eq!(quota.identifier, "123");
        assert_eq!(quota.limit, 50);
        assert_eq!(quota.source, QuotaSource::User);
        assert_eq!(quota.to_string(), "user:123");
    }

    #[test]
    fn test_address_quota() {
        let request = AdmissionRequest::new("/api", "2001:db8::1".parse().unwrap());
        let quota = Quota::resolve(&request, &LIMITS);

        assert_eq!(quota.identifier, "2001:db8::1");
        assert_eq!(quota.limit, 10);
        assert_eq!(quota.source, QuotaSource::Address);
        assert_eq!(quota.to_string(), "address:2001:db8::1");
    }

    #[test]
    fn test_non_positive_user_falls_back_to_address() {
        let request = AdmissionRequest::new("/api", "10.0.0.1".parse().unwrap()).with_user_id(0);
        let quota = Quota::resolve(&request, &LIMITS);

        assert_eq!(quota.identifier, "10.0.0.1");
        assert_eq!(quota.source, QuotaSource::Address);
    }
}
