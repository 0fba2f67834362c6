//! Request descriptor handed over by the pipeline.

use std::net::IpAddr;

use tokio::time::Instant;

/// What the admission layer needs to know about an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// Request path, e.g. `/api/orders`
    pub path: String,
    /// Network address of the caller
    pub client_addr: IpAddr,
    /// User id established by upstream authentication, if any
    pub user_id: Option<i64>,
    /// Point after which the check should give up
    pub deadline: Option<Instant>,
}

impl AdmissionRequest {
    /// An anonymous request without a deadline.
    pub fn new(path: impl Into<String>, client_addr: IpAddr) -> Self {
        Self {
            path: path.into(),
            client_addr,
            user_id: None,
            deadline: None,
        }
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The user id if it identifies a caller. Zero and negative ids count as
    /// anonymous.
    pub fn authenticated_user(&self) -> Option<i64> {
        self.user_id.filter(|id| *id > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticated_user_must_be_positive() {
        let addr: IpAddr = "10.1.2.3".parse().unwrap();

        assert_eq!(AdmissionRequest::new("/", addr).authenticated_user(), None);
        assert_eq!(AdmissionRequest::new("/", addr).with_user_id(0).authenticated_user(), None);
        assert_eq!(AdmissionRequest::new("/", addr).with_user_id(-7).authenticated_user(), None);
        assert_eq!(AdmissionRequest::new("/", addr).with_user_id(42).authenticated_user(), Some(42));
    }
}
