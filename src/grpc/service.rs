//! Admission service implementation.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tonic::{Request, Response, Status};
use tracing::{debug, instrument, warn};

use super::proto::gatekeeper::admission::v1::{
    admission_service_server::AdmissionService, CheckRequest, CheckResponse, Decision,
};
use crate::admission::{Admission, AdmissionController, AdmissionRequest};

/// Implementation of the `AdmissionService` gRPC interface.
pub struct AdmissionServiceImpl {
    /// The admission controller
    controller: Arc<AdmissionController>,
    /// Deadline applied to each check, store round trip included
    request_timeout: Duration,
}

impl AdmissionServiceImpl {
    /// Create a new AdmissionServiceImpl around the given controller.
    pub fn new(controller: Arc<AdmissionController>, request_timeout: Duration) -> Self {
        Self {
            controller,
            request_timeout,
        }
    }
}

/// Map an admission outcome onto the wire response.
fn to_response(admission: &Admission) -> CheckResponse {
    let decision = match admission {
        Admission::Bypassed(_) | Admission::Admitted => Decision::Continue,
        Admission::Rejected(_) => Decision::Reject,
        Admission::Failed(_) => Decision::Fail,
    };

    match admission.rejection() {
        Some(rejection) => CheckResponse {
            decision: decision.into(),
            reason: rejection.reason.code().to_string(),
            message: rejection.message.clone(),
            http_status: u32::from(rejection.reason.http_status()),
        },
        None => CheckResponse {
            decision: decision.into(),
            reason: String::new(),
            message: String::new(),
            http_status: 200,
        },
    }
}

#[tonic::async_trait]
impl AdmissionService for AdmissionServiceImpl {
    /// Decide whether the described request may continue.
    #[instrument(
        skip(self, request),
        fields(
            path = %request.get_ref().path,
            client_addr = %request.get_ref().client_addr,
            user_id = request.get_ref().user_id
        )
    )]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let req = request.into_inner();

        // Validate the request
        if req.path.is_empty() {
            warn!("Received admission check with empty path");
            return Err(Status::invalid_argument("path is required"));
        }

        let client_addr: IpAddr = req.client_addr.parse().map_err(|_| {
            warn!(client_addr = %req.client_addr, "Received admission check with invalid client address");
            Status::invalid_argument("client_addr must be an IP address")
        })?;

        let mut admission_request = AdmissionRequest::new(req.path, client_addr).with_user_id(req.user_id);
        if let Some(deadline) = Instant::now().checked_add(self.request_timeout) {
            admission_request = admission_request.with_deadline(deadline);
        }

        let admission = self.controller.check(&admission_request).await;
        let response = to_response(&admission);

        debug!(admission = ?admission, "Admission decision made");

        Ok(Response::new(response))
    }
}
