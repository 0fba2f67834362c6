//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::gatekeeper::admission::v1::admission_service_server::AdmissionServiceServer;
use super::service::AdmissionServiceImpl;
use crate::admission::AdmissionController;
use crate::error::{GatekeeperError, Result};

/// gRPC server for the admission service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission controller shared by all calls
    controller: Arc<AdmissionController>,
    /// Deadline applied to each check
    request_timeout: Duration,
}

impl GrpcServer {
    /// Create a new gRPC server.
    pub fn new(addr: SocketAddr, controller: Arc<AdmissionController>, request_timeout: Duration) -> Self {
        Self {
            addr,
            controller,
            request_timeout,
        }
    }

    fn service(&self) -> AdmissionServiceServer<AdmissionServiceImpl> {
        AdmissionServiceServer::new(AdmissionServiceImpl::new(
            self.controller.clone(),
            self.request_timeout,
        ))
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        info!(
            addr = %self.addr,
            "Starting gRPC server for AdmissionService with graceful shutdown"
        );

        Server::builder()
            .add_service(self.service())
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                GatekeeperError::Grpc(e)
            })
    }
}
