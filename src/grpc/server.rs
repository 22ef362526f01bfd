//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tracing::{error, info};

use super::admin::LimiterAdminService;
use super::proto::envoy::service::ratelimit::v3::rate_limit_service_server::RateLimitServiceServer;
use super::proto::vigil::admin::v1::limiter_admin_server::LimiterAdminServer;
use super::service::RateLimitServiceImpl;
use crate::error::{Result, VigilError};
use crate::ratelimit::{CadenceTracker, RateLimiterRegistry};

/// gRPC server hosting the rate limit and admin services.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    registry: Arc<RateLimiterRegistry>,
    cadence: Arc<CadenceTracker>,
}

impl GrpcServer {
    pub fn new(
        addr: SocketAddr,
        registry: Arc<RateLimiterRegistry>,
        cadence: Arc<CadenceTracker>,
    ) -> Self {
        Self {
            addr,
            registry,
            cadence,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn router(&self) -> Router {
        let rls = RateLimitServiceImpl::new(Arc::clone(&self.registry), Arc::clone(&self.cadence));
        let admin = LimiterAdminService::new(Arc::clone(&self.registry));

        Server::builder()
            .add_service(RateLimitServiceServer::new(rls))
            .add_service(LimiterAdminServer::new(admin))
    }

    /// Start the gRPC server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.addr, "Starting gRPC server");

        self.router().serve(self.addr).await.map_err(|e| {
            error!(error = %e, "gRPC server failed");
            VigilError::Grpc(e)
        })
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        info!(addr = %self.addr, "Starting gRPC server with graceful shutdown");

        self.router()
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                VigilError::Grpc(e)
            })
    }
}
