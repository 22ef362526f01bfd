//! Administrative gRPC service for blocking, unblocking and inspecting
//! identifiers.

use std::sync::Arc;
use std::time::Duration;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use super::proto::vigil::admin::v1 as admin_proto;
use super::proto::vigil::admin::v1::limiter_admin_server::LimiterAdmin;
use crate::ratelimit::{AdaptiveRateLimiter, RateLimiterRegistry, RequestRecord};

/// Implementation of `vigil.admin.v1.LimiterAdmin`.
pub struct LimiterAdminService {
    registry: Arc<RateLimiterRegistry>,
}

impl LimiterAdminService {
    pub fn new(registry: Arc<RateLimiterRegistry>) -> Self {
        Self { registry }
    }

    /// The named policy's limiter; an empty name selects the default policy.
    fn limiter_for(&self, policy: &str) -> Result<Arc<AdaptiveRateLimiter>, Status> {
        if policy.is_empty() {
            return Ok(self.registry.resolve(self.registry.default_policy()));
        }
        self.registry
            .get(policy)
            .ok_or_else(|| Status::not_found(format!("unknown policy '{}'", policy)))
    }
}

fn require_identifier(identifier: &str) -> Result<(), Status> {
    if identifier.is_empty() {
        return Err(Status::invalid_argument("identifier is required"));
    }
    Ok(())
}

impl From<RequestRecord> for admin_proto::RequestRecord {
    fn from(record: RequestRecord) -> Self {
        Self {
            count: record.count,
            reset_time_ms: record.reset_time,
            blocked: record.blocked,
            block_until_ms: record.block_until.unwrap_or(0),
            suspicion_score: record.suspicion_score,
        }
    }
}

#[tonic::async_trait]
impl LimiterAdmin for LimiterAdminService {
    #[instrument(skip(self, request), fields(identifier = %request.get_ref().identifier))]
    async fn block(
        &self,
        request: Request<admin_proto::BlockRequest>,
    ) -> Result<Response<admin_proto::BlockResponse>, Status> {
        let req = request.into_inner();
        require_identifier(&req.identifier)?;
        let limiter = self.limiter_for(&req.policy)?;

        let duration = req
            .duration
            .map(Duration::try_from)
            .transpose()
            .map_err(|e| Status::invalid_argument(format!("invalid duration: {}", e)))?;

        limiter.block(&req.identifier, duration);

        let block_until_ms = limiter
            .get_status(&req.identifier)
            .and_then(|r| r.block_until)
            .unwrap_or_else(|| limiter.clock().now_ms());

        info!(policy = %limiter.name(), block_until_ms, "Admin block applied");
        Ok(Response::new(admin_proto::BlockResponse { block_until_ms }))
    }

    #[instrument(skip(self, request), fields(identifier = %request.get_ref().identifier))]
    async fn unblock(
        &self,
        request: Request<admin_proto::IdentifierRequest>,
    ) -> Result<Response<admin_proto::RemoveResponse>, Status> {
        let req = request.into_inner();
        require_identifier(&req.identifier)?;
        let limiter = self.limiter_for(&req.policy)?;

        let removed = limiter.unblock(&req.identifier);
        Ok(Response::new(admin_proto::RemoveResponse { removed }))
    }

    #[instrument(skip(self, request), fields(identifier = %request.get_ref().identifier))]
    async fn reset(
        &self,
        request: Request<admin_proto::IdentifierRequest>,
    ) -> Result<Response<admin_proto::RemoveResponse>, Status> {
        let req = request.into_inner();
        require_identifier(&req.identifier)?;
        let limiter = self.limiter_for(&req.policy)?;

        let removed = limiter.reset(&req.identifier);
        Ok(Response::new(admin_proto::RemoveResponse { removed }))
    }

    async fn get_status(
        &self,
        request: Request<admin_proto::IdentifierRequest>,
    ) -> Result<Response<admin_proto::StatusResponse>, Status> {
        let req = request.into_inner();
        require_identifier(&req.identifier)?;
        let limiter = self.limiter_for(&req.policy)?;

        let record = limiter.get_status(&req.identifier).map(Into::into);
        Ok(Response::new(admin_proto::StatusResponse { record }))
    }

    async fn list_policies(
        &self,
        _request: Request<admin_proto::ListPoliciesRequest>,
    ) -> Result<Response<admin_proto::ListPoliciesResponse>, Status> {
        let policies = self
            .registry
            .policy_names()
            .into_iter()
            .filter_map(|name| self.registry.get(&name))
            .map(|limiter| {
                let config = limiter.config();
                admin_proto::Policy {
                    name: limiter.name().to_string(),
                    window_ms: config.window_ms(),
                    max_requests: config.max_requests,
                    block_duration_ms: config.block_duration_ms(),
                    tracked_identifiers: limiter.tracked_identifiers() as u64,
                }
            })
            .collect();

        Ok(Response::new(admin_proto::ListPoliciesResponse {
            policies,
            default_policy: self.registry.default_policy().to_string(),
        }))
    }
}
