//! Rate limit service implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::envoy::config::core::v3::HeaderValue;
use super::proto::envoy::service::ratelimit::v3::{
    rate_limit_response::{rate_limit::Unit, Code, DescriptorStatus, RateLimit},
    rate_limit_service_server::RateLimitService,
    RateLimitRequest, RateLimitResponse,
};

use crate::ratelimit::{
    AdaptiveRateLimiter, AdmissionRequest, CadenceTracker, RateLimitResult, RateLimiterRegistry,
};

/// Implementation of the Envoy RateLimitService gRPC interface.
///
/// The request domain selects the policy. Each distinct client named by the
/// descriptors is checked once, and every descriptor reports its client's
/// decision.
pub struct RateLimitServiceImpl {
    registry: Arc<RateLimiterRegistry>,
    cadence: Arc<CadenceTracker>,
}

impl RateLimitServiceImpl {
    pub fn new(registry: Arc<RateLimiterRegistry>, cadence: Arc<CadenceTracker>) -> Self {
        Self { registry, cadence }
    }
}

#[tonic::async_trait]
impl RateLimitService for RateLimitServiceImpl {
    /// Determine whether rate limiting should take place.
    #[instrument(
        skip(self, request),
        fields(
            domain = %request.get_ref().domain,
            descriptor_count = request.get_ref().descriptors.len(),
        )
    )]
    async fn should_rate_limit(
        &self,
        request: Request<RateLimitRequest>,
    ) -> Result<Response<RateLimitResponse>, Status> {
        let req = request.into_inner();

        debug!(
            domain = %req.domain,
            descriptors = ?req.descriptors,
            hits_addend = req.hits_addend,
            "Processing rate limit request"
        );

        if req.domain.is_empty() {
            warn!("Received rate limit request with empty domain");
            return Err(Status::invalid_argument("domain is required"));
        }

        if req.descriptors.is_empty() {
            warn!("Received rate limit request with no descriptors");
            return Err(Status::invalid_argument("at least one descriptor is required"));
        }

        let limiter = self.registry.resolve(&req.domain);
        let now = limiter.clock().now_ms();

        let admissions: Vec<AdmissionRequest> = req
            .descriptors
            .iter()
            .map(AdmissionRequest::from_descriptor)
            .collect();

        // Descriptors naming the same client are one request for it
        let mut clients: Vec<AdmissionRequest> = Vec::new();
        for admission in &admissions {
            match clients.iter_mut().find(|c| c.identifier == admission.identifier) {
                Some(client) => client.metadata.fill_from(admission.metadata.clone()),
                None => clients.push(admission.clone()),
            }
        }

        let mut decisions: HashMap<String, RateLimitResult> = HashMap::with_capacity(clients.len());
        for mut client in clients {
            let interval = self.cadence.observe(limiter.name(), &client.identifier, now);
            if client.metadata.time_since_last_request_ms.is_none() {
                client.metadata.time_since_last_request_ms = interval;
            }

            let result = limiter.check(&client.identifier, Some(&client.metadata));

            debug!(
                policy = %limiter.name(),
                request = %client,
                success = result.success,
                remaining = result.remaining,
                "Client checked"
            );

            decisions.insert(client.identifier, result);
        }

        let results: Vec<RateLimitResult> = admissions
            .iter()
            .filter_map(|a| decisions.get(&a.identifier).cloned())
            .collect();
        let statuses: Vec<DescriptorStatus> = results
            .iter()
            .map(|r| descriptor_status(&limiter, r, now))
            .collect();

        let over_limit = results.iter().any(|r| !r.success);
        let overall_code = if over_limit { Code::OverLimit } else { Code::Ok };

        let response = RateLimitResponse {
            overall_code: overall_code.into(),
            statuses,
            response_headers_to_add: rate_limit_headers(&results),
            request_headers_to_add: Vec::new(),
            raw_body: Vec::new(),
            dynamic_metadata: None,
        };

        info!(
            domain = %req.domain,
            policy = %limiter.name(),
            overall_code = ?overall_code,
            "Rate limit decision made"
        );

        Ok(Response::new(response))
    }
}

fn descriptor_status(
    limiter: &AdaptiveRateLimiter,
    result: &RateLimitResult,
    now: u64,
) -> DescriptorStatus {
    let code = if result.success { Code::Ok } else { Code::OverLimit };
    let until_reset = Duration::from_millis(result.reset.saturating_sub(now));

    DescriptorStatus {
        code: code.into(),
        current_limit: Some(RateLimit {
            name: limiter.name().to_string(),
            requests_per_unit: saturating_u32(result.limit),
            unit: unit_for_window(limiter.config().window).into(),
        }),
        limit_remaining: saturating_u32(result.remaining),
        duration_until_reset: Some(prost_types::Duration {
            seconds: until_reset.as_secs() as i64,
            nanos: until_reset.subsec_nanos() as i32,
        }),
    }
}

/// `X-RateLimit-*` headers for the most restrictive descriptor, plus
/// `Retry-After` when any descriptor was denied.
fn rate_limit_headers(results: &[RateLimitResult]) -> Vec<HeaderValue> {
    let header = |key: &str, value: u64| HeaderValue {
        key: key.to_string(),
        value: value.to_string(),
    };

    let mut headers = Vec::new();
    let (Some(limit), Some(remaining), Some(reset)) = (
        results.iter().map(|r| r.limit).min(),
        results.iter().map(|r| r.remaining).min(),
        results.iter().map(|r| r.reset).max(),
    ) else {
        return headers;
    };

    headers.push(header("X-RateLimit-Limit", limit));
    headers.push(header("X-RateLimit-Remaining", remaining));
    headers.push(header("X-RateLimit-Reset", reset.div_ceil(1000)));

    if let Some(retry_after) = results.iter().filter_map(|r| r.retry_after).max() {
        headers.push(header("Retry-After", retry_after));
    }

    headers
}

/// Map a window length onto Envoy's rate limit unit, if it has one.
fn unit_for_window(window: Duration) -> Unit {
    match window.as_millis() {
        1_000 => Unit::Second,
        60_000 => Unit::Minute,
        3_600_000 => Unit::Hour,
        86_400_000 => Unit::Day,
        _ => Unit::Unknown,
    }
}

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::grpc::proto::envoy::extensions::common::ratelimit::v3::{
        rate_limit_descriptor::Entry, RateLimitDescriptor,
    };
    use tokio_test::{assert_err, assert_ok};

    const START: u64 = 1_700_000_000_000;

    fn service() -> (RateLimitServiceImpl, Arc<RateLimiterRegistry>, ManualClock) {
        let clock = ManualClock::new(START);
        let registry = RateLimiterRegistry::with_presets(Arc::new(clock.clone())).unwrap();
        let registry = Arc::new(registry);
        let service =
            RateLimitServiceImpl::new(Arc::clone(&registry), Arc::new(CadenceTracker::new()));
        (service, registry, clock)
    }

    fn descriptor(entries: &[(&str, &str)]) -> RateLimitDescriptor {
        RateLimitDescriptor {
            entries: entries
                .iter()
                .map(|(k, v)| Entry {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    fn browser(ip: &str) -> RateLimitDescriptor {
        descriptor(&[
            ("remote_address", ip),
            ("user_agent", "Mozilla/5.0 (X11; Linux x86_64; rv:128.0)"),
            ("path", "/api/quote"),
        ])
    }

    fn request(domain: &str, descriptors: Vec<RateLimitDescriptor>) -> Request<RateLimitRequest> {
        Request::new(RateLimitRequest {
            domain: domain.to_string(),
            descriptors,
            hits_addend: 1,
        })
    }

    fn header<'a>(response: &'a RateLimitResponse, key: &str) -> Option<&'a str> {
        response
            .response_headers_to_add
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_str())
    }

    #[tokio::test]
    async fn test_empty_domain_rejected() {
        let (service, _registry, _clock) = service();

        let result = service.should_rate_limit(request("", vec![browser("10.0.0.1")])).await;
        let status = assert_err!(result);
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_empty_descriptors_rejected() {
        let (service, _registry, _clock) = service();

        let result = service.should_rate_limit(request("api", vec![])).await;
        let status = assert_err!(result);
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_valid_request_returns_ok() {
        let (service, _registry, _clock) = service();

        let response = assert_ok!(
            service
                .should_rate_limit(request("api", vec![browser("10.0.0.1")]))
                .await
        )
        .into_inner();

        assert_eq!(response.overall_code, i32::from(Code::Ok));
        assert_eq!(response.statuses.len(), 1);

        let status = &response.statuses[0];
        let limit = status.current_limit.as_ref().unwrap();
        assert_eq!(limit.name, "api");
        assert_eq!(limit.requests_per_unit, 100);
        assert_eq!(limit.unit, i32::from(Unit::Minute));
        assert_eq!(status.limit_remaining, 99);
        assert_eq!(status.duration_until_reset.as_ref().unwrap().seconds, 60);

        assert_eq!(header(&response, "X-RateLimit-Limit"), Some("100"));
        assert_eq!(header(&response, "X-RateLimit-Remaining"), Some("99"));
        assert_eq!(header(&response, "Retry-After"), None);
    }

    #[tokio::test]
    async fn test_over_limit_sets_retry_after() {
        let (service, _registry, clock) = service();

        for _ in 0..5 {
            let response = assert_ok!(
                service
                    .should_rate_limit(request("auth", vec![browser("10.0.0.2")]))
                    .await
            )
            .into_inner();
            assert_eq!(response.overall_code, i32::from(Code::Ok));
            clock.advance_ms(1_000);
        }

        let response = assert_ok!(
            service
                .should_rate_limit(request("auth", vec![browser("10.0.0.2")]))
                .await
        )
        .into_inner();

        assert_eq!(response.overall_code, i32::from(Code::OverLimit));
        assert_eq!(response.statuses[0].code, i32::from(Code::OverLimit));
        assert_eq!(response.statuses[0].limit_remaining, 0);
        assert_eq!(header(&response, "Retry-After"), Some("3600"));
    }

    #[tokio::test]
    async fn test_unknown_domain_uses_default_policy() {
        let (service, _registry, _clock) = service();

        let response = assert_ok!(
            service
                .should_rate_limit(request("storefront", vec![browser("10.0.0.3")]))
                .await
        )
        .into_inner();

        let limit = response.statuses[0].current_limit.as_ref().unwrap();
        assert_eq!(limit.name, "general");
        assert_eq!(limit.requests_per_unit, 200);
    }

    #[tokio::test]
    async fn test_rapid_requests_raise_suspicion() {
        let (service, registry, clock) = service();
        let scanner = descriptor(&[("remote_address", "10.0.0.4"), ("path", "/admin/login")]);

        assert_ok!(service.should_rate_limit(request("api", vec![scanner.clone()])).await);
        clock.advance_ms(20);
        let response = assert_ok!(service.should_rate_limit(request("api", vec![scanner])).await)
            .into_inner();

        // Missing agent, probe path and a 20ms cadence push the score past 80
        let limit = response.statuses[0].current_limit.as_ref().unwrap();
        assert_eq!(limit.requests_per_unit, 20);

        let record = registry.resolve("api").get_status("10.0.0.4").unwrap();
        assert_eq!(record.suspicion_score, 100.0);
    }

    #[tokio::test]
    async fn test_any_denied_descriptor_fails_request() {
        let (service, registry, _clock) = service();
        registry.resolve("swap").block("10.0.0.5", None);

        let response = assert_ok!(
            service
                .should_rate_limit(request(
                    "swap",
                    vec![browser("10.0.0.6"), browser("10.0.0.5")],
                ))
                .await
        )
        .into_inner();

        assert_eq!(response.overall_code, i32::from(Code::OverLimit));
        assert_eq!(response.statuses[0].code, i32::from(Code::Ok));
        assert_eq!(response.statuses[1].code, i32::from(Code::OverLimit));
        assert_eq!(header(&response, "X-RateLimit-Remaining"), Some("0"));
        assert_eq!(header(&response, "Retry-After"), Some("300"));
    }

    #[tokio::test]
    async fn test_slow_client_across_domains_keeps_nominal_limits() {
        let (service, registry, clock) = service();

        for _ in 0..6 {
            for (domain, nominal) in [("general", 200), ("swap", 10)] {
                let response = assert_ok!(
                    service
                        .should_rate_limit(request(domain, vec![browser("10.0.0.7")]))
                        .await
                )
                .into_inner();

                let limit = response.statuses[0].current_limit.as_ref().unwrap();
                assert_eq!(limit.name, domain);
                assert_eq!(limit.requests_per_unit, nominal);
            }
            clock.advance_ms(5_000);
        }

        for domain in ["general", "swap"] {
            let record = registry.resolve(domain).get_status("10.0.0.7").unwrap();
            assert_eq!(record.count, 6);
            assert_eq!(record.suspicion_score, 0.0);
        }
    }

    #[tokio::test]
    async fn test_descriptors_for_one_client_count_once() {
        let (service, registry, _clock) = service();
        let address_only = descriptor(&[("remote_address", "10.0.0.8")]);
        let with_path = descriptor(&[("remote_address", "10.0.0.8"), ("path", "/wp-login.php")]);

        let response = assert_ok!(
            service
                .should_rate_limit(request("api", vec![address_only, with_path]))
                .await
        )
        .into_inner();

        assert_eq!(response.overall_code, i32::from(Code::Ok));
        assert_eq!(response.statuses.len(), 2);
        assert_eq!(response.statuses[0].limit_remaining, 99);
        assert_eq!(response.statuses[1].limit_remaining, 99);

        // Missing agent plus the probe path from the second descriptor
        let record = registry.resolve("api").get_status("10.0.0.8").unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.suspicion_score, 45.0);
    }

    #[test]
    fn test_unit_for_window() {
        assert_eq!(unit_for_window(Duration::from_secs(1)), Unit::Second);
        assert_eq!(unit_for_window(Duration::from_secs(60)), Unit::Minute);
        assert_eq!(unit_for_window(Duration::from_secs(3600)), Unit::Hour);
        assert_eq!(unit_for_window(Duration::from_secs(86400)), Unit::Day);
        assert_eq!(unit_for_window(Duration::from_secs(900)), Unit::Unknown);
    }

    #[test]
    fn test_headers_empty_without_results() {
        assert!(rate_limit_headers(&[]).is_empty());
    }
}
