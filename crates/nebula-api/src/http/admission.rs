//! Three-layer request admission control.
//!
//! # Design
//! - A request passes a global bucket, a per-address bucket, and a bucket per
//!   (route rule, address) pair, in that order; the first rejection wins.
//! - Per-address buckets are created on first sight and evicted once idle for
//!   the configured window by a periodic sweep.
//! - Runs ahead of authentication so unauthenticated floods are throttled too.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use nebula_config::AdmissionConfig;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::http::constants::{HEADER_FORWARDED_FOR, HEADER_REAL_IP};
use crate::http::errors::ApiError;
use crate::http::rate_limit::{BucketDecision, TokenBucket, insert_rate_limit_headers};
use crate::state::ApiState;

/// Layer that turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdmissionLayer {
    Global,
    Address,
    Route,
}

impl AdmissionLayer {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Address => "address",
            Self::Route => "route",
        }
    }
}

#[derive(Debug)]
pub(crate) struct Rejection {
    pub(crate) layer: AdmissionLayer,
    pub(crate) decision: BucketDecision,
}

struct Buckets {
    global: TokenBucket,
    per_address: HashMap<IpAddr, TokenBucket>,
    per_route: HashMap<(String, IpAddr), TokenBucket>,
}

/// Shared admission state consulted by the middleware.
pub(crate) struct Admission {
    config: AdmissionConfig,
    buckets: Mutex<Buckets>,
}

impl Admission {
    pub(crate) fn new(config: AdmissionConfig) -> Self {
        let now = Instant::now();
        Self {
            buckets: Mutex::new(Buckets {
                global: TokenBucket::new(config.global, now),
                per_address: HashMap::new(),
                per_route: HashMap::new(),
            }),
            config,
        }
    }

    fn buckets(&self) -> MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Charge one request from `addr` against `path`.
    pub(crate) fn check(
        &self,
        addr: IpAddr,
        path: &str,
        now: Instant,
    ) -> Result<BucketDecision, Rejection> {
        let (route_key, route_rule) = self.config.route_rule(path);
        let mut buckets = self.buckets();

        let global = buckets.global.try_acquire(now);
        if !global.allowed {
            return Err(Rejection {
                layer: AdmissionLayer::Global,
                decision: global,
            });
        }

        let per_address = self.config.per_address;
        let address = buckets
            .per_address
            .entry(addr)
            .or_insert_with(|| TokenBucket::new(per_address, now))
            .try_acquire(now);
        if !address.allowed {
            return Err(Rejection {
                layer: AdmissionLayer::Address,
                decision: address,
            });
        }

        let route = buckets
            .per_route
            .entry((route_key.to_string(), addr))
            .or_insert_with(|| TokenBucket::new(route_rule, now))
            .try_acquire(now);
        if route.allowed {
            Ok(route)
        } else {
            Err(Rejection {
                layer: AdmissionLayer::Route,
                decision: route,
            })
        }
    }

    /// Drop per-address buckets idle for longer than the eviction window.
    pub(crate) fn sweep(&self, now: Instant) -> usize {
        let idle = self.config.idle_eviction;
        let mut buckets = self.buckets();
        let before = buckets.per_address.len() + buckets.per_route.len();
        buckets
            .per_address
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen()) < idle);
        buckets
            .per_route
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen()) < idle);
        before - (buckets.per_address.len() + buckets.per_route.len())
    }

    #[cfg(test)]
    pub(crate) fn tracked_addresses(&self) -> usize {
        self.buckets().per_address.len()
    }

    /// Run [`Admission::sweep`] on the configured interval until `admission` is dropped.
    pub(crate) fn spawn_sweeper(admission: &Arc<Self>) -> JoinHandle<()> {
        let period = admission.config.sweep_interval;
        let weak: Weak<Self> = Arc::downgrade(admission);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(admission) = weak.upgrade() else {
                    break;
                };
                let evicted = admission.sweep(Instant::now());
                if evicted > 0 {
                    debug!(evicted, "evicted idle admission buckets");
                }
            }
        })
    }
}

/// Resolve the caller address: `X-Real-IP`, then the first `X-Forwarded-For`
/// entry, then the socket peer.
pub(crate) fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    let header_ip = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    };
    header_ip(HEADER_REAL_IP)
        .or_else(|| header_ip(HEADER_FORWARDED_FOR))
        .or_else(|| peer.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub(crate) async fn enforce_admission(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let addr = client_addr(req.headers(), peer);
    let path = req.uri().path().to_string();

    match state.admission.check(addr, &path, Instant::now()) {
        Ok(decision) => {
            let mut response = next.run(req).await;
            insert_rate_limit_headers(
                response.headers_mut(),
                decision.limit,
                decision.remaining,
                None,
            );
            Ok(response)
        }
        Err(rejection) => {
            let layer = rejection.layer.as_str();
            state.telemetry.inc_admission_rejected(layer);
            warn!(client = %addr, route = %path, layer, "request rejected by admission control");
            Err(ApiError::too_many_requests("too many requests; try again later")
                .with_rate_limit_headers(
                    rejection.decision.limit,
                    0,
                    Some(rejection.decision.retry_after),
                ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::HeaderValue;
    use nebula_config::RateRule;

    use super::*;

    fn tight_config() -> AdmissionConfig {
        AdmissionConfig {
            global: RateRule::new(100, 100),
            per_address: RateRule::new(1, 3),
            routes: vec![("/api/magnet/analyze".to_string(), RateRule::new(1, 1))],
            default_route: RateRule::new(100, 100),
            idle_eviction: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test(start_paused = true)]
    async fn route_layer_rejects_before_address_layer() {
        let admission = Admission::new(tight_config());
        let now = Instant::now();
        assert!(admission.check(ip(1), "/api/magnet/analyze", now).is_ok());
        let rejection = admission
            .check(ip(1), "/api/magnet/analyze", now)
            .err()
            .map(|rejection| rejection.layer);
        assert_eq!(rejection, Some(AdmissionLayer::Route));

        // Other routes use their own bucket but share the address budget.
        assert!(admission.check(ip(1), "/api/history", now).is_ok());
        let rejection = admission
            .check(ip(1), "/api/history", now)
            .err()
            .map(|rejection| rejection.layer);
        assert_eq!(rejection, Some(AdmissionLayer::Address));

        // A different caller is unaffected.
        assert!(admission.check(ip(2), "/api/magnet/analyze", now).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn global_layer_is_shared() {
        let mut config = tight_config();
        config.global = RateRule::new(1, 2);
        let admission = Admission::new(config);
        let now = Instant::now();
        assert!(admission.check(ip(1), "/health", now).is_ok());
        assert!(admission.check(ip(2), "/health", now).is_ok());
        let rejection = admission.check(ip(3), "/health", now).err();
        assert_eq!(
            rejection.as_ref().map(|r| r.layer),
            Some(AdmissionLayer::Global)
        );
        assert_eq!(
            rejection.map(|r| r.decision.retry_after),
            Some(Duration::from_secs(1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_idle_addresses() {
        let admission = Admission::new(tight_config());
        let start = Instant::now();
        assert!(admission.check(ip(1), "/health", start).is_ok());
        assert!(
            admission
                .check(ip(2), "/health", start + Duration::from_secs(50))
                .is_ok()
        );
        assert_eq!(admission.tracked_addresses(), 2);

        assert_eq!(admission.sweep(start + Duration::from_secs(70)), 2);
        assert_eq!(admission.tracked_addresses(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_stops_with_admission() {
        let admission = Arc::new(Admission::new(tight_config()));
        assert!(admission.check(ip(1), "/health", Instant::now()).is_ok());
        let handle = Admission::spawn_sweeper(&admission);

        tokio::time::sleep(Duration::from_secs(91)).await;
        assert_eq!(admission.tracked_addresses(), 0);

        drop(admission);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(handle.is_finished());
    }

    #[test]
    fn client_addr_prefers_proxy_headers() {
        let peer: SocketAddr = ([192, 168, 1, 9], 4000).into();
        let mut headers = HeaderMap::new();
        assert_eq!(client_addr(&headers, Some(peer)), peer.ip());

        headers.insert(
            HEADER_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(
            client_addr(&headers, Some(peer)),
            "203.0.113.7".parse::<IpAddr>().unwrap_or(peer.ip())
        );

        headers.insert(HEADER_REAL_IP, HeaderValue::from_static("198.51.100.2"));
        assert_eq!(
            client_addr(&headers, Some(peer)),
            "198.51.100.2".parse::<IpAddr>().unwrap_or(peer.ip())
        );

        assert_eq!(
            client_addr(&HeaderMap::new(), None),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
    }
}
