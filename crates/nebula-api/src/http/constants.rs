//! Shared HTTP constants (headers, problem URIs, limits).

use std::time::Duration;

pub(crate) const HEADER_API_KEY: &str = "x-api-key";
pub(crate) const HEADER_REAL_IP: &str = "x-real-ip";
pub(crate) const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
pub(crate) const HEADER_RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub(crate) const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub(crate) const HEADER_RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
pub(crate) const BEARER_PREFIX: &str = "Bearer ";
pub(crate) const SSE_KEEP_ALIVE_SECS: u64 = 15;
pub(crate) const MAX_BODY_BYTES: usize = 1024 * 1024;
pub(crate) const DEFAULT_HISTORY_LIMIT: usize = 50;
pub(crate) const ANALYZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Routes reachable without the shared secret.
pub(crate) const PUBLIC_ROUTES: &[&str] = &["/health", "/metrics", "/api/progress"];

pub(crate) const PROBLEM_INTERNAL: &str = "https://nebula.dev/problems/internal";
pub(crate) const PROBLEM_UNAUTHORIZED: &str = "https://nebula.dev/problems/unauthorized";
pub(crate) const PROBLEM_BAD_REQUEST: &str = "https://nebula.dev/problems/bad-request";
pub(crate) const PROBLEM_CONFLICT: &str = "https://nebula.dev/problems/conflict";
pub(crate) const PROBLEM_CONFIG_INVALID: &str = "https://nebula.dev/problems/config-invalid";
pub(crate) const PROBLEM_NOT_FOUND: &str = "https://nebula.dev/problems/not-found";
pub(crate) const PROBLEM_RATE_LIMITED: &str = "https://nebula.dev/problems/rate-limited";
pub(crate) const PROBLEM_TIMEOUT: &str = "https://nebula.dev/problems/timeout";
pub(crate) const PROBLEM_ENGINE: &str = "https://nebula.dev/problems/engine";
pub(crate) const PROBLEM_SERVICE_UNAVAILABLE: &str =
    "https://nebula.dev/problems/service-unavailable";
