//! Rotating Request Dispatcher
//!
//! Performs one logical upstream call, failing over across the service's
//! keys until one succeeds or every allowed attempt is spent.

use crate::client::http::{HttpTransport, Transport};
use crate::client::outcome::{DispatchError, DispatchOutcome, Dispatched, ErrorKind};
use crate::client::quota::{classify, AttemptFailure};
use crate::client::request::UpstreamRequest;
use crate::config::{KeyFile, ServicePolicy};
use crate::router::{KeyRing, Service};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Dispatches upstream requests with automatic key failover
#[derive(Debug)]
pub struct Dispatcher<T = HttpTransport> {
    /// Current key ring; swapped wholesale on reload
    ring: RwLock<Arc<KeyRing>>,

    /// Policy for the generative-text service
    generative: ServicePolicy,

    /// Policy for the video-platform service
    video: ServicePolicy,

    /// Network transport
    transport: T,
}

impl<T: Transport> Dispatcher<T> {
    /// Create a dispatcher with the built-in service policies
    pub fn new(ring: Arc<KeyRing>, transport: T) -> Self {
        Self {
            ring: RwLock::new(ring),
            generative: ServicePolicy::defaults(Service::GenerativeText),
            video: ServicePolicy::defaults(Service::VideoPlatform),
            transport,
        }
    }

    /// Create a dispatcher using the policies from a key file
    pub fn from_config(ring: Arc<KeyRing>, config: &KeyFile, transport: T) -> Self {
        Self::new(ring, transport)
            .with_policy(Service::GenerativeText, config.policy(Service::GenerativeText))
            .with_policy(Service::VideoPlatform, config.policy(Service::VideoPlatform))
    }

    /// Override the policy for one service
    pub fn with_policy(mut self, service: Service, policy: ServicePolicy) -> Self {
        match service {
            Service::GenerativeText => self.generative = policy,
            Service::VideoPlatform => self.video = policy,
        }
        self
    }

    pub fn policy(&self, service: Service) -> ServicePolicy {
        match service {
            Service::GenerativeText => self.generative,
            Service::VideoPlatform => self.video,
        }
    }

    /// Snapshot of the key ring in use
    pub fn key_ring(&self) -> Arc<KeyRing> {
        self.ring.read().clone()
    }

    /// Swap in a new key ring. Dispatches already running keep the old one.
    pub fn replace_key_ring(&self, ring: Arc<KeyRing>) {
        *self.ring.write() = ring;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Dispatch with the service's configured timeout and attempt cap
    pub async fn call(&self, service: Service, request: UpstreamRequest) -> DispatchOutcome {
        let policy = self.policy(service);
        self.run(service, request, policy.timeout, policy.max_attempts).await
    }

    /// Dispatch with an explicit per-attempt timeout.
    ///
    /// Attempts are bounded by the pool size, or by the service's
    /// configured cap when that is smaller.
    pub async fn dispatch(
        &self,
        service: Service,
        request: UpstreamRequest,
        timeout: Duration,
    ) -> DispatchOutcome {
        let cap = self.policy(service).max_attempts;
        self.run(service, request, timeout, cap).await
    }

    /// Dispatch with a caller-chosen attempt cap, still bounded by pool size
    pub async fn dispatch_with_attempts(
        &self,
        service: Service,
        request: UpstreamRequest,
        timeout: Duration,
        max_attempts: usize,
    ) -> DispatchOutcome {
        self.run(service, request, timeout, Some(max_attempts)).await
    }

    async fn run(
        &self,
        service: Service,
        mut request: UpstreamRequest,
        timeout: Duration,
        cap: Option<usize>,
    ) -> DispatchOutcome {
        let ring = self.key_ring();
        let pool = ring.pool(service);
        let pool_size = pool.len();

        if pool_size == 0 {
            tracing::error!(%service, "no API keys configured, request not sent");
            return Err(DispatchError::no_credentials(service));
        }

        if request.strip_credential() {
            tracing::warn!(%service, url = request.url(), "ignoring caller-supplied key parameter");
        }

        let max_attempts = cap.map_or(pool_size, |n| n.clamp(1, pool_size));
        let mut tried: Vec<usize> = Vec::with_capacity(max_attempts);
        let mut last_failure: Option<AttemptFailure> = None;

        for attempt in 1..=max_attempts {
            let slot = first_untried(pool.next_slot().unwrap_or(0), &tried, pool_size);
            tried.push(slot);

            let credential = &pool.credentials()[slot];
            let outgoing = request.with_credential(credential);

            tracing::debug!(
                %service,
                key = %credential.masked(),
                attempt,
                max_attempts,
                url = request.url(),
                "sending upstream request"
            );

            let failure = match self.transport.send(&outgoing, timeout).await {
                Ok(response) => match classify(response) {
                    Ok(payload) => {
                        if attempt > 1 {
                            tracing::info!(
                                %service,
                                key = %credential.masked(),
                                attempt,
                                "upstream request succeeded after key rotation"
                            );
                        }
                        return Ok(Dispatched {
                            payload,
                            attempts: attempt,
                            credential_tail: credential.masked(),
                        });
                    }
                    Err(failure) => failure,
                },
                Err(err) => AttemptFailure::from(err),
            };

            tracing::warn!(
                %service,
                key = %credential.masked(),
                attempt,
                max_attempts,
                kind = %failure.kind,
                status = ?failure.status,
                detail = %failure.detail,
                "upstream attempt failed, rotating key"
            );
            last_failure = Some(failure);
        }

        let failure = last_failure.unwrap_or(AttemptFailure {
            kind: ErrorKind::UpstreamHttpError,
            status: None,
            detail: "no attempt was made".to_string(),
        });

        tracing::error!(
            %service,
            attempts = max_attempts,
            pool_size,
            kind = %failure.kind,
            "all upstream attempts failed"
        );

        Err(exhausted(service, failure, max_attempts, pool_size))
    }
}

impl Dispatcher<HttpTransport> {
    /// Dispatcher over the default reqwest transport
    pub fn http(ring: Arc<KeyRing>, config: &KeyFile) -> crate::error::Result<Self> {
        Ok(Self::from_config(ring, config, HttpTransport::new()?))
    }
}

/// First slot at or after `start` (in ring order) not yet tried in this
/// dispatch. Falls back to `start` once every slot has been used.
fn first_untried(start: usize, tried: &[usize], pool_size: usize) -> usize {
    (0..pool_size)
        .map(|offset| (start + offset) % pool_size)
        .find(|slot| !tried.contains(slot))
        .unwrap_or(start % pool_size)
}

fn exhausted(
    service: Service,
    failure: AttemptFailure,
    attempts: usize,
    pool_size: usize,
) -> DispatchError {
    let summary = match failure.kind {
        ErrorKind::QuotaExceeded => format!(
            "Quota exceeded on {} of {} {} API key(s); try again later. Last error: {}",
            attempts, pool_size, service, failure.detail
        ),
        _ => format!(
            "{} attempt(s) across {} key(s) failed. Last error: {}",
            attempts, pool_size, failure.detail
        ),
    };

    DispatchError {
        service,
        kind: failure.kind,
        summary,
        attempts,
        status: failure.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::http::{RawResponse, TransportError};
    use crate::config::RotationPolicy;
    use crate::router::KeyPool;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const QUOTA_BODY: &str =
        r#"{"error":{"code":403,"message":"quota","errors":[{"reason":"quotaExceeded"}]}}"#;

    /// Replays canned results and records the key and timeout of each call
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        calls: AtomicUsize,
        keys: Mutex<Vec<String>>,
        timeouts: Mutex<Vec<Duration>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<RawResponse, TransportError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn keys(&self) -> Vec<String> {
            self.keys.lock().clone()
        }

        fn timeouts(&self) -> Vec<Duration> {
            self.timeouts.lock().clone()
        }
    }

    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            request: &UpstreamRequest,
            timeout: Duration,
        ) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.timeouts.lock().push(timeout);
            self.keys
                .lock()
                .push(request.credential_param().unwrap_or_default().to_string());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
        }
    }

    fn ring(service: Service, keys: &[&str], policy: RotationPolicy) -> Arc<KeyRing> {
        let other = match service {
            Service::GenerativeText => Service::VideoPlatform,
            Service::VideoPlatform => Service::GenerativeText,
        };
        let pool = KeyPool::new(service, keys.iter().copied(), policy);
        let empty = KeyPool::empty(other, RotationPolicy::RoundRobin);
        Arc::new(match service {
            Service::GenerativeText => KeyRing::from_pools(pool, empty),
            Service::VideoPlatform => KeyRing::from_pools(empty, pool),
        })
    }

    fn video_request() -> UpstreamRequest {
        UpstreamRequest::get("https://example.test/youtube/v3/channels").query("id", "UC1")
    }

    fn ok(body: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(200, body))
    }

    fn quota() -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(403, QUOTA_BODY))
    }

    #[tokio::test]
    async fn test_empty_pool_sends_nothing() {
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &[], RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![ok("{}")]),
        );

        let err = dispatcher
            .dispatch(Service::VideoPlatform, video_request(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::NoCredentialsAvailable);
        assert_eq!(err.attempts, 0);
        assert_eq!(dispatcher.transport().calls(), 0);
    }

    #[tokio::test]
    async fn test_rotates_past_quota_to_success() {
        let keys = ["key-aaaa-1", "key-bbbb-2", "key-cccc-3"];
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &keys, RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![quota(), quota(), ok(r#"{"items":["ok"]}"#)]),
        );

        let done = dispatcher
            .dispatch(Service::VideoPlatform, video_request(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(done.payload["items"][0], "ok");
        assert_eq!(done.attempts, 3);
        assert_eq!(done.credential_tail, "...cc-3");
        assert_eq!(dispatcher.transport().calls(), 3);
        assert_eq!(
            dispatcher.transport().keys(),
            vec!["key-aaaa-1", "key-bbbb-2", "key-cccc-3"]
        );
    }

    #[tokio::test]
    async fn test_all_quota_exhausted_stops_at_pool_size() {
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &["k1", "k2"], RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![quota(), quota(), ok("{}")]),
        );

        let err = dispatcher
            .dispatch(Service::VideoPlatform, video_request(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
        assert_eq!(err.attempts, 2);
        assert_eq!(err.status, Some(403));
        assert!(err.summary.starts_with("Quota exceeded on 2 of 2"));
        assert_eq!(dispatcher.transport().calls(), 2);
    }

    #[tokio::test]
    async fn test_network_and_http_errors_are_retried() {
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &["k1", "k2", "k3"], RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![
                Err(TransportError::Timeout("deadline".into())),
                Ok(RawResponse::new(400, "API key not valid")),
                ok(r#"{"ok":true}"#),
            ]),
        );

        let done = dispatcher
            .dispatch(Service::VideoPlatform, video_request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(done.attempts, 3);
    }

    #[tokio::test]
    async fn test_last_failure_kind_is_reported() {
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &["k1", "k2"], RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![
                quota(),
                Err(TransportError::Connect("reset".into())),
            ]),
        );

        let err = dispatcher
            .dispatch(Service::VideoPlatform, video_request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientNetworkError);
        assert_eq!(err.status, None);
        assert!(err.summary.contains("reset"));
    }

    #[tokio::test]
    async fn test_pinned_first_fails_over_without_reuse() {
        let keys = ["first", "second", "third"];
        let dispatcher = Dispatcher::new(
            ring(Service::GenerativeText, &keys, RotationPolicy::PinnedFirst),
            ScriptedTransport::new(vec![quota(), quota(), quota()]),
        );

        let err = dispatcher
            .dispatch(
                Service::GenerativeText,
                UpstreamRequest::get("https://example.test"),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(dispatcher.transport().keys(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_requested_attempts_capped_by_pool_size() {
        let dispatcher = Dispatcher::new(
            ring(Service::GenerativeText, &["g1", "g2"], RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![quota(), quota(), quota(), quota(), quota()]),
        );

        let err = dispatcher
            .dispatch_with_attempts(
                Service::GenerativeText,
                UpstreamRequest::get("https://example.test"),
                Duration::from_secs(1),
                5,
            )
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(dispatcher.transport().calls(), 2);
    }

    #[tokio::test]
    async fn test_configured_cap_below_pool_size() {
        let policy = ServicePolicy {
            max_attempts: Some(1),
            ..ServicePolicy::defaults(Service::VideoPlatform)
        };
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &["k1", "k2", "k3"], RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![quota(), ok("{}")]),
        )
        .with_policy(Service::VideoPlatform, policy);

        let err = dispatcher
            .call(Service::VideoPlatform, video_request())
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(dispatcher.transport().calls(), 1);
    }

    #[tokio::test]
    async fn test_caller_key_is_replaced() {
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &["pool-key"], RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![ok("{}")]),
        );

        dispatcher
            .dispatch(
                Service::VideoPlatform,
                video_request().query("key", "caller-key"),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(dispatcher.transport().keys(), vec!["pool-key"]);
    }

    #[tokio::test]
    async fn test_consecutive_dispatches_continue_rotation() {
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &["k1", "k2", "k3"], RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![ok("{}"), ok("{}"), ok("{}"), ok("{}")]),
        );

        for _ in 0..4 {
            dispatcher
                .dispatch(Service::VideoPlatform, video_request(), Duration::from_secs(1))
                .await
                .unwrap();
        }

        assert_eq!(dispatcher.transport().keys(), vec!["k1", "k2", "k3", "k1"]);
    }

    #[tokio::test]
    async fn test_replace_key_ring() {
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &[], RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![ok("{}")]),
        );

        dispatcher.replace_key_ring(ring(
            Service::VideoPlatform,
            &["fresh"],
            RotationPolicy::RoundRobin,
        ));
        let done = dispatcher
            .dispatch(Service::VideoPlatform, video_request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(done.attempts, 1);
    }

    fn both_services(video: &[&str], generative: &[&str]) -> Arc<KeyRing> {
        Arc::new(KeyRing::from_pools(
            KeyPool::new(
                Service::GenerativeText,
                generative.iter().copied(),
                RotationPolicy::PinnedFirst,
            ),
            KeyPool::new(Service::VideoPlatform, video.iter().copied(), RotationPolicy::RoundRobin),
        ))
    }

    #[tokio::test]
    async fn test_timeouts_reach_transport() {
        let dispatcher = Dispatcher::new(
            both_services(&["yt-1"], &["gen-1"]),
            ScriptedTransport::new(vec![ok("{}"), ok("{}"), ok("{}")]),
        );

        dispatcher
            .call(Service::VideoPlatform, video_request())
            .await
            .unwrap();
        dispatcher
            .call(Service::GenerativeText, UpstreamRequest::get("https://example.test"))
            .await
            .unwrap();
        dispatcher
            .dispatch(Service::VideoPlatform, video_request(), Duration::from_millis(750))
            .await
            .unwrap();

        assert_eq!(
            dispatcher.transport().timeouts(),
            vec![
                Duration::from_secs(10),
                Duration::from_secs(120),
                Duration::from_millis(750),
            ]
        );
    }

    #[tokio::test]
    async fn test_configured_timeout_applies_to_every_attempt() {
        let config: KeyFile = serde_json::from_value(serde_json::json!({
            "services": { "video_platform": { "timeout_secs": 7 } }
        }))
        .unwrap();
        let dispatcher = Dispatcher::from_config(
            both_services(&["yt-1", "yt-2"], &[]),
            &config,
            ScriptedTransport::new(vec![quota(), ok("{}")]),
        );

        let done = dispatcher
            .call(Service::VideoPlatform, video_request())
            .await
            .unwrap();

        assert_eq!(done.attempts, 2);
        assert_eq!(
            dispatcher.transport().timeouts(),
            vec![Duration::from_secs(7), Duration::from_secs(7)]
        );
    }

    #[tokio::test]
    async fn test_network_failure_summary_hides_key() {
        let secret = "AIzaSyCONNECTREFUSED000000009876";
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &[secret], RotationPolicy::RoundRobin),
            HttpTransport::new().unwrap(),
        );

        let request = UpstreamRequest::get("http://127.0.0.1:9/youtube/v3/channels");
        let err = dispatcher
            .dispatch(Service::VideoPlatform, request, Duration::from_secs(2))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::TransientNetworkError);
        assert!(!err.summary.contains(secret), "leaked: {}", err.summary);
        assert!(!err.to_string().contains(secret));
    }

    #[tokio::test]
    async fn test_slow_reply_times_out_and_rotates() {
        use mockito::Matcher;

        // trickles whitespace until the client hangs up
        fn trickle(w: &mut dyn std::io::Write) -> std::io::Result<()> {
            for _ in 0..40 {
                std::thread::sleep(Duration::from_millis(50));
                w.write_all(b" ")?;
            }
            w.write_all(b"{}")
        }

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/channels")
            .match_query(Matcher::UrlEncoded("key".into(), "slow-key-0001".into()))
            .with_status(200)
            .with_chunked_body(trickle)
            .create_async()
            .await;
        server
            .mock("GET", "/channels")
            .match_query(Matcher::UrlEncoded("key".into(), "fast-key-0002".into()))
            .with_status(200)
            .with_body(r#"{"items":[]}"#)
            .create_async()
            .await;

        let url = format!("{}/channels", server.url());
        let timeout = Duration::from_millis(300);

        let lone = Dispatcher::new(
            ring(Service::VideoPlatform, &["slow-key-0001"], RotationPolicy::RoundRobin),
            HttpTransport::new().unwrap(),
        );
        let err = lone
            .dispatch(Service::VideoPlatform, UpstreamRequest::get(url.clone()), timeout)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientNetworkError);
        assert!(!err.summary.contains("slow-key-0001"));

        let keys = ["slow-key-0001", "fast-key-0002"];
        let pair = Dispatcher::new(
            ring(Service::VideoPlatform, &keys, RotationPolicy::RoundRobin),
            HttpTransport::new().unwrap(),
        );
        let done = pair
            .dispatch(Service::VideoPlatform, UpstreamRequest::get(url), timeout)
            .await
            .unwrap();
        assert_eq!(done.attempts, 2);
        assert_eq!(done.credential_tail, "...0002");
    }

    #[test]
    fn test_first_untried_walks_ring() {
        assert_eq!(first_untried(0, &[], 3), 0);
        assert_eq!(first_untried(0, &[0], 3), 1);
        assert_eq!(first_untried(2, &[2, 0], 3), 1);
        assert_eq!(first_untried(1, &[0, 1, 2], 3), 1);
    }

    #[test]
    fn test_dispatch_runs_on_blocking_executor() {
        let dispatcher = Dispatcher::new(
            ring(Service::VideoPlatform, &["k1"], RotationPolicy::RoundRobin),
            ScriptedTransport::new(vec![ok(r#"{"n":1}"#)]),
        );

        let done = tokio_test::block_on(dispatcher.dispatch(
            Service::VideoPlatform,
            video_request(),
            Duration::from_secs(1),
        ))
        .unwrap();
        assert_eq!(done.payload["n"], 1);
    }
}
