// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Provider registry
//!
//! Owns the current order snapshot of one project and answers "which indexer
//! next". Snapshots are immutable and replaced wholesale on refresh, so a
//! reader sees either the old or the new order lists in full. Rotation
//! cursors live inside the snapshot; agreement tokens obtained after
//! discovery are kept in a side table keyed by order id.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use api_client::HealthStatus;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use scoring::{FailureClass, ScoreStore, ScoringEngine};
use serde::Serialize;
use shared_types::{Order, OrderType, OrdersResponse};
use tokio::{
    sync::{Mutex, OnceCell},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    discovery::OrderDiscovery,
    error::{RoutingError, RoutingResult},
};

/// Round-robin cursor with a random phase
///
/// The first call picks a uniformly random start so that clients started
/// together do not all hit index 0; later calls advance by one, wrapping.
/// Concurrent callers may occasionally observe the same index.
#[derive(Debug)]
pub struct RotationCursor {
    next: AtomicUsize,
}

impl RotationCursor {
    const UNSET: usize = usize::MAX;

    /// Cursor that picks a random start on first use
    pub fn new() -> Self {
        Self {
            next: AtomicUsize::new(Self::UNSET),
        }
    }

    /// Cursor with a fixed start
    pub fn starting_at(index: usize) -> Self {
        Self {
            next: AtomicUsize::new(index),
        }
    }

    /// Next index into a list of `len` items, `None` for an empty list
    pub fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }

        if self.next.load(Ordering::Acquire) == Self::UNSET {
            let start = rand::rng().random_range(0..len);
            // Losing the race means another caller already seeded the cursor
            let _ = self.next.compare_exchange(
                Self::UNSET,
                start,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        let current = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| {
                Some((i % len + 1) % len)
            })
            .unwrap_or_else(|i| i);
        Some(current % len)
    }

    fn position(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }
}

impl Default for RotationCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct ProviderSnapshot {
    agreements: Vec<Order>,
    plans: Vec<Order>,
    healthy: bool,
    agreement_cursor: RotationCursor,
    plan_cursor: RotationCursor,
    refreshed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl ProviderSnapshot {
    fn from_orders(orders: OrdersResponse) -> Self {
        Self {
            agreements: orders.agreements,
            plans: orders.plans,
            healthy: true,
            refreshed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Same orders and cursor positions, marked unhealthy
    fn degraded(&self, error: String) -> Self {
        Self {
            agreements: self.agreements.clone(),
            plans: self.plans.clone(),
            healthy: false,
            agreement_cursor: RotationCursor::starting_at(self.agreement_cursor.position()),
            plan_cursor: RotationCursor::starting_at(self.plan_cursor.position()),
            refreshed_at: self.refreshed_at,
            last_error: Some(error),
        }
    }

    fn order_count(&self) -> usize {
        self.agreements.len() + self.plans.len()
    }
}

/// Point-in-time view of a registry, for health endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    /// Whether the last discovery refresh succeeded
    pub healthy: bool,
    /// Number of agreement orders
    pub agreements: usize,
    /// Number of flex plan orders
    pub plans: usize,
    /// Time of the last successful refresh
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Discovers, refreshes and hands out the orders of one project
#[derive(Debug)]
pub struct ProviderRegistry<D, S> {
    discovery: D,
    scoring: ScoringEngine<S>,
    project_id: String,
    refresh_interval: Duration,
    snapshot: ArcSwap<ProviderSnapshot>,
    tokens: DashMap<String, String>,
    initialized: OnceCell<()>,
    refresh_lock: Mutex<()>,
}

impl<D, S> ProviderRegistry<D, S>
where
    D: OrderDiscovery,
    S: ScoreStore,
{
    /// Create a registry; no discovery happens until first use
    pub fn new(
        discovery: D,
        scoring: ScoringEngine<S>,
        project_id: impl Into<String>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            discovery,
            scoring,
            project_id: project_id.into(),
            refresh_interval,
            snapshot: ArcSwap::from_pointee(ProviderSnapshot::default()),
            tokens: DashMap::new(),
            initialized: OnceCell::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Project the registry serves
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Scoring engine used for health bookkeeping
    pub fn scoring(&self) -> &ScoringEngine<S> {
        &self.scoring
    }

    /// Wait until the first refresh has completed, running it if needed
    pub async fn ready(&self) {
        self.initialized
            .get_or_init(|| async {
                self.refresh().await;
            })
            .await;
    }

    /// Refresh the order snapshot from discovery
    ///
    /// Returns whether the registry is healthy afterwards. A call made while
    /// another refresh is in flight waits for it instead of starting a second
    /// one.
    pub async fn refresh(&self) -> bool {
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            debug!(project = %self.project_id, "refresh in flight, waiting for it");
            let _guard = self.refresh_lock.lock().await;
            return self.is_healthy();
        };

        match self.discovery.fetch_orders().await {
            Ok(orders) => {
                self.retain_tokens(&orders);
                let snapshot = ProviderSnapshot::from_orders(orders);
                info!(
                    project = %self.project_id,
                    agreements = snapshot.agreements.len(),
                    plans = snapshot.plans.len(),
                    "refreshed orders"
                );
                self.snapshot.store(Arc::new(snapshot));
                true
            }
            Err(e) => {
                warn!(project = %self.project_id, error = %e, "order refresh failed");
                let degraded = self.snapshot.load().degraded(e.to_string());
                self.snapshot.store(Arc::new(degraded));
                false
            }
        }
    }

    fn retain_tokens(&self, orders: &OrdersResponse) {
        let listed: HashSet<&str> = orders
            .agreements
            .iter()
            .filter(|order| order.token.is_none())
            .map(|order| order.id.as_str())
            .collect();
        self.tokens.retain(|id, _| listed.contains(id.as_str()));
    }

    /// Preferred order type: agreements before flex plans
    pub async fn next_order_type(&self) -> Option<OrderType> {
        self.ready().await;
        let snapshot = self.snapshot.load();
        if !snapshot.healthy {
            return None;
        }
        if !snapshot.agreements.is_empty() {
            Some(OrderType::Agreement)
        } else if !snapshot.plans.is_empty() {
            Some(OrderType::FlexPlan)
        } else {
            None
        }
    }

    /// Next agreement in rotation, with its current token
    pub async fn next_agreement(&self) -> Option<Order> {
        self.next(OrderType::Agreement).await.ok()
    }

    /// Next flex plan in rotation
    pub async fn next_plan(&self) -> Option<Order> {
        self.next(OrderType::FlexPlan).await.ok()
    }

    /// Next order of the given type
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryUnavailable` when the last refresh failed and
    /// `NoProviderAvailable` when the list is empty
    pub async fn next(&self, order_type: OrderType) -> RoutingResult<Order> {
        self.ready().await;
        let snapshot = self.snapshot.load();
        if !snapshot.healthy {
            return Err(Self::unavailable(&snapshot));
        }

        let (orders, cursor) = match order_type {
            OrderType::Agreement => (&snapshot.agreements, &snapshot.agreement_cursor),
            OrderType::FlexPlan => (&snapshot.plans, &snapshot.plan_cursor),
        };

        let mut order = cursor
            .next_index(orders.len())
            .and_then(|index| orders.get(index))
            .cloned()
            .ok_or(RoutingError::NoProviderAvailable { order_type })?;

        if order_type == OrderType::Agreement
            && let Some(token) = self.tokens.get(&order.id)
        {
            order.token = Some(token.value().clone());
        }
        Ok(order)
    }

    /// Next order of the preferred type
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryUnavailable` when the last refresh failed and
    /// `NoProviderAvailable` when there are no orders at all
    pub async fn next_order(&self) -> RoutingResult<(OrderType, Order)> {
        self.ready().await;
        let order_type = {
            let snapshot = self.snapshot.load();
            if !snapshot.healthy {
                return Err(Self::unavailable(&snapshot));
            }
            if !snapshot.agreements.is_empty() {
                OrderType::Agreement
            } else if !snapshot.plans.is_empty() {
                OrderType::FlexPlan
            } else {
                return Err(RoutingError::NoProviderAvailable {
                    order_type: OrderType::FlexPlan,
                });
            }
        };
        Ok((order_type, self.next(order_type).await?))
    }

    fn unavailable(snapshot: &ProviderSnapshot) -> RoutingError {
        RoutingError::discovery(
            snapshot
                .last_error
                .as_deref()
                .unwrap_or("no successful refresh"),
        )
    }

    /// Remember a fresh token for the agreement with the given id
    ///
    /// Unknown ids are ignored.
    pub fn update_token_by_id(&self, id: &str, token: impl Into<String>) {
        let snapshot = self.snapshot.load();
        if snapshot.agreements.iter().any(|order| order.id == id) {
            self.tokens.insert(id.to_string(), token.into());
        } else {
            debug!(order_id = id, "ignoring token for unknown agreement");
        }
    }

    /// Current agreements, with tokens applied
    pub fn agreements(&self) -> Vec<Order> {
        self.snapshot
            .load()
            .agreements
            .iter()
            .map(|order| match self.tokens.get(&order.id) {
                Some(token) => order.clone().with_token(token.value().clone()),
                None => order.clone(),
            })
            .collect()
    }

    /// Current flex plans
    pub fn plans(&self) -> Vec<Order> {
        self.snapshot.load().plans.clone()
    }

    /// Whether the last refresh succeeded
    pub fn is_healthy(&self) -> bool {
        self.snapshot.load().healthy
    }

    /// Health of the registry as seen by monitoring
    pub fn health(&self) -> HealthStatus {
        let snapshot = self.snapshot.load();
        HealthStatus::from_discovery(snapshot.healthy, snapshot.order_count())
    }

    /// Counts and freshness of the current snapshot
    pub fn summary(&self) -> RegistrySummary {
        let snapshot = self.snapshot.load();
        RegistrySummary {
            healthy: snapshot.healthy,
            agreements: snapshot.agreements.len(),
            plans: snapshot.plans.len(),
            refreshed_at: snapshot.refreshed_at,
        }
    }

    /// Restore the health weight of an indexer after a success
    pub async fn record_success(&self, runner: &str) {
        if let Err(e) = self.scoring.record_success(runner, &self.project_id).await {
            warn!(runner, error = %e, "failed to record success");
        }
    }

    /// Apply one health penalty to an indexer
    ///
    /// Returns the new health weight, or `None` if it could not be stored.
    pub async fn record_failure(&self, runner: &str, class: FailureClass) -> Option<f64> {
        match self
            .scoring
            .record_failure(runner, &self.project_id, class)
            .await
        {
            Ok(weight) => Some(weight),
            Err(e) => {
                warn!(runner, error = %e, "failed to record failure");
                None
            }
        }
    }

    /// Combined weight of an order for ranking and dashboards
    pub async fn order_weight(&self, order: &Order, order_type: OrderType) -> f64 {
        self.scoring
            .order_weight(&order.runner, &self.project_id, order_type)
            .await
    }
}

impl<D, S> ProviderRegistry<D, S>
where
    D: OrderDiscovery + 'static,
    S: ScoreStore + 'static,
{
    /// Run the periodic refresh until `shutdown` is cancelled
    pub fn spawn_refresh(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.ready().await;

            let period = self.refresh_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!(project = %self.project_id, "stopping order refresh");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.refresh().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex as StdMutex};

    use scoring::MemoryScoreStore;

    use super::*;

    #[derive(Debug, Default)]
    struct FakeDiscovery {
        replies: StdMutex<VecDeque<RoutingResult<OrdersResponse>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FakeDiscovery {
        fn with(replies: Vec<RoutingResult<OrdersResponse>>) -> Self {
            Self {
                replies: StdMutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl OrderDiscovery for FakeDiscovery {
        async fn fetch_orders(&self) -> RoutingResult<OrdersResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(OrdersResponse::default()))
        }
    }

    fn orders(agreements: usize, plans: usize) -> OrdersResponse {
        OrdersResponse {
            agreements: (0..agreements)
                .map(|i| Order::new(format!("a{i}"), format!("0xa{i}"), format!("http://a{i}")))
                .collect(),
            plans: (0..plans)
                .map(|i| Order::new(format!("p{i}"), format!("0xp{i}"), format!("http://p{i}")))
                .collect(),
        }
    }

    fn registry(
        replies: Vec<RoutingResult<OrdersResponse>>,
    ) -> ProviderRegistry<FakeDiscovery, MemoryScoreStore> {
        registry_over(FakeDiscovery::with(replies))
    }

    fn registry_over(discovery: FakeDiscovery) -> ProviderRegistry<FakeDiscovery, MemoryScoreStore> {
        ProviderRegistry::new(
            discovery,
            ScoringEngine::new(Arc::new(MemoryScoreStore::new())),
            "QmProject",
            Duration::from_secs(300),
        )
    }

    #[test]
    fn cursor_rotates_from_random_start() {
        for len in 1..6 {
            let cursor = RotationCursor::new();
            let first: Vec<usize> = (0..len).filter_map(|_| cursor.next_index(len)).collect();
            let second: Vec<usize> = (0..len).filter_map(|_| cursor.next_index(len)).collect();

            let mut sorted = first.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..len).collect::<Vec<_>>());
            assert_eq!(first, second);
            for pair in first.windows(2) {
                assert_eq!(pair[1], (pair[0] + 1) % len);
            }
        }
        assert_eq!(RotationCursor::new().next_index(0), None);
    }

    #[test]
    fn cursor_wraps() {
        let cursor = RotationCursor::starting_at(2);
        assert_eq!(cursor.next_index(3), Some(2));
        assert_eq!(cursor.next_index(3), Some(0));
        assert_eq!(cursor.next_index(3), Some(1));
    }

    #[tokio::test]
    async fn first_selection_waits_for_refresh() {
        let registry = registry(vec![Ok(orders(2, 1))]);
        assert!(!registry.is_healthy());

        assert_eq!(registry.next_order_type().await, Some(OrderType::Agreement));
        assert!(registry.is_healthy());
        assert_eq!(registry.discovery.calls.load(Ordering::SeqCst), 1);

        registry.next_plan().await.unwrap();
        assert_eq!(registry.discovery.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prefers_agreements_then_plans() {
        let registry = registry(vec![Ok(orders(0, 2))]);
        assert_eq!(registry.next_order_type().await, Some(OrderType::FlexPlan));
        assert!(registry.next_agreement().await.is_none());

        let (order_type, order) = registry.next_order().await.unwrap();
        assert_eq!(order_type, OrderType::FlexPlan);
        assert!(order.id.starts_with('p'));
    }

    #[tokio::test]
    async fn empty_but_healthy_has_no_provider() {
        let registry = registry(vec![Ok(OrdersResponse::default())]);
        assert_eq!(registry.next_order_type().await, None);
        assert!(registry.is_healthy());
        assert!(matches!(
            registry.next_order().await,
            Err(RoutingError::NoProviderAvailable { .. })
        ));
        assert!(matches!(registry.health(), HealthStatus::Degraded { .. }));
    }

    #[tokio::test]
    async fn failed_refresh_blocks_selection_until_recovery() {
        let registry = registry(vec![
            Ok(orders(2, 0)),
            Err(RoutingError::discovery("connection refused")),
            Ok(orders(1, 0)),
        ]);
        assert!(registry.next_agreement().await.is_some());

        assert!(!registry.refresh().await);
        assert!(registry.next_agreement().await.is_none());
        assert_eq!(registry.next_order_type().await, None);
        assert!(matches!(
            registry.next_order().await,
            Err(RoutingError::DiscoveryUnavailable { .. })
        ));
        assert!(registry.health().is_down());
        // orders are kept while unhealthy
        assert_eq!(registry.summary().agreements, 2);

        assert!(registry.refresh().await);
        assert_eq!(registry.next_agreement().await.unwrap().id, "a0");
    }

    #[tokio::test]
    async fn unknown_token_update_is_ignored() {
        let registry = registry(vec![Ok(orders(2, 0))]);
        registry.ready().await;
        let before = registry.agreements();

        registry.update_token_by_id("missing", "t");
        assert_eq!(registry.agreements(), before);
        assert!(registry.tokens.is_empty());
    }

    #[tokio::test]
    async fn tokens_survive_refresh() {
        let mut relisted = orders(2, 0);
        relisted.agreements[1].token = Some("from-discovery".to_string());
        let registry = registry(vec![Ok(orders(2, 0)), Ok(relisted), Ok(orders(0, 0))]);
        registry.ready().await;

        registry.update_token_by_id("a0", "t0");
        registry.update_token_by_id("a1", "t1");

        registry.refresh().await;
        let agreements = registry.agreements();
        assert_eq!(agreements[0].token.as_deref(), Some("t0"));
        assert_eq!(agreements[1].token.as_deref(), Some("from-discovery"));

        registry.refresh().await;
        assert!(registry.tokens.is_empty());
    }

    #[tokio::test]
    async fn health_penalties_use_project_scope() {
        let registry = registry(vec![Ok(orders(1, 0))]);
        let order = registry.next_agreement().await.unwrap();

        assert_eq!(
            registry
                .record_failure(&order.runner, FailureClass::Network)
                .await,
            Some(0.5)
        );
        assert!(
            (registry.order_weight(&order, OrderType::Agreement).await - 0.5).abs() < f64::EPSILON
        );

        registry.record_success(&order.runner).await;
        assert!(
            (registry.scoring().health_weight(&order.runner, "QmProject").await - 1.0).abs()
                < f64::EPSILON
        );
    }

    #[tokio::test(start_paused = true)]
    async fn background_refresh_stops_on_cancel() {
        let registry = Arc::new(registry(vec![Ok(orders(1, 0))]));
        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&registry).spawn_refresh(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert!(registry.discovery.calls.load(Ordering::SeqCst) >= 3);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_selections_share_one_refresh() {
        let registry = Arc::new(registry_over(
            FakeDiscovery::with(vec![Ok(orders(2, 0))]).slow(Duration::from_millis(200)),
        ));

        let selections: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.next_agreement().await })
            })
            .collect();
        for selection in selections {
            assert!(selection.await.unwrap().is_some());
        }

        assert_eq!(registry.discovery.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refresh_waits_for_the_running_one() {
        let registry = registry_over(
            FakeDiscovery::with(vec![Ok(orders(1, 0)), Ok(orders(3, 0)), Ok(orders(5, 0))])
                .slow(Duration::from_millis(200)),
        );
        registry.ready().await;
        assert_eq!(registry.discovery.calls.load(Ordering::SeqCst), 1);

        let (first, second) = tokio::join!(registry.refresh(), registry.refresh());

        assert!(first && second);
        assert_eq!(registry.discovery.calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.summary().agreements, 3);
    }
}
