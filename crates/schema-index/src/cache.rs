//! Per-API index cache with build coalescing.
//!
//! The slot map is the only shared mutable state. The lock is never held across an `.await`:
//! callers take it to look up or register a build, release it, then await the shared build
//! future. Builds run on their own task so a cancelled caller never strands the in-flight marker.
//!
//! Invalidation never runs two builds for one API at once: a build that was running when its API
//! was invalidated keeps running but cannot publish, and the next build for that API waits for it
//! before fetching.

use crate::error::{FetchError, IndexError, Result};
use crate::index::{FetchedDocument, SchemaIndex};
use crate::normalizer;
use futures::future::{BoxFuture, FutureExt as _, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

type BuildFuture = Shared<BoxFuture<'static, Result<Arc<SchemaIndex>>>>;

/// Whether a cached index may be returned without fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    #[default]
    Cached,
    /// Always fetch; the cached index is kept if the document did not change.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub cached: usize,
    pub in_flight: usize,
}

struct Slot {
    index: Option<Arc<SchemaIndex>>,
    inflight: Option<BuildFuture>,
    /// Build started before the last invalidation, with its generation.
    superseded: Option<(u64, BuildFuture)>,
    /// Identifies this slot instance; a build only publishes into the generation it started from.
    generation: u64,
}

impl Slot {
    fn busy(&self) -> bool {
        self.inflight.is_some() || self.superseded.is_some()
    }
}

#[derive(Default)]
struct State {
    slots: HashMap<String, Slot>,
    next_generation: u64,
}

#[derive(Clone, Default)]
pub struct SchemaCache {
    state: Arc<Mutex<State>>,
}

impl SchemaCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index for `api_id`, building it from `fetch` when needed.
    ///
    /// Concurrent callers for the same `api_id` share one build. `fetch` is only invoked by the
    /// caller that starts the build.
    ///
    /// # Errors
    ///
    /// Returns the fetch, parse or version error of the build. A failed build leaves any
    /// previously cached index in place.
    pub async fn get_or_build<F, Fut>(
        &self,
        api_id: &str,
        mode: BuildMode,
        fetch: F,
    ) -> Result<Arc<SchemaIndex>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<FetchedDocument, FetchError>> + Send + 'static,
    {
        let build = {
            let mut state = self.state.lock();
            let State {
                slots,
                next_generation,
            } = &mut *state;
            let slot = slots.entry(api_id.to_string()).or_insert_with(|| {
                *next_generation += 1;
                Slot {
                    index: None,
                    inflight: None,
                    superseded: None,
                    generation: *next_generation,
                }
            });

            if mode == BuildMode::Cached
                && let Some(index) = &slot.index
            {
                tracing::debug!(api = %api_id, "Schema index cache hit");
                return Ok(Arc::clone(index));
            }

            if let Some(build) = &slot.inflight {
                tracing::debug!(api = %api_id, "Joining in-flight schema index build");
                build.clone()
            } else {
                let task = tokio::spawn(run_build(
                    Arc::clone(&self.state),
                    api_id.to_string(),
                    slot.generation,
                    slot.index.clone(),
                    slot.superseded.as_ref().map(|(_, b)| b.clone()),
                    fetch,
                ));
                let build = async move {
                    task.await
                        .unwrap_or_else(|e| Err(IndexError::Aborted(e.to_string())))
                }
                .boxed()
                .shared();
                slot.inflight = Some(build.clone());
                build
            }
        };
        build.await
    }

    /// Drop the cached index for `api_id`. An in-flight build for it will not publish.
    ///
    /// Returns whether an index was cached.
    pub fn invalidate(&self, api_id: &str) -> bool {
        let had_index = invalidate_slot(&mut self.state.lock(), api_id);
        if had_index {
            tracing::info!(api = %api_id, "Invalidated schema index");
        }
        had_index
    }

    #[must_use]
    pub fn cached(&self, api_id: &str) -> Option<Arc<SchemaIndex>> {
        self.state
            .lock()
            .slots
            .get(api_id)
            .and_then(|s| s.index.clone())
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            cached: state.slots.values().filter(|s| s.index.is_some()).count(),
            in_flight: state.slots.values().filter(|s| s.busy()).count(),
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let ids: Vec<String> = state.slots.keys().cloned().collect();
        for id in ids {
            invalidate_slot(&mut state, &id);
        }
    }
}

fn invalidate_slot(state: &mut State, api_id: &str) -> bool {
    let State {
        slots,
        next_generation,
    } = state;
    let Some(slot) = slots.get_mut(api_id) else {
        return false;
    };
    let had_index = slot.index.take().is_some();
    if let Some(build) = slot.inflight.take() {
        slot.superseded = Some((slot.generation, build));
    }
    *next_generation += 1;
    slot.generation = *next_generation;
    if !slot.busy() {
        slots.remove(api_id);
    }
    had_index
}

async fn run_build<F, Fut>(
    state: Arc<Mutex<State>>,
    api_id: String,
    generation: u64,
    previous: Option<Arc<SchemaIndex>>,
    superseded: Option<BuildFuture>,
    fetch: F,
) -> Result<Arc<SchemaIndex>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<FetchedDocument, FetchError>> + Send + 'static,
{
    if let Some(superseded) = superseded {
        tracing::debug!(api = %api_id, "Waiting for superseded schema index build");
        let _ = superseded.await;
    }

    let outcome = build_index(&api_id, previous, fetch).await;
    if let Err(e) = &outcome {
        tracing::warn!(api = %api_id, error = %e, "Schema index build failed");
    }

    let mut state = state.lock();
    let Some(slot) = state.slots.get_mut(&api_id) else {
        return outcome;
    };
    if slot.generation != generation {
        tracing::debug!(api = %api_id, "Discarding build for invalidated API");
        if slot
            .superseded
            .as_ref()
            .is_some_and(|(g, _)| *g == generation)
        {
            slot.superseded = None;
            if !slot.busy() && slot.index.is_none() {
                state.slots.remove(&api_id);
            }
        }
        return outcome;
    }
    slot.inflight = None;
    match &outcome {
        Ok(index) => slot.index = Some(Arc::clone(index)),
        Err(_) if slot.index.is_none() && !slot.busy() => {
            state.slots.remove(&api_id);
        }
        Err(_) => {}
    }
    outcome
}

async fn build_index<F, Fut>(
    api_id: &str,
    previous: Option<Arc<SchemaIndex>>,
    fetch: F,
) -> Result<Arc<SchemaIndex>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<FetchedDocument, FetchError>>,
{
    let document = fetch().await?;
    let fingerprint = document.fingerprint();
    if let Some(previous) = previous.filter(|p| p.source_fingerprint() == fingerprint) {
        tracing::info!(
            api = %api_id,
            fingerprint = %fingerprint,
            "Source document unchanged; keeping index"
        );
        return Ok(previous);
    }

    let id = api_id.to_string();
    let index = tokio::task::spawn_blocking(move || {
        let normalized =
            normalizer::normalize(&document.bytes, document.content_type.as_deref())?;
        SchemaIndex::from_normalized(id, fingerprint, normalized)
    })
    .await
    .map_err(|e| IndexError::Aborted(e.to_string()))??;
    Ok(Arc::new(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn doc(title: &str) -> FetchedDocument {
        FetchedDocument::new(
            format!(
                "openapi: 3.0.0\ninfo: {{title: {title}, version: \"1\"}}\n\
                 paths:\n  /ping:\n    get:\n      responses: {{}}\n"
            ),
            None,
        )
    }

    /// A fetch closure that counts invocations and returns `document` after `delay`.
    fn counting_fetch(
        counter: &Arc<AtomicUsize>,
        document: std::result::Result<FetchedDocument, FetchError>,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, std::result::Result<FetchedDocument, FetchError>>
    + Send
    + 'static {
        let counter = Arc::clone(counter);
        move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                document
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn concurrent_first_requests_fetch_once() {
        let cache = SchemaCache::new();
        let fetches = Arc::new(AtomicUsize::new(0));

        let calls = (0..16).map(|_| {
            cache.get_or_build(
                "api",
                BuildMode::Cached,
                counting_fetch(&fetches, Ok(doc("A")), Duration::from_millis(50)),
            )
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for r in &results {
            assert!(Arc::ptr_eq(first, r.as_ref().unwrap()));
        }
        assert_eq!(cache.stats(), CacheStats { cached: 1, in_flight: 0 });
    }

    #[tokio::test]
    async fn cached_mode_does_not_refetch() {
        let cache = SchemaCache::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let a = cache
            .get_or_build(
                "api",
                BuildMode::Cached,
                counting_fetch(&fetches, Ok(doc("A")), Duration::ZERO),
            )
            .await
            .unwrap();
        let b = cache
            .get_or_build(
                "api",
                BuildMode::Cached,
                counting_fetch(&fetches, Ok(doc("B")), Duration::ZERO),
            )
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_with_unchanged_bytes_keeps_index() {
        let cache = SchemaCache::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let a = cache
            .get_or_build(
                "api",
                BuildMode::Cached,
                counting_fetch(&fetches, Ok(doc("A")), Duration::ZERO),
            )
            .await
            .unwrap();
        let b = cache
            .get_or_build(
                "api",
                BuildMode::Refresh,
                counting_fetch(&fetches, Ok(doc("A")), Duration::ZERO),
            )
            .await
            .unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(&a, &b));

        let c = cache
            .get_or_build(
                "api",
                BuildMode::Refresh,
                counting_fetch(&fetches, Ok(doc("C")), Duration::ZERO),
            )
            .await
            .unwrap();
        assert_ne!(a.source_fingerprint(), c.source_fingerprint());
        assert_eq!(c.summary().title, "C");
        assert!(Arc::ptr_eq(&c, &cache.cached("api").unwrap()));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_index() {
        let cache = SchemaCache::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let a = cache
            .get_or_build(
                "api",
                BuildMode::Cached,
                counting_fetch(&fetches, Ok(doc("A")), Duration::ZERO),
            )
            .await
            .unwrap();

        let err = cache
            .get_or_build(
                "api",
                BuildMode::Refresh,
                counting_fetch(
                    &fetches,
                    Err(FetchError::HttpStatus {
                        url: "http://x/openapi.json".to_string(),
                        status: 500,
                    }),
                    Duration::ZERO,
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Fetch(FetchError::HttpStatus { status: 500, .. })));
        assert!(Arc::ptr_eq(&a, &cache.cached("api").unwrap()));

        let err = cache
            .get_or_build(
                "api",
                BuildMode::Refresh,
                counting_fetch(
                    &fetches,
                    Ok(FetchedDocument::new("swagger: '2.0'", None)),
                    Duration::ZERO,
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedVersion(_)));
        assert!(Arc::ptr_eq(&a, &cache.cached("api").unwrap()));
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn failed_first_build_leaves_nothing_behind() {
        let cache = SchemaCache::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let err = cache
            .get_or_build(
                "api",
                BuildMode::Cached,
                counting_fetch(&fetches, Ok(FetchedDocument::new("{ nope", None)), Duration::ZERO),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Parse(_)));
        assert!(cache.cached("api").is_none());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn invalidated_build_does_not_publish() {
        let cache = SchemaCache::new();
        let fetches = Arc::new(AtomicUsize::new(0));

        let pending = {
            let cache = cache.clone();
            let fetch = counting_fetch(&fetches, Ok(doc("A")), Duration::from_millis(100));
            tokio::spawn(async move { cache.get_or_build("api", BuildMode::Cached, fetch).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.stats().in_flight, 1);
        cache.invalidate("api");

        let index = pending.await.unwrap().unwrap();
        assert_eq!(index.api_id(), "api");
        assert!(cache.cached("api").is_none());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    /// A fetch closure that records the peak number of fetches running at once.
    fn tracked_fetch(
        active: &Arc<AtomicUsize>,
        peak: &Arc<AtomicUsize>,
        document: FetchedDocument,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, std::result::Result<FetchedDocument, FetchError>>
    + Send
    + 'static {
        let active = Arc::clone(active);
        let peak = Arc::clone(peak);
        move || {
            async move {
                let running = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(running, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(document)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn build_after_invalidate_waits_for_the_superseded_build() {
        let cache = SchemaCache::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let stale = {
            let cache = cache.clone();
            let fetch = tracked_fetch(&active, &peak, doc("A"), Duration::from_millis(100));
            tokio::spawn(async move { cache.get_or_build("api", BuildMode::Cached, fetch).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!cache.invalidate("api"), "nothing was cached yet");
        assert_eq!(cache.stats(), CacheStats { cached: 0, in_flight: 1 });

        let fresh = cache
            .get_or_build(
                "api",
                BuildMode::Cached,
                tracked_fetch(&active, &peak, doc("B"), Duration::from_millis(10)),
            )
            .await
            .unwrap();
        assert_eq!(fresh.summary().title, "B");
        assert_eq!(stale.await.unwrap().unwrap().summary().title, "A");

        assert_eq!(peak.load(Ordering::SeqCst), 1, "builds never overlap");
        assert!(Arc::ptr_eq(&fresh, &cache.cached("api").unwrap()));
        assert_eq!(cache.stats(), CacheStats { cached: 1, in_flight: 0 });
    }

    #[tokio::test]
    async fn different_apis_build_independently() {
        let cache = SchemaCache::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(20);
        let (a, b) = tokio::join!(
            cache.get_or_build(
                "a",
                BuildMode::Cached,
                counting_fetch(&fetches, Ok(doc("A")), delay),
            ),
            cache.get_or_build(
                "b",
                BuildMode::Cached,
                counting_fetch(&fetches, Ok(doc("B")), delay),
            ),
        );
        assert_eq!(a.unwrap().summary().title, "A");
        assert_eq!(b.unwrap().summary().title, "B");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        cache.clear();
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
