//! Integration tests for race resolution across overlapping calls

#[cfg(test)]
mod tests {
    use op_call_tracker::{context_stack, Track, TrackState, Tracker};
    use serde_json::json;
    use std::future::Future;
    use std::time::Duration;
    use tokio::task::{JoinHandle, LocalSet};

    type SearchTracker = Tracker<String, String>;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Minimal run-wrapper: track, expose context for the synchronous
    /// prologue only, then settle the track when the future completes.
    fn run_tracked<F, Fut>(tracker: &SearchTracker, call: F) -> (Track<String, String>, JoinHandle<()>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, String>> + 'static,
    {
        let track = tracker.track();
        let restore = context_stack::prepare(track.context());
        let fut = call();
        restore.restore().expect("balanced restore");

        let settle = track.clone();
        let handle = tokio::task::spawn_local(async move {
            match fut.await {
                Ok(value) => settle.fulfill(value),
                Err(error) => settle.reject(error),
            };
        });
        (track, handle)
    }

    fn search(query: &'static str, delay_ms: u64) -> impl Future<Output = Result<String, String>> {
        let ctx = context_stack::require_current().expect("prologue runs with a context");
        ctx.update_data("query", json!(query));

        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            assert!(context_stack::current().is_none());
            if query.is_empty() {
                Err("empty query".to_string())
            } else {
                Ok(format!("results for {query}"))
            }
        }
    }

    #[test]
    fn test_out_of_order_fulfillment_five_calls() {
        init_tracing();
        let tracker = SearchTracker::new();
        let tracks: Vec<_> = (0..5).map(|_| tracker.track()).collect();
        assert_eq!(
            tracks.iter().map(Track::sn).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );

        let order = [2usize, 0, 4, 1, 3];
        for (step, i) in order.into_iter().enumerate() {
            assert!(!tracker.latest().finished);
            tracks[i].fulfill(format!("value {}", i + 1));
            assert!(tracker.has().finished);

            let last = step == order.len() - 1;
            assert_eq!(tracker.latest().finished, last, "after step {step}");
            assert_eq!(tracker.has().tracking, !last, "after step {step}");
            assert_eq!(tracker.counters().unsettled, (order.len() - step - 1) as u64);
        }

        let fresh: Vec<_> = tracks
            .iter()
            .filter(|t| !t.is_stale_value())
            .map(Track::sn)
            .collect();
        assert_eq!(fresh, vec![5]);
        assert!(tracker.has().finished);
        assert!(tracker.latest().finished);
        assert!(tracker.latest().fulfilled);
        assert!(!tracker.has().tracking);
        assert!(tracks[4].is_latest_fulfill());
        assert!(tracks.iter().all(|t| t.is_fulfilled()));
    }

    #[test]
    fn test_latest_flags_false_until_newest_settles() {
        let tracker = SearchTracker::new();
        let tracks: Vec<_> = (0..5).map(|_| tracker.track()).collect();
        tracks[2].fulfill("3".to_string());
        tracks[0].fulfill("1".to_string());
        assert!(!tracker.latest().finished);
        assert!(tracker.has().tracking);

        tracks[4].fulfill("5".to_string());
        assert!(!tracker.latest().finished);
        assert!(tracker.latest().fulfilled);
        tracks[1].fulfill("2".to_string());
        assert!(!tracker.latest().finished);
        assert!(tracker.has().tracking);
        tracks[3].fulfill("4".to_string());
        assert!(tracker.latest().finished);
        assert!(!tracker.has().tracking);
    }

    #[test]
    fn test_staleness_independent_of_completion_order() {
        for newer_first in [true, false] {
            let tracker = SearchTracker::new();
            let a = tracker.track();
            let b = tracker.track();
            if newer_first {
                b.fulfill("b".to_string());
                a.fulfill("a".to_string());
            } else {
                a.fulfill("a".to_string());
                b.fulfill("b".to_string());
            }
            assert!(a.is_stale_value());
            assert!(!b.is_stale_value());
            assert!(b.is_latest_fulfill());
            assert!(!a.is_latest_fulfill());
        }
    }

    #[test]
    fn test_older_fulfill_after_newer_update() {
        let tracker = SearchTracker::new();
        let t1 = tracker.track();
        let t2 = tracker.track();
        t1.update("a".to_string());
        t2.update("b".to_string());
        t1.fulfill("a-final".to_string());

        assert_eq!(t1.state(), TrackState::Fulfilled);
        assert_eq!(tracker.counters().latest_updating, 2);
        assert!(!t1.is_latest_fulfill());
        assert!(t1.is_stale_value());
        assert!(t2.is_latest_update());
        assert!(tracker.has().updating);
    }

    #[test]
    fn test_rejection_is_stale_immediately() {
        let tracker = SearchTracker::new();
        let only = tracker.track();
        only.reject("network down".to_string());
        assert!(only.is_stale_value());
        assert!(only.is_latest_finish());
        assert!(tracker.latest().finished);
        assert!(!tracker.latest().fulfilled);
        assert!(tracker.has().rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_searches_settle_out_of_order() {
        init_tracing();
        let local = LocalSet::new();
        local
            .run_until(async {
                let tracker = SearchTracker::new();
                let (t1, h1) = run_tracked(&tracker, || search("a", 30));
                let (t2, h2) = run_tracked(&tracker, || search("ab", 10));
                let (t3, h3) = run_tracked(&tracker, || search("abc", 20));

                assert!(context_stack::current().is_none());
                assert_eq!(t1.get_data("query"), Some(json!("a")));
                assert_eq!(t3.get_data("query"), Some(json!("abc")));
                assert!(tracker.has().tracking);

                h2.await.unwrap();
                assert!(t2.is_fulfilled());
                assert!(!t2.is_stale_value());
                assert!(t2.is_latest_fulfill());
                assert!(!tracker.latest().finished);
                assert!(t1.is_pending());

                h3.await.unwrap();
                assert!(t2.is_stale_value());
                assert!(t3.is_latest_fulfill());
                assert!(t1.is_pending());
                assert!(!tracker.latest().finished);

                h1.await.unwrap();
                assert!(t1.is_fulfilled());
                assert!(t1.is_stale_value());
                assert!(!t3.is_stale_value());
                assert_eq!(t3.value(), Some("results for abc".to_string()));
                assert!(tracker.latest().finished);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_newest_call_rejects() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let tracker = SearchTracker::new();
                let (t1, h1) = run_tracked(&tracker, || search("rust", 10));
                let (t2, h2) = run_tracked(&tracker, || search("", 20));

                h1.await.unwrap();
                assert!(!t1.is_stale_value());

                h2.await.unwrap();
                assert!(t2.is_rejected());
                assert_eq!(t2.error(), Some("empty query".to_string()));
                assert!(t2.is_stale_value());
                assert!(t1.is_stale_value());
                assert!(t2.is_latest_finish());

                let flags = tracker.flags();
                assert!(flags.has.fulfilled && flags.has.rejected);
                assert!(flags.latest.finished);
                assert!(!flags.latest.fulfilled);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reports_interleaved() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let tracker = SearchTracker::new();
                let slow = tracker.track();
                let fast = tracker.track();

                let slow_task = {
                    let slow = slow.clone();
                    tokio::task::spawn_local(async move {
                        slow.update("slow 50%".to_string());
                        tokio::time::sleep(Duration::from_millis(40)).await;
                        slow.fulfill("slow done".to_string());
                    })
                };
                let fast_task = {
                    let fast = fast.clone();
                    tokio::task::spawn_local(async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        fast.update("fast 50%".to_string());
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        fast.fulfill("fast done".to_string());
                    })
                };

                tokio::time::sleep(Duration::from_millis(5)).await;
                assert!(slow.is_latest_update());
                assert!(!slow.is_stale_value());

                tokio::time::sleep(Duration::from_millis(10)).await;
                assert!(!slow.is_latest_update());
                assert!(slow.is_stale_value());
                assert!(fast.is_latest_update());

                fast_task.await.unwrap();
                slow_task.await.unwrap();
                assert!(fast.is_latest_fulfill());
                assert!(!slow.is_latest_fulfill());
                assert_eq!(slow.value(), Some("slow done".to_string()));
                assert!(!tracker.has().updating);
            })
            .await;
    }

    #[test]
    fn test_abandoned_call_superseded() {
        let tracker = SearchTracker::new();
        let abandoned = tracker.track();
        abandoned.update("partial".to_string());
        let next = tracker.track();
        next.fulfill("complete".to_string());

        assert!(abandoned.is_updating());
        assert!(abandoned.is_stale_value());
        assert!(!abandoned.is_latest_update());
        assert!(!tracker.has().updating);
        assert!(tracker.latest().fulfilled);

        // Still alive, so still in flight.
        assert!(tracker.has().tracking);
        assert!(!tracker.latest().finished);

        drop(abandoned);
        assert_eq!(tracker.counters().unsettled, 0);
        assert!(!tracker.has().tracking);
        assert!(tracker.latest().finished);
    }
}
