//! PR ingestion and heat scheduling (§4.5). One tick does, in order: list
//! fetch, store replace, broadcast, heat decay, detail-refresh sweep,
//! second broadcast if anything changed. On fetch failure the tick backs
//! off exponentially up to `backoff_secs` and resumes at the normal
//! interval on the next success.

use std::sync::Arc;
use std::time::Duration;

use attn_bridge::event_bus::EventBus;
use attn_bridge::protocol::ServerEvent;
use attn_core::config::HeatIntervals;
use attn_core::store::Store;
use attn_core::types::{CiStatus, HeatState, Pr, PrReason, PrState, ReviewStatus};
use attn_github::client::{reason_for, GitHubClient};
use chrono::Utc;

pub async fn run(
    store: Arc<Store>,
    github: Arc<dyn GitHubClient>,
    events: EventBus,
    heat: HeatIntervals,
    interval: Duration,
    backoff_cap: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut current_delay = interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_delay) => {
                match tick(&store, &github, &events, &heat).await {
                    Ok(()) => current_delay = interval,
                    Err(e) => {
                        tracing::warn!(error = %e, "poll tick failed, backing off");
                        events.publish(ServerEvent::Warning {
                            message: format!("github poll failed: {e}"),
                        });
                        current_delay = (current_delay * 2).min(backoff_cap);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("poller shutting down");
                break;
            }
        }
    }
}

async fn tick(
    store: &Store,
    github: &Arc<dyn GitHubClient>,
    events: &EventBus,
    heat: &HeatIntervals,
) -> Result<(), attn_github::client::GitHubError> {
    let summaries = github.fetch_all().await?;
    let now = Utc::now();
    let new_set: Vec<Pr> = summaries
        .into_iter()
        .map(|s| {
            let (reason, state) = reason_for(s.role, CiStatus::None, ReviewStatus::None, None);
            Pr {
                coords: s.coords,
                role: s.role,
                state,
                reason,
                title: s.title,
                url: s.url,
                last_updated: s.last_updated,
                last_polled: now,
                muted: false,
                details_fetched: false,
                details_fetched_at: None,
                mergeable: None,
                mergeable_state: None,
                ci_status: CiStatus::None,
                review_status: ReviewStatus::None,
                head_sha: None,
                comment_count: 0,
                approved_by_me: s.approved_by_me,
                heat_state: HeatState::Hot,
                last_heat_activity_at: now,
                has_new_changes: false,
            }
        })
        .collect();

    let merged = match store.set_prs(new_set).await {
        Ok(prs) => prs,
        Err(e) => {
            tracing::warn!(error = %e, "failed to persist polled pr set");
            return Ok(());
        }
    };
    events.publish(ServerEvent::PrsUpdated { prs: merged });

    if let Err(e) = store.decay_heat_states(heat.clone()).await {
        tracing::warn!(error = %e, "failed to decay pr heat states");
    }

    let candidates = match store.get_prs_needing_detail_refresh(heat.clone()).await {
        Ok(prs) => prs,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list prs needing detail refresh");
            return Ok(());
        }
    };
    if candidates.is_empty() {
        return Ok(());
    }

    let mut any_updated = false;
    for pr in candidates {
        let details = match github.fetch_pr_details(&pr.coords).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, pr_id = %pr.id(), "failed to fetch pr details");
                continue;
            }
        };
        let sha_changed = pr.head_sha.as_deref() != details.head_sha.as_deref();
        let (reason, state): (PrReason, PrState) =
            reason_for(pr.role, details.ci_status, details.review_status, details.mergeable);
        let updated = store
            .update_pr_details(
                &pr.id(),
                details.mergeable,
                details.mergeable_state,
                details.ci_status,
                details.review_status,
                details.head_sha,
                details.comment_count,
                reason,
                state,
            )
            .await;
        if updated.is_ok() {
            any_updated = true;
            if sha_changed && pr.details_fetched {
                let _ = store.set_pr_hot(&pr.id()).await;
            }
        }
    }

    if any_updated {
        if let Ok(prs) = store.list_prs().await {
            events.publish(ServerEvent::PrsUpdated { prs });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use attn_core::config::HeatIntervals;
    use attn_core::types::{PrDetails, PrRole};
    use attn_github::client::{MockGitHubClient, MockPr};

    fn coords(n: u64) -> attn_core::types::PrCoords {
        attn_core::types::PrCoords {
            host: "github.com".into(),
            owner: "acme".into(),
            repo: "widgets".into(),
            number: n,
        }
    }

    fn seeded_pr(n: u64) -> MockPr {
        MockPr {
            coords: coords(n),
            role: PrRole::Author,
            approved_by_me: false,
            title: "Add widget".into(),
            url: "https://example.com/1".into(),
            last_updated: Utc::now(),
            details: PrDetails {
                title: "Add widget".into(),
                url: "https://example.com/1".into(),
                mergeable: Some(true),
                mergeable_state: Some("clean".into()),
                ci_status: CiStatus::None,
                review_status: ReviewStatus::None,
                head_sha: Some("sha1".into()),
                comment_count: 0,
            },
        }
    }

    #[tokio::test]
    async fn tick_ingests_seeded_prs_and_broadcasts() {
        let store = Store::open_in_memory().await.unwrap();
        let mock = MockGitHubClient::new();
        mock.seed(seeded_pr(1));
        let github: Arc<dyn GitHubClient> = Arc::new(mock);
        let events = EventBus::new();
        let rx = events.subscribe();

        tick(&store, &github, &events, &HeatIntervals::default()).await.unwrap();

        let prs = store.list_prs().await.unwrap();
        assert_eq!(prs.len(), 1);
        let ServerEvent::PrsUpdated { prs } = rx.try_recv().unwrap() else {
            panic!("expected PrsUpdated");
        };
        assert_eq!(prs.len(), 1);
    }

    #[tokio::test]
    async fn tick_removes_prs_no_longer_returned() {
        let store = Store::open_in_memory().await.unwrap();
        let mock = MockGitHubClient::new();
        mock.seed(seeded_pr(1));
        let github: Arc<dyn GitHubClient> = Arc::new(mock.clone());
        let events = EventBus::new();

        tick(&store, &github, &events, &HeatIntervals::default()).await.unwrap();

        mock.clear();
        tick(&store, &github, &events, &HeatIntervals::default()).await.unwrap();

        assert!(store.list_prs().await.unwrap().is_empty());
    }
}
