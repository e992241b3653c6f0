mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, MemoryStore, StaticSource, movie};
use tokio::sync::Notify;
use watchlazy::application::catalog::Tier;
use watchlazy::application::error::AppError;
use watchlazy::application::refresh::RefreshError;
use watchlazy::application::scheduler::spawn_incremental_schedule;
use watchlazy::application::repos::RepoError;
use watchlazy::domain::movies::{MovieEdit, MovieRecord};

fn feed() -> Vec<MovieRecord> {
    vec![
        movie("Heat", 1995, &["Crime"], 8.3),
        movie("Ronin", 1998, &["Crime", "Action"], 7.2),
        movie("Collateral", 2004, &["Crime", "Thriller"], 7.5),
    ]
}

#[tokio::test]
async fn concurrent_bulk_refreshes_share_one_fetch() {
    let gate = Arc::new(Notify::new());
    let source = StaticSource::gated("feed", feed(), Arc::clone(&gate));
    let harness = Harness::new(
        Some(MemoryStore::with_movies(Vec::new())),
        vec![source.clone()],
    );

    let first = {
        let refresh = Arc::clone(&harness.refresh);
        tokio::spawn(async move { refresh.bulk_refresh().await })
    };
    while source.fetches() == 0 {
        tokio::task::yield_now().await;
    }
    let second = {
        let refresh = Arc::clone(&harness.refresh);
        tokio::spawn(async move { refresh.bulk_refresh().await })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(harness.refresh.in_progress());
    gate.notify_one();

    let first = first.await.expect("first task").expect("first refresh");
    let second = second.await.expect("second task").expect("second refresh");

    assert_eq!(source.fetches(), 1);
    assert!(first.is_leader());
    assert!(!second.is_leader());
    let first = first.into_inner();
    assert_eq!(first, second.into_inner());
    assert_eq!(first.written, 3);
    assert_eq!(harness.store().len(), 3);
}

#[tokio::test]
async fn incremental_update_inserts_only_unseen_movies() {
    let source = StaticSource::new("feed", feed());
    let harness = Harness::new(Some(MemoryStore::with_movies(Vec::new())), vec![source]);

    let first = harness
        .refresh
        .incremental_update()
        .await
        .expect("first run")
        .into_inner();
    assert_eq!((first.inserted, first.skipped), (3, 0));
    assert!(first.invalidated);

    let second = harness
        .refresh
        .incremental_update()
        .await
        .expect("second run")
        .into_inner();
    assert_eq!((second.inserted, second.skipped), (0, 3));
    assert!(!second.invalidated);
}

#[tokio::test]
async fn mutations_clear_previously_cached_reads() {
    let store = MemoryStore::with_movies(feed());
    let harness = Harness::new(Some(store), Vec::new());

    harness.catalog.movie("heat-1995").await;
    assert_eq!(
        harness.catalog.movie("heat-1995").await.tier(),
        Some(Tier::Cache)
    );
    let reads = harness.store().reads();

    let edit = MovieEdit {
        title: Some("Heat (Director's Definitive Edition)".to_string()),
        ..MovieEdit::default()
    };
    harness
        .refresh
        .edit_movie("heat-1995", &edit)
        .await
        .expect("edit");

    let after = harness.catalog.movie("heat-1995").await;
    assert_eq!(after.tier(), Some(Tier::Store));
    assert!(harness.store().reads() > reads);
    assert_eq!(
        after.value().map(|detail| detail.movie.title.as_str()),
        Some("Heat (Director's Definitive Edition)")
    );

    harness
        .refresh
        .delete_movie("heat-1995")
        .await
        .expect("delete");
    assert!(harness.catalog.movie("heat-1995").await.is_empty());
}

#[tokio::test]
async fn failed_write_leaves_cache_untouched() {
    let harness = Harness::new(Some(MemoryStore::with_movies(feed())), Vec::new());
    harness.catalog.movie("ronin-1998").await;

    harness.store().set_failing(true);
    let edit = MovieEdit {
        rating: Some(1.0),
        ..MovieEdit::default()
    };
    let result = harness.refresh.edit_movie("ronin-1998", &edit).await;

    assert!(result.is_err());
    let cached = harness.catalog.movie("ronin-1998").await;
    assert_eq!(cached.tier(), Some(Tier::Cache));
    assert_eq!(
        cached.value().and_then(|detail| detail.movie.rating),
        Some(7.2)
    );
}

#[tokio::test]
async fn unknown_movie_edits_are_not_found() {
    let harness = Harness::new(Some(MemoryStore::with_movies(feed())), Vec::new());
    let edit = MovieEdit {
        rating: Some(5.0),
        ..MovieEdit::default()
    };

    let result = harness.refresh.edit_movie("ghost-1999", &edit).await;

    assert!(matches!(
        result,
        Err(AppError::Repo(RepoError::NotFound))
    ));
}

#[tokio::test]
async fn without_a_store_bulk_refresh_updates_only_the_snapshot() {
    let source = StaticSource::new("feed", feed());
    let harness = Harness::new(None, vec![source]);

    let report = harness
        .refresh
        .bulk_refresh()
        .await
        .expect("snapshot refresh")
        .into_inner();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.written, 0);
    assert!(report.snapshot_persisted);
    assert_eq!(harness.snapshot.current().movies.len(), 3);

    let incremental = harness.refresh.incremental_update().await;
    assert!(matches!(incremental, Err(RefreshError::NoStore)));
}

#[tokio::test(start_paused = true)]
async fn schedule_runs_incremental_updates_on_cadence() {
    let source = StaticSource::new("feed", feed());
    let harness = Harness::new(
        Some(MemoryStore::with_movies(Vec::new())),
        vec![source.clone()],
    );

    let handle = spawn_incremental_schedule(Arc::clone(&harness.refresh), Duration::from_secs(60));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(source.fetches(), 0);

    tokio::time::advance(Duration::from_secs(60)).await;
    for _ in 0..1_000 {
        if harness.store().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(source.fetches() >= 1);
    assert_eq!(harness.store().len(), 3);

    handle.abort();
    let _ = handle.await;
}
