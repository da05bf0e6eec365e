//! End-to-end resolution tests against a real store root.
//!
//! These tests verify that:
//! - A re-scraped entity under a corrected uri is renamed, not duplicated
//! - A look-alike uri with contradicting attributes becomes a new entity
//! - Index, aliases, snapshots and queue survive a reopen

use wealthdex::{
    Classification, Deduplicator, ProfileRecord, ResolutionOutcome, SnapshotLookup, Store,
    StoreConfig,
};

use tempfile::tempdir;

fn record(uri: &str, id: &str, gender: &str) -> ProfileRecord {
    ProfileRecord::new(uri).with_id(id).with_gender(gender)
}

#[test]
fn test_rename_then_reject_conflicting_lookalike() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(StoreConfig::with_root(dir.path())).unwrap();

    let first = store.resolver().resolve(&record("jane-doe", "h1", "f")).unwrap();
    assert_eq!(first.outcome, ResolutionOutcome::Created);
    assert_eq!(first.uri, "jane-doe");

    let second = store
        .resolver()
        .resolve(&record("jane-doe-family", "h1", "f"))
        .unwrap();
    assert_eq!(second.outcome, ResolutionOutcome::Updated);
    assert_eq!(second.previous_uri.as_deref(), Some("jane-doe"));

    let profiles = store.profiles();
    assert!(profiles.get("jane-doe").is_none());
    let renamed = profiles.get("jane-doe-family").unwrap();
    assert_eq!(renamed.aliases, vec!["jane-doe"]);
    let found = profiles.find("jane-doe");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].uri, "jane-doe-family");

    // After the rename the reversed slug is too far from "jane-doe-family"
    // to be a candidate at all.
    let lookalike = record("doe-jane", "h2", "m");
    assert!(Deduplicator::default().evaluate(store.profiles(), &lookalike).is_empty());
    assert_eq!(store.resolver().classify(&lookalike).unwrap(), Classification::New);
    let third = store.resolver().resolve(&lookalike).unwrap();
    assert_eq!(third.outcome, ResolutionOutcome::Created);
    assert_eq!(store.profiles().len(), 2);
}

#[test]
fn test_reversed_candidate_rejected_on_gender() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(StoreConfig::with_root(dir.path())).unwrap();
    store.resolver().resolve(&record("jane-doe", "h1", "f")).unwrap();

    let lookalike = record("doe-jane", "h2", "m");
    let evaluated = Deduplicator::default().evaluate(store.profiles(), &lookalike);
    assert_eq!(evaluated.len(), 1);
    assert_eq!(evaluated[0].target, "jane-doe");
    assert!(evaluated[0].reversed);
    assert!(!evaluated[0].mergeable);

    let resolution = store.resolver().resolve(&lookalike).unwrap();
    assert_eq!(resolution.outcome, ResolutionOutcome::Created);
    assert_eq!(resolution.uri, "doe-jane");
    assert_eq!(store.profiles().len(), 2);
    assert_eq!(store.profiles().get("jane-doe").unwrap().fields.gender.as_deref(), Some("f"));
}

#[test]
fn test_alias_sets_stay_disjoint() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(StoreConfig::with_root(dir.path())).unwrap();

    store.resolver().resolve(&record("jane-doe", "h1", "f")).unwrap();
    store.resolver().resolve(&record("jane-doe-family", "h1", "f")).unwrap();
    store.resolver().resolve(&record("john-smith", "h2", "m")).unwrap();
    store.resolver().resolve(&record("john-smith-jr", "h2", "m")).unwrap();

    let summaries: Vec<_> = store.profiles().iter().collect();
    for a in &summaries {
        for b in &summaries {
            if a.uri == b.uri {
                continue;
            }
            assert!(!a.aliases.contains(&b.uri));
            assert!(a.aliases.iter().all(|alias| !b.aliases.contains(alias)));
        }
    }
}

#[test]
fn test_history_survives_rename_and_reopen() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::with_root(dir.path());
    {
        let mut store = Store::open(config.clone()).unwrap();
        for (uri, date, rank) in [
            ("jane-doe", "2020-01-01", 30),
            ("jane-doe", "2020-06-01", 25),
            ("jane-doe-family", "2021-01-01", 20),
        ] {
            let r = record(uri, "h1", "f").with_date(date).with_ranking(rank, 1000.0);
            store.resolver().resolve(&r).unwrap();
        }
    }

    let store = Store::open(config).unwrap();
    let summary = store.profiles().get("jane-doe-family").unwrap();
    let history = store.profile_snapshots().history(summary).unwrap();

    assert_eq!(history.dates(), ["2020-01-01", "2020-06-01", "2021-01-01"]);
    assert_eq!(history.nearest_date("2020-12-31"), Some("2020-06-01"));
    assert_eq!(history.nearest_date("2019-01-01"), Some("2020-01-01"));

    match history.get_snapshot("2020-12-31", false).unwrap() {
        SnapshotLookup::Nearest { requested, snapshot } => {
            assert_eq!(requested, "2020-12-31");
            assert_eq!(snapshot.ranking.unwrap().rank, Some(25));
        }
        other => panic!("expected nearest snapshot, got {other:?}"),
    }

    let rows = history.history().unwrap();
    assert_eq!(rows.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![Some(30), Some(25), Some(20)]);
    assert_eq!(history.read_meta().unwrap().unwrap().identity.unwrap().as_str(), "h1");
}

#[test]
fn test_queue_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = StoreConfig::with_root(dir.path());
    {
        let mut store = Store::open(config.clone()).unwrap();
        store.resolver().resolve(&record("jane-doe", "h1", "f")).unwrap();
        store.queue_mut().add("list", "billionaires", Some(5), None).unwrap();
    }

    let mut store = Store::open(config).unwrap();
    assert!(store.queue().contains("profile", "jane-doe"));
    let item = store.queue_mut().next("profile", 1).unwrap().remove(0);
    assert_eq!(item.prio, Some(100));
    assert_eq!(store.queue().len("list"), 1);
}
