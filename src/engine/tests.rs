//! Scenario tests for the webhook engine.

use super::*;
use crate::audit::MemoryAuditSink;
use crate::index::IndexMode;
use crate::source::SourceControlError;
use crate::store::MemoryCatalog;
use crate::test_utils::{
    FakeSourceControl, RecordingIndexer, arb_unit_name, file, workflows_manifest,
};
use crate::types::{Entry, ReferenceType, Version};
use proptest::prelude::*;

type TestEngine = WebhookEngine<FakeSourceControl, MemoryCatalog, MemoryAuditSink>;

const HEAD: &str = "1111111111111111111111111111111111111111";

struct Harness {
    engine: TestEngine,
    indexer: RecordingIndexer,
}

impl Harness {
    fn new() -> Self {
        let catalog = MemoryCatalog::new();
        catalog.register_user("alice").unwrap();
        let indexer = RecordingIndexer::new();
        let engine = WebhookEngine::new(
            FakeSourceControl::new(),
            catalog,
            MemoryAuditSink::new(),
            SyncConfig::default(),
        )
        .with_indexer(indexer.clone());
        Harness { engine, indexer }
    }

    /// A harness whose `main` branch is at [`HEAD`] and declares `names`.
    fn with_workflows(names: &[&str]) -> Self {
        let harness = Self::new();
        harness.source().set_manifest(&workflows_manifest(names));
        harness.source().set_hash(&GitReference::parse("refs/heads/main"), HEAD);
        harness
    }

    fn source(&self) -> &FakeSourceControl {
        self.engine.source()
    }

    fn catalog(&self) -> &MemoryCatalog {
        self.engine.store()
    }

    fn events(&self) -> Vec<AuditEvent> {
        self.engine.audit().events()
    }

    fn entry(&self, path: &str) -> Option<Entry> {
        self.catalog()
            .entries()
            .unwrap()
            .into_iter()
            .find(|e| e.path == path)
    }

    async fn push(&self, event: PushEvent) -> Result<PushSummary, SyncError> {
        self.engine.handle_push(event).await
    }
}

fn push_event(reference: &str, after: Option<&str>) -> PushEvent {
    PushEvent {
        repository: RepoPath::new("org", "repo"),
        git_reference: GitReference::parse(reference),
        actor_usernames: vec!["alice".to_string()],
        installation_id: Some(7),
        delivery_id: DeliveryId::new("delivery-1"),
        after_commit: after.map(CommitHash::new),
        throw_if_not_successful: false,
    }
}

fn main_push() -> PushEvent {
    push_event("refs/heads/main", Some(HEAD))
}

fn delete_event(reference: &str) -> DeleteEvent {
    DeleteEvent {
        repository: RepoPath::new("org", "repo"),
        git_reference: GitReference::parse(reference),
        actor_username: Some("alice".to_string()),
        installation_id: Some(7),
        delivery_id: DeliveryId::new("delivery-2"),
    }
}

fn successes(events: &[AuditEvent]) -> usize {
    events.iter().filter(|e| e.success && !e.ignored).count()
}

fn failures(events: &[AuditEvent]) -> usize {
    events.iter().filter(|e| !e.success).count()
}

// ─── Push ───

#[tokio::test]
async fn push_creates_entry_and_records_success() {
    let h = Harness::with_workflows(&["align"]);

    let summary = h.push(main_push()).await.unwrap();

    assert_eq!(summary.reconciled, vec!["github.com/org/repo/align"]);
    let entry = h.entry("github.com/org/repo/align").unwrap();
    assert_eq!(entry.default_version.as_deref(), Some("main"));
    assert_eq!(entry.versions.len(), 1);

    let events = h.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].success);
    assert_eq!(events[0].event_type, AuditEventType::Push);
    assert_eq!(events[0].delivery_id, "delivery-1");
    assert_eq!(events[0].actor.as_deref(), Some("alice"));
    assert_eq!(
        events[0].entry_name.as_deref(),
        Some("github.com/org/repo/align")
    );
    assert!(
        h.indexer
            .notices()
            .contains(&("github.com/org/repo/align".to_string(), IndexMode::Update))
    );
}

#[tokio::test]
async fn replayed_push_converges_to_same_state() {
    let h = Harness::with_workflows(&["align"]);

    h.push(main_push()).await.unwrap();
    let first = h.entry("github.com/org/repo/align").unwrap();
    h.push(main_push()).await.unwrap();
    let second = h.entry("github.com/org/repo/align").unwrap();

    assert_eq!(h.catalog().entries().unwrap().len(), 1);
    assert_eq!(first.versions.len(), 1);
    assert_eq!(first.versions[0].source_files, second.versions[0].source_files);
    assert_eq!(first.versions[0].validations, second.versions[0].validations);

    // Once the branch has moved on, the replay is ignored.
    h.source()
        .set_hash(&GitReference::parse("refs/heads/main"), "2222222222222222");
    let before = h.events().len();
    let summary = h.push(main_push()).await.unwrap();
    assert!(summary.ignored.is_some());
    let events = h.events();
    assert_eq!(events.len(), before + 1);
    assert!(events[before].ignored);
    assert_eq!(h.entry("github.com/org/repo/align").unwrap(), second);
}

#[tokio::test]
async fn stale_push_changes_nothing() {
    let h = Harness::with_workflows(&["align"]);
    h.source()
        .set_hash(&GitReference::parse("refs/heads/main"), "def");

    let summary = h
        .push(push_event("refs/heads/main", Some("abc")))
        .await
        .unwrap();

    assert!(summary.ignored.is_some());
    assert!(h.catalog().entries().unwrap().is_empty());
    assert_eq!(h.source().materialize_calls(), 0);
    let events = h.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].ignored);
    assert!(events[0].success);
}

#[tokio::test]
async fn push_without_after_commit_is_processed() {
    let h = Harness::with_workflows(&["align"]);
    h.push(push_event("refs/heads/main", None)).await.unwrap();
    assert!(h.entry("github.com/org/repo/align").is_some());
}

#[tokio::test]
async fn frozen_version_is_left_untouched() {
    let h = Harness::with_workflows(&["align"]);
    let mut entry = crate::test_utils::entry_for("github.com/org/repo/align");
    entry.name = Some("align".into());
    let mut frozen = Version::new("main", ReferenceType::Branch);
    frozen.frozen = true;
    frozen
        .source_files
        .push(file(FileType::PrimaryDescriptor, "/Dockstore.cwl", "snapshot"));
    entry.versions.push(frozen.clone());
    entry.default_version = Some("main".into());
    h.catalog().insert_entry(entry).unwrap();

    h.push(main_push()).await.unwrap();

    let stored = h.entry("github.com/org/repo/align").unwrap();
    assert_eq!(stored.version("main"), Some(&frozen));
    let events = h.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].success);
    assert!(events[0].message.contains("frozen"));
}

#[tokio::test]
async fn failing_unit_does_not_stop_the_others() {
    let h = Harness::with_workflows(&["first", "second", "third"]);
    h.source()
        .fail_unit("second", SourceControlError::not_found("descriptor missing"));

    let summary = h.push(main_push()).await.unwrap();

    assert!(h.entry("github.com/org/repo/first").is_some());
    assert!(h.entry("github.com/org/repo/second").is_none());
    assert!(h.entry("github.com/org/repo/third").is_some());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].entry_path, "github.com/org/repo/second");

    let events = h.events();
    assert_eq!(events.len(), 3);
    assert_eq!(successes(&events), 2);
    assert_eq!(failures(&events), 1);
    assert_eq!(
        events[1].entry_name.as_deref(),
        Some("github.com/org/repo/second")
    );
}

#[tokio::test]
async fn invalid_unit_fails_before_its_files_are_fetched() {
    let h = Harness::with_workflows(&["bad_-name", "align"]);
    h.source()
        .fail_unit("bad_-name", SourceControlError::rate_limited("quota"));

    let summary = h.push(main_push()).await.unwrap();

    assert_eq!(summary.reconciled, vec!["github.com/org/repo/align"]);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].message.contains("may only contain"));
    assert_eq!(h.source().materialize_calls(), 1);
    assert_eq!(failures(&h.events()), 1);
}

#[tokio::test]
async fn unit_failures_are_surfaced_on_request() {
    let h = Harness::with_workflows(&["first", "second", "third"]);
    h.source()
        .fail_unit("second", SourceControlError::permanent("bad descriptor"));

    let mut event = main_push();
    event.throw_if_not_successful = true;
    let err = h.push(event).await.unwrap_err();

    assert!(matches!(err, SyncError::Incomplete { failed: 1, total: 3 }));
    assert!(!err.should_retry());
    assert!(h.entry("github.com/org/repo/first").is_some());
    assert!(h.entry("github.com/org/repo/third").is_some());
}

#[tokio::test]
async fn default_branch_is_elected_on_first_push() {
    let h = Harness::with_workflows(&["align"]);
    let dev = GitReference::parse("refs/heads/dev");
    h.source().set_hash(&dev, "3333333");

    h.push(push_event("refs/heads/dev", Some("3333333")))
        .await
        .unwrap();
    assert_eq!(
        h.entry("github.com/org/repo/align").unwrap().default_version,
        None
    );

    h.push(main_push()).await.unwrap();
    let entry = h.entry("github.com/org/repo/align").unwrap();
    assert_eq!(entry.default_version.as_deref(), Some("main"));
    assert_eq!(entry.versions.len(), 2);
}

#[tokio::test]
async fn source_files_follow_the_remote() {
    let h = Harness::with_workflows(&["align"]);
    h.source().set_unit_files(
        "align",
        vec![
            file(FileType::SecondaryDescriptor, "/A", "x"),
            file(FileType::SecondaryDescriptor, "/B", "y"),
        ],
    );
    h.push(main_push()).await.unwrap();

    h.source().set_unit_files(
        "align",
        vec![
            file(FileType::SecondaryDescriptor, "/A", "x2"),
            file(FileType::SecondaryDescriptor, "/C", "z"),
        ],
    );
    h.push(main_push()).await.unwrap();

    let entry = h.entry("github.com/org/repo/align").unwrap();
    let secondary: Vec<(&str, &str)> = entry.versions[0]
        .source_files
        .iter()
        .filter(|f| f.file_type == FileType::SecondaryDescriptor)
        .map(|f| (f.absolute_path.as_str(), f.content.as_str()))
        .collect();
    assert_eq!(secondary.len(), 2);
    assert!(secondary.contains(&("/A", "x2")));
    assert!(secondary.contains(&("/C", "z")));
}

#[tokio::test]
async fn exhausted_quota_fails_fast_with_retry() {
    let h = Harness::with_workflows(&["align"]);
    h.source().set_quota(5000, 0);

    let err = h.push(main_push()).await.unwrap_err();

    assert!(err.should_retry());
    assert_eq!(err.status_code(), 500);
    assert_eq!(h.source().materialize_calls(), 0);
    let events = h.events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].success);
}

#[tokio::test]
async fn unreadable_manifest_is_one_failure() {
    let h = Harness::new();
    h.source().set_manifest("version: 1.2\nworkflows: [");

    let mut event = push_event("refs/heads/main", None);
    event.throw_if_not_successful = true;
    let err = h.push(event).await.unwrap_err();

    assert!(matches!(err, SyncError::ManifestUnreadable(_)));
    assert_eq!(err.status_code(), 418);
    let events = h.events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].success);
    assert_eq!(events[0].entry_name, None);
}

#[tokio::test]
async fn missing_manifest_is_recorded_without_raising() {
    let h = Harness::new();

    let summary = h.push(push_event("refs/heads/main", None)).await.unwrap();

    assert!(summary.manifest_error.is_some());
    assert!(!summary.is_fully_successful());
    assert_eq!(failures(&h.events()), 1);
}

#[tokio::test]
async fn rate_limited_manifest_fetch_asks_for_retry() {
    let h = Harness::new();
    h.source()
        .fail_manifest(SourceControlError::rate_limited("API rate limit exceeded").with_status(403));

    let err = h.push(push_event("refs/heads/main", None)).await.unwrap_err();
    assert!(err.should_retry());
    assert_eq!(failures(&h.events()), 1);
}

#[tokio::test]
async fn rate_limit_during_unit_aborts_the_push() {
    let h = Harness::with_workflows(&["first", "second", "third"]);
    h.source()
        .fail_unit("second", SourceControlError::rate_limited("secondary rate limit"));

    let err = h.push(main_push()).await.unwrap_err();

    assert!(err.should_retry());
    assert!(h.entry("github.com/org/repo/first").is_some());
    assert!(h.entry("github.com/org/repo/third").is_none());
    let events = h.events();
    assert_eq!(events.len(), 2);
    assert_eq!(successes(&events), 1);
    assert_eq!(failures(&events), 1);
}

#[tokio::test]
async fn commit_failure_is_fatal_without_retry() {
    let h = Harness::with_workflows(&["first", "second"]);
    h.catalog().fail_next_commit().unwrap();

    let err = h.push(main_push()).await.unwrap_err();

    assert!(!err.should_retry());
    assert_eq!(err.status_code(), 418);
    assert!(h.catalog().entries().unwrap().is_empty());
    assert_eq!(h.source().materialize_calls(), 1);
}

#[tokio::test]
async fn misspelled_manifest_key_is_reported_with_a_hint() {
    let h = Harness::new();
    h.source().set_manifest(
        "version: 1.2\nworkflows:\n  - name: align\n    subclass: CWL\n    \
         primaryDescriptorPth: /Dockstore.cwl\n",
    );

    let summary = h.push(push_event("refs/heads/main", None)).await.unwrap();

    let message = summary.manifest_error.unwrap();
    assert!(message.contains("Did you mean: 'primaryDescriptorPath'?"));
    assert_eq!(h.source().materialize_calls(), 0);
    let events = h.events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].success);
}

#[tokio::test]
async fn unit_excluded_by_filters_is_ignored() {
    let h = Harness::new();
    h.source().set_manifest(
        "version: 1.2\nworkflows:\n  - name: align\n    subclass: CWL\n    \
         primaryDescriptorPath: /Dockstore.cwl\n    filters:\n      branches: [release/*]\n",
    );

    let summary = h.push(push_event("refs/heads/main", None)).await.unwrap();

    assert_eq!(summary.filtered, vec!["github.com/org/repo/align"]);
    assert!(h.catalog().entries().unwrap().is_empty());
    let events = h.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].ignored);
    assert_eq!(
        events[0].entry_name.as_deref(),
        Some("github.com/org/repo/align")
    );
}

#[tokio::test]
async fn publish_flag_adds_publish_event() {
    let h = Harness::new();
    h.source().set_manifest(
        "version: 1.2\nworkflows:\n  - name: align\n    subclass: CWL\n    \
         primaryDescriptorPath: /Dockstore.cwl\n    publish: true\n",
    );

    h.push(push_event("refs/heads/main", None)).await.unwrap();

    assert!(h.entry("github.com/org/repo/align").unwrap().is_published);
    let events = h.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, AuditEventType::Publish);
    assert!(events[1].success);
    assert!(
        h.indexer
            .notices()
            .iter()
            .any(|(_, mode)| *mode == IndexMode::Publish)
    );
}

#[tokio::test]
async fn only_contributors_with_access_are_attached() {
    let h = Harness::with_workflows(&["align"]);
    let bob = h.catalog().register_user("bob").unwrap();
    let carol = h.catalog().register_user("carol").unwrap();
    h.source().grant_access("bob");

    let mut event = main_push();
    event.actor_usernames = vec!["alice".into(), "bob".into(), "carol".into()];
    h.push(event).await.unwrap();

    let entry = h.entry("github.com/org/repo/align").unwrap();
    assert!(entry.users.contains(&bob));
    assert!(!entry.users.contains(&carol));
    assert_eq!(entry.users.len(), 2);
}

#[tokio::test]
async fn unknown_actor_cannot_create_entries() {
    let h = Harness::with_workflows(&["align"]);
    let mut event = main_push();
    event.actor_usernames = vec!["mallory".into()];

    let summary = h.push(event).await.unwrap();

    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].message.contains("mallory"));
    assert!(h.catalog().entries().unwrap().is_empty());
}

// ─── Delete ───

/// Pushes `main` and `dev`, then removes `dev` from source control.
async fn harness_with_two_branches() -> Harness {
    let h = Harness::with_workflows(&["align"]);
    h.push(main_push()).await.unwrap();
    let dev = GitReference::parse("refs/heads/dev");
    h.source().set_hash(&dev, "4444444");
    h.push(push_event("refs/heads/dev", Some("4444444")))
        .await
        .unwrap();
    h.source().remove_hash(&dev);
    h
}

#[tokio::test]
async fn delete_removes_version_everywhere() {
    let h = harness_with_two_branches().await;
    let before = h.events().len();

    let summary = h.engine.handle_delete(delete_event("refs/heads/dev")).await;

    assert!(summary.errors.is_empty());
    let entry = h.entry("github.com/org/repo/align").unwrap();
    assert!(entry.version("dev").is_none());
    assert_eq!(entry.default_version.as_deref(), Some("main"));
    let events = &h.events()[before..];
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, AuditEventType::Delete);
    assert!(events[0].success);
    assert_eq!(events[0].delivery_id, "delivery-2");
}

#[tokio::test]
async fn delete_of_existing_reference_is_ignored() {
    let h = Harness::with_workflows(&["align"]);
    h.push(main_push()).await.unwrap();
    let before = h.events().len();

    let summary = h.engine.handle_delete(delete_event("refs/heads/main")).await;

    assert!(summary.ignored.is_some());
    assert!(h.entry("github.com/org/repo/align").unwrap().version("main").is_some());
    let events = &h.events()[before..];
    assert_eq!(events.len(), 1);
    assert!(events[0].ignored);
}

#[tokio::test]
async fn delete_of_non_branch_reference_is_rejected() {
    let h = Harness::new();
    let summary = h.engine.handle_delete(delete_event("refs/pull/1/head")).await;
    assert_eq!(summary.errors.len(), 1);
    let events = h.events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].success);
}

#[tokio::test]
async fn delete_of_frozen_version_is_a_failure() {
    let h = harness_with_two_branches().await;
    let mut entry = h.entry("github.com/org/repo/align").unwrap();
    if let Some(dev) = entry.version_mut("dev") {
        dev.frozen = true;
    }
    let mut session = h.catalog().begin().unwrap();
    session.save_entry(&entry).unwrap();
    session.commit().unwrap();
    let before = h.events().len();

    let summary = h.engine.handle_delete(delete_event("refs/heads/dev")).await;

    assert_eq!(summary.errors.len(), 1);
    entry = h.entry("github.com/org/repo/align").unwrap();
    assert!(entry.version("dev").is_some());
    let events = &h.events()[before..];
    assert_eq!(events.len(), 1);
    assert!(!events[0].success);
    assert!(events[0].message.contains("frozen"));
}

#[tokio::test]
async fn delete_of_unknown_version_records_nothing() {
    let h = Harness::with_workflows(&["align"]);
    h.push(main_push()).await.unwrap();
    let before = h.events().len();

    let summary = h.engine.handle_delete(delete_event("refs/tags/9.9")).await;

    assert_eq!(summary.outcomes, vec![DeletionOutcome::Unaffected]);
    assert_eq!(h.events().len(), before);
}

#[tokio::test]
async fn deleting_last_version_unpublishes() {
    let h = Harness::new();
    h.source().set_manifest(
        "version: 1.2\nworkflows:\n  - name: align\n    subclass: CWL\n    \
         primaryDescriptorPath: /Dockstore.cwl\n    publish: true\n",
    );
    h.push(push_event("refs/heads/main", None)).await.unwrap();
    assert!(h.entry("github.com/org/repo/align").unwrap().is_published);

    h.engine.handle_delete(delete_event("refs/heads/main")).await;

    let entry = h.entry("github.com/org/repo/align").unwrap();
    assert!(entry.versions.is_empty());
    assert!(!entry.is_published);
    assert!(
        h.indexer
            .notices()
            .contains(&("github.com/org/repo/align".to_string(), IndexMode::Delete))
    );
}

// ─── Properties ───

proptest! {
    /// Every declared unit produces exactly one push audit event, whichever
    /// units fail.
    #[test]
    fn one_audit_event_per_unit(
        names in prop::collection::btree_set(arb_unit_name(), 1..5),
        failing in prop::collection::vec(any::<bool>(), 5),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let h = Harness::with_workflows(&names);
        for (name, fail) in names.iter().zip(&failing) {
            if *fail {
                h.source().fail_unit(name, SourceControlError::not_found("gone"));
            }
        }

        let summary = runtime.block_on(h.push(main_push())).unwrap();

        let events = h.events();
        prop_assert_eq!(events.len(), names.len());
        prop_assert_eq!(failures(&events), summary.failed.len());
        prop_assert_eq!(successes(&events), summary.reconciled.len());
    }
}
