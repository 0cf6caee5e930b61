use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::model::task::{EntityId, Subtask, Task, TaskStatus, TaskTree};
use crate::providers::mock::{Call, MockProvider};
use crate::store::{self, StoreError};

fn setup(tasks: serde_json::Value) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");
    let tree: TaskTree = serde_json::from_value(json!({ "tasks": tasks })).unwrap();
    store::write_tasks(&path, &tree).unwrap();
    (dir, path)
}

fn service(mock: &MockProvider) -> SyncService {
    SyncService::with_provider(Box::new(mock.clone()))
}

fn load_task(path: &Path, id: u32) -> Task {
    store::read_tasks(path).unwrap().task(id).unwrap().clone()
}

fn subtask(task: &Task, id: u32) -> Subtask {
    task.subtask(id).unwrap().clone()
}

#[tokio::test]
async fn creates_ticket_and_persists_link() {
    let (dir, path) = setup(json!([{ "id": 1, "title": "Setup" }]));
    let mock = MockProvider::new();
    let sync = service(&mock);

    let mut task = load_task(&path, 1);
    let result = sync.sync_task(&mut task, &path, dir.path()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.ticket_key.as_deref(), Some("PROJ-1"));
    assert_eq!(result.action, SyncAction::Created);
    assert_eq!(
        mock.calls(),
        vec![Call::Find("US001".into()), Call::CreateStory("US001".into())]
    );

    let stored = load_task(&path, 1);
    assert_eq!(stored.metadata.ref_id.as_deref(), Some("US001"));
    assert_eq!(stored.metadata.remote_ticket_key.as_deref(), Some("PROJ-1"));
    assert_eq!(task.metadata.remote_ticket_key.as_deref(), Some("PROJ-1"));
}

#[tokio::test]
async fn second_sync_reuses_the_link() {
    let (dir, path) = setup(json!([{ "id": 1, "title": "Setup" }]));
    let mock = MockProvider::new();
    let sync = service(&mock);

    let mut task = load_task(&path, 1);
    sync.sync_task(&mut task, &path, dir.path()).await.unwrap();
    let again = sync.sync_task(&mut task, &path, dir.path()).await.unwrap();

    assert_eq!(again.action, SyncAction::Unchanged);
    assert_eq!(again.ticket_key.as_deref(), Some("PROJ-1"));
    assert_eq!(mock.create_calls(), 1);
    assert_eq!(mock.calls().len(), 2);
}

#[tokio::test]
async fn recovers_lost_link_by_reference_id() {
    let (dir, path) = setup(json!([
        { "id": 1, "title": "Setup", "metadata": { "refId": "US001" } }
    ]));
    let mock = MockProvider::new().with_found("US001", "PROJ-42");
    let sync = service(&mock);

    let mut task = load_task(&path, 1);
    let result = sync.sync_task(&mut task, &path, dir.path()).await.unwrap();

    assert_eq!(result.action, SyncAction::Updated);
    assert_eq!(result.ticket_key.as_deref(), Some("PROJ-42"));
    assert_eq!(mock.create_calls(), 0);
    assert_eq!(
        load_task(&path, 1).metadata.remote_ticket_key.as_deref(),
        Some("PROJ-42")
    );
}

#[tokio::test]
async fn disabled_service_reports_unavailable() {
    let (dir, path) = setup(json!([{ "id": 1, "title": "Setup" }]));
    let sync = SyncService::disabled();

    let mut task = load_task(&path, 1);
    let result = sync.sync_task(&mut task, &path, dir.path()).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Ticketing service not available"));
    assert!(!sync.is_available(dir.path()));
    assert!(load_task(&path, 1).metadata.ref_id.is_none());
}

#[tokio::test]
async fn unconfigured_provider_is_never_called() {
    let (dir, path) = setup(json!([{ "id": 1, "title": "Setup" }]));
    let mock = MockProvider::new().unconfigured();
    let sync = service(&mock);

    let mut task = load_task(&path, 1);
    let result = sync.sync_task(&mut task, &path, dir.path()).await.unwrap();
    let status = sync
        .update_task_status("1", TaskStatus::Done, &path, dir.path())
        .await
        .unwrap();
    let deleted = sync.delete_ticket("PROJ-1", dir.path()).await.unwrap();

    for r in [result, status, deleted] {
        assert_eq!(r.error.as_deref(), Some("Ticketing service not available"));
    }
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn subtask_needs_a_linked_parent() {
    let (dir, path) = setup(json!([
        { "id": 1, "title": "Auth", "subtasks": [{ "id": 2, "title": "Login form" }] }
    ]));
    let mock = MockProvider::new();
    let sync = service(&mock);

    let parent = load_task(&path, 1);
    let mut sub = subtask(&parent, 2);
    let result = sync
        .sync_subtask(&mut sub, &parent, &path, dir.path())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Parent task has no ticket"));
    assert_eq!(mock.calls(), vec![Call::Find("T001-02".into())]);
}

#[tokio::test]
async fn subtask_ticket_is_created_under_parent() {
    let (dir, path) = setup(json!([{
        "id": 1,
        "title": "Auth",
        "metadata": { "refId": "US001", "remoteTicketKey": "PROJ-10" },
        "subtasks": [{ "id": 2, "title": "Login form" }]
    }]));
    let mock = MockProvider::new();
    let sync = service(&mock);

    let parent = load_task(&path, 1);
    let mut sub = subtask(&parent, 2);
    let result = sync
        .sync_subtask(&mut sub, &parent, &path, dir.path())
        .await
        .unwrap();

    assert_eq!(result.action, SyncAction::Created);
    assert!(mock.calls().contains(&Call::CreateTask {
        ref_id: "T001-02".into(),
        parent: "PROJ-10".into()
    }));
    let stored = subtask(&load_task(&path, 1), 2);
    assert_eq!(stored.metadata.ref_id.as_deref(), Some("T001-02"));
    assert_eq!(stored.metadata.remote_ticket_key.as_deref(), Some("PROJ-1"));
}

#[tokio::test]
async fn provider_failure_is_reported_not_raised() {
    let (dir, path) = setup(json!([{ "id": 1, "title": "Setup" }]));
    let mock = MockProvider::new().failing_create("US001");
    let sync = service(&mock);

    let mut task = load_task(&path, 1);
    let result = sync.sync_task(&mut task, &path, dir.path()).await.unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("connection reset"));
    let stored = load_task(&path, 1);
    assert_eq!(stored.metadata.ref_id.as_deref(), Some("US001"));
    assert!(stored.metadata.remote_ticket_key.is_none());
}

#[tokio::test]
async fn invalid_task_is_an_error() {
    let (dir, path) = setup(json!([{ "id": 1, "title": "  " }]));
    let mock = MockProvider::new();
    let sync = service(&mock);

    let mut task = load_task(&path, 1);
    let err = sync.sync_task(&mut task, &path, dir.path()).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidEntity { .. }));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn missing_tasks_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let sync = service(&MockProvider::new());

    let err = sync
        .sync_all_tasks(&dir.path().join("tasks.json"), dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Missing(_))));
}

#[tokio::test]
async fn status_without_link_touches_nothing() {
    let (dir, path) = setup(json!([{ "id": 1, "title": "Setup" }]));
    let mock = MockProvider::new();
    let sync = service(&mock);

    let result = sync
        .update_task_status("1", TaskStatus::Done, &path, dir.path())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.action, SyncAction::Skipped);
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn status_update_records_timestamp() {
    let (dir, path) = setup(json!([{
        "id": 1,
        "title": "Setup",
        "metadata": { "refId": "US001", "remoteTicketKey": "PROJ-1" },
        "subtasks": [{ "id": 2, "title": "Config", "metadata": { "remoteTicketKey": "PROJ-2" } }]
    }]));
    let mock = MockProvider::new();
    let sync = service(&mock);

    let result = sync
        .update_task_status("1", TaskStatus::InProgress, &path, dir.path())
        .await
        .unwrap();
    assert_eq!(result.action, SyncAction::StatusUpdated);

    let result = sync
        .update_task_status("1.2", TaskStatus::Done, &path, dir.path())
        .await
        .unwrap();
    assert_eq!(result.ticket_key.as_deref(), Some("PROJ-2"));

    assert_eq!(
        mock.calls(),
        vec![
            Call::UpdateStatus("PROJ-1".into(), TaskStatus::InProgress),
            Call::UpdateStatus("PROJ-2".into(), TaskStatus::Done),
        ]
    );
    let stored = load_task(&path, 1);
    assert!(stored.metadata.last_status_update.is_some());
    assert!(subtask(&stored, 2).metadata.last_status_update.is_some());
}

#[tokio::test]
async fn status_rejects_bad_ids() {
    let (dir, path) = setup(json!([{ "id": 1, "title": "Setup" }]));
    let sync = service(&MockProvider::new());

    let err = sync
        .update_task_status("abc", TaskStatus::Done, &path, dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidId(_)));

    let err = sync
        .update_task_status("9", TaskStatus::Done, &path, dir.path())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Store(StoreError::EntityNotFound(EntityId::Task(9)))
    ));
}

#[tokio::test]
async fn missing_transition_is_a_failed_result() {
    let (dir, path) = setup(json!([
        { "id": 1, "title": "Setup", "metadata": { "remoteTicketKey": "PROJ-1" } }
    ]));
    let sync = service(&MockProvider::new().without_transitions());

    let result = sync
        .update_task_status("1", TaskStatus::Review, &path, dir.path())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.ticket_key.as_deref(), Some("PROJ-1"));
    assert!(load_task(&path, 1).metadata.last_status_update.is_none());
}

#[tokio::test]
async fn deleting_a_gone_ticket_succeeds_without_delete_call() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockProvider::new().with_dead("PROJ-3");
    let sync = service(&mock);

    let result = sync.delete_ticket("PROJ-3", dir.path()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.action, SyncAction::Skipped);
    assert_eq!(mock.calls(), vec![Call::Exists("PROJ-3".into())]);

    let result = sync.delete_ticket("PROJ-4", dir.path()).await.unwrap();
    assert_eq!(result.action, SyncAction::Deleted);
    assert!(mock.calls().contains(&Call::Delete("PROJ-4".into())));
}

#[tokio::test]
async fn delete_failure_is_soft() {
    let dir = tempfile::tempdir().unwrap();
    let sync = service(&MockProvider::new().failing_delete());

    let result = sync.delete_ticket("PROJ-4", dir.path()).await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("delete permission"));
}

#[tokio::test]
async fn batch_continues_past_a_failing_task() {
    let tasks: Vec<_> = (1..=10)
        .map(|id| json!({ "id": id, "title": format!("Task {id}") }))
        .collect();
    let (dir, path) = setup(json!(tasks));
    let mock = MockProvider::new().failing_create("US007");
    let sync = service(&mock);

    let summary = sync.sync_all_tasks(&path, dir.path()).await.unwrap();

    assert!(summary.available);
    assert_eq!(summary.processed, 10);
    assert_eq!(summary.created(), 9);
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.errors[0].entity, EntityId::Task(7));

    let tree = store::read_tasks(&path).unwrap();
    for task in &tree.tasks {
        assert_eq!(task.metadata.remote_ticket_key.is_none(), task.id == 7);
    }
}

#[tokio::test]
async fn batch_recreates_dead_links_and_then_subtasks() {
    let (dir, path) = setup(json!([{
        "id": 1,
        "title": "Auth",
        "metadata": { "refId": "US001", "remoteTicketKey": "PROJ-5" },
        "subtasks": [{ "id": 1, "title": "Login form" }]
    }]));
    // The search index still returns the deleted ticket.
    let mock = MockProvider::new()
        .with_dead("PROJ-5")
        .with_found("US001", "PROJ-5");
    let sync = service(&mock);

    let summary = sync.sync_all_tasks(&path, dir.path()).await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.tasks_created, 1);
    assert_eq!(summary.subtasks_created, 1);
    assert_eq!(summary.error_count, 0);
    assert!(mock.calls().contains(&Call::CreateTask {
        ref_id: "T001-01".into(),
        parent: "PROJ-1".into()
    }));

    let stored = load_task(&path, 1);
    assert_eq!(stored.metadata.remote_ticket_key.as_deref(), Some("PROJ-1"));
    assert_eq!(
        subtask(&stored, 1).metadata.remote_ticket_key.as_deref(),
        Some("PROJ-2")
    );
}

#[tokio::test]
async fn batch_skips_live_links() {
    let (dir, path) = setup(json!([
        { "id": 1, "title": "Setup", "metadata": { "refId": "US001", "remoteTicketKey": "PROJ-1" } }
    ]));
    let mock = MockProvider::new();
    let sync = service(&mock);

    let summary = sync.sync_all_tasks(&path, dir.path()).await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(mock.calls(), vec![Call::Exists("PROJ-1".into())]);
}

#[tokio::test]
async fn failing_parent_fails_its_subtasks_only() {
    let (dir, path) = setup(json!([
        { "id": 1, "title": "Broken", "subtasks": [{ "id": 1, "title": "Child" }] },
        { "id": 2, "title": "Fine" }
    ]));
    let sync = service(&MockProvider::new().failing_create("US001"));

    let summary = sync.sync_all_tasks(&path, dir.path()).await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.error_count, 2);
    assert_eq!(summary.tasks_created, 1);
    assert_eq!(
        summary.errors[1].entity,
        EntityId::Subtask { parent: 1, id: 1 }
    );
    assert_eq!(summary.errors[1].message, "Parent task has no ticket");
}

#[tokio::test]
async fn batch_without_service_does_nothing() {
    let (dir, path) = setup(json!([{ "id": 1, "title": "Setup" }]));
    let summary = SyncService::disabled()
        .sync_all_tasks(&path, dir.path())
        .await
        .unwrap();
    assert!(!summary.available);
    assert_eq!(summary.processed, 0);
}

#[tokio::test]
async fn conversion_creates_new_ticket_even_when_cancel_fails() {
    let (dir, path) = setup(json!([
        { "id": 1, "title": "Auth", "metadata": { "remoteTicketKey": "PROJ-7" } },
        { "id": 2, "title": "Login form", "parentTaskId": 1, "dependencies": [1],
          "metadata": { "refId": "US002" } }
    ]));
    let old: Subtask = serde_json::from_value(json!({
        "id": 3,
        "title": "Login form",
        "metadata": { "refId": "T001-03", "remoteTicketKey": "PROJ-3" }
    }))
    .unwrap();
    let mock = MockProvider::new().failing_status();
    let sync = service(&mock);

    let mut task = load_task(&path, 2);
    let conversion = sync
        .sync_subtask_conversion(&old, 1, &mut task, &path, dir.path())
        .await;

    assert!(!conversion.cancelled.success);
    assert!(conversion.created.success);
    assert_eq!(conversion.created.action, SyncAction::Created);
    assert_eq!(
        mock.calls(),
        vec![
            Call::UpdateStatus("PROJ-3".into(), TaskStatus::Cancelled),
            Call::Find("US002".into()),
            Call::CreateStory("US002".into()),
        ]
    );
    assert_eq!(
        load_task(&path, 2).metadata.remote_ticket_key.as_deref(),
        Some("PROJ-1")
    );
}

#[test]
fn result_display() {
    assert_eq!(
        SyncResult::success("PROJ-1", SyncAction::Created).to_string(),
        "created (PROJ-1)"
    );
    assert_eq!(SyncResult::skipped().to_string(), "skipped");
    assert_eq!(
        SyncResult::failure(SyncError::Unavailable).to_string(),
        "failed: Ticketing service not available"
    );
}

#[tokio::test]
async fn linking_keeps_fields_the_model_does_not_know() {
    let (dir, path) = setup(json!([{
        "id": 1,
        "title": "Setup",
        "complexity": 7,
        "acceptanceCriteria": "works",
        "subtasks": [{ "id": 1, "title": "Repo", "parentTaskId": 1, "assignee": "sam" }]
    }]));
    let sync = service(&MockProvider::new());

    let mut task = load_task(&path, 1);
    let result = sync.sync_task(&mut task, &path, dir.path()).await.unwrap();
    assert!(result.success);

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let stored = &raw["tasks"][0];
    assert_eq!(stored["complexity"], 7);
    assert_eq!(stored["acceptanceCriteria"], "works");
    assert_eq!(stored["metadata"]["remoteTicketKey"], "PROJ-1");
    assert_eq!(stored["subtasks"][0]["parentTaskId"], 1);
    assert_eq!(stored["subtasks"][0]["assignee"], "sam");
}

#[test]
fn ticket_key_ignores_blank_links() {
    let sync = service(&MockProvider::new());
    let mut metadata = crate::model::task::TicketMetadata {
        remote_ticket_key: Some("  ".into()),
        ..Default::default()
    };
    assert_eq!(sync.ticket_key(&metadata), None);

    metadata.remote_ticket_key = Some("PROJ-4".into());
    assert_eq!(sync.ticket_key(&metadata).as_deref(), Some("PROJ-4"));
    assert_eq!(SyncService::disabled().ticket_key(&metadata), None);
}
