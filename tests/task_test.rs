use procflow::dsl::builder::GraphBuilder;
use chrono::Utc;
use procflow::runtime::identity::{self, Eligibility, LinkKind};
use procflow::runtime::instance::Execution;
use procflow::runtime::task;
use procflow::{Candidate, FlowError, InMemoryStore, Store, Transaction};
use uuid::Uuid;

fn nodes() -> procflow::Graph {
    GraphBuilder::new("start")
        .node("board").users(&["amy", "bob", "cid"]).all(3).build()
        .node("desk").group("helpdesk").any().build()
        .connect("start", "board")
        .connect("board", "desk")
        .build()
}

#[tokio::test]
async fn test_all_task_counts_down_to_zero() {
    let graph = nodes();
    let store = InMemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let instance_id = Uuid::new_v4();

    let created = task::create_task(tx.as_mut(), graph.node("board").unwrap(), instance_id, 1, None).await.unwrap();
    assert_eq!(created.member_count, 3);
    assert_eq!(created.remaining, 3);
    assert!(!created.finished);

    let after_one = task::record_action(tx.as_mut(), created.id, true).await.unwrap();
    assert_eq!((after_one.remaining, after_one.approvals, after_one.finished), (2, 1, false));

    task::record_action(tx.as_mut(), created.id, true).await.unwrap();
    let done = task::record_action(tx.as_mut(), created.id, true).await.unwrap();
    assert_eq!((done.remaining, done.approvals, done.finished), (0, 3, true));
    assert!(done.finished_at.is_some());

    let err = task::record_action(tx.as_mut(), created.id, true).await.unwrap_err();
    assert!(matches!(err, FlowError::Conflict(_)));
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_any_task_finishes_on_first_approval_and_rejection_closes() {
    let graph = nodes();
    let store = InMemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let instance_id = Uuid::new_v4();
    let desk = graph.node("desk").unwrap();

    let any = task::create_task(tx.as_mut(), desk, instance_id, 2, None).await.unwrap();
    assert_eq!(any.member_count, 1);
    let approved = task::record_action(tx.as_mut(), any.id, true).await.unwrap();
    assert!(approved.finished);
    assert_eq!(approved.remaining, 0);

    let board = task::create_task(tx.as_mut(), graph.node("board").unwrap(), instance_id, 1, None).await.unwrap();
    let rejected = task::record_action(tx.as_mut(), board.id, false).await.unwrap();
    assert!(rejected.finished);
    assert_eq!(rejected.approvals, 0);
    assert_eq!(rejected.remaining, 3);

    let err = task::record_action(tx.as_mut(), Uuid::new_v4(), true).await.unwrap_err();
    assert!(matches!(err, FlowError::NotFound(_)));
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_task_is_already_done() {
    let store = InMemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let instance_id = Uuid::new_v4();

    let boot = task::create_bootstrap_task(tx.as_mut(), instance_id, "start", "alice").await.unwrap();
    assert_eq!(boot.step, 0);
    assert!(boot.finished);
    assert_eq!(boot.approvals, 1);
    assert_eq!(boot.remaining, 0);
    assert_eq!(boot.assignee.as_deref(), Some("alice"));

    let stored = tx.tasks_for_instance(instance_id).await.unwrap();
    assert_eq!(stored, vec![boot]);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_replace_candidates_drops_every_previous_row() {
    let store = InMemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let instance_id = Uuid::new_v4();
    let first_task = Uuid::new_v4();
    let second_task = Uuid::new_v4();

    identity::replace_candidates(tx.as_mut(), instance_id, "acme", &[
        Eligibility { task_id: first_task, step: 1, candidate: Candidate::Group("managers".into()) },
        Eligibility { task_id: first_task, step: 1, candidate: Candidate::Group("leads".into()) },
    ]).await.unwrap();
    identity::record_participant(tx.as_mut(), instance_id, 1, first_task, "mia", "acme").await.unwrap();

    identity::replace_candidates(tx.as_mut(), instance_id, "acme", &[
        Eligibility { task_id: second_task, step: 2, candidate: Candidate::User("amy".into()) },
    ]).await.unwrap();

    let current = identity::candidates(tx.as_mut(), instance_id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].task_id, second_task);
    assert_eq!(current[0].step, 2);
    assert_eq!(current[0].candidate(), Some(Candidate::User("amy".into())));

    // participants survive candidate replacement
    let acted = identity::participants(tx.as_mut(), first_task).await.unwrap();
    assert_eq!(acted.len(), 1);
    assert_eq!(acted[0].kind, LinkKind::Participant);
    assert_eq!(acted[0].candidate(), None);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_has_participated_is_scoped_by_user_company_and_task() {
    let store = InMemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let instance_id = Uuid::new_v4();
    let task_id = Uuid::new_v4();

    assert!(!identity::has_participated(tx.as_mut(), "mia", "acme", task_id).await.unwrap());
    identity::record_participant(tx.as_mut(), instance_id, 1, task_id, "mia", "acme").await.unwrap();

    assert!(identity::has_participated(tx.as_mut(), "mia", "acme", task_id).await.unwrap());
    assert!(!identity::has_participated(tx.as_mut(), "mia", "globex", task_id).await.unwrap());
    assert!(!identity::has_participated(tx.as_mut(), "max", "acme", task_id).await.unwrap());
    assert!(!identity::has_participated(tx.as_mut(), "mia", "acme", Uuid::new_v4()).await.unwrap());
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_rollback_discards_staged_writes() {
    let store = InMemoryStore::new();
    let instance_id = Uuid::new_v4();

    let mut tx = store.begin().await.unwrap();
    task::create_bootstrap_task(tx.as_mut(), instance_id, "start", "alice").await.unwrap();
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert!(tx.tasks_for_instance(instance_id).await.unwrap().is_empty());
    task::create_bootstrap_task(tx.as_mut(), instance_id, "start", "alice").await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert_eq!(tx.tasks_for_instance(instance_id).await.unwrap().len(), 1);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_stale_execution_version_is_a_conflict() {
    let store = InMemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let instance_id = Uuid::new_v4();

    let initial = Execution {
        id: Uuid::new_v4(),
        instance_id,
        definition_id: Uuid::new_v4(),
        snapshot: "[]".to_string(),
        version: 0,
        updated_at: Utc::now(),
    };
    tx.save_execution(initial.clone()).await.unwrap();

    let current = tx.update_execution(initial.clone()).await.unwrap();
    assert_eq!(current.version, 1);

    let err = tx.update_execution(initial).await.unwrap_err();
    assert!(matches!(err, FlowError::Conflict(_)), "got {:?}", err);

    let next = tx.update_execution(current).await.unwrap();
    assert_eq!(next.version, 2);
    assert_eq!(tx.find_execution(instance_id).await.unwrap().unwrap().version, 2);

    let missing = Execution { instance_id: Uuid::new_v4(), ..next };
    assert!(matches!(tx.update_execution(missing).await, Err(FlowError::NotFound(_))));
    tx.commit().await.unwrap();
}
