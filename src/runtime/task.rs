use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use crate::error::{FlowError, FlowResult};
use crate::runtime::blueprint::{Gateway, GraphNode};
use crate::runtime::storage::Transaction;

/// Work item spawned for an active node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub node_id: String,
    pub step: u32,
    /// Set when exactly one user may act.
    pub assignee: Option<String>,
    pub gateway: Gateway,
    /// Actors expected to approve.
    pub member_count: u32,
    /// Approvals still required.
    pub remaining: u32,
    pub approvals: u32,
    pub finished: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Creates the task for a node the instance just entered.
///
/// ALL nodes wait for `branch_count` approvals, ANY nodes for one.
pub async fn create_task(
    tx: &mut dyn Transaction,
    node: &GraphNode,
    instance_id: Uuid,
    step: u32,
    assignee: Option<String>,
) -> FlowResult<Task> {
    let quorum = node.quorum();
    let task = Task {
        id: Uuid::new_v4(),
        instance_id,
        node_id: node.id.clone(),
        step,
        assignee,
        gateway: node.gateway,
        member_count: quorum,
        remaining: quorum,
        approvals: 0,
        finished: false,
        created_at: Utc::now(),
        finished_at: None,
    };
    tx.save_task(task.clone()).await?;
    Ok(task)
}

/// Step 0 task standing for the initiator's implicit submission.
pub async fn create_bootstrap_task(
    tx: &mut dyn Transaction,
    instance_id: Uuid,
    node_id: &str,
    initiator: &str,
) -> FlowResult<Task> {
    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4(),
        instance_id,
        node_id: node_id.to_string(),
        step: 0,
        assignee: Some(initiator.to_string()),
        gateway: Gateway::Any,
        member_count: 1,
        remaining: 0,
        approvals: 1,
        finished: true,
        created_at: now,
        finished_at: Some(now),
    };
    tx.save_task(task.clone()).await?;
    Ok(task)
}

/// Applies one approval or rejection to the task's counters.
///
/// A rejection closes the task; what it means is up to the caller.
pub async fn record_action(tx: &mut dyn Transaction, task_id: Uuid, approved: bool) -> FlowResult<Task> {
    let mut task = tx.find_task(task_id).await?
        .ok_or_else(|| FlowError::not_found(format!("task {}", task_id)))?;
    if task.finished {
        return Err(FlowError::conflict(format!("task {} is already finished", task_id)));
    }

    if approved {
        task.approvals += 1;
        match task.gateway {
            Gateway::All => task.remaining = task.remaining.saturating_sub(1),
            Gateway::Any => task.remaining = 0,
        }
        task.finished = task.remaining == 0;
    } else {
        task.finished = true;
    }
    if task.finished {
        task.finished_at = Some(Utc::now());
    }

    tx.update_task(task.clone()).await?;
    Ok(task)
}
