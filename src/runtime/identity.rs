use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use crate::error::FlowResult;
use crate::runtime::blueprint::Candidate;
use crate::runtime::storage::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkKind {
    /// May act on the active node. Replaced wholesale on every recomputation.
    Candidate,
    /// Did act. Append-only.
    Participant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    pub id: Uuid,
    pub kind: LinkKind,
    pub instance_id: Uuid,
    pub task_id: Uuid,
    pub step: u32,
    pub group: Option<String>,
    pub user_id: Option<String>,
    pub company: String,
    pub created_at: DateTime<Utc>,
}

impl IdentityLink {
    pub fn candidate(&self) -> Option<Candidate> {
        if self.kind != LinkKind::Candidate {
            return None;
        }
        match (&self.group, &self.user_id) {
            (Some(g), _) => Some(Candidate::Group(g.clone())),
            (None, Some(u)) => Some(Candidate::User(u.clone())),
            (None, None) => None,
        }
    }
}

/// Who may act on one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    pub task_id: Uuid,
    pub step: u32,
    pub candidate: Candidate,
}

/// Drops every candidate row of the instance, whatever step it came from,
/// then writes the new set.
pub async fn replace_candidates(
    tx: &mut dyn Transaction,
    instance_id: Uuid,
    company: &str,
    eligible: &[Eligibility],
) -> FlowResult<()> {
    tx.delete_candidates(instance_id).await?;
    let now = Utc::now();
    for e in eligible {
        let (group, user_id) = match &e.candidate {
            Candidate::Group(g) => (Some(g.clone()), None),
            Candidate::User(u) => (None, Some(u.clone())),
        };
        tx.save_link(IdentityLink {
            id: Uuid::new_v4(),
            kind: LinkKind::Candidate,
            instance_id,
            task_id: e.task_id,
            step: e.step,
            group,
            user_id,
            company: company.to_string(),
            created_at: now,
        }).await?;
    }
    Ok(())
}

/// Appends a participant row. Callers check `has_participated` first.
pub async fn record_participant(
    tx: &mut dyn Transaction,
    instance_id: Uuid,
    step: u32,
    task_id: Uuid,
    user_id: &str,
    company: &str,
) -> FlowResult<IdentityLink> {
    let link = IdentityLink {
        id: Uuid::new_v4(),
        kind: LinkKind::Participant,
        instance_id,
        task_id,
        step,
        group: None,
        user_id: Some(user_id.to_string()),
        company: company.to_string(),
        created_at: Utc::now(),
    };
    tx.save_link(link.clone()).await?;
    Ok(link)
}

pub async fn has_participated(tx: &mut dyn Transaction, user_id: &str, company: &str, task_id: Uuid) -> FlowResult<bool> {
    Ok(tx.find_participant(user_id, company, task_id).await?.is_some())
}

pub async fn candidates(tx: &mut dyn Transaction, instance_id: Uuid) -> FlowResult<Vec<IdentityLink>> {
    let links = tx.links_for_instance(instance_id).await?;
    Ok(links.into_iter().filter(|l| l.kind == LinkKind::Candidate).collect())
}

pub async fn participants(tx: &mut dyn Transaction, task_id: Uuid) -> FlowResult<Vec<IdentityLink>> {
    let links = tx.links_for_task(task_id).await?;
    Ok(links.into_iter().filter(|l| l.kind == LinkKind::Participant).collect())
}
