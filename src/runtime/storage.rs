use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;
use crate::error::{FlowError, FlowResult};
use crate::runtime::definition::Definition;
use crate::runtime::identity::{IdentityLink, LinkKind};
use crate::runtime::instance::{Execution, Instance};
use crate::runtime::task::Task;

// --- Interfaces ---

/// Source of transactions. Every engine operation runs inside exactly one.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> FlowResult<Box<dyn Transaction>>;
}

/// A unit of work. Nothing written through it is visible to other
/// transactions before `commit`; dropping it without committing discards it.
#[async_trait]
pub trait Transaction: Send {
    async fn latest_definition(&mut self, name: &str, company: &str) -> FlowResult<Option<Definition>>;
    async fn find_definition(&mut self, id: Uuid) -> FlowResult<Option<Definition>>;
    /// Fails with `Conflict` when (name, company, version) is already taken.
    async fn save_definition(&mut self, definition: Definition) -> FlowResult<()>;

    async fn save_instance(&mut self, instance: Instance) -> FlowResult<()>;
    async fn update_instance(&mut self, instance: Instance) -> FlowResult<()>;
    async fn find_instance(&mut self, id: Uuid) -> FlowResult<Option<Instance>>;

    async fn save_execution(&mut self, execution: Execution) -> FlowResult<()>;
    /// Compare-and-swap on `version`. Returns the stored row with its new version.
    async fn update_execution(&mut self, execution: Execution) -> FlowResult<Execution>;
    async fn find_execution(&mut self, instance_id: Uuid) -> FlowResult<Option<Execution>>;

    async fn save_task(&mut self, task: Task) -> FlowResult<()>;
    async fn update_task(&mut self, task: Task) -> FlowResult<()>;
    async fn find_task(&mut self, id: Uuid) -> FlowResult<Option<Task>>;
    async fn tasks_for_instance(&mut self, instance_id: Uuid) -> FlowResult<Vec<Task>>;

    async fn save_link(&mut self, link: IdentityLink) -> FlowResult<()>;
    /// Deletes every candidate row of the instance, returning how many went.
    async fn delete_candidates(&mut self, instance_id: Uuid) -> FlowResult<usize>;
    async fn links_for_instance(&mut self, instance_id: Uuid) -> FlowResult<Vec<IdentityLink>>;
    async fn links_for_task(&mut self, task_id: Uuid) -> FlowResult<Vec<IdentityLink>>;
    async fn find_participant(&mut self, user_id: &str, company: &str, task_id: Uuid) -> FlowResult<Option<IdentityLink>>;

    async fn commit(self: Box<Self>) -> FlowResult<()>;
    async fn rollback(self: Box<Self>) -> FlowResult<()>;
}

// --- In-Memory Implementation ---

#[derive(Debug, Clone, Default)]
struct Tables {
    definitions: Vec<Definition>,
    instances: HashMap<Uuid, Instance>,
    // keyed by instance id
    executions: HashMap<Uuid, Execution>,
    // creation order is kept so reads are deterministic
    tasks: Vec<Task>,
    links: Vec<IdentityLink>,
}

/// Reference store. Transactions are serialized and write to a private copy
/// of the tables that `commit` publishes.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> FlowResult<Box<dyn Transaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn latest_definition(&mut self, name: &str, company: &str) -> FlowResult<Option<Definition>> {
        Ok(self.staged.definitions.iter()
            .filter(|d| d.name == name && d.company == company)
            .max_by_key(|d| d.version)
            .cloned())
    }

    async fn find_definition(&mut self, id: Uuid) -> FlowResult<Option<Definition>> {
        Ok(self.staged.definitions.iter().find(|d| d.id == id).cloned())
    }

    async fn save_definition(&mut self, definition: Definition) -> FlowResult<()> {
        let taken = self.staged.definitions.iter().any(|d| {
            d.id == definition.id
                || (d.name == definition.name && d.company == definition.company && d.version == definition.version)
        });
        if taken {
            return Err(FlowError::conflict(format!(
                "definition {}/{} version {} already exists",
                definition.company, definition.name, definition.version
            )));
        }
        self.staged.definitions.push(definition);
        Ok(())
    }

    async fn save_instance(&mut self, instance: Instance) -> FlowResult<()> {
        if self.staged.instances.contains_key(&instance.id) {
            return Err(FlowError::conflict(format!("instance {} already exists", instance.id)));
        }
        self.staged.instances.insert(instance.id, instance);
        Ok(())
    }

    async fn update_instance(&mut self, instance: Instance) -> FlowResult<()> {
        match self.staged.instances.get_mut(&instance.id) {
            Some(row) => {
                *row = instance;
                Ok(())
            }
            None => Err(FlowError::not_found(format!("instance {}", instance.id))),
        }
    }

    async fn find_instance(&mut self, id: Uuid) -> FlowResult<Option<Instance>> {
        Ok(self.staged.instances.get(&id).cloned())
    }

    async fn save_execution(&mut self, execution: Execution) -> FlowResult<()> {
        if self.staged.executions.contains_key(&execution.instance_id) {
            return Err(FlowError::conflict(format!(
                "instance {} already has an execution", execution.instance_id
            )));
        }
        self.staged.executions.insert(execution.instance_id, execution);
        Ok(())
    }

    async fn update_execution(&mut self, mut execution: Execution) -> FlowResult<Execution> {
        let row = self.staged.executions.get_mut(&execution.instance_id)
            .ok_or_else(|| FlowError::not_found(format!("execution of instance {}", execution.instance_id)))?;
        if row.version != execution.version {
            return Err(FlowError::conflict(format!(
                "execution of instance {} changed concurrently (expected version {}, found {})",
                execution.instance_id, execution.version, row.version
            )));
        }
        execution.version += 1;
        execution.updated_at = Utc::now();
        *row = execution.clone();
        Ok(execution)
    }

    async fn find_execution(&mut self, instance_id: Uuid) -> FlowResult<Option<Execution>> {
        Ok(self.staged.executions.get(&instance_id).cloned())
    }

    async fn save_task(&mut self, task: Task) -> FlowResult<()> {
        if self.staged.tasks.iter().any(|t| t.id == task.id) {
            return Err(FlowError::conflict(format!("task {} already exists", task.id)));
        }
        self.staged.tasks.push(task);
        Ok(())
    }

    async fn update_task(&mut self, task: Task) -> FlowResult<()> {
        match self.staged.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(row) => {
                *row = task;
                Ok(())
            }
            None => Err(FlowError::not_found(format!("task {}", task.id))),
        }
    }

    async fn find_task(&mut self, id: Uuid) -> FlowResult<Option<Task>> {
        Ok(self.staged.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn tasks_for_instance(&mut self, instance_id: Uuid) -> FlowResult<Vec<Task>> {
        Ok(self.staged.tasks.iter().filter(|t| t.instance_id == instance_id).cloned().collect())
    }

    async fn save_link(&mut self, link: IdentityLink) -> FlowResult<()> {
        self.staged.links.push(link);
        Ok(())
    }

    async fn delete_candidates(&mut self, instance_id: Uuid) -> FlowResult<usize> {
        let before = self.staged.links.len();
        self.staged.links.retain(|l| !(l.instance_id == instance_id && l.kind == LinkKind::Candidate));
        Ok(before - self.staged.links.len())
    }

    async fn links_for_instance(&mut self, instance_id: Uuid) -> FlowResult<Vec<IdentityLink>> {
        Ok(self.staged.links.iter().filter(|l| l.instance_id == instance_id).cloned().collect())
    }

    async fn links_for_task(&mut self, task_id: Uuid) -> FlowResult<Vec<IdentityLink>> {
        Ok(self.staged.links.iter().filter(|l| l.task_id == task_id).cloned().collect())
    }

    async fn find_participant(&mut self, user_id: &str, company: &str, task_id: Uuid) -> FlowResult<Option<IdentityLink>> {
        Ok(self.staged.links.iter()
            .find(|l| {
                l.kind == LinkKind::Participant
                    && l.task_id == task_id
                    && l.company == company
                    && l.user_id.as_deref() == Some(user_id)
            })
            .cloned())
    }

    async fn commit(self: Box<Self>) -> FlowResult<()> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> FlowResult<()> {
        // the staged copy is discarded with the guard
        Ok(())
    }
}

/// Commits on success and rolls back on failure, returning the first error.
pub async fn settle<T>(tx: Box<dyn Transaction>, result: FlowResult<T>) -> FlowResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                tracing::warn!(error = %rb, "Rollback failed");
            }
            Err(e)
        }
    }
}
