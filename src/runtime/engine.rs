use std::sync::Arc;
use std::collections::HashMap;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;
use tracing::{info, debug, warn};
use crate::config::EngineConfig;
use crate::error::{FlowError, FlowResult};
use crate::runtime::blueprint::{Candidate, Graph, GraphNode};
use crate::runtime::definition::{Definition, DefinitionRegistry, NewDefinition, ResolvedDefinition};
use crate::runtime::execution::{ExecutionSnapshot, ForkContext, NodeInfo};
use crate::runtime::identity::{self, Eligibility, IdentityLink};
use crate::runtime::instance::{Execution, Instance, InstanceState};
use crate::runtime::routing::{ConditionRouter, Router};
use crate::runtime::storage::{settle, Store, Transaction};
use crate::runtime::task::{self, Task};

/// Parameters of `Engine::start_instance`.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub definition_name: String,
    pub company: String,
    pub initiator: String,
    pub title: String,
    pub department: String,
    pub variables: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    /// Back to the node each entry came from.
    Backward,
}

/// Input of one advance step.
#[derive(Debug, Clone)]
pub struct AdvanceRequest {
    /// Entries whose tasks just completed.
    pub active: Vec<NodeInfo>,
    pub actor: String,
    pub company: String,
    pub source_task: Uuid,
    pub instance_id: Uuid,
    /// Step of the completed tasks.
    pub step: u32,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default)]
pub struct AdvanceReport {
    /// Entries created by this advance.
    pub entered: Vec<NodeInfo>,
    pub finished: bool,
}

/// An approval or rejection of one task.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub task_id: Uuid,
    pub user_id: String,
    pub company: String,
    pub approved: bool,
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub task: Task,
    pub advanced: bool,
    pub instance_finished: bool,
}

/// Where a new entry sits in the instance.
struct Placement {
    step: u32,
    path: Vec<String>,
    forks: Vec<ForkContext>,
}

/// Process-instance orchestrator.
///
/// Every public operation opens exactly one transaction and either commits
/// all of its writes or none of them.
pub struct Engine {
    store: Arc<dyn Store>,
    definitions: DefinitionRegistry,
    router: Arc<dyn Router>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            definitions: DefinitionRegistry::new(store.clone()),
            store,
            router: Arc::new(ConditionRouter),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = router;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub async fn deploy(&self, draft: NewDefinition) -> FlowResult<Definition> {
        self.definitions.deploy(draft).await
    }

    pub async fn resolve(&self, name: &str, company: &str) -> FlowResult<ResolvedDefinition> {
        self.definitions.resolve(name, company).await
    }

    // --- Lifecycle ---

    pub async fn start_instance(&self, req: StartRequest) -> FlowResult<Uuid> {
        // 1. Resolve the graph before the transaction opens
        let resolved = self.definitions.resolve(&req.definition_name, &req.company).await?;

        let mut tx = self.store.begin().await?;
        let result = self.start_in(tx.as_mut(), &resolved, req).await;
        let (instance_id, report) = settle(tx, result).await?;

        info!(
            instance_id = %instance_id,
            definition = %resolved.name,
            version = resolved.version,
            active = report.entered.len(),
            finished = report.finished,
            "Started instance"
        );
        Ok(instance_id)
    }

    async fn start_in(
        &self,
        tx: &mut dyn Transaction,
        resolved: &ResolvedDefinition,
        req: StartRequest,
    ) -> FlowResult<(Uuid, AdvanceReport)> {
        let root = resolved.graph.root_node()?;

        // 2. Instance row
        let instance = Instance {
            id: Uuid::new_v4(),
            definition_id: resolved.id,
            definition_name: resolved.name.clone(),
            company: req.company.clone(),
            title: req.title,
            department: req.department,
            start_user: req.initiator.clone(),
            variables: req.variables,
            start_time: Utc::now(),
            end_time: None,
            state: InstanceState::Running,
        };
        let instance_id = instance.id;
        tx.save_instance(instance).await?;

        // 3. Bootstrap task, already done by the initiator
        let bootstrap = task::create_bootstrap_task(tx, instance_id, &root.id, &req.initiator).await?;

        // 4. Execution positioned at the root
        let entry = NodeInfo::root(&root.id, bootstrap.id);
        let snapshot = ExecutionSnapshot::new(vec![entry.clone()]);
        tx.save_execution(Execution {
            id: Uuid::new_v4(),
            instance_id,
            definition_id: resolved.id,
            snapshot: snapshot.encode()?,
            version: 0,
            updated_at: Utc::now(),
        }).await?;

        // 5. Move past the root
        let report = self.advance(tx, AdvanceRequest {
            active: vec![entry],
            actor: req.initiator,
            company: req.company,
            source_task: bootstrap.id,
            instance_id,
            step: 0,
            direction: Direction::Forward,
        }).await?;

        Ok((instance_id, report))
    }

    /// Moves the given entries to their next node(s) inside the caller's transaction.
    ///
    /// Candidates are recomputed for the whole instance and the execution is
    /// written last.
    pub async fn advance(&self, tx: &mut dyn Transaction, req: AdvanceRequest) -> FlowResult<AdvanceReport> {
        let mut instance = tx.find_instance(req.instance_id).await?
            .ok_or_else(|| FlowError::not_found(format!("instance {}", req.instance_id)))?;
        if instance.company != req.company {
            return Err(FlowError::not_found(format!("instance {}", req.instance_id)));
        }
        if instance.is_finished() {
            return Err(FlowError::conflict(format!("instance {} is already finished", instance.id)));
        }

        let graph = self.definitions.graph_by_id(tx, instance.definition_id).await?;
        let mut execution = tx.find_execution(instance.id).await?
            .ok_or_else(|| FlowError::not_found(format!("execution of instance {}", instance.id)))?;
        let mut snapshot = ExecutionSnapshot::decode(&execution.snapshot)?;
        let mut report = AdvanceReport::default();

        for info in &req.active {
            if !snapshot.remove(info) {
                return Err(FlowError::conflict(format!(
                    "node '{}' is not active in instance {}", info.node_id, instance.id
                )));
            }
            let node = graph.resolve(&info.node_id)?;

            debug!(
                instance_id = %instance.id,
                node_id = %node.id,
                actor = %req.actor,
                source_task = %req.source_task,
                step = req.step,
                direction = ?req.direction,
                "Advancing node"
            );

            let finished = match req.direction {
                Direction::Forward => {
                    self.forward(tx, &graph, &instance, &mut snapshot, &mut report, node, info, req.step).await?
                }
                Direction::Backward => {
                    self.backward(tx, &graph, &instance, &mut snapshot, &mut report, info, req.step).await?;
                    false
                }
            };
            if finished {
                report.finished = true;
                break;
            }
        }

        if report.finished {
            snapshot.clear();
            instance.finish(Utc::now());
            tx.update_instance(instance.clone()).await?;
            info!(instance_id = %instance.id, "Instance finished");
        }

        let eligible = eligibility(&graph, &snapshot, &instance)?;
        identity::replace_candidates(tx, instance.id, &instance.company, &eligible).await?;

        execution.snapshot = snapshot.encode()?;
        tx.update_execution(execution).await?;
        Ok(report)
    }

    /// Returns true when the node has no successor and the instance is done.
    #[allow(clippy::too_many_arguments)]
    async fn forward(
        &self,
        tx: &mut dyn Transaction,
        graph: &Graph,
        instance: &Instance,
        snapshot: &mut ExecutionSnapshot,
        report: &mut AdvanceReport,
        node: &GraphNode,
        info: &NodeInfo,
        step: u32,
    ) -> FlowResult<bool> {
        let targets = self.router.select(node, &instance.variables)?;
        if targets.is_empty() {
            return Ok(true);
        }

        let mut path = info.path.clone();
        path.push(node.id.clone());
        let mut forks = info.forks.clone();

        if node.is_split() {
            let join = node.join.clone()
                .ok_or_else(|| FlowError::validation(format!("split '{}' has no join node", node.id)))?;
            forks.push(ForkContext {
                token: Uuid::new_v4(),
                split: node.id.clone(),
                join,
                branches: targets.len() as u32,
                path: path.clone(),
            });
        }

        for target_id in &targets {
            let target = graph.resolve(target_id)?;
            let placement = Placement {
                step: step + 1,
                path: path.clone(),
                forks: forks.clone(),
            };
            self.arrive(tx, graph, instance, snapshot, report, target, placement, info.task_id).await?;
        }
        Ok(false)
    }

    /// Enters `target`, or parks the branch when `target` is the merge node of
    /// its innermost fork.
    #[allow(clippy::too_many_arguments)]
    async fn arrive(
        &self,
        tx: &mut dyn Transaction,
        graph: &Graph,
        instance: &Instance,
        snapshot: &mut ExecutionSnapshot,
        report: &mut AdvanceReport,
        target: &GraphNode,
        placement: Placement,
        branch_task: Option<Uuid>,
    ) -> FlowResult<()> {
        let fork = placement.forks.last().filter(|f| f.join == target.id).cloned();
        let Some(fork) = fork else {
            return self.enter(tx, graph, instance, snapshot, report, target, placement).await;
        };

        snapshot.push(NodeInfo {
            node_id: target.id.clone(),
            task_id: branch_task,
            step: placement.step,
            gateway: target.gateway,
            branch_count: fork.branches,
            waiting: true,
            path: placement.path,
            forks: placement.forks.clone(),
        });

        let waiting: Vec<Option<Uuid>> = snapshot.waiting_at(fork.token, &fork.join)
            .into_iter()
            .map(|n| n.task_id)
            .collect();
        if (waiting.len() as u32) < fork.branches {
            debug!(
                instance_id = %instance.id,
                join = %fork.join,
                arrived = waiting.len(),
                branches = fork.branches,
                "Branch waiting at merge"
            );
            return Ok(());
        }
        for task_id in waiting {
            let Some(task_id) = task_id else { continue };
            let sibling = tx.find_task(task_id).await?
                .ok_or_else(|| FlowError::not_found(format!("task {}", task_id)))?;
            if !sibling.finished {
                debug!(instance_id = %instance.id, task_id = %task_id, "Merge blocked by an open branch task");
                return Ok(());
            }
        }

        snapshot.drain_fork(fork.token);
        let mut forks = placement.forks;
        forks.pop();
        let merged = Placement {
            step: placement.step,
            path: fork.path.clone(),
            forks,
        };
        self.enter(tx, graph, instance, snapshot, report, target, merged).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn backward(
        &self,
        tx: &mut dyn Transaction,
        graph: &Graph,
        instance: &Instance,
        snapshot: &mut ExecutionSnapshot,
        report: &mut AdvanceReport,
        info: &NodeInfo,
        step: u32,
    ) -> FlowResult<()> {
        let Some(target_id) = info.path.last() else {
            return Err(FlowError::conflict(format!("the start node of instance {} can not be rejected", instance.id)));
        };
        let target = graph.resolve(target_id)?;

        let mut path = info.path.clone();
        path.pop();
        let mut forks = info.forks.clone();
        let leaving_fork = forks.last().map(|f| f.split == target.id).unwrap_or(false);
        if leaving_fork {
            if let Some(fork) = forks.pop() {
                let dropped = snapshot.drain_fork(fork.token);
                info!(
                    instance_id = %instance.id,
                    split = %fork.split,
                    dropped = dropped.len(),
                    "Rejected inside a parallel region, cancelling sibling branches"
                );
            }
        }

        let placement = Placement {
            step: step.saturating_sub(1),
            path,
            forks,
        };
        self.enter(tx, graph, instance, snapshot, report, target, placement).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn enter(
        &self,
        tx: &mut dyn Transaction,
        graph: &Graph,
        instance: &Instance,
        snapshot: &mut ExecutionSnapshot,
        report: &mut AdvanceReport,
        target: &GraphNode,
        placement: Placement,
    ) -> FlowResult<()> {
        let assignee = if target.id == graph.root {
            Some(instance.start_user.clone())
        } else {
            target.single_user().map(str::to_string)
        };
        let task = task::create_task(tx, target, instance.id, placement.step, assignee).await?;

        let entry = NodeInfo {
            node_id: target.id.clone(),
            task_id: Some(task.id),
            step: placement.step,
            gateway: target.gateway,
            branch_count: placement.forks.last().map(|f| f.branches).unwrap_or(1),
            waiting: false,
            path: placement.path,
            forks: placement.forks,
        };
        debug!(
            instance_id = %instance.id,
            node_id = %entry.node_id,
            task_id = %task.id,
            step = entry.step,
            quorum = task.member_count,
            "Entered node"
        );
        snapshot.push(entry.clone());
        report.entered.push(entry);
        Ok(())
    }

    /// Approval or rejection of one task by one user.
    ///
    /// When the action closes the task the instance is advanced in the same transaction.
    pub async fn complete_task(&self, req: ActionRequest) -> FlowResult<ActionOutcome> {
        let mut tx = self.store.begin().await?;
        let result = self.complete_in(tx.as_mut(), &req).await;
        settle(tx, result).await
    }

    async fn complete_in(&self, tx: &mut dyn Transaction, req: &ActionRequest) -> FlowResult<ActionOutcome> {
        let task = tx.find_task(req.task_id).await?
            .ok_or_else(|| FlowError::not_found(format!("task {}", req.task_id)))?;
        let instance = tx.find_instance(task.instance_id).await?
            .ok_or_else(|| FlowError::not_found(format!("instance {}", task.instance_id)))?;
        if instance.company != req.company {
            return Err(FlowError::not_found(format!("task {}", req.task_id)));
        }
        if instance.is_finished() {
            return Err(FlowError::conflict(format!("instance {} is already finished", instance.id)));
        }
        if task.finished {
            return Err(FlowError::conflict(format!("task {} is already finished", task.id)));
        }

        let execution = tx.find_execution(instance.id).await?
            .ok_or_else(|| FlowError::not_found(format!("execution of instance {}", instance.id)))?;
        let snapshot = ExecutionSnapshot::decode(&execution.snapshot)?;
        let info = snapshot.find_by_task(task.id).cloned()
            .ok_or_else(|| FlowError::conflict(format!("task {} is no longer active", task.id)))?;

        if self.config.reject_repeat_actors
            && identity::has_participated(tx, &req.user_id, &req.company, task.id).await?
        {
            warn!(task_id = %task.id, user_id = %req.user_id, "Repeat action rejected");
            return Err(FlowError::conflict(format!(
                "user {} already acted on task {}", req.user_id, task.id
            )));
        }

        identity::record_participant(tx, instance.id, task.step, task.id, &req.user_id, &req.company).await?;
        let task = task::record_action(tx, task.id, req.approved).await?;
        info!(
            instance_id = %instance.id,
            task_id = %task.id,
            user_id = %req.user_id,
            approved = req.approved,
            remaining = task.remaining,
            finished = task.finished,
            "Recorded action"
        );

        let direction = match (task.finished, req.approved) {
            (false, _) => None,
            (true, true) => Some(Direction::Forward),
            (true, false) if self.config.return_on_reject => Some(Direction::Backward),
            (true, false) => None,
        };
        let Some(direction) = direction else {
            return Ok(ActionOutcome { task, advanced: false, instance_finished: false });
        };

        let report = self.advance(tx, AdvanceRequest {
            active: vec![info],
            actor: req.user_id.clone(),
            company: req.company.clone(),
            source_task: task.id,
            instance_id: instance.id,
            step: task.step,
            direction,
        }).await?;

        Ok(ActionOutcome {
            task,
            advanced: true,
            instance_finished: report.finished,
        })
    }

    // --- Reads ---

    pub async fn instance(&self, id: Uuid) -> FlowResult<Instance> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_instance(id).await
            .and_then(|i| i.ok_or_else(|| FlowError::not_found(format!("instance {}", id))));
        settle(tx, result).await
    }

    pub async fn execution(&self, instance_id: Uuid) -> FlowResult<Execution> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_execution(instance_id).await
            .and_then(|e| e.ok_or_else(|| FlowError::not_found(format!("execution of instance {}", instance_id))));
        settle(tx, result).await
    }

    pub async fn snapshot(&self, instance_id: Uuid) -> FlowResult<ExecutionSnapshot> {
        let execution = self.execution(instance_id).await?;
        ExecutionSnapshot::decode(&execution.snapshot)
    }

    pub async fn task(&self, id: Uuid) -> FlowResult<Task> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_task(id).await
            .and_then(|t| t.ok_or_else(|| FlowError::not_found(format!("task {}", id))));
        settle(tx, result).await
    }

    pub async fn tasks(&self, instance_id: Uuid) -> FlowResult<Vec<Task>> {
        let mut tx = self.store.begin().await?;
        let result = tx.tasks_for_instance(instance_id).await;
        settle(tx, result).await
    }

    /// Candidate rows currently visible for the instance.
    pub async fn candidates(&self, instance_id: Uuid) -> FlowResult<Vec<IdentityLink>> {
        let mut tx = self.store.begin().await?;
        let result = identity::candidates(tx.as_mut(), instance_id).await;
        settle(tx, result).await
    }

    pub async fn participants(&self, task_id: Uuid) -> FlowResult<Vec<IdentityLink>> {
        let mut tx = self.store.begin().await?;
        let result = identity::participants(tx.as_mut(), task_id).await;
        settle(tx, result).await
    }

    pub async fn has_participated(&self, user_id: &str, company: &str, task_id: Uuid) -> FlowResult<bool> {
        let mut tx = self.store.begin().await?;
        let result = identity::has_participated(tx.as_mut(), user_id, company, task_id).await;
        settle(tx, result).await
    }
}

/// Who may act on every open entry of the snapshot. The root is reserved for the initiator.
fn eligibility(graph: &Graph, snapshot: &ExecutionSnapshot, instance: &Instance) -> FlowResult<Vec<Eligibility>> {
    let mut out = Vec::new();
    for info in snapshot.active.iter().filter(|n| !n.waiting) {
        let Some(task_id) = info.task_id else { continue };
        if info.node_id == graph.root {
            out.push(Eligibility {
                task_id,
                step: info.step,
                candidate: Candidate::User(instance.start_user.clone()),
            });
            continue;
        }
        let node = graph.resolve(&info.node_id)?;
        out.extend(node.candidates.iter().map(|c| Eligibility {
            task_id,
            step: info.step,
            candidate: c.clone(),
        }));
    }
    Ok(out)
}
