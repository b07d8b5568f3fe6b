#![allow(dead_code)]

use async_trait::async_trait;
use procflow::dsl::builder::GraphBuilder;
use procflow::runtime::definition::Definition;
use procflow::runtime::identity::IdentityLink;
use procflow::runtime::instance::{Execution, Instance};
use procflow::runtime::task::Task;
use procflow::{Engine, FlowError, FlowResult, Graph, InMemoryStore, NewDefinition, StartRequest, Store, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

pub const COMPANY: &str = "acme";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn draft(name: &str, graph: Graph) -> NewDefinition {
    NewDefinition {
        name: name.to_string(),
        company: COMPANY.to_string(),
        user_id: "admin".to_string(),
        resource: Some(graph),
    }
}

pub fn start_request(name: &str, initiator: &str) -> StartRequest {
    StartRequest {
        definition_name: name.to_string(),
        company: COMPANY.to_string(),
        initiator: initiator.to_string(),
        title: format!("{} request", name),
        department: "engineering".to_string(),
        variables: HashMap::new(),
    }
}

/// start -> manager (any of the managers group) -> finance (amy and bob both approve)
pub fn approval_chain() -> Graph {
    GraphBuilder::new("start")
        .node("manager").name("Manager").group("managers").any().build()
        .node("finance").name("Finance").users(&["amy", "bob"]).all(2).build()
        .connect("start", "manager")
        .connect("manager", "finance")
        .build()
}

/// start -> split fans out to `branches` reviewers -> merge
pub fn parallel_review(branches: usize) -> Graph {
    let mut builder = GraphBuilder::new("start")
        .node("split").name("Kick-off").user("lead").build()
        .node("merge").name("Sign-off").user("director").build()
        .connect("start", "split")
        .parallel("split", "merge");
    for i in 0..branches {
        let id = format!("review-{}", i);
        builder = builder
            .node(&id).user(&format!("reviewer-{}", i)).build()
            .connect("split", &id)
            .connect(&id, "merge");
    }
    builder.build()
}

/// start -> outer fans out to {inner, audit}; inner fans out to {legal, security}
/// which meet at inner_merge; inner_merge and audit meet at outer_merge
pub fn nested_review() -> Graph {
    GraphBuilder::new("start")
        .node("outer").user("lead").build()
        .node("inner").user("counsel").build()
        .node("legal").user("lena").build()
        .node("security").user("sam").build()
        .node("inner_merge").user("counsel").build()
        .node("audit").user("ada").build()
        .node("outer_merge").user("director").build()
        .connect("start", "outer")
        .parallel("outer", "outer_merge")
        .connect("outer", "inner")
        .connect("outer", "audit")
        .parallel("inner", "inner_merge")
        .connect("inner", "legal")
        .connect("inner", "security")
        .connect("legal", "inner_merge")
        .connect("security", "inner_merge")
        .connect("inner_merge", "outer_merge")
        .connect("audit", "outer_merge")
        .build()
}

pub async fn open_task(engine: &Engine, instance_id: Uuid, node_id: &str) -> Task {
    engine.tasks(instance_id).await.unwrap()
        .into_iter()
        .find(|t| t.node_id == node_id && !t.finished)
        .unwrap_or_else(|| panic!("no open task on node {}", node_id))
}

// --- Failure injection ---

/// Store whose transactions fail `update_execution` while the switch is on.
/// Every instance id handed to `save_instance` is remembered, committed or not.
#[derive(Clone, Default)]
pub struct FaultyStore {
    pub inner: InMemoryStore,
    pub fail_execution_update: Arc<AtomicBool>,
    pub saved_instances: Arc<Mutex<Vec<Uuid>>>,
}

impl FaultyStore {
    pub fn arm(&self) {
        self.fail_execution_update.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.fail_execution_update.store(false, Ordering::SeqCst);
    }

    pub fn saved_instances(&self) -> Vec<Uuid> {
        self.saved_instances.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn begin(&self) -> FlowResult<Box<dyn Transaction>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FaultyTransaction {
            inner,
            fail_execution_update: self.fail_execution_update.load(Ordering::SeqCst),
            saved_instances: self.saved_instances.clone(),
        }))
    }
}

struct FaultyTransaction {
    inner: Box<dyn Transaction>,
    fail_execution_update: bool,
    saved_instances: Arc<Mutex<Vec<Uuid>>>,
}

#[async_trait]
impl Transaction for FaultyTransaction {
    async fn latest_definition(&mut self, name: &str, company: &str) -> FlowResult<Option<Definition>> {
        self.inner.latest_definition(name, company).await
    }

    async fn find_definition(&mut self, id: Uuid) -> FlowResult<Option<Definition>> {
        self.inner.find_definition(id).await
    }

    async fn save_definition(&mut self, definition: Definition) -> FlowResult<()> {
        self.inner.save_definition(definition).await
    }

    async fn save_instance(&mut self, instance: Instance) -> FlowResult<()> {
        self.saved_instances.lock().unwrap().push(instance.id);
        self.inner.save_instance(instance).await
    }

    async fn update_instance(&mut self, instance: Instance) -> FlowResult<()> {
        self.inner.update_instance(instance).await
    }

    async fn find_instance(&mut self, id: Uuid) -> FlowResult<Option<Instance>> {
        self.inner.find_instance(id).await
    }

    async fn save_execution(&mut self, execution: Execution) -> FlowResult<()> {
        self.inner.save_execution(execution).await
    }

    async fn update_execution(&mut self, execution: Execution) -> FlowResult<Execution> {
        if self.fail_execution_update {
            return Err(FlowError::Store("injected execution update failure".to_string()));
        }
        self.inner.update_execution(execution).await
    }

    async fn find_execution(&mut self, instance_id: Uuid) -> FlowResult<Option<Execution>> {
        self.inner.find_execution(instance_id).await
    }

    async fn save_task(&mut self, task: Task) -> FlowResult<()> {
        self.inner.save_task(task).await
    }

    async fn update_task(&mut self, task: Task) -> FlowResult<()> {
        self.inner.update_task(task).await
    }

    async fn find_task(&mut self, id: Uuid) -> FlowResult<Option<Task>> {
        self.inner.find_task(id).await
    }

    async fn tasks_for_instance(&mut self, instance_id: Uuid) -> FlowResult<Vec<Task>> {
        self.inner.tasks_for_instance(instance_id).await
    }

    async fn save_link(&mut self, link: IdentityLink) -> FlowResult<()> {
        self.inner.save_link(link).await
    }

    async fn delete_candidates(&mut self, instance_id: Uuid) -> FlowResult<usize> {
        self.inner.delete_candidates(instance_id).await
    }

    async fn links_for_instance(&mut self, instance_id: Uuid) -> FlowResult<Vec<IdentityLink>> {
        self.inner.links_for_instance(instance_id).await
    }

    async fn links_for_task(&mut self, task_id: Uuid) -> FlowResult<Vec<IdentityLink>> {
        self.inner.links_for_task(task_id).await
    }

    async fn find_participant(&mut self, user_id: &str, company: &str, task_id: Uuid) -> FlowResult<Option<IdentityLink>> {
        self.inner.find_participant(user_id, company, task_id).await
    }

    async fn commit(self: Box<Self>) -> FlowResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> FlowResult<()> {
        self.inner.rollback().await
    }
}
