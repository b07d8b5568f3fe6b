use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Serialize, Deserialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use crate::error::{FlowError, FlowResult};
use crate::runtime::blueprint::Graph;
use crate::runtime::storage::{settle, Store, Transaction};

/// A deployed, immutable version of a named process graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub id: Uuid,
    pub name: String,
    pub company: String,
    pub version: u32,
    pub user_id: String,
    /// JSON encoding of the graph.
    pub resource: String,
    pub deploy_time: DateTime<Utc>,
}

/// Deployment request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDefinition {
    pub name: String,
    pub company: String,
    pub user_id: String,
    pub resource: Option<Graph>,
}

#[derive(Debug, Clone)]
pub struct ResolvedDefinition {
    pub id: Uuid,
    pub name: String,
    pub version: u32,
    pub graph: Arc<Graph>,
}

/// Deploys definitions and resolves them to graphs.
pub struct DefinitionRegistry {
    store: Arc<dyn Store>,
    // definitions never change, so a decoded graph stays valid forever
    graphs: DashMap<Uuid, Arc<Graph>>,
}

impl DefinitionRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            graphs: DashMap::new(),
        }
    }

    /// Saves the next version of (name, company).
    pub async fn deploy(&self, draft: NewDefinition) -> FlowResult<Definition> {
        if draft.user_id.is_empty() || draft.name.is_empty() || draft.company.is_empty() {
            return Err(FlowError::validation("user id, name and company can not be empty"));
        }
        let graph = draft.resource
            .ok_or_else(|| FlowError::validation("resource can not be empty"))?;
        graph.validate()?;
        let resource = graph.encode()?;

        let mut tx = self.store.begin().await?;
        let result = Self::insert_next_version(tx.as_mut(), draft.name, draft.company, draft.user_id, resource).await;
        let definition = settle(tx, result).await?;

        self.graphs.insert(definition.id, Arc::new(graph));
        info!(
            definition_id = %definition.id,
            name = %definition.name,
            company = %definition.company,
            version = definition.version,
            "Deployed definition"
        );
        Ok(definition)
    }

    async fn insert_next_version(
        tx: &mut dyn Transaction,
        name: String,
        company: String,
        user_id: String,
        resource: String,
    ) -> FlowResult<Definition> {
        let version = tx.latest_definition(&name, &company).await?
            .map(|d| d.version + 1)
            .unwrap_or(1);
        let definition = Definition {
            id: Uuid::new_v4(),
            name,
            company,
            version,
            user_id,
            resource,
            deploy_time: Utc::now(),
        };
        tx.save_definition(definition.clone()).await?;
        Ok(definition)
    }

    /// Latest version of (name, company).
    pub async fn resolve(&self, name: &str, company: &str) -> FlowResult<ResolvedDefinition> {
        let mut tx = self.store.begin().await?;
        let result = self.resolve_in(tx.as_mut(), name, company).await;
        settle(tx, result).await
    }

    pub async fn resolve_in(&self, tx: &mut dyn Transaction, name: &str, company: &str) -> FlowResult<ResolvedDefinition> {
        let definition = tx.latest_definition(name, company).await?
            .ok_or_else(|| FlowError::not_found(format!("definition {}/{}", company, name)))?;
        let graph = self.decode_cached(&definition)?;
        Ok(ResolvedDefinition {
            id: definition.id,
            name: definition.name,
            version: definition.version,
            graph,
        })
    }

    /// Graph of one specific version.
    pub async fn graph_by_id(&self, tx: &mut dyn Transaction, id: Uuid) -> FlowResult<Arc<Graph>> {
        if let Some(graph) = self.graphs.get(&id) {
            return Ok(graph.clone());
        }
        let definition = tx.find_definition(id).await?
            .ok_or_else(|| FlowError::not_found(format!("definition {}", id)))?;
        self.decode_cached(&definition)
    }

    pub async fn definition(&self, id: Uuid) -> FlowResult<Definition> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_definition(id).await
            .and_then(|d| d.ok_or_else(|| FlowError::not_found(format!("definition {}", id))));
        settle(tx, result).await
    }

    fn decode_cached(&self, definition: &Definition) -> FlowResult<Arc<Graph>> {
        if let Some(graph) = self.graphs.get(&definition.id) {
            return Ok(graph.clone());
        }
        let graph = Arc::new(Graph::decode(&definition.resource)?);
        self.graphs.insert(definition.id, graph.clone());
        Ok(graph)
    }
}
