//! Learning reference copies from direct-query results.
//!
//! A federated query can return instances from other members that this
//! repository has never seen. If the exchange rule allows learning them and
//! nothing is stored locally yet, a refresh is requested from their home.

use std::sync::Arc;

use cohort_core::{ReplicationError, ReplicationResult};
use cohort_instances::{
    EntityDetail, EntitySummary, EventOriginator, Instance, InstanceHeader, Relationship,
};
use tracing::debug;

use crate::dispatcher::{Category, DispatchOutcome, EngineContext};

/// Shares its wiring with the dispatcher it was created from.
#[derive(Clone)]
pub struct RetrievalProcessor {
    context: Arc<EngineContext>,
}

impl RetrievalProcessor {
    pub(crate) fn from_context(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    pub async fn on_retrieved_summary(
        &self,
        source: &str,
        collection_id: &str,
        entity: &EntitySummary,
    ) -> DispatchOutcome {
        self.learn(
            "on_retrieved_summary",
            source,
            collection_id,
            Category::Entity,
            entity.header(),
        )
        .await
    }

    pub async fn on_retrieved_detail(
        &self,
        source: &str,
        collection_id: &str,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        self.learn(
            "on_retrieved_detail",
            source,
            collection_id,
            Category::Entity,
            entity.header(),
        )
        .await
    }

    pub async fn on_retrieved_relationship(
        &self,
        source: &str,
        collection_id: &str,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        self.learn(
            "on_retrieved_relationship",
            source,
            collection_id,
            Category::Relationship,
            relationship.header(),
        )
        .await
    }

    /// Each summary is handled on its own; one failure does not stop the rest.
    pub async fn on_retrieved_summaries(
        &self,
        source: &str,
        collection_id: &str,
        entities: &[EntitySummary],
    ) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(entities.len());
        for entity in entities {
            outcomes.push(self.on_retrieved_summary(source, collection_id, entity).await);
        }
        outcomes
    }

    pub async fn on_retrieved_details(
        &self,
        source: &str,
        collection_id: &str,
        entities: &[EntityDetail],
    ) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(entities.len());
        for entity in entities {
            outcomes.push(self.on_retrieved_detail(source, collection_id, entity).await);
        }
        outcomes
    }

    pub async fn on_retrieved_relationships(
        &self,
        source: &str,
        collection_id: &str,
        relationships: &[Relationship],
    ) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(relationships.len());
        for relationship in relationships {
            outcomes.push(
                self.on_retrieved_relationship(source, collection_id, relationship)
                    .await,
            );
        }
        outcomes
    }

    async fn learn(
        &self,
        method: &'static str,
        source: &str,
        collection_id: &str,
        category: Category,
        header: &InstanceHeader,
    ) -> DispatchOutcome {
        // Query results carry no originator; audit them against the
        // collection that answered.
        let originator = EventOriginator {
            metadata_collection_id: Some(collection_id.to_string()),
            ..EventOriginator::default()
        };
        self.context
            .guarded(
                method,
                source,
                &originator,
                self.learn_step(source, collection_id, category, header),
            )
            .await
    }

    async fn learn_step(
        &self,
        source: &str,
        collection_id: &str,
        category: Category,
        header: &InstanceHeader,
    ) -> ReplicationResult<DispatchOutcome> {
        let context = &self.context;
        let instance_type = header.instance_type.as_ref().ok_or_else(|| {
            ReplicationError::Malformed(format!("retrieved instance {} has no type", header.guid))
        })?;

        if header.home_collection_id() == Some(context.identity.local_collection_id.as_str()) {
            debug!(
                source,
                guid = header.guid.as_str(),
                "Retrieved instance is homed locally"
            );
            return Ok(DispatchOutcome::Ignored);
        }

        // May record the type as learned, so only once the instance is foreign.
        if !context.exchange_rule.should_learn(source, header) {
            return Ok(DispatchOutcome::Filtered);
        }

        let known = match category {
            Category::Entity => context
                .store
                .is_entity_known(source, &header.guid)
                .await
                .map_err(|e| ReplicationError::store("is_entity_known", e))?
                .is_some(),
            Category::Relationship => context
                .store
                .is_relationship_known(source, &header.guid)
                .await
                .map_err(|e| ReplicationError::store("is_relationship_known", e))?
                .is_some(),
        };
        if known {
            return Ok(DispatchOutcome::AlreadyKnown);
        }

        debug!(
            source,
            guid = header.guid.as_str(),
            collection_id,
            "Requesting reference copy of retrieved instance"
        );
        context
            .refresh_reference(
                source,
                category,
                &instance_type.type_def_guid,
                &instance_type.type_def_name,
                &header.guid,
                collection_id,
                &context.identity.local_collection_id,
            )
            .await
    }
}
