//! Terms-of-service gate for agent traffic.
//!
//! PAT and delegated actors must hold a current acceptance record keyed
//! by `(uid, mode, credential, version)` before touching non-exempt
//! agent routes. Session traffic accepted the terms in the member
//! portal and passes through.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mf_core::actor::{ActorContext, ActorMode};
use mf_core::ids;
use mf_core::DomainError;
use mf_store::{collections, DocKeys, DocStore};

use crate::catalog::TtlCache;

const CONFIG_COLLECTION: &str = "config";
const TERMS_DOC: &str = "agentTerms";
const TERMS_TTL: Duration = Duration::from_secs(30);

/// Fallback terms version when none is configured.
pub const DEFAULT_TERMS_VERSION: &str = "2026-02-24";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermsDocument {
    pub version: String,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermsAcceptance {
    pub uid: String,
    pub mode: String,
    pub credential: String,
    pub version: String,
    pub accepted_at: DateTime<Utc>,
}

pub struct TermsCache {
    store: Arc<DocStore>,
    cache: TtlCache<TermsDocument>,
}

impl TermsCache {
    pub fn new(store: Arc<DocStore>) -> Self {
        Self {
            store,
            cache: TtlCache::new(TERMS_TTL),
        }
    }

    pub async fn current(&self) -> Result<TermsDocument, DomainError> {
        let store = self.store.clone();
        self.cache
            .get_or_refresh(|| async move {
                let configured: Option<TermsDocument> =
                    store.get_doc(CONFIG_COLLECTION, TERMS_DOC).await?;
                Ok(configured.unwrap_or_else(|| TermsDocument {
                    version: DEFAULT_TERMS_VERSION.to_string(),
                    summary: None,
                }))
            })
            .await
    }
}

fn credential_for(actor: &ActorContext) -> Option<String> {
    match actor.mode {
        ActorMode::Session => None,
        ActorMode::PersonalAccessToken => actor.token_id.clone(),
        ActorMode::DelegatedAgent => actor.agent_client_id.clone(),
    }
}

impl crate::pipeline::CommercePipeline {
    pub async fn terms_get(&self) -> Result<TermsDocument, DomainError> {
        self.terms.current().await
    }

    /// Record acceptance of the current terms version for this actor's
    /// credential.
    pub async fn terms_accept(
        &self,
        actor: &ActorContext,
    ) -> Result<TermsAcceptance, DomainError> {
        let terms = self.terms.current().await?;
        let credential = credential_for(actor).unwrap_or_else(|| "session".to_string());
        let acceptance = TermsAcceptance {
            uid: actor.uid.clone(),
            mode: actor.mode.as_str().to_string(),
            credential: credential.clone(),
            version: terms.version.clone(),
            accepted_at: Utc::now(),
        };
        let id = ids::terms_acceptance_id(
            &actor.uid,
            actor.mode.as_str(),
            &credential,
            &terms.version,
        );
        self.store
            .put_doc(
                collections::AGENT_TERMS_ACCEPTANCES,
                id,
                DocKeys::owner(actor.uid.clone()),
                acceptance.clone(),
            )
            .await?;
        Ok(acceptance)
    }

    /// Gate for non-exempt agent routes. Fails with 428 until the
    /// current terms version has been accepted.
    pub async fn terms_gate(&self, actor: &ActorContext) -> Result<(), DomainError> {
        let Some(credential) = credential_for(actor) else {
            return Ok(());
        };
        let terms = self.terms.current().await?;
        let id = ids::terms_acceptance_id(
            &actor.uid,
            actor.mode.as_str(),
            &credential,
            &terms.version,
        );
        let accepted: Option<TermsAcceptance> = self
            .store
            .get_doc(collections::AGENT_TERMS_ACCEPTANCES, id)
            .await?;
        if accepted.is_some() {
            Ok(())
        } else {
            Err(DomainError::terms_required(format!(
                "accept agent terms version {} first",
                terms.version
            )))
        }
    }
}
