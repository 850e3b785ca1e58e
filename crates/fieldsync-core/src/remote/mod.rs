//! Remote endpoint contract and request shaping.

mod http;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{record_id_of, MutationType, SyncItem};

pub use http::{HttpRemoteEndpoint, RemoteError, RemoteResult};

/// HTTP verb derived from the mutation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMethod {
    Post,
    Put,
    Delete,
}

impl RemoteMethod {
    pub const fn for_mutation(mutation: MutationType) -> Self {
        match mutation {
            MutationType::Create => Self::Post,
            MutationType::Update => Self::Put,
            MutationType::Delete => Self::Delete,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// One mutation as sent to the remote endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: RemoteMethod,
    pub entity: String,
    pub record_id: Option<String>,
    pub body: Value,
    /// Overwrite the remote record regardless of its version
    pub force: bool,
}

impl RemoteRequest {
    pub fn new(mutation: MutationType, entity: impl Into<String>, body: Value) -> Self {
        Self {
            method: RemoteMethod::for_mutation(mutation),
            entity: entity.into(),
            record_id: record_id_of(&body),
            body,
            force: false,
        }
    }

    pub fn for_item(item: &SyncItem) -> Self {
        Self::new(item.mutation, item.entity.clone(), item.data.clone())
    }

    /// Same request, overriding remote version checks
    #[must_use]
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Bytes this request puts on the wire, used for bandwidth accounting
    pub fn estimated_size(&self) -> u64 {
        let body_len = serde_json::to_vec(&self.body).map_or(0, |bytes| bytes.len());
        let path_len = self.entity.len() + self.record_id.as_ref().map_or(0, String::len);
        u64::try_from(body_len + path_len).unwrap_or(u64::MAX)
    }
}

/// Definitive answer for one request
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    Accepted,
    /// The remote record changed since the local mutation was based on it
    Conflict { remote: Value },
    Failed { message: String },
}

/// Per-entity create/update/delete against the authoritative service
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn send(&self, request: &RemoteRequest) -> RemoteOutcome;
}
