//! HTTP client for the identity cache service.

use std::time::Duration;

use async_trait::async_trait;
use emunet_core::api::{GroupDeleted, GroupMembers};
use emunet_core::{EndpointIdentity, NetworkIdentity, OrchestrationIdentity};
use reqwest::{Client, Response, StatusCode, Url};

use crate::identity_cache::{CacheError, IdentityCache};

/// Talks to `emunetd cache` over its HTTP API.
#[derive(Clone)]
pub struct RemoteIdentityCache {
    client: Client,
    base: Url,
}

impl RemoteIdentityCache {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let base = Url::parse(base_url)
            .map_err(|e| CacheError::Unavailable(format!("invalid cache url {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(CacheError::Unavailable(format!(
                "cache url {base_url} cannot be a base"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self { client, base })
    }

    /// Base URL plus percent-encoded path segments.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn identity_url(&self, name: &str, tail: Option<&str>) -> Url {
        match tail {
            Some(tail) => self.url(&["api", "v1", "identity", name, tail]),
            None => self.url(&["api", "v1", "identity", name]),
        }
    }

    fn group_url(&self, group: &str, tail: Option<&str>) -> Url {
        match tail {
            Some(tail) => self.url(&["api", "v1", "groups", group, tail]),
            None => self.url(&["api", "v1", "groups", group]),
        }
    }
}

fn unavailable(e: reqwest::Error) -> CacheError {
    CacheError::Unavailable(e.to_string())
}

async fn check(resp: Response) -> Result<Response, CacheError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(CacheError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl IdentityCache for RemoteIdentityCache {
    async fn put_network_identity(
        &self,
        name: &str,
        identity: NetworkIdentity,
    ) -> Result<(), CacheError> {
        let resp = self
            .client
            .put(self.identity_url(name, Some("network")))
            .json(&identity)
            .send()
            .await
            .map_err(unavailable)?;
        check(resp).await.map(|_| ())
    }

    async fn put_orchestration_identity(
        &self,
        name: &str,
        identity: OrchestrationIdentity,
    ) -> Result<(), CacheError> {
        let resp = self
            .client
            .put(self.identity_url(name, Some("orchestration")))
            .json(&identity)
            .send()
            .await
            .map_err(unavailable)?;
        check(resp).await.map(|_| ())
    }

    async fn get_merged(&self, name: &str) -> Result<Option<EndpointIdentity>, CacheError> {
        let resp = self
            .client
            .get(self.identity_url(name, None))
            .send()
            .await
            .map_err(unavailable)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check(resp).await?;
        resp.json::<EndpointIdentity>()
            .await
            .map(Some)
            .map_err(|e| CacheError::Decode(e.to_string()))
    }

    async fn list_by_group(&self, group: &str) -> Result<Vec<String>, CacheError> {
        let resp = self
            .client
            .get(self.group_url(group, Some("members")))
            .send()
            .await
            .map_err(unavailable)?;
        let resp = check(resp).await?;
        resp.json::<GroupMembers>()
            .await
            .map(|g| g.members)
            .map_err(|e| CacheError::Decode(e.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<(), CacheError> {
        let resp = self
            .client
            .delete(self.identity_url(name, None))
            .send()
            .await
            .map_err(unavailable)?;
        check(resp).await.map(|_| ())
    }

    async fn delete_group(&self, group: &str) -> Result<usize, CacheError> {
        let resp = self
            .client
            .delete(self.group_url(group, None))
            .send()
            .await
            .map_err(unavailable)?;
        let resp = check(resp).await?;
        resp.json::<GroupDeleted>()
            .await
            .map(|g| g.removed)
            .map_err(|e| CacheError::Decode(e.to_string()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let resp = self
            .client
            .get(self.url(&["health"]))
            .send()
            .await
            .map_err(unavailable)?;
        check(resp).await.map(|_| ())
    }
}
