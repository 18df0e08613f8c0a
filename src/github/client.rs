//! Octocrab client wrapper.
//!
//! `GitHubClient` wraps an `Octocrab` instance and exposes the two request
//! shapes the source control adapter needs: a JSON `GET` into a serde type,
//! and a raw `GET` whose status alone is the answer.

use octocrab::Octocrab;
use serde::de::DeserializeOwned;

use super::error::{from_octocrab, from_status};
use crate::source::SourceControlError;

/// A GitHub API client shared across repositories.
#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    pub fn new(client: Octocrab) -> Self {
        Self { client }
    }

    /// Creates a client from a GitHub token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client))
    }

    /// Creates an unauthenticated client. Public repositories only, with the
    /// anonymous rate limit.
    pub fn anonymous() -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().build()?;
        Ok(Self::new(client))
    }

    /// Returns a reference to the underlying octocrab client.
    pub fn inner(&self) -> &Octocrab {
        &self.client
    }

    /// `GET`s `route` and deserializes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, route: &str) -> Result<T, SourceControlError> {
        self.client
            .get(route, None::<&()>)
            .await
            .map_err(from_octocrab)
    }

    /// `GET`s `route` and returns only the response status.
    ///
    /// Used for endpoints that answer with an empty body, where the status
    /// code carries the result.
    pub async fn get_status(&self, route: &str) -> Result<u16, SourceControlError> {
        let response = self.client._get(route).await.map_err(from_octocrab)?;
        let status = response.status().as_u16();
        if (500..600).contains(&status) || status == 429 {
            return Err(from_status(status, format!("GET {}", route)));
        }
        Ok(status)
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient").finish_non_exhaustive()
    }
}
