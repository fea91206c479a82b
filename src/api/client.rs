//! Management API client

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::types::{CallerIdentity, Collection, Environment, FlagSummary, Member, Project};
use crate::{Error, Result};

/// Bearer-authorized client for the flag-management REST API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client rooted at `base_url` (e.g. `https://app.launchdarkly.com`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the base URL cannot be parsed or cannot carry a path.
    pub fn new(http: Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid API base URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "API base URL cannot be a base: {base_url}"
            )));
        }
        Ok(Self { http, base_url })
    }

    /// List projects visible to the token
    pub async fn list_projects(&self, access_token: &str) -> Result<Vec<Project>> {
        let url = self.endpoint(&["projects"]);
        let page: Collection<Project> = self.get_json(url, access_token, "fetch projects").await?;
        Ok(page.items)
    }

    /// List environments of a project
    pub async fn list_environments(
        &self,
        access_token: &str,
        project_key: &str,
    ) -> Result<Vec<Environment>> {
        let url = self.endpoint(&["projects", project_key, "environments"]);
        let page: Collection<Environment> = self
            .get_json(url, access_token, "fetch environments")
            .await?;
        Ok(page.items)
    }

    /// Environment detail, including its evaluation key
    pub async fn get_environment(
        &self,
        access_token: &str,
        project_key: &str,
        environment_key: &str,
    ) -> Result<Environment> {
        let url = self.endpoint(&["projects", project_key, "environments", environment_key]);
        self.get_json(url, access_token, "fetch environment").await
    }

    /// Flag metadata for a project, scoped to one environment
    pub async fn list_flags(
        &self,
        access_token: &str,
        project_key: &str,
        environment_key: &str,
    ) -> Result<Vec<FlagSummary>> {
        let mut url = self.endpoint(&["flags", project_key]);
        url.query_pairs_mut()
            .append_pair("env", environment_key)
            .append_pair("summary", "true");
        let page: Collection<FlagSummary> = self.get_json(url, access_token, "fetch flags").await?;
        Ok(page.items)
    }

    /// Identity behind the access token
    pub async fn caller_identity(&self, access_token: &str) -> Result<CallerIdentity> {
        let url = self.endpoint(&["caller-identity"]);
        self.get_json(url, access_token, "fetch caller identity")
            .await
    }

    /// Member record of the signed-in user
    pub async fn current_member(&self, access_token: &str) -> Result<Member> {
        let url = self.endpoint(&["members", "me"]);
        self.get_json(url, access_token, "fetch member").await
    }

    /// `{base}/api/v2/{segments...}` with each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v2"]).extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        access_token: &str,
        operation: &'static str,
    ) -> Result<T> {
        debug!(path = %url.path(), "Management API request");
        let response = self.http.get(url).bearer_auth(access_token).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(operation, status = status.as_u16(), "Management API request failed");
            return Err(Error::Upstream {
                operation,
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_segments() {
        let client = ApiClient::new(Client::new(), "https://app.example.com").unwrap();
        let url = client.endpoint(&["projects", "my proj", "environments", "a/b"]);
        assert_eq!(
            url.as_str(),
            "https://app.example.com/api/v2/projects/my%20proj/environments/a%2Fb"
        );
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let client = ApiClient::new(Client::new(), "http://127.0.0.1:9000/proxy/").unwrap();
        let url = client.endpoint(&["members", "me"]);
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/proxy/api/v2/members/me");
    }

    #[test]
    fn rejects_non_base_url() {
        assert!(ApiClient::new(Client::new(), "mailto:ops@example.com").is_err());
        assert!(ApiClient::new(Client::new(), "not a url").is_err());
    }
}
