//! Token minting against the fake identity provider and exchange through the
//! token service.

use super::{TokenIssuer, UserGroup};
use crate::retry::{RetryPolicy, retry_fixed};
use crate::rpc::messages::{EXCHANGE_TOKEN, ExchangeTokenRequest, ExchangeTokenResponse, TokenInfo};
use crate::rpc::{outgoing, unary};
use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::Channel;
use url::Url;

/// Client for the identity provider and the token-exchange service.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    firebase_addr: String,
    applicant: String,
    school_id: i64,
    exchange: Option<Channel>,
    policy: RetryPolicy,
}

impl IdentityClient {
    /// Create a client minting from `firebase_addr` and exchanging over
    /// `exchange`.
    ///
    /// With no exchange channel the minted token is returned as is.
    #[must_use]
    pub fn new(
        firebase_addr: impl Into<String>,
        applicant: impl Into<String>,
        school_id: i64,
        exchange: Option<Channel>,
    ) -> Self {
        Self {
            firebase_addr: firebase_addr.into(),
            applicant: applicant.into(),
            school_id,
            exchange,
            policy: RetryPolicy::TOKEN_EXCHANGE,
        }
    }

    /// Replace the exchange retry policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// URL that mints an identity token for `user_id` from `template`.
    ///
    /// # Errors
    ///
    /// Fails when the configured address does not form a valid URL.
    pub fn token_url(&self, user_id: &str, group: UserGroup) -> Result<Url> {
        let template = format!("templates/{}.template", group.as_str());
        Url::parse_with_params(
            &format!("http://{}/token", self.firebase_addr),
            &[("template", template.as_str()), ("UserID", user_id)],
        )
        .with_context(|| format!("invalid identity provider address {}", self.firebase_addr))
    }

    /// Mint an identity-provider token.
    ///
    /// # Errors
    ///
    /// Fails when the provider is unreachable or answers with an error.
    pub async fn mint(&self, user_id: &str, group: UserGroup) -> Result<String> {
        let url = self.token_url(user_id, group)?;
        let body = tokio::task::spawn_blocking(move || fetch_token(&url))
            .await
            .context("identity request task failed")??;
        let token = body.trim();
        anyhow::ensure!(!token.is_empty(), "identity provider returned an empty token");
        Ok(token.to_owned())
    }

    async fn exchange(&self, channel: &Channel, original: &str, user_id: &str, group: UserGroup) -> Result<String> {
        let request = ExchangeTokenRequest {
            new_token_info: Some(TokenInfo {
                applicant: self.applicant.clone(),
                user_id: user_id.to_owned(),
                default_role_school_id: self.school_id,
            }),
            original_token: original.to_owned(),
        };
        let attempt_timeout = self.policy.attempt_timeout;
        let response = retry_fixed(self.policy, "exchange token", |attempt| {
            let channel = channel.clone();
            let request = request.clone();
            async move {
                tracing::trace!(attempt, group = %group, "exchanging token");
                let call = outgoing(request, None, attempt_timeout)?;
                unary::<_, ExchangeTokenResponse>(channel, EXCHANGE_TOKEN, call).await
            }
        })
        .await?;
        if response.new_token.is_empty() {
            return Err(anyhow!("token service returned an empty token for {user_id}"));
        }
        Ok(response.new_token)
    }
}

fn fetch_token(url: &Url) -> Result<String> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build();
    let response = agent
        .get(url.as_str())
        .call()
        .map_err(|err| anyhow!("cannot mint token from {url}: {err}"))?;
    response
        .into_string()
        .with_context(|| format!("cannot read token from {url}"))
}

#[async_trait]
impl TokenIssuer for IdentityClient {
    async fn issue(&self, user_id: &str, group: UserGroup) -> Result<String> {
        let original = self.mint(user_id, group).await?;
        match &self.exchange {
            Some(channel) => self.exchange(channel, &original, user_id, group).await,
            None => Ok(original),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_url_carries_template_and_user() {
        let client = IdentityClient::new("firebase:40401", "applicant", 1, None);
        let url = client
            .token_url("user 1", UserGroup::SchoolAdmin)
            .expect("url");
        assert_eq!(
            url.as_str(),
            "http://firebase:40401/token?template=templates%2FUSER_GROUP_SCHOOL_ADMIN.template&UserID=user+1"
        );
    }

    #[test]
    fn bad_address_is_reported() {
        let client = IdentityClient::new("bad host", "applicant", 1, None);
        let err = client
            .token_url("u", UserGroup::Teacher)
            .expect_err("invalid");
        assert!(err.to_string().contains("bad host"));
    }

    #[tokio::test]
    async fn issue_without_exchange_returns_the_minted_token() {
        let server = test_support::spawn_identity_server("id-token\n");
        let client = IdentityClient::new(server.addr(), "applicant", 1, None);
        let token = client
            .issue("user-1", UserGroup::Teacher)
            .await
            .expect("token");
        assert_eq!(token, "id-token");
        let target = server.join().expect("server thread").expect("request");
        assert!(
            target.starts_with("/token?template=templates%2FUSER_GROUP_TEACHER.template"),
            "{target}"
        );
        assert!(target.ends_with("UserID=user-1"), "{target}");
    }
}
