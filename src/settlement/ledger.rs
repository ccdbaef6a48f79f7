//! External ledger client
//!
//! Bearer-authenticated HTTP API with two balance-adjustment families
//! (credential keyed and direct member) plus a member search endpoint whose
//! response shape varies between deployments.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("ledger request timed out")]
    Timeout,

    #[error("ledger returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    /// Errors worth retrying with backoff: no status, 5xx, or client timeout
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Transport(_) | LedgerError::Timeout => true,
            LedgerError::Status { status, .. } => *status >= 500,
            LedgerError::InvalidResponse(_) => false,
        }
    }

    /// 404/400: the credential or account does not exist under this strategy
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, LedgerError::Status { status: 400 | 404, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            LedgerError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LedgerError::Timeout
        } else if let Some(status) = e.status() {
            LedgerError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            LedgerError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    DiscordId,
    Username,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::DiscordId => "discord-id",
            SearchType::Username => "username",
        }
    }
}

/// Account found by the member search endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMember {
    pub account_id: String,
    pub username: Option<String>,
    pub discord_id: Option<String>,
}

#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// `PATCH /credentials/balance?type=..&value=..`
    async fn adjust_by_credential(&self, credential_type: &str, value: &str, amount: u64) -> Result<(), LedgerError>;

    /// `PATCH /members/{accountId}/point-balance`
    async fn adjust_member_balance(&self, account_id: &str, amount: u64) -> Result<(), LedgerError>;

    /// `GET /members/search?type=..&values=..`
    async fn search_members(&self, search: SearchType, value: &str) -> Result<Vec<LedgerMember>, LedgerError>;
}

pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    realm_point_id: Option<String>,
}

impl HttpLedgerClient {
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        realm_point_id: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LedgerError::InvalidResponse(format!("invalid ledger base url {}: {}", base_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(LedgerError::from)?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
            realm_point_id,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, LedgerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LedgerError::InvalidResponse(format!("ledger base url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn balance_body(&self, amount_field: &str, amount: u64) -> Value {
        let mut body = json!({ amount_field: amount });
        if let Some(realm_point_id) = &self.realm_point_id {
            body["realmPointId"] = json!(realm_point_id);
        }
        body
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, LedgerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(LedgerError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl LedgerApi for HttpLedgerClient {
    async fn adjust_by_credential(&self, credential_type: &str, value: &str, amount: u64) -> Result<(), LedgerError> {
        let url = self.endpoint(&["credentials", "balance"])?;
        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.token)
            .query(&[("type", credential_type), ("value", value)])
            .json(&self.balance_body("amount", amount))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn adjust_member_balance(&self, account_id: &str, amount: u64) -> Result<(), LedgerError> {
        let url = self.endpoint(&["members", account_id, "point-balance"])?;
        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.token)
            .json(&self.balance_body("tokens", amount))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn search_members(&self, search: SearchType, value: &str) -> Result<Vec<LedgerMember>, LedgerError> {
        let url = self.endpoint(&["members", "search"])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("type", search.as_str()), ("values", value)])
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let body: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        Ok(parse_members(&body))
    }
}

/// Accepts a bare array, `{members: [..]}`, `{data: [..]}`, `{items: [..]}`,
/// or a single member object.
pub fn parse_members(body: &Value) -> Vec<LedgerMember> {
    let entries: Vec<&Value> = match body {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            match ["members", "data", "items", "results"]
                .iter()
                .find_map(|key| map.get(*key))
            {
                Some(Value::Array(items)) => items.iter().collect(),
                Some(single @ Value::Object(_)) => vec![single],
                _ => vec![body],
            }
        }
        _ => Vec::new(),
    };

    entries.into_iter().filter_map(parse_member).collect()
}

fn parse_member(entry: &Value) -> Option<LedgerMember> {
    // Some deployments nest the account under `member` or `user`
    let entry = entry
        .get("member")
        .or_else(|| entry.get("user"))
        .filter(|nested| nested.is_object())
        .unwrap_or(entry);

    let text = |keys: &[&str]| {
        keys.iter().find_map(|key| match entry.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    };

    Some(LedgerMember {
        account_id: text(&["id", "_id", "accountId", "account_id", "memberId"])?,
        username: text(&["username", "name", "displayName"]),
        discord_id: text(&["discordId", "discord_id"]),
    })
}
