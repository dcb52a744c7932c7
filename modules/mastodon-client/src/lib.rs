pub mod error;
pub mod types;

pub use error::{MastodonError, Result};
pub use types::{Account, MediaAttachment, Mention, Status, StatusLookup, Tag};

use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use types::NewStatus;

/// Page size for hashtag timelines (the API maximum).
const TIMELINE_LIMIT: &str = "40";

/// Page size for favourite lists.
const FAVOURITES_LIMIT: &str = "60";

pub struct MastodonClient {
    client: reqwest::Client,
    instance_url: String,
    token: String,
}

impl MastodonClient {
    pub fn new(client: reqwest::Client, instance_url: &str, token: &str) -> Self {
        Self {
            client,
            instance_url: instance_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    fn is_authenticated(&self) -> bool {
        !self.token.is_empty()
    }

    /// Build `{instance}/api/v1/<segments...>` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.instance_url)
            .map_err(|e| MastodonError::InvalidUrl(format!("{}: {e}", self.instance_url)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| MastodonError::InvalidUrl(self.instance_url.clone()))?;
            path.pop_if_empty().push("api").push("v1");
            for s in segments {
                path.push(s);
            }
        }
        Ok(url)
    }

    async fn get(&self, url: Url, query: &[(&str, &str)]) -> Result<Response> {
        let mut req = self.client.get(url).query(query);
        if self.is_authenticated() {
            req = req.bearer_auth(&self.token);
        }
        Ok(req.send().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, &str)]) -> Result<T> {
        let resp = check(self.get(url, query).await?).await?;
        Ok(resp.json().await?)
    }

    /// The bot's own account; doubles as a token check.
    pub async fn verify_credentials(&self) -> Result<Account> {
        let url = self.endpoint(&["accounts", "verify_credentials"])?;
        let account: Account = self.get_json(url, &[]).await?;
        tracing::info!(acct = account.acct.as_str(), "Mastodon credentials verified");
        Ok(account)
    }

    /// Most recent public statuses carrying `tag` (without the leading `#`).
    pub async fn hashtag_timeline(&self, tag: &str) -> Result<Vec<Status>> {
        let tag = tag.trim_start_matches('#');
        let url = self.endpoint(&["timelines", "tag", tag])?;
        let statuses: Vec<Status> = self.get_json(url, &[("limit", TIMELINE_LIMIT)]).await?;
        tracing::debug!(tag, count = statuses.len(), "Fetched hashtag timeline");
        Ok(statuses)
    }

    /// Accounts that favourited a status.
    pub async fn favourited_by(&self, status_id: &str) -> Result<Vec<Account>> {
        let url = self.endpoint(&["statuses", status_id, "favourited_by"])?;
        self.get_json(url, &[("limit", FAVOURITES_LIMIT)]).await
    }

    /// Look a status up, telling confirmed deletion apart from anything uncertain.
    pub async fn status(&self, status_id: &str) -> Result<StatusLookup> {
        let url = self.endpoint(&["statuses", status_id])?;
        let resp = self.get(url, &[]).await?;
        let code = resp.status().as_u16();

        match code {
            200..=299 => {
                let status: Status = resp.json().await?;
                Ok(StatusLookup::Found(Box::new(status)))
            }
            404 | 410 if self.is_authenticated() => Ok(StatusLookup::Gone),
            429 => Err(rate_limited(&resp)),
            _ => {
                tracing::debug!(status_id, status = code, "Status lookup inconclusive");
                Ok(StatusLookup::Ambiguous { status: code })
            }
        }
    }

    /// Post a public reply to `in_reply_to_id`.
    pub async fn reply(&self, in_reply_to_id: &str, text: &str) -> Result<Status> {
        let url = self.endpoint(&["statuses"])?;
        let body = NewStatus {
            status: text,
            in_reply_to_id,
            visibility: "public",
        };
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let resp = check(resp).await?;
        let status: Status = resp.json().await?;
        tracing::info!(in_reply_to_id, reply_id = status.id.as_str(), "Posted reply");
        Ok(status)
    }
}

fn rate_limited(resp: &Response) -> MastodonError {
    let retry_after_secs = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    MastodonError::RateLimited { retry_after_secs }
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.as_u16() == 429 {
        return Err(rate_limited(&resp));
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(MastodonError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp)
}
