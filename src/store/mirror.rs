use async_trait::async_trait;
use serde::Serialize;

use crate::config::MirrorConfig;

use super::{MessageRecord, MirrorStore, ServiceAccountAuth, StoreError};

#[derive(Serialize)]
struct StringValue<'a> {
    #[serde(rename = "stringValue")]
    string_value: &'a str,
}

#[derive(Serialize)]
struct ChatFields<'a> {
    sender: StringValue<'a>,
    message: StringValue<'a>,
    timestamp: StringValue<'a>,
}

#[derive(Serialize)]
struct FirestoreDocument<'a> {
    fields: ChatFields<'a>,
}

impl<'a> From<&'a MessageRecord> for FirestoreDocument<'a> {
    fn from(record: &'a MessageRecord) -> Self {
        FirestoreDocument {
            fields: ChatFields {
                sender: StringValue { string_value: &record.sender },
                message: StringValue { string_value: &record.message },
                timestamp: StringValue { string_value: &record.timestamp },
            },
        }
    }
}

/// Writes each message as a new document under `messages/{room}/chats`.
pub struct FirestoreMirror {
    http_client: reqwest::Client,
    documents_url: String,
    api_key: Option<String>,
    auth: Option<ServiceAccountAuth>,
}

impl FirestoreMirror {
    pub fn new(config: &MirrorConfig) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let auth = config.service_account
            .as_ref()
            .map(|account| ServiceAccountAuth::new(account, http_client.clone()))
            .transpose()?;

        Ok(Self {
            documents_url: format!(
                "{}/projects/{}/databases/(default)/documents",
                config.base_url.trim_end_matches('/'),
                config.project_id
            ),
            http_client,
            api_key: config.api_key.clone(),
            auth,
        })
    }

    fn chats_url(&self, room: &str) -> String {
        let url = format!("{}/messages/{room}/chats", self.documents_url);
        match &self.api_key {
            Some(key) => format!("{url}?key={key}"),
            None => url,
        }
    }
}

#[async_trait]
impl MirrorStore for FirestoreMirror {
    async fn append(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let mut request = self.http_client
            .post(self.chats_url(record.room.as_str()))
            .json(&FirestoreDocument::from(record));
        if let Some(auth) = &self.auth {
            request = request.bearer_auth(auth.bearer().await?);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::MirrorRejected { status: status.as_u16(), body });
        }

        Ok(())
    }
}

/// Used when no remote project is configured.
#[derive(Clone, Copy, Default)]
pub struct DisabledMirror;

#[async_trait]
impl MirrorStore for DisabledMirror {
    async fn append(&self, _record: &MessageRecord) -> Result<(), StoreError> {
        Ok(())
    }
}
