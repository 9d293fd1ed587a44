// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the helpdesk REST API.
//!
//! [`HelpdeskClient`] implements [`HelpdeskApi`] over account-scoped
//! endpoints. Transient failures (429, 5xx) are retried once; anything
//! beyond that is left to queue redelivery.

use std::time::Duration;

use async_trait::async_trait;
use deskbridge_config::model::HelpdeskConfig;
use deskbridge_core::traits::helpdesk::{
    AttachmentUpload, ContactUpdate, ConversationRequest, ConversationStatus, HelpdeskContact,
    HelpdeskConversation, HelpdeskMessage, NewContact, NewMessage,
};
use deskbridge_core::types::MessageDirection;
use deskbridge_core::{DeskbridgeError, HelpdeskApi};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::types::{
    ApiErrorBody, ContactCreateResponse, ContactSearchResponse, ConversationListResponse,
    CreateContactBody, CreateConversationBody, CreateMessageBody, MessageListResponse,
    MessageResponse, ReplyAttributes, ToggleStatusBody,
};

const TOKEN_HEADER: &str = "api_access_token";

#[derive(Debug, Clone)]
pub struct HelpdeskClient {
    client: reqwest::Client,
    base_url: String,
    account_id: i64,
    max_retries: u32,
    retry_delay: Duration,
}

impl HelpdeskClient {
    pub fn new(
        base_url: &str,
        api_token: &str,
        account_id: i64,
        timeout: Duration,
    ) -> Result<Self, DeskbridgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            TOKEN_HEADER,
            HeaderValue::from_str(api_token).map_err(|e| {
                DeskbridgeError::Config(format!("invalid helpdesk API token header value: {e}"))
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| DeskbridgeError::Helpdesk {
                message: format!("failed to build HTTP client: {e}"),
                status: None,
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id,
            max_retries: 1,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Build from `[helpdesk]`. Base URL and token are required.
    pub fn from_config(config: &HelpdeskConfig) -> Result<Self, DeskbridgeError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| DeskbridgeError::Config("helpdesk.base_url is not set".into()))?;
        let token = config
            .api_token
            .as_deref()
            .ok_or_else(|| DeskbridgeError::Config("helpdesk.api_token is not set".into()))?;
        Self::new(
            base_url,
            token,
            config.account_id,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/accounts/{}{}", self.base_url, self.account_id, path)
    }

    /// Send a request, retrying once on transient statuses, and map
    /// failures. `entity`/`id` name the record for 404s.
    async fn send(
        &self,
        build: impl Fn() -> RequestBuilder,
        entity: &str,
        id: &str,
    ) -> Result<Response, DeskbridgeError> {
        let mut attempt = 0;
        loop {
            let response = build().send().await.map_err(|e| DeskbridgeError::Helpdesk {
                message: format!("HTTP request failed: {e}"),
                status: None,
                source: Some(Box::new(e)),
            })?;
            let status = response.status();
            debug!(status = %status, attempt, entity, "helpdesk response received");

            if status.is_success() {
                return Ok(response);
            }
            if status == StatusCode::NOT_FOUND {
                return Err(DeskbridgeError::not_found(entity, id));
            }
            if is_transient_error(status) && attempt < self.max_retries {
                attempt += 1;
                warn!(status = %status, entity, "transient helpdesk error, will retry");
                tokio::time::sleep(self.retry_delay).await;
                continue;
            }
            return Err(error_from(response).await);
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, DeskbridgeError> {
        let body = response.text().await.map_err(|e| DeskbridgeError::Helpdesk {
            message: format!("failed to read response body: {e}"),
            status: None,
            source: Some(Box::new(e)),
        })?;
        serde_json::from_str(&body).map_err(|e| DeskbridgeError::Helpdesk {
            message: format!("failed to parse helpdesk response: {e}"),
            status: None,
            source: Some(Box::new(e)),
        })
    }

    async fn search_contact(&self, contact: &NewContact) -> Result<Option<HelpdeskContact>, DeskbridgeError> {
        let url = self.url("/contacts/search");
        let query = contact.identifier.clone();
        let response = self
            .send(
                || {
                    self.client
                        .get(&url)
                        .query(&[("q", query.as_str()), ("include_contacts", "true")])
                },
                "contact",
                &contact.identifier,
            )
            .await?;
        let found: ContactSearchResponse = Self::json(response).await?;
        Ok(found.payload.into_iter().find(|c| {
            c.identifier.as_deref() == Some(contact.identifier.as_str())
                || (contact.phone_number.is_some() && c.phone_number == contact.phone_number)
        }))
    }

    /// Download attachment bytes from a helpdesk or protocol media URL.
    pub async fn fetch_media(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, DeskbridgeError> {
        let response = self
            .send(|| self.client.get(url).timeout(timeout), "media", url)
            .await?;
        let bytes = response.bytes().await.map_err(|e| DeskbridgeError::Helpdesk {
            message: format!("failed to download media: {e}"),
            status: None,
            source: Some(Box::new(e)),
        })?;
        Ok(bytes.to_vec())
    }
}

/// An unparseable mime type falls back to the multipart default.
fn attachment_part(upload: &AttachmentUpload) -> reqwest::multipart::Part {
    let part = || {
        reqwest::multipart::Part::bytes(upload.bytes.clone()).file_name(upload.file_name.clone())
    };
    part().mime_str(&upload.mime_type).unwrap_or_else(|_| part())
}

fn direction_name(direction: MessageDirection) -> &'static str {
    match direction {
        MessageDirection::Incoming => "incoming",
        MessageDirection::Outgoing => "outgoing",
    }
}

/// Returns true for HTTP status codes worth one more attempt.
fn is_transient_error(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

async fn error_from(response: Response) -> DeskbridgeError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiErrorBody>(&body)
        .ok()
        .and_then(ApiErrorBody::describe)
        .unwrap_or(body);
    DeskbridgeError::Helpdesk {
        message: format!("helpdesk returned {status}: {detail}"),
        status: Some(status.as_u16()),
        source: None,
    }
}

#[async_trait]
impl HelpdeskApi for HelpdeskClient {
    async fn find_or_create_contact(
        &self,
        contact: &NewContact,
    ) -> Result<HelpdeskContact, DeskbridgeError> {
        if let Some(found) = self.search_contact(contact).await? {
            return Ok(found);
        }

        let url = self.url("/contacts");
        let body = CreateContactBody {
            inbox_id: contact.inbox_id,
            name: &contact.name,
            phone_number: contact.phone_number.as_deref(),
            identifier: &contact.identifier,
            avatar_url: contact.avatar_url.as_deref(),
        };
        match self
            .send(|| self.client.post(&url).json(&body), "contact", &contact.identifier)
            .await
        {
            Ok(response) => {
                let created: ContactCreateResponse = Self::json(response).await?;
                debug!(contact_id = created.payload.contact.id, "helpdesk contact created");
                Ok(created.payload.contact)
            }
            // Someone else created it between our search and create.
            Err(DeskbridgeError::Helpdesk {
                status: Some(422), ..
            }) => self.search_contact(contact).await?.ok_or_else(|| {
                DeskbridgeError::helpdesk(format!(
                    "contact {} rejected as duplicate but not found",
                    contact.identifier
                ))
            }),
            Err(e) => Err(e),
        }
    }

    async fn update_contact(
        &self,
        contact_id: i64,
        update: &ContactUpdate,
    ) -> Result<(), DeskbridgeError> {
        if update.is_empty() {
            return Ok(());
        }
        let url = self.url(&format!("/contacts/{contact_id}"));
        self.send(
            || self.client.put(&url).json(update),
            "contact",
            &contact_id.to_string(),
        )
        .await?;
        Ok(())
    }

    async fn find_or_create_conversation(
        &self,
        request: &ConversationRequest,
    ) -> Result<HelpdeskConversation, DeskbridgeError> {
        let contact_id = request.contact_id.to_string();
        let url = self.url(&format!("/contacts/{}/conversations", request.contact_id));
        let response = self
            .send(|| self.client.get(&url), "contact", &contact_id)
            .await?;
        let list: ConversationListResponse = Self::json(response).await?;
        let mut in_inbox: Vec<_> = list
            .payload
            .into_iter()
            .filter(|c| c.inbox_id == request.inbox_id)
            .collect();
        // newest active first, then newest resolved
        in_inbox.sort_by_key(|c| (!c.status.is_active(), std::cmp::Reverse(c.id)));

        if let Some(existing) = in_inbox.into_iter().next() {
            if existing.status.is_active() {
                return Ok(existing);
            }
            if request.auto_reopen {
                let url = self.url(&format!("/conversations/{}/toggle_status", existing.id));
                let body = ToggleStatusBody {
                    status: ConversationStatus::Open,
                };
                self.send(
                    || self.client.post(&url).json(&body),
                    "conversation",
                    &existing.id.to_string(),
                )
                .await?;
                debug!(conversation_id = existing.id, "conversation reopened");
                return Ok(HelpdeskConversation {
                    status: ConversationStatus::Open,
                    ..existing
                });
            }
        }

        let url = self.url("/conversations");
        let body = CreateConversationBody {
            contact_id: request.contact_id,
            inbox_id: request.inbox_id,
            status: request.status,
        };
        let response = self
            .send(|| self.client.post(&url).json(&body), "contact", &contact_id)
            .await?;
        let created: HelpdeskConversation = Self::json(response).await?;
        debug!(conversation_id = created.id, "helpdesk conversation created");
        Ok(created)
    }

    async fn find_message_by_source_id(
        &self,
        conversation_id: i64,
        source_id: &str,
    ) -> Result<Option<HelpdeskMessage>, DeskbridgeError> {
        let url = self.url(&format!("/conversations/{conversation_id}/messages"));
        let response = self
            .send(
                || self.client.get(&url),
                "conversation",
                &conversation_id.to_string(),
            )
            .await?;
        let list: MessageListResponse = Self::json(response).await?;
        Ok(list
            .payload
            .into_iter()
            .find(|m| m.source_id.as_deref() == Some(source_id)))
    }

    async fn create_message(
        &self,
        conversation_id: i64,
        message: &NewMessage,
    ) -> Result<HelpdeskMessage, DeskbridgeError> {
        let url = self.url(&format!("/conversations/{conversation_id}/messages"));
        let body = CreateMessageBody {
            content: &message.content,
            message_type: direction_name(message.direction),
            source_id: &message.source_id,
            content_attributes: message.in_reply_to.map(|in_reply_to| ReplyAttributes { in_reply_to }),
        };
        let response = self
            .send(
                || self.client.post(&url).json(&body),
                "conversation",
                &conversation_id.to_string(),
            )
            .await?;
        let created: MessageResponse = Self::json(response).await?;
        Ok(created.into_message())
    }

    async fn upload_attachment(
        &self,
        conversation_id: i64,
        upload: &AttachmentUpload,
    ) -> Result<HelpdeskMessage, DeskbridgeError> {
        let url = self.url(&format!("/conversations/{conversation_id}/messages"));
        let form = || {
            let mut form = reqwest::multipart::Form::new()
                .text("message_type", direction_name(upload.direction))
                .text("source_id", upload.source_id.clone())
                .text("created_at", upload.timestamp.to_rfc3339())
                .part("attachments[]", attachment_part(upload));
            if let Some(caption) = &upload.caption {
                form = form.text("content", caption.clone());
            }
            form
        };
        let response = self
            .send(
                || self.client.post(&url).multipart(form()),
                "conversation",
                &conversation_id.to_string(),
            )
            .await?;
        let created: MessageResponse = Self::json(response).await?;
        Ok(created.into_message())
    }

    async fn delete_message(
        &self,
        conversation_id: i64,
        message_id: i64,
    ) -> Result<(), DeskbridgeError> {
        let url = self.url(&format!(
            "/conversations/{conversation_id}/messages/{message_id}"
        ));
        self.send(
            || self.client.delete(&url),
            "message",
            &message_id.to_string(),
        )
        .await?;
        Ok(())
    }
}
