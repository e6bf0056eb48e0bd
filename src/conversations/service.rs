use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::classify::{classify, RenderKind};
use super::compose::{
    resolve_channel, resolve_route, validate_body, ComposeError, DeliveryRoute, NumberSelection,
    RouteRequest,
};
use super::store::{ConversationStore, HydrationCache};
use super::thread::{ApplyOutcome, MessageThread, OutboundDraft, PageKind, ThreadError};
use super::types::{
    CallDetail, Direction, EmailDetail, Message, MessageId, MessageMeta, MessageStatus,
    MessageType, SendMessageRequest,
};
use crate::channels::twilio_sms::{IncomingWebhook, SmsTransport, StatusCallback, TwilioError};
use crate::core::config::{normalize_phone, ConversationsConfig, OwnedNumber};
use crate::crm::{CrmBackend, CrmError};

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error(transparent)]
    Crm(#[from] CrmError),
    #[error(transparent)]
    Transport(#[from] TwilioError),
    #[error(transparent)]
    Thread(#[from] ThreadError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error("Send failed: {reason}")]
    SendFailed { client_id: Uuid, reason: String },
    #[error("Request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub render: RenderKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadView {
    pub messages: Vec<RenderedMessage>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

impl From<&MessageThread> for ThreadView {
    fn from(thread: &MessageThread) -> Self {
        Self {
            messages: thread
                .messages()
                .iter()
                .map(|message| RenderedMessage {
                    render: classify(message),
                    message: message.clone(),
                })
                .collect(),
            has_more: thread.has_more(),
            next_cursor: thread.next_cursor().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub client_id: Uuid,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum InboundOutcome {
    #[serde(rename_all = "camelCase")]
    Routed {
        business_id: String,
        conversation_id: String,
        message_id: String,
    },
    Unrouted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberView {
    pub phone_number: String,
    pub friendly_name: Option<String>,
    pub sms_capable: Option<bool>,
    pub selected: bool,
}

/// Message history, sending and delivery tracking for every conversation.
///
/// Network calls race the shutdown token; when it fires the call is dropped
/// and [`ConversationError::Cancelled`] is returned.
pub struct ConversationService {
    crm: Arc<dyn CrmBackend>,
    transport: Arc<dyn SmsTransport>,
    store: ConversationStore,
    hydration: HydrationCache,
    numbers: NumberSelection,
    owned_numbers: Vec<OwnedNumber>,
    settings: ConversationsConfig,
    shutdown: CancellationToken,
}

impl ConversationService {
    pub fn new(
        crm: Arc<dyn CrmBackend>,
        transport: Arc<dyn SmsTransport>,
        owned_numbers: Vec<OwnedNumber>,
        settings: ConversationsConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            crm,
            transport,
            store: ConversationStore::new(settings.max_threads, settings.thread_idle()),
            hydration: HydrationCache::new(
                settings.detail_cache_capacity,
                settings.detail_cache_ttl(),
            ),
            numbers: NumberSelection::new(),
            owned_numbers,
            settings,
            shutdown,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    async fn guarded<T, E>(
        &self,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, ConversationError>
    where
        ConversationError: From<E>,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ConversationError::Cancelled),
            result = call => result.map_err(ConversationError::from),
        }
    }

    fn numbers_of(&self, business_id: &str) -> Vec<String> {
        self.owned_numbers
            .iter()
            .filter(|n| n.business_id == business_id)
            .map(|n| n.phone_number.clone())
            .collect()
    }

    fn business_owning(&self, phone_number: &str) -> Option<&str> {
        let wanted = normalize_phone(phone_number);
        self.owned_numbers
            .iter()
            .find(|n| normalize_phone(&n.phone_number) == wanted)
            .map(|n| n.business_id.as_str())
    }

    /// Returns the thread after loading what the caller asked for: an older
    /// page when `cursor` is set, the newest page on first open or refresh,
    /// and the cached thread otherwise.
    pub async fn load_page(
        &self,
        business_id: &str,
        conversation_id: &str,
        cursor: Option<&str>,
        refresh: bool,
    ) -> Result<ThreadView, ConversationError> {
        let loaded = self
            .store
            .snapshot(business_id, conversation_id)
            .await
            .is_some_and(|t| t.is_loaded());

        if !loaded {
            // Confirms the conversation belongs to this business.
            self.guarded(self.crm.get_conversation(business_id, conversation_id))
                .await?;
        } else if cursor.is_none() && !refresh {
            return self.view(business_id, conversation_id).await;
        }

        let kind = if cursor.is_some() {
            PageKind::Older
        } else {
            PageKind::Latest
        };
        let ticket = self
            .store
            .update(business_id, conversation_id, |t| t.begin_request(kind))
            .await;

        let result = self
            .guarded(self.crm.list_messages(
                business_id,
                conversation_id,
                cursor,
                self.settings.page_size,
            ))
            .await;

        match result {
            Ok(page) => {
                let outcome = self
                    .store
                    .update(business_id, conversation_id, |t| t.apply_page(ticket, page))
                    .await;
                if outcome == ApplyOutcome::Stale {
                    debug!("Dropped stale {kind:?} page for conversation {conversation_id}");
                }
            }
            Err(err) => {
                let reason = err.to_string();
                self.store
                    .update(business_id, conversation_id, |t| t.fail_request(ticket, reason))
                    .await;
                return Err(err);
            }
        }

        self.view(business_id, conversation_id).await
    }

    /// Refetches the newest page and merges it into the loaded thread.
    pub async fn refresh(
        &self,
        business_id: &str,
        conversation_id: &str,
    ) -> Result<ThreadView, ConversationError> {
        self.load_page(business_id, conversation_id, None, true).await
    }

    pub async fn view(
        &self,
        business_id: &str,
        conversation_id: &str,
    ) -> Result<ThreadView, ConversationError> {
        Ok(self
            .store
            .snapshot(business_id, conversation_id)
            .await
            .map(|thread| ThreadView::from(&thread))
            .unwrap_or_else(|| ThreadView::from(&MessageThread::new())))
    }

    pub async fn send(
        &self,
        business_id: &str,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<SendOutcome, ConversationError> {
        let body = validate_body(request.message.as_deref())?;
        let conversation = self
            .guarded(self.crm.get_conversation(business_id, conversation_id))
            .await?;

        let channel = resolve_channel(&conversation, self.settings.channel_preference)?;
        let owned = self.numbers_of(business_id);
        let selected = self.numbers.selected(business_id).await;
        let route = resolve_route(
            channel,
            &conversation,
            &owned,
            RouteRequest {
                requested_from: request.from_number.as_deref(),
                requested_to: request.to_number.as_deref(),
                selected_from: selected.as_deref(),
            },
        )?;

        let draft = OutboundDraft { body, route };
        let client_id = self
            .store
            .update(business_id, conversation_id, |t| {
                t.push_pending(conversation_id, draft.clone(), Utc::now())
            })
            .await;

        self.deliver(business_id, conversation_id, client_id, draft).await
    }

    /// Re-sends a failed optimistic message. The thread keeps one entry for
    /// it throughout.
    pub async fn retry(
        &self,
        business_id: &str,
        conversation_id: &str,
        client_id: Uuid,
    ) -> Result<SendOutcome, ConversationError> {
        let draft = self
            .store
            .update(business_id, conversation_id, |t| t.begin_retry(client_id))
            .await?;
        info!("Retrying message {client_id} in conversation {conversation_id}");
        self.deliver(business_id, conversation_id, client_id, draft).await
    }

    async fn transmit(
        &self,
        business_id: &str,
        conversation_id: &str,
        draft: &OutboundDraft,
    ) -> Result<(String, MessageStatus), ConversationError> {
        match &draft.route {
            DeliveryRoute::Sms { from, to } => {
                let sent = self
                    .guarded(self.transport.send_sms(from, to, &draft.body))
                    .await?;

                let recorded = Message {
                    id: MessageId::Confirmed(sent.sid.clone()),
                    conversation_id: conversation_id.to_string(),
                    direction: Direction::Outbound,
                    message_type: MessageType::Sms,
                    body: Some(draft.body.clone()),
                    status: sent.status.clone(),
                    date_added: Utc::now(),
                    meta: MessageMeta::default(),
                    attachments: Vec::new(),
                    error: None,
                };
                // The SMS is already out; a failed history write must not
                // turn it into a failed send.
                if let Err(err) = self
                    .guarded(self.crm.record_message(business_id, &recorded))
                    .await
                {
                    warn!("Sent {} but could not record it in the CRM: {}", sent.sid, err);
                }
                Ok((sent.sid, sent.status))
            }
            DeliveryRoute::Email { to } => {
                let id = self
                    .guarded(self.crm.send_email(business_id, conversation_id, to, &draft.body))
                    .await?;
                Ok((id, MessageStatus::Sent))
            }
        }
    }

    async fn deliver(
        &self,
        business_id: &str,
        conversation_id: &str,
        client_id: Uuid,
        draft: OutboundDraft,
    ) -> Result<SendOutcome, ConversationError> {
        match self.transmit(business_id, conversation_id, &draft).await {
            Ok((server_id, status)) => {
                let message = self
                    .store
                    .update(business_id, conversation_id, |t| {
                        t.confirm(client_id, &server_id, status)?;
                        t.find(&MessageId::Confirmed(server_id.clone()))
                            .cloned()
                            .ok_or_else(|| ThreadError::UnknownMessage(server_id.clone()))
                    })
                    .await?;
                info!("Message {client_id} confirmed as {server_id}");
                Ok(SendOutcome { client_id, message })
            }
            Err(err) => {
                let reason = err.to_string();
                warn!("Message {client_id} in conversation {conversation_id} failed: {reason}");
                self.store
                    .update(business_id, conversation_id, |t| t.fail(client_id, reason.clone()))
                    .await?;
                Err(ConversationError::SendFailed { client_id, reason })
            }
        }
    }

    /// Persists an inbound SMS under the business that owns the destination
    /// number and appends it to the thread if that thread is open.
    pub async fn record_inbound(
        &self,
        webhook: IncomingWebhook,
    ) -> Result<InboundOutcome, ConversationError> {
        let Some(business_id) = self.business_owning(&webhook.to).map(str::to_string) else {
            warn!("Inbound SMS {} to unowned number {}", webhook.message_sid, webhook.to);
            return Ok(InboundOutcome::Unrouted);
        };

        let conversation = self
            .guarded(self.crm.find_or_create_conversation(&business_id, &webhook.from))
            .await?;

        let message = Message {
            id: MessageId::Confirmed(webhook.message_sid.clone()),
            conversation_id: conversation.id.clone(),
            direction: Direction::Inbound,
            message_type: MessageType::Sms,
            body: Some(webhook.body),
            status: MessageStatus::Delivered,
            date_added: Utc::now(),
            meta: MessageMeta::default(),
            attachments: webhook.media_urls,
            error: None,
        };
        self.guarded(self.crm.record_message(&business_id, &message))
            .await?;

        let appended = self
            .store
            .update_loaded(&business_id, &conversation.id, |t| t.append(message))
            .await
            .is_some();
        debug!(
            "Inbound SMS {} stored in conversation {} (open thread: {})",
            webhook.message_sid, conversation.id, appended
        );

        Ok(InboundOutcome::Routed {
            business_id,
            conversation_id: conversation.id,
            message_id: webhook.message_sid,
        })
    }

    /// Applies a delivery report. Returns false when the sending number is
    /// not one of ours.
    pub async fn apply_status(&self, callback: &StatusCallback) -> Result<bool, ConversationError> {
        let Some(business_id) = callback
            .from
            .as_deref()
            .and_then(|from| self.business_owning(from))
            .map(str::to_string)
        else {
            warn!(
                "Status {} for {} from an unowned number",
                callback.message_status, callback.message_sid
            );
            return Ok(false);
        };

        let error = callback.error_text();
        match self
            .guarded(self.crm.update_message_status(
                &business_id,
                &callback.message_sid,
                &callback.message_status,
                error.as_deref(),
            ))
            .await
        {
            Ok(()) => {}
            Err(ConversationError::Crm(CrmError::NotFound(_))) => {
                warn!("Status for unknown message {}", callback.message_sid);
            }
            Err(err) => return Err(err),
        }

        self.store
            .apply_status(
                &business_id,
                &callback.message_sid,
                &callback.message_status,
                error.as_deref(),
            )
            .await;
        Ok(true)
    }

    pub async fn email_detail(
        &self,
        business_id: &str,
        message_id: &str,
    ) -> Result<EmailDetail, ConversationError> {
        let detail = self
            .hydration
            .email(business_id, message_id, || async {
                self.guarded(self.crm.get_email_detail(business_id, message_id))
                    .await
                    .map_err(|err| match err {
                        ConversationError::Crm(crm) => crm,
                        other => CrmError::Network(other.to_string()),
                    })
            })
            .await?;
        Ok(detail)
    }

    pub async fn call_detail(
        &self,
        business_id: &str,
        call_id: &str,
    ) -> Result<CallDetail, ConversationError> {
        let detail = self
            .hydration
            .call(business_id, call_id, || async {
                self.guarded(self.crm.get_call_detail(business_id, call_id))
                    .await
                    .map_err(|err| match err {
                        ConversationError::Crm(crm) => crm,
                        other => CrmError::Network(other.to_string()),
                    })
            })
            .await?;
        Ok(detail)
    }

    /// Numbers the business can send from, annotated with provider
    /// capabilities when the provider can be reached.
    pub async fn list_numbers(&self, business_id: &str) -> Vec<NumberView> {
        let selected = self.numbers.selected(business_id).await;
        let provider = match self.guarded(self.transport.get_phone_numbers()).await {
            Ok(numbers) => numbers,
            Err(err) => {
                warn!("Could not list provider numbers: {err}");
                Vec::new()
            }
        };

        let owned: Vec<&OwnedNumber> = self
            .owned_numbers
            .iter()
            .filter(|n| n.business_id == business_id)
            .collect();
        let first = owned.first().map(|n| n.phone_number.clone());
        let active = selected.or(first);

        owned
            .into_iter()
            .map(|number| {
                let wanted = normalize_phone(&number.phone_number);
                let remote = provider
                    .iter()
                    .find(|p| normalize_phone(&p.phone_number) == wanted);
                NumberView {
                    phone_number: number.phone_number.clone(),
                    friendly_name: number
                        .friendly_name
                        .clone()
                        .or_else(|| remote.map(|r| r.friendly_name.clone())),
                    sms_capable: remote.map(|r| r.capabilities.sms),
                    selected: active.as_deref() == Some(number.phone_number.as_str()),
                }
            })
            .collect()
    }

    pub async fn select_number(
        &self,
        business_id: &str,
        number: &str,
    ) -> Result<String, ConversationError> {
        let owned = self.numbers_of(business_id);
        let chosen = self.numbers.select(business_id, number, &owned).await?;
        info!("Business {business_id} now sends from {chosen}");
        Ok(chosen)
    }
}
