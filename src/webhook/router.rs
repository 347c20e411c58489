//! Dispatches a normalized webhook event to exactly one handler.
//!
//! The match is exhaustive over the event enum, so adding a variant without a
//! handler fails at compile time. Unknown categories are logged and reported
//! as unprocessed, never fatal.

use super::normalize::{
    NormalizedMessage, NormalizedReaction, WebhookEnvelope, WebhookEvent, phone_from_chat_id,
};
use crate::media::{MediaJob, MediaQueue};
use crate::reconcile;
use crate::resolver;
use crate::store::{
    ContactPatch, Direction, MessageStatus, NewMessage, Session, Store,
};
use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

/// Per-event processing result, echoed in the webhook response body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouteOutcome {
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_ref: Option<String>,
}

impl RouteOutcome {
    fn ok(action: &str) -> Self {
        Self {
            processed: true,
            action: Some(action.to_owned()),
            error: None,
            message_ref: None,
        }
    }

    fn ok_with_ref(action: &str, message_ref: String) -> Self {
        Self {
            processed: true,
            action: Some(action.to_owned()),
            error: None,
            message_ref: Some(message_ref),
        }
    }

    fn failed(error: &str) -> Self {
        Self {
            processed: false,
            action: None,
            error: Some(error.to_owned()),
            message_ref: None,
        }
    }
}

/// Route one normalized envelope. Store failures bubble up as errors; payload
/// problems (missing ids, unknown sessions) come back as unprocessed
/// outcomes so the caller can acknowledge the delivery anyway.
pub async fn route_event(
    store: &Store,
    media: Option<&MediaQueue>,
    envelope: &WebhookEnvelope,
) -> Result<RouteOutcome> {
    match &envelope.event {
        WebhookEvent::MessageReceived(message) => {
            handle_message_received(store, media, envelope.session_id.as_deref(), message).await
        }
        WebhookEvent::Reaction(reaction) => {
            handle_reaction(store, envelope.session_id.as_deref(), reaction).await
        }
        WebhookEvent::MessageSent { message_id } => {
            handle_message_sent(store, message_id.as_deref()).await
        }
        WebhookEvent::MessageStatus { message_id, status } => {
            handle_message_status(store, message_id.as_deref(), status.as_deref()).await
        }
        WebhookEvent::SessionStatus {
            status,
            phone_number,
        } => {
            handle_session_status(
                store,
                envelope.session_id.as_deref(),
                status.as_deref(),
                phone_number.as_deref(),
            )
            .await
        }
        WebhookEvent::SessionQr { qr_code } => {
            handle_session_qr(store, envelope.session_id.as_deref(), qr_code.as_deref()).await
        }
        WebhookEvent::ContactUpdate {
            phone_number,
            patch,
        } => {
            handle_contact_update(
                store,
                envelope.session_id.as_deref(),
                phone_number.as_deref(),
                patch,
            )
            .await
        }
        WebhookEvent::ChatUpdate {
            chat_id,
            is_archived,
        } => {
            handle_chat_update(
                store,
                envelope.session_id.as_deref(),
                chat_id.as_deref(),
                *is_archived,
            )
            .await
        }
        WebhookEvent::Unknown { event } => {
            tracing::warn!(event = event.as_str(), "unknown webhook event");
            Ok(RouteOutcome::failed("Unknown event"))
        }
    }
}

async fn resolve_session(store: &Store, session_id: Option<&str>) -> Result<Option<Session>> {
    match session_id {
        Some(session_id) => store.find_session(session_id).await,
        None => Ok(None),
    }
}

async fn handle_message_received(
    store: &Store,
    media: Option<&MediaQueue>,
    session_id: Option<&str>,
    message: &NormalizedMessage,
) -> Result<RouteOutcome> {
    let Some(session) = resolve_session(store, session_id).await? else {
        return Ok(RouteOutcome::failed("Session not found"));
    };

    let Some(chat_id) = message.chat_id.as_deref() else {
        return Ok(RouteOutcome::failed("Chat ID missing"));
    };

    let from_me = message.direction_is_outgoing(session.phone_number.as_deref());

    // Dedup: at-least-once delivery must not create a second record.
    if let Some(external_id) = message.message_id.as_deref()
        && store.message_exists(&session.id, external_id).await?
    {
        return Ok(RouteOutcome::ok("duplicate"));
    }

    let conversation = resolver::resolve_conversation(
        store,
        &session.id,
        chat_id,
        message.from_number.as_deref().filter(|_| !from_me),
        message.is_group,
    )
    .await?;

    let generated_id;
    let external_id = match message.message_id.as_deref() {
        Some(id) => id,
        None => {
            generated_id = Uuid::new_v4().simple().to_string();
            &generated_id
        }
    };

    // Inbound messages without a sender still belong to the chat's number.
    let fallback_from;
    let from_number = match message.from_number.as_deref() {
        Some(from) => Some(from),
        None if !from_me => {
            fallback_from = phone_from_chat_id(chat_id);
            Some(fallback_from.as_str())
        }
        None => None,
    };

    let (direction, status) = if from_me {
        (Direction::Outgoing, MessageStatus::Sent)
    } else {
        (Direction::Incoming, MessageStatus::Delivered)
    };

    let inserted = store
        .insert_message(NewMessage {
            session_id: &session.id,
            conversation_id: &conversation.id,
            message_id: external_id,
            content: &message.content,
            direction,
            status,
            message_type: &message.message_type,
            timestamp: message.timestamp,
            from_number,
            to_number: message.to_number.as_deref(),
            from_me,
            has_media: message.has_media,
        })
        .await;

    let stored = match inserted {
        Ok(stored) => stored,
        Err(error) => {
            // Two overlapping deliveries can both pass the probe; the UNIQUE
            // constraint is the arbiter, and losing the race is a duplicate.
            if store.message_exists(&session.id, external_id).await? {
                return Ok(RouteOutcome::ok("duplicate"));
            }
            return Err(error);
        }
    };

    store
        .touch_conversation_last_message(
            &conversation.id,
            &message.content,
            message.timestamp,
            from_me,
        )
        .await?;

    if message.has_media
        && let Some(media) = media
    {
        media.enqueue(MediaJob {
            session_id: session.session_id.clone(),
            message_row_id: stored.id.clone(),
            external_message_id: stored.message_id.clone(),
        });
    }

    Ok(RouteOutcome::ok_with_ref("created", stored.id))
}

async fn handle_reaction(
    store: &Store,
    session_id: Option<&str>,
    reaction: &NormalizedReaction,
) -> Result<RouteOutcome> {
    let Some(target_id) = reaction.original_message_id.as_deref() else {
        return Ok(RouteOutcome::failed("Reaction target missing"));
    };
    let Some(reacted_by) = reaction.reacted_by.as_deref() else {
        return Ok(RouteOutcome::failed("Reactor number missing"));
    };

    // Scope the lookup to the session when we know it; status-style events
    // without a session fall back to a global search.
    let message = match resolve_session(store, session_id).await? {
        Some(session) => store.find_session_message(&session.id, target_id).await?,
        None => store.find_message(target_id).await?,
    };

    let Some(message) = message else {
        // The reacted-to message may predate this deployment; report a
        // non-fatal miss rather than an error.
        return Ok(RouteOutcome::ok("reaction_target_missing"));
    };

    if reaction.is_removal() {
        store.remove_reaction(&message.id, reacted_by).await?;
        return Ok(RouteOutcome::ok_with_ref("reaction_removed", message.id));
    }

    store
        .upsert_reaction(&message.id, reacted_by, &reaction.emoji, reaction.reacted_at)
        .await?;
    Ok(RouteOutcome::ok_with_ref("reaction_applied", message.id))
}

async fn handle_message_sent(store: &Store, message_id: Option<&str>) -> Result<RouteOutcome> {
    let Some(message_id) = message_id else {
        return Ok(RouteOutcome::failed("Message ID not provided"));
    };

    let Some(message) = store.find_message(message_id).await? else {
        return Ok(RouteOutcome::failed("Message not found"));
    };

    store
        .update_message_status(&message.id, MessageStatus::Sent)
        .await?;
    Ok(RouteOutcome::ok("updated"))
}

async fn handle_message_status(
    store: &Store,
    message_id: Option<&str>,
    status: Option<&str>,
) -> Result<RouteOutcome> {
    let (Some(message_id), Some(status)) = (message_id, status) else {
        return Ok(RouteOutcome::failed("Invalid data"));
    };

    let Some(message) = store.find_message(message_id).await? else {
        return Ok(RouteOutcome::failed("Message not found"));
    };

    store
        .update_message_status(&message.id, MessageStatus::from_vendor(status))
        .await?;
    Ok(RouteOutcome::ok("status_updated"))
}

async fn handle_session_status(
    store: &Store,
    session_id: Option<&str>,
    status: Option<&str>,
    phone_number: Option<&str>,
) -> Result<RouteOutcome> {
    if session_id.is_none() {
        return Ok(RouteOutcome::failed("Session ID not provided"));
    }
    let Some(session) = resolve_session(store, session_id).await? else {
        return Ok(RouteOutcome::failed("Session not found"));
    };
    let Some(status) = status else {
        return Ok(RouteOutcome::failed("Invalid data"));
    };

    reconcile::apply_session_status(store, &session, status, phone_number).await?;
    Ok(RouteOutcome::ok("status_updated"))
}

async fn handle_session_qr(
    store: &Store,
    session_id: Option<&str>,
    qr_code: Option<&str>,
) -> Result<RouteOutcome> {
    let (Some(_), Some(qr_code)) = (session_id, qr_code) else {
        return Ok(RouteOutcome::failed("Invalid data"));
    };
    let Some(session) = resolve_session(store, session_id).await? else {
        return Ok(RouteOutcome::failed("Session not found"));
    };

    store.set_session_qr(&session.id, qr_code).await?;
    Ok(RouteOutcome::ok("qr_updated"))
}

async fn handle_contact_update(
    store: &Store,
    session_id: Option<&str>,
    phone_number: Option<&str>,
    patch: &ContactPatch,
) -> Result<RouteOutcome> {
    let Some(session) = resolve_session(store, session_id).await? else {
        return Ok(RouteOutcome::failed("Session not found"));
    };
    let Some(phone_number) = phone_number else {
        return Ok(RouteOutcome::failed("Invalid data"));
    };

    match store.find_contact(&session.id, phone_number).await? {
        Some(contact) => {
            store.update_contact(&contact.id, patch).await?;
            Ok(RouteOutcome::ok("updated"))
        }
        // Updates for unseen contacts are acknowledged without creating one.
        None => Ok(RouteOutcome::ok("contact_not_found")),
    }
}

async fn handle_chat_update(
    store: &Store,
    session_id: Option<&str>,
    chat_id: Option<&str>,
    is_archived: bool,
) -> Result<RouteOutcome> {
    let Some(session) = resolve_session(store, session_id).await? else {
        return Ok(RouteOutcome::failed("Session not found"));
    };
    let Some(chat_id) = chat_id else {
        return Ok(RouteOutcome::failed("Invalid data"));
    };

    match store.find_conversation(&session.id, chat_id).await? {
        Some(conversation) => {
            store
                .set_conversation_archived(&conversation.id, is_archived)
                .await?;
            Ok(RouteOutcome::ok("updated"))
        }
        None => Ok(RouteOutcome::ok("conversation_not_found")),
    }
}
