//! Webhook event model: normalization of vendor payloads and routing of the
//! resulting typed events.

mod normalize;
mod router;

pub use normalize::{
    NormalizedMessage, NormalizedReaction, WebhookEnvelope, WebhookEvent, normalize,
    parse_timestamp, phone_from_chat_id, strip_jid,
};
pub use router::{RouteOutcome, route_event};
