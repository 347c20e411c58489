//! Find-or-create resolution of conversations and contacts, plus CRM
//! auto-linking by exact phone-number match.

use crate::store::{Contact, ContactPatch, Conversation, NewConversation, Store};
use crate::webhook::phone_from_chat_id;
use anyhow::Result;

/// Look up the conversation for `(session, chat_id)`, creating it lazily on
/// first sight with the best available display name and the phone number
/// embedded in the chat identifier.
pub async fn resolve_conversation(
    store: &Store,
    session_id: &str,
    chat_id: &str,
    display_name: Option<&str>,
    is_group: bool,
) -> Result<Conversation> {
    if let Some(existing) = store.find_conversation(session_id, chat_id).await? {
        return Ok(existing);
    }

    let phone_number = phone_from_chat_id(chat_id);
    let contact = store.find_contact(session_id, &phone_number).await?;
    let contact_name = display_name
        .map(ToOwned::to_owned)
        .or_else(|| contact.as_ref().and_then(|c| c.contact_name.clone()))
        .unwrap_or_else(|| phone_number.clone());

    store
        .create_conversation(NewConversation {
            session_id,
            chat_id,
            contact_name: Some(&contact_name),
            phone_number: &phone_number,
            contact_id: contact.as_ref().map(|c| c.id.as_str()),
            is_group,
        })
        .await
}

/// Look up the contact for `(session, phone_number)`, creating or patching it,
/// then auto-link CRM lead/customer records by exact phone match.
///
/// Linking is exact-match only, no fuzzy matching. When several CRM records
/// share a number the first row wins; the lookup does not impose an ordering,
/// so the selection is arbitrary.
pub async fn resolve_contact(
    store: &Store,
    session_id: &str,
    phone_number: &str,
    patch: &ContactPatch,
) -> Result<(Contact, bool)> {
    let (contact, created) = match store.find_contact(session_id, phone_number).await? {
        Some(existing) => {
            store.update_contact(&existing.id, patch).await?;
            let refreshed = store
                .get_contact(&existing.id)
                .await?
                .unwrap_or(existing);
            (refreshed, false)
        }
        None => (
            store.create_contact(session_id, phone_number, patch).await?,
            true,
        ),
    };

    let contact = link_crm(store, contact).await?;
    Ok((contact, created))
}

async fn link_crm(store: &Store, contact: Contact) -> Result<Contact> {
    let lead_ref = match contact.lead_ref {
        Some(_) => None,
        None => store.find_crm_entity("lead", &contact.phone_number).await?,
    };
    let customer_ref = match contact.customer_ref {
        Some(_) => None,
        None => {
            store
                .find_crm_entity("customer", &contact.phone_number)
                .await?
        }
    };

    if lead_ref.is_none() && customer_ref.is_none() {
        return Ok(contact);
    }

    store
        .set_contact_crm_links(&contact.id, lead_ref.as_deref(), customer_ref.as_deref())
        .await?;
    Ok(store
        .get_contact(&contact.id)
        .await?
        .unwrap_or(contact))
}
