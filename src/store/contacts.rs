use super::types::{Contact, ContactPatch};
use super::{Store, opt_ts_from_column, ts_from_column, ts_to_column};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

const CONTACT_COLUMNS: &str = "id, session_id, contact_id, phone_number, contact_name, pushname, \
     verified_name, profile_pic_url, is_user, is_group, is_wa_contact, lead_ref, customer_ref, \
     last_sync, created_at";

fn map_contact_row(row: &SqliteRow) -> Result<Contact> {
    let last_sync: Option<String> = row.try_get("last_sync")?;

    Ok(Contact {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        contact_id: row.try_get("contact_id")?,
        phone_number: row.try_get("phone_number")?,
        contact_name: row.try_get("contact_name")?,
        pushname: row.try_get("pushname")?,
        verified_name: row.try_get("verified_name")?,
        profile_pic_url: row.try_get("profile_pic_url")?,
        is_user: row.try_get::<i64, _>("is_user")? != 0,
        is_group: row.try_get::<i64, _>("is_group")? != 0,
        is_wa_contact: row.try_get::<i64, _>("is_wa_contact")? != 0,
        lead_ref: row.try_get("lead_ref")?,
        customer_ref: row.try_get("customer_ref")?,
        last_sync: opt_ts_from_column(last_sync)?,
        created_at: ts_from_column(&row.try_get::<String, _>("created_at")?)?,
    })
}

impl Store {
    pub async fn find_contact(
        &self,
        session_id: &str,
        phone_number: &str,
    ) -> Result<Option<Contact>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE session_id = $1 AND phone_number = $2"
        ))
        .bind(session_id)
        .bind(phone_number)
        .fetch_optional(&self.pool)
        .await
        .context("query contact by phone number")?;

        row.map(|r| map_contact_row(&r)).transpose()
    }

    pub async fn create_contact(
        &self,
        session_id: &str,
        phone_number: &str,
        patch: &ContactPatch,
    ) -> Result<Contact> {
        let id = Uuid::new_v4().to_string();
        let now = ts_to_column(Utc::now());

        sqlx::query(
            "INSERT INTO contacts
                 (id, session_id, contact_id, phone_number, contact_name, pushname,
                  verified_name, profile_pic_url, is_user, is_group, is_wa_contact,
                  last_sync, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)",
        )
        .bind(&id)
        .bind(session_id)
        .bind(patch.contact_id.as_deref())
        .bind(phone_number)
        .bind(patch.contact_name.as_deref())
        .bind(patch.pushname.as_deref())
        .bind(patch.verified_name.as_deref())
        .bind(patch.profile_pic_url.as_deref())
        .bind(i64::from(patch.is_user.unwrap_or(false)))
        .bind(i64::from(patch.is_group.unwrap_or(false)))
        .bind(i64::from(patch.is_wa_contact.unwrap_or(true)))
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("insert contact")?;

        self.get_contact(&id)
            .await?
            .context("contact vanished after insert")
    }

    pub async fn get_contact(&self, id: &str) -> Result<Option<Contact>> {
        let row = sqlx::query(&format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("query contact by id")?;

        row.map(|r| map_contact_row(&r)).transpose()
    }

    /// Apply a partial update: present fields win, absent fields keep their
    /// stored value (the vendor sends sparse contact payloads).
    pub async fn update_contact(&self, id: &str, patch: &ContactPatch) -> Result<()> {
        sqlx::query(
            "UPDATE contacts SET
                 contact_id = COALESCE($1, contact_id),
                 contact_name = COALESCE($2, contact_name),
                 pushname = COALESCE($3, pushname),
                 verified_name = COALESCE($4, verified_name),
                 profile_pic_url = COALESCE($5, profile_pic_url),
                 is_user = COALESCE($6, is_user),
                 is_group = COALESCE($7, is_group),
                 is_wa_contact = COALESCE($8, is_wa_contact),
                 last_sync = $9
             WHERE id = $10",
        )
        .bind(patch.contact_id.as_deref())
        .bind(patch.contact_name.as_deref())
        .bind(patch.pushname.as_deref())
        .bind(patch.verified_name.as_deref())
        .bind(patch.profile_pic_url.as_deref())
        .bind(patch.is_user.map(i64::from))
        .bind(patch.is_group.map(i64::from))
        .bind(patch.is_wa_contact.map(i64::from))
        .bind(ts_to_column(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .context("update contact")?;
        Ok(())
    }

    pub async fn set_contact_crm_links(
        &self,
        id: &str,
        lead_ref: Option<&str>,
        customer_ref: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE contacts SET
                 lead_ref = COALESCE($1, lead_ref),
                 customer_ref = COALESCE($2, customer_ref)
             WHERE id = $3",
        )
        .bind(lead_ref)
        .bind(customer_ref)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("update contact crm links")?;
        Ok(())
    }

    // ── CRM registry ────────────────────────────────────────────

    /// Register a CRM lead/customer the resolver can link against.
    pub async fn register_crm_entity(
        &self,
        reference: &str,
        kind: &str,
        phone_number: &str,
        display_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO crm_entities (ref, kind, phone_number, display_name)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT(ref) DO UPDATE SET
                 kind = excluded.kind,
                 phone_number = excluded.phone_number,
                 display_name = excluded.display_name",
        )
        .bind(reference)
        .bind(kind)
        .bind(phone_number)
        .bind(display_name)
        .execute(&self.pool)
        .await
        .context("register crm entity")?;
        Ok(())
    }

    /// Exact phone match only, no fuzzy matching. When several entities share
    /// a number the pick is arbitrary (first row the query returns).
    pub async fn find_crm_entity(&self, kind: &str, phone_number: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT ref FROM crm_entities WHERE kind = $1 AND phone_number = $2 LIMIT 1",
        )
        .bind(kind)
        .bind(phone_number)
        .fetch_optional(&self.pool)
        .await
        .context("query crm entity by phone")?;
        Ok(row.map(|(reference,)| reference))
    }
}
