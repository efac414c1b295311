//! Syncro REST API (`https://{subdomain}.syncromsp.com/api/v1`).
//!
//! Bearer API key. Lists are page-numbered and report `meta.total_pages`.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::normalize::{field, integer, items, join_parts, paginate, reference, required_text, text, timestamp};
use crate::credentials::ApiKeyCredentials;
use crate::http::{ApiClient, HttpAuth};
use crate::provider::{Capabilities, FetchBatch, ListRequest, Provider, ProviderFuture, PsaProvider};
use crate::{Company, Contact, ProviderError, ProviderType, Ticket, TicketPriority, TicketStatus};

#[derive(Debug, Clone)]
pub struct SyncroAdapter {
    api: ApiClient,
}

impl SyncroAdapter {
    pub fn new(api: ApiClient, credentials: ApiKeyCredentials) -> Self {
        Self {
            api: api.with_auth(HttpAuth::BearerToken(credentials.api_key.expose().to_owned())),
        }
    }

    async fn list_raw(
        &self,
        resource: &str,
        request: &ListRequest,
        extra: &[(&str, String)],
    ) -> Result<Vec<Value>, ProviderError> {
        paginate(request, 1_u32, |page| async move {
            let mut query = vec![("page", page.to_string())];
            query.extend(extra.iter().cloned());
            let body = self.api.get_json(resource, &query, &request.cancel).await?;
            let page_items = items(&body, resource)?;

            let total_pages = integer(&body, "meta.total_pages").unwrap_or(1);
            let next = (i64::from(page) < total_pages).then_some(page + 1);
            Ok((page_items, next))
        })
        .await
    }

    async fn get_item(&self, resource: &str, key: &str, external_id: &str) -> Result<Value, ProviderError> {
        let body = self
            .api
            .get_json(
                &format!("{resource}/{}", urlencoding::encode(external_id)),
                &[],
                &CancellationToken::new(),
            )
            .await?;
        Ok(field(&body, key).cloned().unwrap_or(body))
    }
}

impl Provider for SyncroAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Syncro
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::psa(true, true, true)
    }

    fn test_connection<'a>(&'a self) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let body = self.api.get_json("me", &[], &CancellationToken::new()).await?;
            Ok(body.is_object())
        })
    }
}

impl PsaProvider for SyncroAdapter {
    fn list_companies<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Company>> {
        Box::pin(async move {
            let raw = self.list_raw("customers", request, &[]).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_company(value)))
        })
    }

    fn list_contacts<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Contact>> {
        Box::pin(async move {
            let raw = self.list_raw("contacts", request, &[]).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_contact(value)))
        })
    }

    fn list_tickets<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Ticket>> {
        Box::pin(async move {
            let mut extra = Vec::new();
            if let Some(since) = request.updated_since {
                extra.push(("since_updated_at", since.format_seconds()));
            }
            let raw = self.list_raw("tickets", request, &extra).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_ticket(value)))
        })
    }

    fn get_company<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Company> {
        Box::pin(async move {
            self.normalize_company(&self.get_item("customers", "customer", external_id).await?)
        })
    }

    fn get_contact<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Contact> {
        Box::pin(async move {
            self.normalize_contact(&self.get_item("contacts", "contact", external_id).await?)
        })
    }

    fn get_ticket<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Ticket> {
        Box::pin(async move {
            self.normalize_ticket(&self.get_item("tickets", "ticket", external_id).await?)
        })
    }

    fn normalize_company(&self, raw: &Value) -> Result<Company, ProviderError> {
        let name = text(raw, "business_name")
            .or_else(|| text(raw, "fullname"))
            .or_else(|| join_name(text(raw, "firstname"), text(raw, "lastname")))
            .ok_or_else(|| ProviderError::normalization("customer has no business or person name"))?;
        Ok(Company {
            external_id: required_text(raw, "id", "customer")?,
            name,
            phone: text(raw, "phone").or_else(|| text(raw, "mobile")),
            website: text(raw, "website"),
            address: join_parts(&[
                text(raw, "address"),
                text(raw, "address_2"),
                text(raw, "city"),
                text(raw, "state"),
                text(raw, "zip"),
            ]),
            raw_data: raw.clone(),
        })
    }

    fn normalize_contact(&self, raw: &Value) -> Result<Contact, ProviderError> {
        let (first_name, last_name) = split_name(text(raw, "name"));
        Ok(Contact {
            external_id: required_text(raw, "id", "contact")?,
            company_id: reference(raw, "customer_id"),
            first_name,
            last_name,
            email: text(raw, "email"),
            phone: text(raw, "phone").or_else(|| text(raw, "mobile")),
            title: text(raw, "title"),
            raw_data: raw.clone(),
        })
    }

    fn normalize_ticket(&self, raw: &Value) -> Result<Ticket, ProviderError> {
        Ok(Ticket {
            external_id: required_text(raw, "id", "ticket")?,
            company_id: reference(raw, "customer_id"),
            contact_id: reference(raw, "contact_id"),
            ticket_number: text(raw, "number"),
            subject: required_text(raw, "subject", "ticket")?,
            description: text(raw, "problem_type"),
            status: text(raw, "status").map_or(TicketStatus::New, |label| TicketStatus::from_label(&label)),
            priority: text(raw, "priority")
                .map_or(TicketPriority::Medium, |label| TicketPriority::from_label(&label)),
            external_created_at: timestamp(raw, "created_at"),
            external_updated_at: timestamp(raw, "updated_at"),
            raw_data: raw.clone(),
        })
    }
}

fn join_name(first: Option<String>, last: Option<String>) -> Option<String> {
    join_parts(&[first, last]).map(|joined| joined.replace(", ", " "))
}

/// Split a single display name at its first space.
fn split_name(name: Option<String>) -> (Option<String>, Option<String>) {
    match name {
        Some(name) => match name.split_once(' ') {
            Some((first, last)) => (Some(first.to_owned()), Some(last.trim().to_owned())),
            None => (Some(name), None),
        },
        None => (None, None),
    }
}
