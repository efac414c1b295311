//! Freshservice API v2 (`https://{domain}.freshservice.com/api/v2`).
//!
//! Basic auth with the API key as username and `X` as password. Departments
//! stand in for companies and requesters for contacts. A page shorter than
//! `per_page` ends the listing.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::normalize::{field, integer, items, next_page_if_full, paginate, reference, required_text, text, timestamp};
use crate::credentials::ApiKeyCredentials;
use crate::http::{ApiClient, HttpAuth};
use crate::provider::{Capabilities, FetchBatch, ListRequest, Provider, ProviderFuture, PsaProvider};
use crate::{Company, Contact, ProviderError, ProviderType, Ticket, TicketPriority, TicketStatus};

/// Freshservice rejects `per_page` above 100.
const MAX_PER_PAGE: usize = 100;

#[derive(Debug, Clone)]
pub struct FreshserviceAdapter {
    api: ApiClient,
}

impl FreshserviceAdapter {
    pub fn new(api: ApiClient, credentials: ApiKeyCredentials) -> Self {
        let auth = HttpAuth::Basic {
            username: credentials.api_key.expose().to_owned(),
            password: String::from("X"),
        };
        Self {
            api: api.with_auth(auth),
        }
    }

    async fn list_raw(
        &self,
        resource: &str,
        request: &ListRequest,
        extra: &[(&str, String)],
    ) -> Result<Vec<Value>, ProviderError> {
        let per_page = request.page_size.min(MAX_PER_PAGE);

        paginate(request, 1_u32, |page| async move {
            let mut query = vec![("page", page.to_string()), ("per_page", per_page.to_string())];
            query.extend(extra.iter().cloned());
            let body = self.api.get_json(resource, &query, &request.cancel).await?;
            let page_items = items(&body, resource)?;
            let next = next_page_if_full(page, page_items.len(), per_page);
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
        field(&body, key)
            .cloned()
            .ok_or_else(|| ProviderError::malformed_response(format!("{resource} response has no '{key}'")))
    }
}

impl Provider for FreshserviceAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Freshservice
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::psa(true, true, true)
    }

    fn test_connection<'a>(&'a self) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let body = self
                .api
                .get_json("agents", &[("per_page", String::from("1"))], &CancellationToken::new())
                .await?;
            Ok(body.get("agents").is_some())
        })
    }
}

impl PsaProvider for FreshserviceAdapter {
    fn list_companies<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Company>> {
        Box::pin(async move {
            let raw = self.list_raw("departments", request, &[]).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_company(value)))
        })
    }

    fn list_contacts<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Contact>> {
        Box::pin(async move {
            let raw = self.list_raw("requesters", request, &[]).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_contact(value)))
        })
    }

    fn list_tickets<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Ticket>> {
        Box::pin(async move {
            let mut extra = Vec::new();
            if let Some(since) = request.updated_since {
                extra.push(("updated_since", since.format_seconds()));
            }
            let raw = self.list_raw("tickets", request, &extra).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_ticket(value)))
        })
    }

    fn get_company<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Company> {
        Box::pin(async move {
            self.normalize_company(&self.get_item("departments", "department", external_id).await?)
        })
    }

    fn get_contact<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Contact> {
        Box::pin(async move {
            self.normalize_contact(&self.get_item("requesters", "requester", external_id).await?)
        })
    }

    fn get_ticket<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Ticket> {
        Box::pin(async move {
            self.normalize_ticket(&self.get_item("tickets", "ticket", external_id).await?)
        })
    }

    fn normalize_company(&self, raw: &Value) -> Result<Company, ProviderError> {
        Ok(Company {
            external_id: required_text(raw, "id", "department")?,
            name: required_text(raw, "name", "department")?,
            phone: None,
            website: text(raw, "domains.0"),
            address: None,
            raw_data: raw.clone(),
        })
    }

    fn normalize_contact(&self, raw: &Value) -> Result<Contact, ProviderError> {
        Ok(Contact {
            external_id: required_text(raw, "id", "requester")?,
            company_id: reference(raw, "department_ids.0"),
            first_name: text(raw, "first_name"),
            last_name: text(raw, "last_name"),
            email: text(raw, "primary_email"),
            phone: text(raw, "work_phone_number").or_else(|| text(raw, "mobile_phone_number")),
            title: text(raw, "job_title"),
            raw_data: raw.clone(),
        })
    }

    fn normalize_ticket(&self, raw: &Value) -> Result<Ticket, ProviderError> {
        Ok(Ticket {
            external_id: required_text(raw, "id", "ticket")?,
            company_id: reference(raw, "department_id"),
            contact_id: reference(raw, "requester_id"),
            ticket_number: text(raw, "id").map(|id| format!("#SR-{id}")),
            subject: required_text(raw, "subject", "ticket")?,
            description: text(raw, "description_text").or_else(|| text(raw, "description")),
            status: integer(raw, "status").map_or(TicketStatus::New, ticket_status),
            priority: integer(raw, "priority").map_or(TicketPriority::Medium, ticket_priority),
            external_created_at: timestamp(raw, "created_at"),
            external_updated_at: timestamp(raw, "updated_at"),
            raw_data: raw.clone(),
        })
    }
}

fn ticket_status(value: i64) -> TicketStatus {
    match value {
        3 => TicketStatus::Waiting,
        4 => TicketStatus::Resolved,
        5 => TicketStatus::Closed,
        _ => TicketStatus::New,
    }
}

fn ticket_priority(value: i64) -> TicketPriority {
    match value {
        1 => TicketPriority::Low,
        3 => TicketPriority::High,
        4 => TicketPriority::Urgent,
        _ => TicketPriority::Medium,
    }
}
