//! HaloPSA API.
//!
//! OAuth2 client credentials against `{base}/auth/token` (hosted tenants pass
//! `?tenant=`), resources under `{base}/api`. Lists use
//! `pageinate=true&page_size&page_no` and report `record_count`.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::normalize::{integer, items, join_parts, paginate, reference, required_text, text, timestamp};
use crate::credentials::OAuthClientCredentials;
use crate::http::{ApiClient, OAuthGrant, OAuthTokenSource};
use crate::provider::{Capabilities, FetchBatch, ListRequest, Provider, ProviderFuture, PsaProvider};
use crate::{Company, Contact, ProviderError, ProviderType, Ticket, TicketPriority, TicketStatus};

const DEFAULT_SCOPE: &str = "all";

#[derive(Debug, Clone)]
pub struct HaloAdapter {
    api: ApiClient,
}

impl HaloAdapter {
    pub fn new(api: ApiClient, credentials: OAuthClientCredentials) -> Result<Self, ProviderError> {
        let mut token_url = api.url("auth/token", &[])?;
        if let Some(tenant) = &credentials.tenant {
            token_url.query_pairs_mut().append_pair("tenant", tenant);
        }
        let tokens = token_source(token_url, &api, credentials);
        Ok(Self {
            api: api.with_oauth(Arc::new(tokens)),
        })
    }

    async fn list_raw(
        &self,
        resource: &str,
        key: &str,
        request: &ListRequest,
        extra: &[(&str, String)],
    ) -> Result<Vec<Value>, ProviderError> {
        let page_size = request.page_size;
        let path = format!("api/{resource}");
        let path = path.as_str();

        paginate(request, 1_u32, |page| async move {
            let mut query = vec![
                ("pageinate", String::from("true")),
                ("page_size", page_size.to_string()),
                ("page_no", page.to_string()),
            ];
            query.extend(extra.iter().cloned());
            let body = self.api.get_json(path, &query, &request.cancel).await?;
            let page_items = items(&body, key)?;

            let total = integer(&body, "record_count").and_then(|count| usize::try_from(count).ok());
            let fetched = page as usize * page_size;
            let next = match total {
                Some(total) => (fetched < total).then_some(page + 1),
                None => (page_items.len() >= page_size).then_some(page + 1),
            };
            Ok((page_items, next))
        })
        .await
    }

    async fn get_raw(&self, resource: &str, external_id: &str) -> Result<Value, ProviderError> {
        self.api
            .get_json(
                &format!("api/{resource}/{}", urlencoding::encode(external_id)),
                &[],
                &CancellationToken::new(),
            )
            .await
    }
}

fn token_source(token_url: Url, api: &ApiClient, credentials: OAuthClientCredentials) -> OAuthTokenSource {
    OAuthTokenSource::new(
        token_url,
        OAuthGrant::ClientCredentials,
        credentials.client_id,
        credentials.client_secret,
        api.transport(),
    )
    .with_scope(credentials.scope.unwrap_or_else(|| String::from(DEFAULT_SCOPE)))
    .with_timeout_ms(api.timeout_ms())
}

impl Provider for HaloAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Halopsa
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::psa(true, true, true)
    }

    fn test_connection<'a>(&'a self) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let body = self
                .api
                .get_json("api/Client", &[("count", String::from("1"))], &CancellationToken::new())
                .await?;
            Ok(!body.is_null())
        })
    }
}

impl PsaProvider for HaloAdapter {
    fn list_companies<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Company>> {
        Box::pin(async move {
            let raw = self.list_raw("Client", "clients", request, &[]).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_company(value)))
        })
    }

    fn list_contacts<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Contact>> {
        Box::pin(async move {
            let raw = self.list_raw("Users", "users", request, &[]).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_contact(value)))
        })
    }

    fn list_tickets<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Ticket>> {
        Box::pin(async move {
            let mut extra = Vec::new();
            if let Some(since) = request.updated_since {
                extra.push(("lastupdatefromdate", since.format_seconds()));
            }
            let raw = self.list_raw("Tickets", "tickets", request, &extra).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_ticket(value)))
        })
    }

    fn get_company<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Company> {
        Box::pin(async move { self.normalize_company(&self.get_raw("Client", external_id).await?) })
    }

    fn get_contact<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Contact> {
        Box::pin(async move { self.normalize_contact(&self.get_raw("Users", external_id).await?) })
    }

    fn get_ticket<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Ticket> {
        Box::pin(async move { self.normalize_ticket(&self.get_raw("Tickets", external_id).await?) })
    }

    fn normalize_company(&self, raw: &Value) -> Result<Company, ProviderError> {
        Ok(Company {
            external_id: required_text(raw, "id", "client")?,
            name: required_text(raw, "name", "client")?,
            phone: text(raw, "main_phone").or_else(|| text(raw, "phonenumber")),
            website: text(raw, "website"),
            address: join_parts(&[
                text(raw, "address.line1"),
                text(raw, "address.line2"),
                text(raw, "address.line3"),
                text(raw, "address.postcode"),
            ]),
            raw_data: raw.clone(),
        })
    }

    fn normalize_contact(&self, raw: &Value) -> Result<Contact, ProviderError> {
        Ok(Contact {
            external_id: required_text(raw, "id", "user")?,
            company_id: reference(raw, "client_id"),
            first_name: text(raw, "firstname"),
            last_name: text(raw, "surname"),
            email: text(raw, "emailaddress"),
            phone: text(raw, "phonenumber").or_else(|| text(raw, "mobilenumber")),
            title: text(raw, "jobtitle"),
            raw_data: raw.clone(),
        })
    }

    fn normalize_ticket(&self, raw: &Value) -> Result<Ticket, ProviderError> {
        let status = match text(raw, "status_name") {
            Some(label) => TicketStatus::from_label(&label),
            None => integer(raw, "status_id").map_or(TicketStatus::New, ticket_status),
        };
        Ok(Ticket {
            external_id: required_text(raw, "id", "ticket")?,
            company_id: reference(raw, "client_id"),
            contact_id: reference(raw, "user_id"),
            ticket_number: text(raw, "id"),
            subject: required_text(raw, "summary", "ticket")?,
            description: text(raw, "details"),
            status,
            priority: integer(raw, "priority_id").map_or(TicketPriority::Medium, ticket_priority),
            external_created_at: timestamp(raw, "dateoccurred"),
            external_updated_at: timestamp(raw, "lastactiondate").or_else(|| timestamp(raw, "last_update")),
            raw_data: raw.clone(),
        })
    }
}

/// Default Halo status ids.
fn ticket_status(value: i64) -> TicketStatus {
    match value {
        2 => TicketStatus::InProgress,
        3..=5 => TicketStatus::Waiting,
        8 => TicketStatus::Resolved,
        9 => TicketStatus::Closed,
        _ => TicketStatus::New,
    }
}

fn ticket_priority(value: i64) -> TicketPriority {
    match value {
        1 => TicketPriority::Urgent,
        2 => TicketPriority::High,
        4 => TicketPriority::Low,
        _ => TicketPriority::Medium,
    }
}
