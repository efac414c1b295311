//! Autotask PSA REST API (`/atservicesrest/v1.0`).
//!
//! Authenticates with the `ApiIntegrationCode`, `UserName` and `Secret`
//! headers. Queries go through `GET /{Entity}/query?search=...`; pages chain
//! through `pageDetails.nextPageUrl`.

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::normalize::{field, integer, items, join_parts, paginate, reference, required_text, text, timestamp};
use crate::credentials::AutotaskCredentials;
use crate::http::ApiClient;
use crate::provider::{Capabilities, FetchBatch, ListRequest, Provider, ProviderFuture, PsaProvider};
use crate::{Company, Contact, ProviderError, ProviderType, Ticket, TicketPriority, TicketStatus};

/// Autotask caps `MaxRecords` at 500.
const MAX_RECORDS: usize = 500;

#[derive(Debug, Clone)]
pub struct AutotaskAdapter {
    api: ApiClient,
}

impl AutotaskAdapter {
    pub fn new(api: ApiClient, credentials: AutotaskCredentials) -> Self {
        let api = api
            .with_header("ApiIntegrationCode", credentials.integration_code.expose())
            .with_header("UserName", credentials.username)
            .with_header("Secret", credentials.secret.expose());
        Self { api }
    }

    async fn query(
        &self,
        entity: &str,
        modified_field: &str,
        request: &ListRequest,
    ) -> Result<Vec<Value>, ProviderError> {
        let filter = match request.updated_since {
            Some(since) => json!([{"op": "gt", "field": modified_field, "value": since.format_seconds()}]),
            None => json!([{"op": "gte", "field": "id", "value": 0}]),
        };
        let search = json!({
            "filter": filter,
            "MaxRecords": request.page_size.min(MAX_RECORDS),
        })
        .to_string();
        let search = search.as_str();
        let path = format!("{entity}/query");
        let path = path.as_str();

        paginate(request, None::<String>, |link| async move {
            let body = match link {
                Some(link) => self.api.get_json_url(&link, &request.cancel).await?,
                None => {
                    self.api
                        .get_json(path, &[("search", search.to_owned())], &request.cancel)
                        .await?
                }
            };
            let next = text(&body, "pageDetails.nextPageUrl").map(Some);
            Ok((items(&body, "items")?, next))
        })
        .await
    }

    async fn get_item(&self, entity: &str, external_id: &str) -> Result<Value, ProviderError> {
        let body = self
            .api
            .get_json(
                &format!("{entity}/{}", urlencoding::encode(external_id)),
                &[],
                &CancellationToken::new(),
            )
            .await?;
        field(&body, "item")
            .cloned()
            .ok_or_else(|| ProviderError::malformed_response(format!("{entity} response has no item")))
    }
}

impl Provider for AutotaskAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Autotask
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::psa(true, true, true)
    }

    fn test_connection<'a>(&'a self) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let search = json!({"filter": [{"op": "gte", "field": "id", "value": 0}], "MaxRecords": 1});
            let body = self
                .api
                .get_json(
                    "Companies/query",
                    &[("search", search.to_string())],
                    &CancellationToken::new(),
                )
                .await?;
            Ok(body.get("items").is_some())
        })
    }
}

impl PsaProvider for AutotaskAdapter {
    fn list_companies<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Company>> {
        Box::pin(async move {
            let raw = self
                .query("Companies", "lastTrackedModifiedDateTime", request)
                .await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_company(value)))
        })
    }

    fn list_contacts<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Contact>> {
        Box::pin(async move {
            let raw = self.query("Contacts", "lastModifiedDate", request).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_contact(value)))
        })
    }

    fn list_tickets<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Ticket>> {
        Box::pin(async move {
            let raw = self.query("Tickets", "lastActivityDate", request).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_ticket(value)))
        })
    }

    fn get_company<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Company> {
        Box::pin(async move { self.normalize_company(&self.get_item("Companies", external_id).await?) })
    }

    fn get_contact<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Contact> {
        Box::pin(async move { self.normalize_contact(&self.get_item("Contacts", external_id).await?) })
    }

    fn get_ticket<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Ticket> {
        Box::pin(async move { self.normalize_ticket(&self.get_item("Tickets", external_id).await?) })
    }

    fn normalize_company(&self, raw: &Value) -> Result<Company, ProviderError> {
        Ok(Company {
            external_id: required_text(raw, "id", "company")?,
            name: required_text(raw, "companyName", "company")?,
            phone: text(raw, "phone"),
            website: text(raw, "webAddress"),
            address: join_parts(&[
                text(raw, "address1"),
                text(raw, "address2"),
                text(raw, "city"),
                text(raw, "state"),
                text(raw, "postalCode"),
            ]),
            raw_data: raw.clone(),
        })
    }

    fn normalize_contact(&self, raw: &Value) -> Result<Contact, ProviderError> {
        Ok(Contact {
            external_id: required_text(raw, "id", "contact")?,
            company_id: reference(raw, "companyID"),
            first_name: text(raw, "firstName"),
            last_name: text(raw, "lastName"),
            email: text(raw, "emailAddress"),
            phone: text(raw, "phone").or_else(|| text(raw, "mobilePhone")),
            title: text(raw, "title"),
            raw_data: raw.clone(),
        })
    }

    fn normalize_ticket(&self, raw: &Value) -> Result<Ticket, ProviderError> {
        Ok(Ticket {
            external_id: required_text(raw, "id", "ticket")?,
            company_id: reference(raw, "companyID"),
            contact_id: reference(raw, "contactID"),
            ticket_number: text(raw, "ticketNumber"),
            subject: required_text(raw, "title", "ticket")?,
            description: text(raw, "description"),
            status: integer(raw, "status").map_or(TicketStatus::New, ticket_status),
            priority: integer(raw, "priority").map_or(TicketPriority::Medium, ticket_priority),
            external_created_at: timestamp(raw, "createDate"),
            external_updated_at: timestamp(raw, "lastActivityDate"),
            raw_data: raw.clone(),
        })
    }
}

/// Default Autotask status picklist values.
fn ticket_status(value: i64) -> TicketStatus {
    match value {
        5 => TicketStatus::Closed,
        8 | 10 | 11 => TicketStatus::InProgress,
        7 | 9 | 12 | 13 | 14 => TicketStatus::Waiting,
        _ => TicketStatus::New,
    }
}

fn ticket_priority(value: i64) -> TicketPriority {
    match value {
        1 => TicketPriority::High,
        3 => TicketPriority::Low,
        4 => TicketPriority::Urgent,
        _ => TicketPriority::Medium,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::test_api;
    use crate::credentials::SecretString;
    use crate::http::{HttpMethod, ScriptedHttpClient};

    const BASE: &str = "https://webservices5.autotask.net/atservicesrest/v1.0";

    fn adapter(transport: Arc<ScriptedHttpClient>) -> AutotaskAdapter {
        AutotaskAdapter::new(
            test_api(ProviderType::Autotask, BASE, transport),
            AutotaskCredentials {
                username: String::from("api@acme.test"),
                secret: SecretString::new("s3cret"),
                integration_code: SecretString::new("TRACKER"),
            },
        )
    }

    #[tokio::test]
    async fn pages_follow_next_page_links() {
        let next = format!("{BASE}/Companies/query/next?paging=abc");
        let transport = Arc::new(
            ScriptedHttpClient::new()
                .on_json(
                    HttpMethod::Get,
                    "Companies/query?search",
                    json!({"items": [{"id": 1, "companyName": "Acme"}], "pageDetails": {"nextPageUrl": next}}),
                )
                .on_json(
                    HttpMethod::Get,
                    "Companies/query/next",
                    json!({"items": [{"id": 2, "companyName": "Globex"}], "pageDetails": {"nextPageUrl": null}}),
                ),
        );

        let batch = adapter(Arc::clone(&transport))
            .list_companies(&ListRequest::default())
            .await
            .expect("companies");

        assert_eq!(batch.records.len(), 2);
        let first = &transport.requests()[0];
        assert_eq!(first.header("ApiIntegrationCode"), Some("TRACKER"));
        assert_eq!(first.header("username"), Some("api@acme.test"));
    }

    #[test]
    fn ticket_picklists_map_to_canonical_values() {
        let adapter = adapter(Arc::new(ScriptedHttpClient::new()));
        let ticket = adapter
            .normalize_ticket(&json!({
                "id": 77, "ticketNumber": "T20240301.0001", "title": "VPN down",
                "status": 8, "priority": 4, "companyID": 12, "contactID": null
            }))
            .expect("ticket");

        assert_eq!(ticket.status, TicketStatus::InProgress);
        assert_eq!(ticket.priority, TicketPriority::Urgent);
        assert_eq!(ticket.company_id.as_deref(), Some("12"));
        assert_eq!(ticket_status(99), TicketStatus::New);
    }

    #[test]
    fn tickets_without_title_are_rejected() {
        let adapter = adapter(Arc::new(ScriptedHttpClient::new()));
        let error = adapter.normalize_ticket(&json!({"id": 1})).expect_err("no title");
        assert_eq!(error.code(), "provider.normalization");
    }
}
