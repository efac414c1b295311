//! ConnectWise Manage REST API (`/v4_6_release/apis/3.0`).
//!
//! Basic auth as `company+publicKey:privateKey` plus the `clientId` header.
//! Lists are page-numbered; a short page ends the loop. Incremental fetches
//! use `conditions=lastUpdated > [timestamp]`.

use serde_json::Value;

use super::normalize::{items, join_parts, next_page_if_full, paginate, reference, required_text, text, timestamp};
use crate::credentials::ConnectwiseCredentials;
use crate::http::{ApiClient, HttpAuth};
use crate::provider::{Capabilities, FetchBatch, ListRequest, Provider, ProviderFuture, PsaProvider};
use crate::{Company, Contact, ProviderError, ProviderType, Ticket, TicketPriority, TicketStatus};

#[derive(Debug, Clone)]
pub struct ConnectwiseAdapter {
    api: ApiClient,
}

impl ConnectwiseAdapter {
    pub fn new(api: ApiClient, credentials: ConnectwiseCredentials) -> Self {
        let api = api
            .with_auth(HttpAuth::Basic {
                username: format!("{}+{}", credentials.company_id, credentials.public_key),
                password: credentials.private_key.expose().to_owned(),
            })
            .with_header("clientId", credentials.client_id);
        Self { api }
    }

    async fn list_raw(&self, path: &str, request: &ListRequest) -> Result<Vec<Value>, ProviderError> {
        let conditions = request
            .updated_since
            .map(|since| format!("lastUpdated > [{}]", since.format_seconds()));
        let conditions = conditions.as_deref();
        let page_size = request.page_size;

        paginate(request, 1_u32, |page| async move {
            let mut query = vec![
                ("page", page.to_string()),
                ("pageSize", page_size.to_string()),
                ("orderBy", String::from("id asc")),
            ];
            if let Some(conditions) = conditions {
                query.push(("conditions", conditions.to_owned()));
            }
            let body = self.api.get_json(path, &query, &request.cancel).await?;
            let page_items = items(&body, "items")?;
            let next = next_page_if_full(page, page_items.len(), page_size);
            Ok((page_items, next))
        })
        .await
    }

    async fn get_raw(&self, path: &str, external_id: &str) -> Result<Value, ProviderError> {
        let cancel = tokio_util::sync::CancellationToken::new();
        self.api
            .get_json(&format!("{path}/{}", urlencoding::encode(external_id)), &[], &cancel)
            .await
    }
}

impl Provider for ConnectwiseAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::ConnectwiseManage
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::psa(true, true, true)
    }

    fn test_connection<'a>(&'a self) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let cancel = tokio_util::sync::CancellationToken::new();
            let info = self.api.get_json("system/info", &[], &cancel).await?;
            Ok(info.get("version").is_some())
        })
    }
}

impl PsaProvider for ConnectwiseAdapter {
    fn list_companies<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Company>> {
        Box::pin(async move {
            let raw = self.list_raw("company/companies", request).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_company(value)))
        })
    }

    fn list_contacts<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Contact>> {
        Box::pin(async move {
            let raw = self.list_raw("company/contacts", request).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_contact(value)))
        })
    }

    fn list_tickets<'a>(&'a self, request: &'a ListRequest) -> ProviderFuture<'a, FetchBatch<Ticket>> {
        Box::pin(async move {
            let raw = self.list_raw("service/tickets", request).await?;
            Ok(FetchBatch::from_raw(&raw, |value| self.normalize_ticket(value)))
        })
    }

    fn get_company<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Company> {
        Box::pin(async move {
            let raw = self.get_raw("company/companies", external_id).await?;
            self.normalize_company(&raw)
        })
    }

    fn get_contact<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Contact> {
        Box::pin(async move {
            let raw = self.get_raw("company/contacts", external_id).await?;
            self.normalize_contact(&raw)
        })
    }

    fn get_ticket<'a>(&'a self, external_id: &'a str) -> ProviderFuture<'a, Ticket> {
        Box::pin(async move {
            let raw = self.get_raw("service/tickets", external_id).await?;
            self.normalize_ticket(&raw)
        })
    }

    fn normalize_company(&self, raw: &Value) -> Result<Company, ProviderError> {
        Ok(Company {
            external_id: required_text(raw, "id", "company")?,
            name: required_text(raw, "name", "company")?,
            phone: text(raw, "phoneNumber"),
            website: text(raw, "website"),
            address: join_parts(&[
                text(raw, "addressLine1"),
                text(raw, "addressLine2"),
                text(raw, "city"),
                text(raw, "state"),
                text(raw, "zip"),
            ]),
            raw_data: raw.clone(),
        })
    }

    fn normalize_contact(&self, raw: &Value) -> Result<Contact, ProviderError> {
        Ok(Contact {
            external_id: required_text(raw, "id", "contact")?,
            company_id: reference(raw, "company.id"),
            first_name: text(raw, "firstName"),
            last_name: text(raw, "lastName"),
            email: communication_item(raw, "Email"),
            phone: communication_item(raw, "Phone"),
            title: text(raw, "title"),
            raw_data: raw.clone(),
        })
    }

    fn normalize_ticket(&self, raw: &Value) -> Result<Ticket, ProviderError> {
        let external_id = required_text(raw, "id", "ticket")?;
        Ok(Ticket {
            ticket_number: Some(external_id.clone()),
            external_id,
            company_id: reference(raw, "company.id"),
            contact_id: reference(raw, "contact.id"),
            subject: required_text(raw, "summary", "ticket")?,
            description: text(raw, "initialDescription"),
            status: text(raw, "status.name")
                .map_or(TicketStatus::New, |label| TicketStatus::from_label(&label)),
            priority: text(raw, "priority.name")
                .map_or(TicketPriority::Medium, |label| TicketPriority::from_label(&label)),
            external_created_at: timestamp(raw, "_info.dateEntered"),
            external_updated_at: timestamp(raw, "_info.lastUpdated"),
            raw_data: raw.clone(),
        })
    }
}

/// First communication item of the given type (`Email`, `Phone`).
fn communication_item(raw: &Value, kind: &str) -> Option<String> {
    raw.get("communicationItems")?
        .as_array()?
        .iter()
        .filter(|item| text(item, "communicationType").as_deref() == Some(kind))
        .find_map(|item| text(item, "value"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::adapters::test_api;
    use crate::credentials::SecretString;
    use crate::http::{HttpMethod, ScriptedHttpClient};

    fn adapter(transport: Arc<ScriptedHttpClient>) -> ConnectwiseAdapter {
        ConnectwiseAdapter::new(
            test_api(ProviderType::ConnectwiseManage, "https://cw.example.com/v4_6_release/apis/3.0", transport),
            ConnectwiseCredentials {
                company_id: String::from("acme"),
                public_key: String::from("pub"),
                private_key: SecretString::new("priv"),
                client_id: String::from("client-guid"),
            },
        )
    }

    #[tokio::test]
    async fn companies_are_paged_until_a_short_page() {
        let full_page: Vec<Value> = (1..=2)
            .map(|id| json!({"id": id, "name": format!("Company {id}")}))
            .collect();
        let transport = Arc::new(
            ScriptedHttpClient::new()
                .on_json(HttpMethod::Get, "company/companies?page=1", Value::Array(full_page))
                .on_json(
                    HttpMethod::Get,
                    "company/companies?page=2",
                    json!([{"id": 3, "name": "Company 3", "city": "Austin", "state": "TX"}]),
                ),
        );
        let request = ListRequest::new(2).expect("page size");

        let batch = adapter(Arc::clone(&transport))
            .list_companies(&request)
            .await
            .expect("companies");

        assert_eq!(batch.records.len(), 3);
        assert_eq!(batch.records[2].address.as_deref(), Some("Austin, TX"));
        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].header("clientid"), Some("client-guid"));
        assert_eq!(sent[0].header("authorization"), Some("Basic YWNtZStwdWI6cHJpdg=="));
    }

    #[tokio::test]
    async fn incremental_fetch_sends_last_updated_condition() {
        let transport = Arc::new(ScriptedHttpClient::new().on_json(
            HttpMethod::Get,
            "service/tickets",
            json!([]),
        ));
        let since = crate::UtcDateTime::parse("2024-02-01T00:00:00Z").expect("since");
        let request = ListRequest::default().with_updated_since(Some(since));

        adapter(Arc::clone(&transport))
            .list_tickets(&request)
            .await
            .expect("tickets");

        let url = &transport.requests()[0].url;
        assert!(url.contains("conditions=lastUpdated+%3E+%5B2024-02-01T00%3A00%3A00Z%5D"), "{url}");
    }

    #[test]
    fn tickets_map_vocabulary_and_references() {
        let adapter = adapter(Arc::new(ScriptedHttpClient::new()));
        let ticket = adapter
            .normalize_ticket(&json!({
                "id": 981,
                "summary": "Printer offline",
                "status": {"name": "Triaged"},
                "priority": {"name": "Priority 1 - Critical"},
                "company": {"id": 19},
                "contact": {"id": 0},
                "_info": {"dateEntered": "2024-03-01T08:00:00Z", "lastUpdated": "2024-03-02T09:30:00Z"}
            }))
            .expect("ticket");

        assert_eq!(ticket.status, TicketStatus::New);
        assert_eq!(ticket.priority, TicketPriority::Urgent);
        assert_eq!(ticket.company_id.as_deref(), Some("19"));
        assert_eq!(ticket.contact_id, None);
        assert_eq!(ticket.ticket_number.as_deref(), Some("981"));
    }

    #[test]
    fn contacts_read_communication_items() {
        let adapter = adapter(Arc::new(ScriptedHttpClient::new()));
        let contact = adapter
            .normalize_contact(&json!({
                "id": 5,
                "firstName": "Dana",
                "company": {"id": 19},
                "communicationItems": [
                    {"communicationType": "Phone", "value": "555-0100"},
                    {"communicationType": "Email", "value": "dana@acme.test"}
                ]
            }))
            .expect("contact");

        assert_eq!(contact.email.as_deref(), Some("dana@acme.test"));
        assert_eq!(contact.phone.as_deref(), Some("555-0100"));
    }
}
