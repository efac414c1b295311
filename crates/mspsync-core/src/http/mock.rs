//! Scripted transport for offline tests.
//!
//! Routes match on method plus a URL fragment; the longest matching fragment
//! wins. Each route replays its queued responses in order and keeps repeating
//! the last one. Unmatched requests get a 404.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use super::client::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse};

type Scripted = Result<HttpResponse, HttpError>;

struct Route {
    method: HttpMethod,
    fragment: String,
    responses: VecDeque<Scripted>,
}

#[derive(Default)]
pub struct ScriptedHttpClient {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for requests matching `method` and `fragment`.
    pub fn on(self, method: HttpMethod, fragment: impl Into<String>, response: HttpResponse) -> Self {
        self.push(method, fragment.into(), Ok(response));
        self
    }

    pub fn on_json(self, method: HttpMethod, fragment: impl Into<String>, body: Value) -> Self {
        self.on(method, fragment, HttpResponse::ok_json(body.to_string()))
    }

    pub fn on_error(self, method: HttpMethod, fragment: impl Into<String>, error: HttpError) -> Self {
        self.push(method, fragment.into(), Err(error));
        self
    }

    /// Replace the script of an existing route, e.g. between two sync runs.
    pub fn replace(&self, method: HttpMethod, fragment: &str, response: HttpResponse) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.retain(|route| !(route.method == method && route.fragment == fragment));
        routes.push(Route {
            method,
            fragment: fragment.to_owned(),
            responses: VecDeque::from([Ok(response)]),
        });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self, fragment: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| request.url.contains(fragment))
            .count()
    }

    fn push(&self, method: HttpMethod, fragment: String, response: Scripted) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(route) = routes
            .iter_mut()
            .find(|route| route.method == method && route.fragment == fragment)
        {
            route.responses.push_back(response);
            return;
        }
        routes.push(Route {
            method,
            fragment,
            responses: VecDeque::from([response]),
        });
    }

    fn respond(&self, request: &HttpRequest) -> Scripted {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let route = routes
            .iter_mut()
            .filter(|route| route.method == request.method && request.url.contains(&route.fragment))
            .max_by_key(|route| route.fragment.len());

        let Some(route) = route else {
            return Ok(HttpResponse::new(404, r#"{"message":"no scripted route"}"#));
        };
        if route.responses.len() > 1 {
            route
                .responses
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "{}")))
        } else {
            route
                .responses
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "{}")))
        }
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let response = self.respond(&request);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        Box::pin(async move { response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn longest_fragment_wins_and_last_response_repeats() {
        let client = ScriptedHttpClient::new()
            .on(HttpMethod::Get, "/company", HttpResponse::ok_json("companies"))
            .on(HttpMethod::Get, "/company/contacts", HttpResponse::ok_json("first"))
            .on(HttpMethod::Get, "/company/contacts", HttpResponse::ok_json("second"));

        let contacts = "https://cw.example.com/company/contacts?page=1";
        let bodies = [
            client.execute(HttpRequest::get(contacts)).await,
            client.execute(HttpRequest::get(contacts)).await,
            client.execute(HttpRequest::get(contacts)).await,
        ]
        .map(|response| response.expect("scripted").body);
        assert_eq!(bodies, ["first", "second", "second"]);

        let companies = client
            .execute(HttpRequest::get("https://cw.example.com/company/companies"))
            .await
            .expect("scripted");
        assert_eq!(companies.body, "companies");
        assert_eq!(client.request_count("/company/contacts"), 3);
    }

    #[tokio::test]
    async fn unmatched_requests_are_not_found() {
        let client = ScriptedHttpClient::new();
        let response = client
            .execute(HttpRequest::post("https://rmm.example.com/alerts"))
            .await
            .expect("scripted");
        assert_eq!(response.status, 404);
    }
}
