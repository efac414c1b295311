//! Helpers for pulling canonical fields out of loosely typed API payloads.

use std::future::Future;

use serde_json::Value;
use tracing::warn;

use crate::{ListRequest, ProviderError, UtcDateTime};

/// Upper bound on pages fetched by one list call.
pub(crate) const MAX_PAGES: usize = 10_000;

/// Value at a dotted `path` (`"company.id"`, `"ipAddresses.0"`).
pub(crate) fn field<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(raw, |value, key| match value {
            Value::Array(values) => key.parse::<usize>().ok().and_then(|index| values.get(index)),
            _ => value.get(key),
        })
        .filter(|value| !value.is_null())
}

/// Trimmed text at `path`; numbers and booleans are rendered, blanks are `None`.
pub(crate) fn text(raw: &Value, path: &str) -> Option<String> {
    match field(raw, path)? {
        Value::String(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

pub(crate) fn first_text(raw: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|path| text(raw, path))
}

pub(crate) fn required_text(raw: &Value, path: &str, entity: &str) -> Result<String, ProviderError> {
    text(raw, path).ok_or_else(|| ProviderError::normalization(format!("{entity} is missing '{path}'")))
}

/// Identifier at `path`, rejecting zero-like numeric ids some APIs use for
/// "none".
pub(crate) fn reference(raw: &Value, path: &str) -> Option<String> {
    text(raw, path).filter(|value| value != "0")
}

pub(crate) fn boolean(raw: &Value, path: &str) -> Option<bool> {
    match field(raw, path)? {
        Value::Bool(value) => Some(*value),
        Value::Number(value) => value.as_i64().map(|number| number != 0),
        Value::String(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "online" => Some(true),
            "false" | "no" | "0" | "offline" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn integer(raw: &Value, path: &str) -> Option<i64> {
    match field(raw, path)? {
        Value::Number(value) => value.as_i64().or_else(|| value.as_f64().map(|float| float as i64)),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}

/// Timestamp at `path`: RFC3339/ISO text, or epoch seconds or milliseconds.
pub(crate) fn timestamp(raw: &Value, path: &str) -> Option<UtcDateTime> {
    match field(raw, path)? {
        Value::String(value) => UtcDateTime::parse_lenient(value),
        Value::Number(value) => {
            let number = value
                .as_i64()
                .or_else(|| value.as_f64().map(|float| float as i64))?;
            if number.abs() >= 100_000_000_000 {
                UtcDateTime::from_unix_millis(number)
            } else {
                UtcDateTime::from_unix_seconds(number)
            }
        }
        _ => None,
    }
}

pub(crate) fn first_timestamp(raw: &Value, paths: &[&str]) -> Option<UtcDateTime> {
    paths.iter().find_map(|path| timestamp(raw, path))
}

/// Comma-joined non-empty address parts.
pub(crate) fn join_parts(parts: &[Option<String>]) -> Option<String> {
    let joined = parts
        .iter()
        .flatten()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    (!joined.is_empty()).then_some(joined)
}

/// The array under `key`, or the body itself when the API returns a bare
/// array.
pub(crate) fn items(body: &Value, key: &str) -> Result<Vec<Value>, ProviderError> {
    if let Value::Array(values) = body {
        return Ok(values.clone());
    }
    match field(body, key) {
        Some(Value::Array(values)) => Ok(values.clone()),
        None => Ok(Vec::new()),
        Some(_) => Err(ProviderError::malformed_response(format!(
            "expected an array under '{key}'"
        ))),
    }
}

/// Drive a pagination loop. `fetch` receives the current cursor (page number,
/// next-page link, last id) and returns the page plus the next cursor, if
/// any. Cancellation is checked before every page.
pub(crate) async fn paginate<C, F, Fut>(
    request: &ListRequest,
    start: C,
    fetch: F,
) -> Result<Vec<Value>, ProviderError>
where
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<(Vec<Value>, Option<C>), ProviderError>>,
{
    paginate_limited(request, start, MAX_PAGES, fetch).await
}

/// [`paginate`] with an explicit page cap. An upstream that still offers a
/// next page after `max_pages` fails the listing instead of truncating it.
async fn paginate_limited<C, F, Fut>(
    request: &ListRequest,
    start: C,
    max_pages: usize,
    mut fetch: F,
) -> Result<Vec<Value>, ProviderError>
where
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<(Vec<Value>, Option<C>), ProviderError>>,
{
    let mut collected = Vec::new();
    let mut next = Some(start);
    let mut pages = 0_usize;

    while let Some(cursor) = next.take() {
        request.check_cancelled()?;
        let (page, following) = fetch(cursor).await?;
        let empty = page.is_empty();
        collected.extend(page);
        pages += 1;
        if empty {
            break;
        }
        if pages >= max_pages && following.is_some() {
            warn!(pages, "pagination did not end at the page limit");
            return Err(ProviderError::malformed_response(format!(
                "pagination did not end after {pages} pages"
            )));
        }
        next = following;
    }

    Ok(collected)
}

/// Next page number when a page came back full.
pub(crate) fn next_page_if_full(page: u32, received: usize, page_size: usize) -> Option<u32> {
    (received >= page_size).then_some(page + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_paths_and_text_rendering() {
        let raw = json!({"company": {"id": 42, "name": "  Acme  "}, "blank": " ", "none": null});
        assert_eq!(text(&raw, "company.id").as_deref(), Some("42"));
        assert_eq!(text(&raw, "company.name").as_deref(), Some("Acme"));
        assert_eq!(text(&raw, "blank"), None);
        assert_eq!(text(&raw, "none"), None);
        assert_eq!(reference(&json!({"companyID": 0}), "companyID"), None);
        assert_eq!(text(&json!({"ips": ["10.0.0.4"]}), "ips.0").as_deref(), Some("10.0.0.4"));
    }

    #[test]
    fn timestamps_accept_text_and_epochs() {
        let raw = json!({"iso": "2024-05-01T10:00:00Z", "secs": 1714557600, "millis": 1714557600000_i64});
        let expected = UtcDateTime::parse("2024-05-01T10:00:00Z").ok();
        assert_eq!(timestamp(&raw, "iso"), expected);
        assert_eq!(timestamp(&raw, "secs"), expected);
        assert_eq!(timestamp(&raw, "millis"), expected);
    }

    #[test]
    fn items_accept_wrapped_and_bare_arrays() {
        assert_eq!(items(&json!([1, 2]), "data").expect("bare").len(), 2);
        assert_eq!(items(&json!({"data": [1]}), "data").expect("wrapped").len(), 1);
        assert!(items(&json!({"data": {}}), "data").is_err());
    }

    #[tokio::test]
    async fn pagination_stops_on_missing_cursor_and_cancellation() {
        let request = ListRequest::default();
        let values = paginate(&request, 1_u32, |page| async move {
            let next = (page < 3).then_some(page + 1);
            Ok((vec![json!(page)], next))
        })
        .await
        .expect("pages");
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);

        request.cancel.cancel();
        let error = paginate(&request, 1_u32, |_| async { Ok((Vec::new(), None)) })
            .await
            .expect_err("cancelled");
        assert_eq!(error.code(), "provider.cancelled");
    }

    #[tokio::test]
    async fn endless_pagination_fails_instead_of_truncating() {
        let request = ListRequest::default();
        let error = paginate_limited(&request, 1_u32, 3, |page| async move { Ok((vec![json!(page)], Some(page + 1))) })
            .await
            .expect_err("runaway cursor");
        assert_eq!(error.code(), "provider.malformed_response");

        let values = paginate_limited(&request, 1_u32, 3, |page| async move {
            Ok((vec![json!(page)], (page < 3).then_some(page + 1)))
        })
        .await
        .expect("exactly at the limit");
        assert_eq!(values.len(), 3);
    }
}
