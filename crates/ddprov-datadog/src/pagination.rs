//! Page-by-page list helpers
//!
//! v2 list endpoints take `page[size]` / `page[number]` and return a
//! `data` array; v1 listings take `page_size` / `page` and return a bare
//! array. Either way a short page ends the listing.

use ddprov_core::traits::{ApiRequest, OpContext};
use ddprov_core::{Error, Result};
use serde_json::Value;
use tracing::{debug, warn};

/// Default page size for listings
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound on pages fetched by one listing
const MAX_PAGES: usize = 1000;

/// Query parameters and body layout of a paginated endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paging {
    /// `page[size]` / `page[number]`, items under `data`
    V2,
    /// `page_size` / `page`, the body is the item array
    V1,
}

impl Paging {
    fn params(self) -> (&'static str, &'static str) {
        match self {
            Paging::V2 => ("page[size]", "page[number]"),
            Paging::V1 => ("page_size", "page"),
        }
    }

    /// Items of one page; `None` when the body carries no list at all
    fn items(self, body: &Value) -> Option<&Value> {
        match self {
            Paging::V2 => body.get("data"),
            Paging::V1 => Some(body),
        }
    }
}

/// Fetch every item of a paginated v2 listing
///
/// # Parameters
///
/// - `ctx`: Operation context
/// - `path`: List endpoint
/// - `query`: Extra query parameters (filters)
/// - `page_size`: Items per page
///
/// # Returns
///
/// Items of every page, in server order
pub async fn collect_pages(
    ctx: &OpContext,
    path: &str,
    query: &[(&str, &str)],
    page_size: usize,
) -> Result<Vec<Value>> {
    collect_at_most(ctx, path, query, Paging::V2, page_size, MAX_PAGES).await
}

/// Fetch every item of a listing with the given paging style
pub async fn collect(
    ctx: &OpContext,
    path: &str,
    query: &[(&str, &str)],
    paging: Paging,
    page_size: usize,
) -> Result<Vec<Value>> {
    collect_at_most(ctx, path, query, paging, page_size, MAX_PAGES).await
}

/// Like [`collect`], failing once `max_pages` full pages were read
async fn collect_at_most(
    ctx: &OpContext,
    path: &str,
    query: &[(&str, &str)],
    paging: Paging,
    page_size: usize,
    max_pages: usize,
) -> Result<Vec<Value>> {
    let page_size = page_size.max(1);
    let (size_param, number_param) = paging.params();
    let mut items = Vec::new();

    for page in 0..max_pages {
        let mut request = ApiRequest::get(path)
            .with_query(size_param, page_size.to_string())
            .with_query(number_param, page.to_string());
        for (key, value) in query {
            request = request.with_query(*key, *value);
        }

        let body = ctx.call_json(request).await?;
        let data = match paging.items(&body) {
            Some(Value::Array(data)) => data,
            None | Some(Value::Null) => return Ok(items),
            Some(_) => return Err(Error::Other(format!("unexpected list response from {}", path))),
        };
        debug!("{} page {}: {} item(s)", path, page, data.len());
        let short = data.len() < page_size;
        items.extend(data.iter().cloned());
        if short {
            return Ok(items);
        }
    }

    warn!("{} still full after {} pages, refusing a truncated listing", path, max_pages);
    Err(Error::Other(format!(
        "listing {} exceeded {} pages of {} items",
        path, max_pages, page_size
    )))
}

/// First item of a listing matching a predicate
pub async fn find_first<F>(
    ctx: &OpContext,
    path: &str,
    query: &[(&str, &str)],
    predicate: F,
) -> Result<Option<Value>>
where
    F: Fn(&Value) -> bool,
{
    let items = collect_pages(ctx, path, query, DEFAULT_PAGE_SIZE).await?;
    Ok(items.into_iter().find(|item| predicate(item)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ddprov_core::RetryPolicy;
    use ddprov_core::traits::{ApiClient, ApiResponse};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves `pages` pages of `size` numbered items, then an empty page
    struct Pages {
        pages: usize,
        size: usize,
        paging: Paging,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApiClient for Pages {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (_, number_param) = self.paging.params();
            let page: usize = request
                .query
                .iter()
                .find(|(k, _)| k == number_param)
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(0);
            let data: Vec<Value> = if page < self.pages {
                (0..self.size).map(|i| json!({"id": page * self.size + i})).collect()
            } else {
                Vec::new()
            };
            match self.paging {
                Paging::V2 => Ok(ApiResponse::ok(json!({"data": data}))),
                Paging::V1 => Ok(ApiResponse::ok(Value::Array(data))),
            }
        }
    }

    fn context(pages: usize, size: usize) -> (Arc<Pages>, OpContext) {
        paged(pages, size, Paging::V2)
    }

    fn paged(pages: usize, size: usize, paging: Paging) -> (Arc<Pages>, OpContext) {
        let api = Arc::new(Pages {
            pages,
            size,
            paging,
            calls: AtomicUsize::new(0),
        });
        let ctx = OpContext::new(api.clone(), RetryPolicy::disabled());
        (api, ctx)
    }

    #[tokio::test]
    async fn test_collects_until_empty_page() {
        let (api, ctx) = context(3, 2);
        let items = collect_pages(&ctx, "/api/v2/users", &[], 2).await.unwrap();
        assert_eq!(items.len(), 6);
        assert_eq!(items[5], json!({"id": 5}));
        assert_eq!(api.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_page_cap_is_an_error_not_a_truncation() {
        let (api, ctx) = context(10, 2);
        let err = collect_at_most(&ctx, "/api/v2/users", &[], Paging::V2, 2, 3).await.unwrap_err();
        assert!(err.to_string().contains("exceeded 3 pages"), "{}", err);
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_v1_listing_reads_bare_arrays() {
        let (api, ctx) = paged(2, 3, Paging::V1);
        let items = collect(&ctx, "/api/v1/monitor", &[("name", "cpu")], Paging::V1, 3).await.unwrap();
        assert_eq!(items.len(), 6);
        assert_eq!(items[0], json!({"id": 0}));
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }
}
