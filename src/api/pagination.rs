use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PaginationConfig;
use crate::filter::FilterError;

/// Opaque `page` parameter: URL-safe base64 of `{"limit":n,"offset":m}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    pub limit: i64,
    pub offset: i64,
}

impl PageToken {
    pub fn encode(&self) -> String {
        // Serializing two integers cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, FilterError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim_end_matches('='))
            .map_err(|_| FilterError::InvalidPage)?;
        let token: PageToken = serde_json::from_slice(&bytes).map_err(|_| FilterError::InvalidPage)?;
        if token.limit < 1 || token.offset < 0 {
            return Err(FilterError::InvalidPage);
        }
        Ok(token)
    }
}

/// Effective limit/offset of one list request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: i64,
    pub offset: i64,
}

impl PageWindow {
    /// Resolve from request parameters. A page token wins over explicit
    /// limit/offset; the limit is clamped to `1..=max_limit`.
    pub fn resolve(
        limit: Option<i64>,
        offset: Option<i64>,
        page: Option<&str>,
        config: &PaginationConfig,
    ) -> Result<Self, FilterError> {
        let (limit, offset) = match page {
            Some(token) => {
                let token = PageToken::decode(token)?;
                (token.limit, token.offset)
            }
            None => (limit.unwrap_or(config.default_limit), offset.unwrap_or(0)),
        };
        if offset < 0 {
            return Err(FilterError::InvalidOffset("Offset must be non-negative".to_string()));
        }
        if limit > config.max_limit {
            tracing::debug!("Limit {} exceeds max {}, capping to max", limit, config.max_limit);
        }
        Ok(Self {
            limit: limit.clamp(1, config.max_limit.max(1)),
            offset,
        })
    }

    fn token(&self, offset: i64) -> String {
        PageToken { limit: self.limit, offset }.encode()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLinks {
    pub current: String,
    pub prev: Option<String>,
    pub next: Option<String>,
    pub first: String,
    pub last: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginationInfo {
    pub total: i64,
    pub page: PageLinks,
}

/// List response body
#[derive(Debug, Clone, Serialize)]
pub struct Paginated {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
    pub pagination: PaginationInfo,
    pub data: Vec<Value>,
}

impl Paginated {
    pub fn new(window: PageWindow, total: i64, data: Vec<Value>) -> Self {
        let PageWindow { limit, offset } = window;
        let last_offset = if total <= 0 { 0 } else { ((total - 1) / limit) * limit };

        let page = PageLinks {
            current: window.token(offset),
            prev: (offset > 0).then(|| window.token((offset - limit).max(0))),
            next: offset
                .checked_add(limit)
                .filter(|end| *end < total)
                .map(|end| window.token(end)),
            first: window.token(0),
            last: window.token(last_offset),
        };

        Self {
            limit,
            offset,
            total,
            pagination: PaginationInfo { total, page },
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn config() -> PaginationConfig {
        let mut config = AppConfig::for_tests().pagination;
        config.default_limit = 20;
        config.max_limit = 100;
        config
    }

    #[test]
    fn page_tokens_decode_what_they_encode() {
        let token = PageToken { limit: 10, offset: 30 };
        let encoded = token.encode();
        assert!(!encoded.contains('='));
        assert_eq!(PageToken::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn rejects_tampered_tokens() {
        assert!(matches!(PageToken::decode("!!!"), Err(FilterError::InvalidPage)));
        let bogus = URL_SAFE_NO_PAD.encode(br#"{"limit":0,"offset":5}"#);
        assert!(matches!(PageToken::decode(&bogus), Err(FilterError::InvalidPage)));
        let negative = URL_SAFE_NO_PAD.encode(br#"{"limit":5,"offset":-5}"#);
        assert!(matches!(PageToken::decode(&negative), Err(FilterError::InvalidPage)));
    }

    #[test]
    fn window_defaults_and_caps() {
        let config = config();
        assert_eq!(
            PageWindow::resolve(None, None, None, &config).unwrap(),
            PageWindow { limit: 20, offset: 0 }
        );
        assert_eq!(
            PageWindow::resolve(Some(500), Some(7), None, &config).unwrap(),
            PageWindow { limit: 100, offset: 7 }
        );
        assert_eq!(PageWindow::resolve(Some(0), None, None, &config).unwrap().limit, 1);
    }

    #[test]
    fn page_token_overrides_limit_and_offset() {
        let token = PageToken { limit: 5, offset: 15 }.encode();
        let window = PageWindow::resolve(Some(50), Some(0), Some(&token), &config()).unwrap();
        assert_eq!(window, PageWindow { limit: 5, offset: 15 });
    }

    #[test]
    fn links_are_null_at_the_edges() {
        let window = PageWindow { limit: 10, offset: 0 };
        let page = Paginated::new(window, 25, vec![]);
        assert!(page.pagination.page.prev.is_none());
        let next = PageToken::decode(page.pagination.page.next.as_deref().unwrap()).unwrap();
        assert_eq!(next.offset, 10);
        let last = PageToken::decode(&page.pagination.page.last).unwrap();
        assert_eq!(last.offset, 20);

        let tail = Paginated::new(PageWindow { limit: 10, offset: 20 }, 25, vec![]);
        assert!(tail.pagination.page.next.is_none());
        let prev = PageToken::decode(tail.pagination.page.prev.as_deref().unwrap()).unwrap();
        assert_eq!(prev.offset, 10);
    }

    #[test]
    fn huge_offsets_have_no_next_page() {
        let window = PageWindow::resolve(Some(20), Some(i64::MAX), None, &config()).unwrap();
        let page = Paginated::new(window, 5, vec![]);
        assert!(page.pagination.page.next.is_none());
        let prev = PageToken::decode(page.pagination.page.prev.as_deref().unwrap()).unwrap();
        assert_eq!(prev.offset, i64::MAX - 20);
    }

    #[test]
    fn empty_result_points_every_link_at_the_start() {
        let page = Paginated::new(PageWindow { limit: 10, offset: 0 }, 0, vec![]);
        assert_eq!(page.pagination.page.first, page.pagination.page.last);
        assert!(page.pagination.page.next.is_none());
        assert_eq!(page.total, 0);
    }
}
