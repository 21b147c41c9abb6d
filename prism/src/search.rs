//! Paged search over a user's image records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::store::{Paging, RecordQuery, RecordStore, SearchFilter, StoreError};

pub const DEFAULT_PAGE_SIZE: u32 = 25;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("You must specify a search string or search filter")]
    MissingCriteria,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn default_page_id() -> i64 {
    -1
}

/// Body of a paged search. Pages are numbered from 1; anything `<= 0` asks
/// for the counts only.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    #[serde(default = "default_page_id")]
    pub page_id: i64,
    #[serde(default)]
    pub search_string: String,
    #[serde(default)]
    pub search_filter: SearchFilter,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            page_id: default_page_id(),
            search_string: String::new(),
            search_filter: SearchFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub status: SearchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub num_pages: u64,
    pub page_size: u32,
    pub num_images: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Vec<Fingerprint>>,
}

impl SearchResponse {
    pub fn is_out_of_range(&self) -> bool {
        self.status == SearchStatus::Failure
    }
}

pub struct Search {
    store: Arc<dyn RecordStore>,
    page_size: u32,
}

impl Search {
    pub fn new(store: Arc<dyn RecordStore>, page_size: u32) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub async fn search(
        &self,
        uploader: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse, SearchError> {
        let query = RecordQuery {
            user: uploader,
            filter: &request.search_filter,
            text: &request.search_string,
        };

        let page = request.page_id;
        let paging = match u32::try_from(page) {
            Ok(number) if number > 0 => Paging::Page {
                number,
                size: self.page_size,
            },
            _ => Paging::CountOnly,
        };

        let result = self.store.query(&query, paging).await?;
        let num_pages = (result.num_images as u64).div_ceil(self.page_size as u64);

        let mut response = SearchResponse {
            status: SearchStatus::Success,
            detail: None,
            num_pages,
            page_size: self.page_size,
            num_images: result.num_images,
            current_page: None,
            hashes: None,
        };

        if page <= 0 {
            return Ok(response);
        }

        response.current_page = Some(page);
        if page as u64 > num_pages {
            response.status = SearchStatus::Failure;
            response.detail = Some("Page does not exist.".to_string());
        } else {
            response.hashes = Some(result.hashes);
        }
        Ok(response)
    }

    /// Every matching hash, unpaged. At least one criterion is required.
    pub async fn search_all(
        &self,
        uploader: &str,
        search_string: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<Fingerprint>, SearchError> {
        if search_string.is_empty() && filter.is_empty() {
            return Err(SearchError::MissingCriteria);
        }

        let query = RecordQuery {
            user: uploader,
            filter,
            text: search_string,
        };
        Ok(self.store.query(&query, Paging::All).await?.hashes)
    }
}
