//! Key enumeration over a paginated bucket listing.
//!
//! Listing is read-only, so a failed listing is never resumed mid-page: the
//! whole enumeration is simply run again on the next invocation.

use std::collections::HashSet;

use futures_util::stream::{self, Stream, TryStreamExt};
use thiserror::Error;

use crate::store::{ObjectKey, ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("listing page {page} under prefix '{prefix}' failed: {source}")]
    Page {
        page: usize,
        prefix: String,
        source: StoreError,
    },

    #[error("listing returned continuation token '{token}' twice in a row")]
    StalledPagination { token: String },
}

enum Cursor {
    Start,
    Next { token: String, page: usize },
    Done,
}

/// Whether a listed key names a real object under `prefix`.
///
/// Zero-length keys ending in `/` are console-created directory markers.
fn is_mirrorable(key: &str, prefix: &str) -> bool {
    !key.is_empty() && !key.ends_with('/') && key.starts_with(prefix)
}

/// Lazily enumerate every object key under `prefix`, one page at a time.
///
/// The stream ends after the last page, or after yielding the first error.
pub fn list_keys<'a>(
    store: &'a dyn ObjectStore,
    prefix: &'a str,
) -> impl Stream<Item = Result<ObjectKey, ListingError>> + 'a {
    stream::try_unfold(Cursor::Start, move |cursor| async move {
        let (token, page) = match cursor {
            Cursor::Start => (None, 0),
            Cursor::Next { token, page } => (Some(token), page),
            Cursor::Done => return Ok::<_, ListingError>(None),
        };

        let listed = store
            .list_page(prefix, token.as_deref())
            .await
            .map_err(|source| ListingError::Page {
                page,
                prefix: prefix.to_string(),
                source,
            })?;

        tracing::debug!(page, keys = listed.keys.len(), "Fetched listing page");

        let next = match listed.next_token {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                return Err(ListingError::StalledPagination { token: next });
            }
            Some(next) => Cursor::Next {
                token: next,
                page: page + 1,
            },
            None => Cursor::Done,
        };

        let keys: Vec<Result<ObjectKey, ListingError>> = listed
            .keys
            .into_iter()
            .filter(|key| is_mirrorable(key, prefix))
            .map(Ok)
            .collect();
        Ok(Some((stream::iter(keys), next)))
    })
    .try_flatten()
}

/// Drain the listing into a de-duplicated key list, preserving listing order.
///
/// All-or-nothing: any page failure discards the keys gathered so far, so
/// the caller never acts on a partial key set.
pub async fn collect_keys(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Vec<ObjectKey>, ListingError> {
    let mut seen = HashSet::new();
    let keys: Vec<ObjectKey> = list_keys(store, prefix)
        .try_filter(|key| std::future::ready(seen.insert(key.clone())))
        .try_collect()
        .await?;
    tracing::info!(
        "Listed {} objects under {}/{}",
        keys.len(),
        store.describe(),
        prefix
    );
    Ok(keys)
}
