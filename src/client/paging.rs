//! Pagination drain for list endpoints
//!
//! List endpoints hand back an opaque resume token when more pages
//! remain. [`drain_pages`] follows the token until the server stops
//! returning one, concatenating pages in server order. A page budget
//! bounds the loop so a server that never drains its token surfaces as
//! an error instead of hanging the invocation.

use crate::error::{Error, Result};
use futures::stream::{self, Stream, TryStreamExt};
use std::future::Future;

/// Hard ceiling on pages followed per aggregation.
pub const MAX_PAGES: usize = 10_000;

/// Fetch every page of a list endpoint.
///
/// `fetch` is called with `None` for the first page and the previous
/// page's resume token afterwards; it returns the page's items plus the
/// next token (`None` or empty when the listing is complete).
///
/// Any page failure aborts the aggregation; partial results are
/// discarded.
pub async fn drain_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<String>)>>,
{
    let mut items = Vec::new();
    let mut resume: Option<String> = None;
    let mut pages = 0usize;

    loop {
        pages += 1;
        if pages > MAX_PAGES {
            return Err(Error::PaginationOverflow { pages: MAX_PAGES });
        }

        let (page, next) = fetch(resume.take()).await?;
        items.extend(page);

        match next {
            Some(token) if !token.is_empty() => resume = Some(token),
            _ => break,
        }
    }

    Ok(items)
}

/// Lazy variant of [`drain_pages`]: a finite, non-restartable stream of
/// items that fetches each page on demand.
pub fn page_stream<T, F, Fut>(fetch: F) -> impl Stream<Item = Result<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<String>)>>,
{
    struct State<F> {
        fetch: F,
        resume: Option<String>,
        pages: usize,
        done: bool,
    }

    stream::try_unfold(
        State {
            fetch,
            resume: None,
            pages: 0,
            done: false,
        },
        |mut state| async move {
            if state.done {
                return Ok(None);
            }

            state.pages += 1;
            if state.pages > MAX_PAGES {
                return Err(Error::PaginationOverflow { pages: MAX_PAGES });
            }

            let (page, next) = (state.fetch)(state.resume.take()).await?;
            match next {
                Some(token) if !token.is_empty() => state.resume = Some(token),
                _ => state.done = true,
            }

            let chunk = stream::iter(page.into_iter().map(Ok));
            Ok(Some((chunk, state)))
        },
    )
    .try_flatten()
}
