//! Cursor-based pagination over list endpoints.
//!
//! A list operation takes a [`Cursor`] and returns a [`Page`]. [`Paginator`]
//! (blocking) and [`paginate_async`] walk every page lazily: the first call
//! uses [`Cursor::Start`], each later call passes the previous page's `next`
//! back untouched, and the walk stops at the first page without one. Pages
//! are independent fetches, so dropping a walk half way needs no cleanup.

use futures::Stream;
use serde::Deserialize;

use super::request::ApiRequest;
use crate::error::{Error, Result};

/// Position in a paginated listing.
///
/// `Start` means "no cursor supplied yet"; `End` means the server said there
/// is no next page. Asking a list operation for `End` is a usage error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Cursor {
    #[default]
    Start,
    At(String),
    End,
}

impl Cursor {
    pub fn is_end(&self) -> bool {
        matches!(self, Cursor::End)
    }
}

impl From<Option<String>> for Cursor {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(token) => Cursor::At(token),
            None => Cursor::End,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

impl<T> Page<T> {
    pub fn next_cursor(&self) -> Cursor {
        self.next.clone().into()
    }

    pub fn previous_cursor(&self) -> Cursor {
        self.previous.clone().into()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.results.iter()
    }
}

impl<T> IntoIterator for Page<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Request for `cursor` on the list endpoint at `path`.
///
/// Cursors are opaque: absolute links are requested as-is, anything else is
/// passed back as the `cursor` query parameter.
pub(crate) fn list_request(path: &str, cursor: &Cursor) -> Result<ApiRequest> {
    match cursor {
        Cursor::Start => Ok(ApiRequest::get(path)),
        Cursor::At(token) if token.starts_with("http://") || token.starts_with("https://") => {
            Ok(ApiRequest::get(token.clone()))
        }
        Cursor::At(token) => Ok(ApiRequest::get(path).with_query("cursor", token.clone())),
        Cursor::End => Err(Error::config("cursor cannot be None")),
    }
}

/// Lazy, blocking walk over every page of a listing.
///
/// Yields each page (an empty first page included) and ends after the page
/// with no `next`, or after the first error.
pub struct Paginator<F> {
    list: F,
    cursor: Cursor,
}

impl<T, F> Paginator<F>
where
    F: FnMut(Cursor) -> Result<Page<T>>,
{
    pub fn new(list: F) -> Self {
        Self {
            list,
            cursor: Cursor::Start,
        }
    }

    /// Resume a walk from a cursor obtained earlier.
    pub fn from_cursor(list: F, cursor: Cursor) -> Self {
        Self { list, cursor }
    }
}

impl<T, F> Iterator for Paginator<F>
where
    F: FnMut(Cursor) -> Result<Page<T>>,
{
    type Item = Result<Page<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_end() {
            return None;
        }
        let cursor = std::mem::replace(&mut self.cursor, Cursor::End);
        match (self.list)(cursor) {
            Ok(page) => {
                self.cursor = page.next_cursor();
                Some(Ok(page))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Blocking pagination over `list`.
pub fn paginate<T, F>(list: F) -> Paginator<F>
where
    F: FnMut(Cursor) -> Result<Page<T>>,
{
    Paginator::new(list)
}

/// Lazy async walk over every page of a listing, same contract as [`Paginator`].
pub fn paginate_async<T, F, Fut>(list: F) -> impl Stream<Item = Result<Page<T>>>
where
    F: FnMut(Cursor) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    futures::stream::unfold((list, Cursor::Start), |(mut list, cursor)| async move {
        if cursor.is_end() {
            return None;
        }
        match list(cursor).await {
            Ok(page) => {
                let next = page.next_cursor();
                Some((Ok(page), (list, next)))
            }
            Err(e) => Some((Err(e), (list, Cursor::End))),
        }
    })
}
