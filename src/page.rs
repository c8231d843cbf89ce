//! # Paginator
//!
//! Splits a source into fixed-size pages and reports the totals alongside
//! the requested window.
//!
//! - `skip = max(0, page - 1) * page_size`, so page `0` and negative pages
//!   read the same window as page `1`.
//! - The total is counted before the window is taken.
//! - `total_pages` is `0` for an empty source, otherwise
//!   `ceil(total_count / page_size)`.
//! - `current_page` echoes the requested page, even when it was clamped.
//!
//! Sources implement [`Source`] (blocking) or [`AsyncSource`]. Pagination
//! adds no errors of its own; a source's error is returned unchanged.

use serde::Serialize;
use std::convert::Infallible;
use std::num::NonZeroU32;

/// The window of a source that one page covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// The requested page, unclamped.
    pub page: i64,
    pub skip: u64,
    pub take: NonZeroU32,
}

impl PageWindow {
    pub fn new(page: i64, page_size: NonZeroU32) -> Self {
        let skipped_pages = page.saturating_sub(1).max(0) as u64;
        Self {
            page,
            skip: skipped_pages.saturating_mul(page_size.get() as u64),
            take: page_size,
        }
    }

    /// Number of pages needed to hold `total_count` items.
    pub fn total_pages(&self, total_count: u64) -> u64 {
        total_count.div_ceil(self.take.get() as u64)
    }

    fn into_result<T>(self, total_count: u64, items: Vec<T>) -> PagedResult<T> {
        PagedResult {
            current_page: self.page,
            total_pages: self.total_pages(total_count),
            total_count,
            items,
        }
    }
}

/// One page of items plus page and total metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PagedResult<T> {
    pub current_page: i64,
    pub total_pages: u64,
    pub total_count: u64,
    pub items: Vec<T>,
}

/// A source that can be counted and windowed synchronously.
pub trait Source {
    type Item;
    type Error;

    fn count(&self) -> Result<u64, Self::Error>;

    /// Returns at most `take` items, starting after the first `skip`.
    fn window(&self, skip: u64, take: u32) -> Result<Vec<Self::Item>, Self::Error>;
}

/// A source that is counted and windowed through asynchronous I/O.
#[allow(async_fn_in_trait)]
pub trait AsyncSource {
    type Item;
    type Error;

    async fn count(&self) -> Result<u64, Self::Error>;

    async fn window(&self, skip: u64, take: u32) -> Result<Vec<Self::Item>, Self::Error>;
}

impl<T: Clone> Source for [T] {
    type Item = T;
    type Error = Infallible;

    fn count(&self) -> Result<u64, Self::Error> {
        Ok(self.len() as u64)
    }

    fn window(&self, skip: u64, take: u32) -> Result<Vec<T>, Self::Error> {
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        Ok(self.iter().skip(skip).take(take as usize).cloned().collect())
    }
}

impl<T: Clone> Source for Vec<T> {
    type Item = T;
    type Error = Infallible;

    fn count(&self) -> Result<u64, Self::Error> {
        <[T] as Source>::count(self.as_slice())
    }

    fn window(&self, skip: u64, take: u32) -> Result<Vec<T>, Self::Error> {
        <[T] as Source>::window(self.as_slice(), skip, take)
    }
}

pub fn paginate<S>(
    source: &S,
    page: i64,
    page_size: NonZeroU32,
) -> Result<PagedResult<S::Item>, S::Error>
where
    S: Source + ?Sized,
{
    paginate_with(source, page, page_size, |item| item)
}

/// Paginates `source`, mapping every item of the page through `selector`.
pub fn paginate_with<S, R, F>(
    source: &S,
    page: i64,
    page_size: NonZeroU32,
    selector: F,
) -> Result<PagedResult<R>, S::Error>
where
    S: Source + ?Sized,
    F: FnMut(S::Item) -> R,
{
    let window = PageWindow::new(page, page_size);
    let total_count = source.count()?;
    let items = source.window(window.skip, window.take.get())?;

    tracing::debug!(page, total_count, skip = window.skip, "paginated source");

    Ok(window.into_result(total_count, items.into_iter().map(selector).collect()))
}

pub async fn paginate_async<S>(
    source: &S,
    page: i64,
    page_size: NonZeroU32,
) -> Result<PagedResult<S::Item>, S::Error>
where
    S: AsyncSource + ?Sized,
{
    paginate_async_with(source, page, page_size, |item| item).await
}

/// Asynchronous [`paginate_with`]. The count and the window are fetched
/// concurrently.
pub async fn paginate_async_with<S, R, F>(
    source: &S,
    page: i64,
    page_size: NonZeroU32,
    selector: F,
) -> Result<PagedResult<R>, S::Error>
where
    S: AsyncSource + ?Sized,
    F: FnMut(S::Item) -> R,
{
    let window = PageWindow::new(page, page_size);
    let (total_count, items) = futures::try_join!(
        source.count(),
        source.window(window.skip, window.take.get())
    )?;

    tracing::debug!(page, total_count, skip = window.skip, "paginated async source");

    Ok(window.into_result(total_count, items.into_iter().map(selector).collect()))
}

#[cfg(test)]
mod tests {
    use super::{
        AsyncSource, PageWindow, PagedResult, paginate, paginate_async, paginate_async_with,
        paginate_with,
    };
    use std::convert::Infallible;
    use std::num::NonZeroU32;

    const FIVE: NonZeroU32 = NonZeroU32::new(5).unwrap();

    fn hundred() -> Vec<i32> {
        (0..100).collect()
    }

    #[test]
    fn test_window_math() {
        assert_eq!(0, PageWindow::new(-3, FIVE).skip);
        assert_eq!(0, PageWindow::new(0, FIVE).skip);
        assert_eq!(0, PageWindow::new(1, FIVE).skip);
        assert_eq!(20, PageWindow::new(5, FIVE).skip);
        assert_eq!(0, PageWindow::new(1, FIVE).total_pages(0));
        assert_eq!(1, PageWindow::new(1, FIVE).total_pages(1));
        assert_eq!(20, PageWindow::new(1, FIVE).total_pages(100));
        assert_eq!(21, PageWindow::new(1, FIVE).total_pages(101));
    }

    #[test]
    fn test_first_page() {
        let result = paginate(&hundred(), 1, FIVE).unwrap();

        assert_eq!(
            PagedResult {
                current_page: 1,
                total_pages: 20,
                total_count: 100,
                items: vec![0, 1, 2, 3, 4],
            },
            result
        );
    }

    #[test]
    fn test_middle_and_last_page() {
        assert_eq!(vec![20, 21, 22, 23, 24], paginate(&hundred(), 5, FIVE).unwrap().items);
        assert_eq!(vec![95, 96, 97, 98, 99], paginate(&hundred(), 20, FIVE).unwrap().items);
    }

    #[test]
    fn test_page_zero_reads_first_window() {
        let zero = paginate(&hundred(), 0, FIVE).unwrap();
        let first = paginate(&hundred(), 1, FIVE).unwrap();

        assert_eq!(0, zero.current_page);
        assert_eq!(first.items, zero.items);
    }

    #[test]
    fn test_past_the_end() {
        let result = paginate(&hundred(), 21, FIVE).unwrap();

        assert!(result.items.is_empty());
        assert_eq!(20, result.total_pages);
        assert_eq!(100, result.total_count);
        assert_eq!(21, result.current_page);
    }

    #[test]
    fn test_empty_source() {
        for page in [-1, 0, 1, 7] {
            let result = paginate(&Vec::<i32>::new(), page, FIVE).unwrap();

            assert_eq!(0, result.total_pages);
            assert_eq!(0, result.total_count);
            assert!(result.items.is_empty());
        }
    }

    #[test]
    fn test_selector() {
        let items = hundred();
        let result = paginate_with(&items[..], 2, FIVE, |i| format!("#{i}")).unwrap();

        assert_eq!(vec!["#5", "#6", "#7", "#8", "#9"], result.items);
        assert_eq!(20, result.total_pages);
    }

    struct Numbers(Vec<i32>);

    impl AsyncSource for Numbers {
        type Item = i32;
        type Error = Infallible;

        async fn count(&self) -> Result<u64, Self::Error> {
            Ok(self.0.len() as u64)
        }

        async fn window(&self, skip: u64, take: u32) -> Result<Vec<i32>, Self::Error> {
            Ok(self.0.iter().skip(skip as usize).take(take as usize).copied().collect())
        }
    }

    #[tokio::test]
    async fn test_async_matches_sync() {
        let source = Numbers(hundred());

        for page in [0, 1, 5, 20, 21] {
            assert_eq!(
                paginate(&hundred(), page, FIVE).unwrap(),
                paginate_async(&source, page, FIVE).await.unwrap()
            );
        }

        let mapped = paginate_async_with(&source, 3, FIVE, |i| i * 2).await.unwrap();
        assert_eq!(vec![20, 22, 24, 26, 28], mapped.items);
    }
}
