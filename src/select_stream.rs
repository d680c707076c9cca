use std::{
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    task::{Context, Poll},
};

use futures::stream::{BoxStream, SelectAll, Stream, StreamExt, select_all};

use crate::collaborators::EventStream;
use crate::errors::{Result, SelectableError};
use crate::models::enums::SelectEvent;
use crate::models::structs::ObjectKey;

/// Global row limit shared by every source of one request. `0` means unbounded.
#[derive(Debug, Default)]
pub struct RowBudget {
    limit: u64,
    delivered: AtomicU64,
}

impl RowBudget {
    pub fn new(limit: u64) -> Self { Self { limit, delivered: AtomicU64::new(0) } }

    /// Claims one row. Check and increment happen in one atomic step, so concurrent callers can
    /// never push the count past the limit.
    pub fn try_take(&self) -> bool {
        if self.limit == 0 {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        self.delivered
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| (d < self.limit).then_some(d + 1))
            .is_ok()
    }

    pub fn delivered(&self) -> u64 { self.delivered.load(Ordering::SeqCst) }
    pub fn limit(&self) -> u64 { self.limit }
    pub fn exhausted(&self) -> bool { self.limit != 0 && self.delivered() >= self.limit }
}

type SourceStream = BoxStream<'static, Result<SelectEvent>>;

/// Merged, limit-bounded event stream of one select request.
///
/// Sources interleave freely. Data events past the global limit are dropped while non-data events
/// keep flowing until every source has ended, at which point a single [`SelectEvent::End`] is
/// yielded. The first error ends the stream. Cancelling (or dropping) stops all sources and yields
/// nothing further, not even `End`.
pub struct SelectStream {
    sources: Option<SelectAll<SourceStream>>,
    budget: Arc<RowBudget>,
}

impl SelectStream {
    pub fn new(sources: Vec<(ObjectKey, EventStream)>, budget: Arc<RowBudget>) -> Self {
        let sources = sources.into_iter().map(|(key, stream)| {
            let key = key.to_string();
            stream.map(move |item| item.map_err(|source| SelectableError::ObjectQuery { key: key.clone(), source })).boxed()
        });
        Self { sources: Some(select_all(sources)), budget }
    }

    /// A stream that ends immediately with no rows.
    pub fn empty(budget: Arc<RowBudget>) -> Self { Self::new(Vec::new(), budget) }

    pub fn cancel(&mut self) {
        if self.sources.take().is_some() {
            log::debug!("select stream cancelled after {} rows", self.budget.delivered());
        }
    }

    pub fn budget(&self) -> &Arc<RowBudget> { &self.budget }
    pub fn delivered(&self) -> u64 { self.budget.delivered() }
}

impl Stream for SelectStream {
    type Item = Result<SelectEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            let Some(sources) = this.sources.as_mut() else { return Poll::Ready(None) };
            match sources.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                // per-source end markers collapse into the single final one
                Poll::Ready(Some(Ok(SelectEvent::End))) => continue,
                Poll::Ready(Some(Ok(event))) if event.is_data() => {
                    if this.budget.try_take() {
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(Ok(event))),
                Poll::Ready(Some(Err(e))) => {
                    this.sources = None;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.sources = None;
                    return Poll::Ready(Some(Ok(SelectEvent::End)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ClientError;
    use futures::stream;

    fn key(k: &str) -> ObjectKey { ObjectKey { bucket: "b".into(), key: k.into() } }

    fn source(rows: usize) -> EventStream {
        let mut events: Vec<_> = (0..rows).map(|i| Ok(SelectEvent::records(vec![i as u8]))).collect();
        events.push(Ok(SelectEvent::Stats { bytes_scanned: 1, bytes_processed: 1, bytes_returned: 1 }));
        events.push(Ok(SelectEvent::End));
        stream::iter(events).boxed()
    }

    #[tokio::test]
    async fn limit_is_exact_and_stats_still_flow() {
        let budget = Arc::new(RowBudget::new(3));
        let s = SelectStream::new((0..4).map(|i| (key(&i.to_string()), source(5))).collect(), budget.clone());
        let events: Vec<_> = s.map(|e| e.unwrap()).collect().await;
        assert_eq!(events.iter().filter(|e| e.is_data()).count(), 3);
        assert_eq!(events.iter().filter(|e| matches!(e, SelectEvent::Stats { .. })).count(), 4);
        assert_eq!(events.iter().filter(|e| **e == SelectEvent::End).count(), 1);
        assert_eq!(events.last(), Some(&SelectEvent::End));
        assert_eq!(budget.delivered(), 3);
    }

    #[tokio::test]
    async fn empty_stream_only_ends() {
        let events: Vec<_> = SelectStream::empty(Arc::new(RowBudget::new(0))).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(SelectEvent::End)));
    }

    #[tokio::test]
    async fn source_error_ends_stream() {
        let failing = stream::iter(vec![Err(ClientError::new("boom"))]).boxed();
        let mut s = SelectStream::new(vec![(key("bad"), failing)], Arc::new(RowBudget::new(0)));
        assert!(matches!(s.next().await, Some(Err(SelectableError::ObjectQuery { .. }))));
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_stops_pending_sources() {
        let pending: EventStream = stream::iter(vec![Ok(SelectEvent::records(b"x".to_vec()))]).chain(stream::pending()).boxed();
        let mut s = SelectStream::new(vec![(key("k"), pending)], Arc::new(RowBudget::new(0)));
        assert!(matches!(s.next().await, Some(Ok(SelectEvent::Records { .. }))));
        s.cancel();
        assert!(s.next().await.is_none());
    }

    #[test]
    fn budget_never_overshoots() {
        let budget = Arc::new(RowBudget::new(50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = budget.clone();
                std::thread::spawn(move || (0..100).filter(|_| b.try_take()).count())
            })
            .collect();
        let taken: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(taken, 50);
        assert!(budget.exhausted());
    }
}
