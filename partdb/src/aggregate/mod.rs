//! Folding record streams into results.
//!
//! Scans hand back a [`RecordStream`]: finite, ordered and single-use. The
//! helpers here consume one sequentially, so a reducer that performs I/O per
//! item (such as a delete) finishes before the next item is pulled, and the
//! first error ends the fold.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};

use crate::error::Result;
use crate::query::Query;
use crate::record::Record;

pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Record predicate supplied by callers.
pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Test applied to each record before it reaches the reducer.
#[derive(Clone)]
pub enum Matcher {
    All,
    Query(Query),
    Predicate(Predicate),
}

impl Matcher {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Matcher::All => true,
            Matcher::Query(query) => query.matches(record),
            Matcher::Predicate(f) => f(record),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::All => f.write_str("All"),
            Matcher::Query(q) => write!(f, "Query({q})"),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Fold `stream` into an accumulator, awaiting each reducer call in turn.
pub async fn reduce<A, F, Fut>(stream: RecordStream, seed: A, reducer: F) -> Result<A>
where
    F: FnMut(A, Record) -> Fut,
    Fut: Future<Output = Result<A>>,
{
    stream.try_fold(seed, reducer).await
}

/// Drop records that fail `matcher`.
pub fn filter(stream: RecordStream, matcher: Matcher) -> RecordStream {
    if let Matcher::All = matcher {
        return stream;
    }
    stream
        .try_filter(move |record| future::ready(matcher.matches(record)))
        .boxed()
}

/// Reducer collecting the records that satisfy `condition`.
pub fn concat<C>(
    condition: C,
) -> impl FnMut(Vec<Record>, Record) -> future::Ready<Result<Vec<Record>>>
where
    C: Fn(&Record) -> bool,
{
    move |mut acc, record| {
        if condition(&record) {
            acc.push(record);
        }
        future::ready(Ok(acc))
    }
}

/// Reducer counting records once `action` has completed for each.
pub fn count<F, Fut>(action: F) -> impl FnMut(usize, Record) -> BoxFuture<'static, Result<usize>>
where
    F: Fn(Record) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    move |n, record| {
        let done = action(record);
        async move {
            done.await?;
            Ok(n + 1)
        }
        .boxed()
    }
}
