//! Streaming k-way merge of already-sorted sequences.

use std::{
  mem,
  pin::Pin,
  task::{Context, Poll},
};

use futures::{Stream, TryStream, TryStreamExt as _};

/// Merge `sources`, each already sorted by `key`, into one sorted stream.
///
/// With `reverse` the sources must be sorted descending and the output is
/// descending too. Each step yields the head with the smallest (or largest)
/// key; equal keys come out in source order. Nothing is pulled from a source
/// until the first element is requested, and afterwards each source is at
/// most one element ahead of the output. The first error from any source is
/// yielded as is.
pub fn collate<S, K, F>(sources: impl IntoIterator<Item = S>, key: F, reverse: bool) -> Collate<S, K, F>
where
  S: TryStream + Unpin,
  K: Ord,
  F: FnMut(&S::Ok) -> K,
{
  let sources: Vec<S> = sources.into_iter().collect();
  let heads = sources.iter().map(|_| Head::Empty).collect();
  Collate { sources, heads, key, reverse }
}

enum Head<K, T> {
  /// Nothing buffered; the source must be polled.
  Empty,
  Ready(K, T),
  /// The source ended.
  Done,
}

/// Stream returned by [`collate`].
pub struct Collate<S: TryStream, K, F> {
  sources: Vec<S>,
  heads:   Vec<Head<K, S::Ok>>,
  key:     F,
  reverse: bool,
}

impl<S, K, F> Stream for Collate<S, K, F>
where
  S: TryStream + Unpin,
  S::Ok: Unpin,
  K: Ord + Unpin,
  F: FnMut(&S::Ok) -> K + Unpin,
{
  type Item = Result<S::Ok, S::Error>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();

    let mut pending = false;
    for (source, head) in this.sources.iter_mut().zip(this.heads.iter_mut()) {
      if !matches!(head, Head::Empty) {
        continue;
      }
      match source.try_poll_next_unpin(cx) {
        Poll::Ready(Some(Ok(item))) => {
          let key = (this.key)(&item);
          *head = Head::Ready(key, item);
        }
        Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
        Poll::Ready(None) => *head = Head::Done,
        Poll::Pending => pending = true,
      }
    }
    // Every live source needs a head before the smallest one is known.
    if pending {
      return Poll::Pending;
    }

    // Strict comparison keeps the earliest source on ties.
    let mut best: Option<(usize, &K)> = None;
    for (index, head) in this.heads.iter().enumerate() {
      let Head::Ready(key, _) = head else { continue };
      let better = match best {
        None => true,
        Some((_, current)) if this.reverse => key > current,
        Some((_, current)) => key < current,
      };
      if better {
        best = Some((index, key));
      }
    }

    let Some((index, _)) = best else {
      return Poll::Ready(None);
    };
    match mem::replace(&mut this.heads[index], Head::Empty) {
      Head::Ready(_, item) => Poll::Ready(Some(Ok(item))),
      _ => Poll::Ready(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::Cell, convert::Infallible};

  use futures::{StreamExt as _, TryStreamExt as _, executor::block_on, stream};
  use proptest::prelude::*;

  use super::*;

  fn source<T>(items: Vec<T>) -> stream::Iter<std::vec::IntoIter<Result<T, Infallible>>> {
    stream::iter(items.into_iter().map(Ok).collect::<Vec<_>>())
  }

  fn merge_by<T, K, F>(sources: Vec<Vec<T>>, key: F, reverse: bool) -> Vec<T>
  where
    T: Unpin,
    K: Ord + Unpin,
    F: FnMut(&T) -> K + Unpin,
  {
    let merged = collate(sources.into_iter().map(source), key, reverse);
    block_on(merged.try_collect()).unwrap()
  }

  fn merged(sources: Vec<Vec<i32>>) -> Vec<i32> { merge_by(sources, |x| *x, false) }

  #[test]
  fn merges_with_identity_key() {
    let sources = vec![(0..4).collect(), (0..7).collect(), (3..6).collect()];
    let mut expected: Vec<i32> = sources.iter().flatten().copied().collect();
    expected.sort();
    assert_eq!(merged(sources), expected);
  }

  #[test]
  fn merges_with_custom_key() {
    let sources: Vec<Vec<i32>> = vec![(1..=5).rev().collect(), (1..=4).rev().collect()];
    assert_eq!(merge_by(sources, |x| -*x, false), vec![5, 4, 4, 3, 3, 2, 2, 1, 1]);
  }

  #[test]
  fn merges_in_reverse() {
    let sources: Vec<Vec<i32>> = vec![
      (1..=4).rev().collect(),
      (1..=7).rev().collect(),
      Vec::new(),
    ];
    let mut expected: Vec<i32> = sources.iter().flatten().copied().collect();
    expected.sort_by(|a, b| b.cmp(a));
    assert_eq!(merge_by(sources, |x| *x, true), expected);
  }

  #[test]
  fn no_sources_yield_nothing() {
    assert!(merged(Vec::new()).is_empty());
  }

  #[test]
  fn one_source_is_unchanged() {
    assert_eq!(merged(vec![vec![0, 1]]), vec![0, 1]);
  }

  #[test]
  fn ties_drain_earlier_sources_first() {
    let sources = vec![vec![(1, 'a'), (2, 'a')], vec![(1, 'b'), (2, 'b')]];
    let out = merge_by(sources.clone(), |(k, _)| *k, false);
    assert_eq!(out, vec![(1, 'a'), (1, 'b'), (2, 'a'), (2, 'b')]);

    let reversed: Vec<Vec<(i32, char)>> = sources
      .into_iter()
      .map(|s| s.into_iter().rev().collect())
      .collect();
    let out = merge_by(reversed, |(k, _)| *k, true);
    assert_eq!(out, vec![(2, 'a'), (2, 'b'), (1, 'a'), (1, 'b')]);
  }

  #[test]
  fn pulls_at_most_one_ahead() {
    let pulled = Cell::new(0);
    let counting = |n: i32| {
      let pulled = &pulled;
      stream::iter(0..n).map(move |x| {
        pulled.set(pulled.get() + 1);
        Ok::<_, Infallible>(x)
      })
    };

    let mut merged = collate(vec![counting(3), counting(3)], |x| *x, false);
    assert_eq!(pulled.get(), 0);
    assert_eq!(block_on(merged.next()), Some(Ok(0)));
    // One head per source was primed; nothing pulled past them.
    assert_eq!(pulled.get(), 2);
    assert_eq!(block_on(merged.next()), Some(Ok(0)));
    assert_eq!(pulled.get(), 3);
  }

  #[test]
  fn source_errors_stop_the_merge() {
    let failing = stream::iter(vec![Ok(1), Err("boom"), Ok(5)]);
    let healthy = stream::iter(vec![Ok(2), Ok(3)]);
    let mut merged = collate(vec![failing, healthy], |x: &i32| *x, false);
    assert_eq!(block_on(merged.next()), Some(Ok(1)));
    assert_eq!(block_on(merged.next()), Some(Err("boom")));
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_output_is_sorted_permutation(
      mut sources in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..20), 0..6),
      reverse in any::<bool>()
    ) {
      for s in &mut sources {
        s.sort();
        if reverse {
          s.reverse();
        }
      }
      let mut expected: Vec<u8> = sources.iter().flatten().copied().collect();
      expected.sort();

      let out = merge_by(sources, |x| *x, reverse);

      let in_order = out.windows(2).all(|w| if reverse { w[0] >= w[1] } else { w[0] <= w[1] });
      prop_assert!(in_order, "unsorted output: {:?}", out);
      let mut seen = out.clone();
      seen.sort();
      prop_assert_eq!(seen, expected);
    }
  }
}
