//! Chronological merging of multiple event streams.
//!
//! [`MergedStreamIterator`] interleaves several already-ordered streams into
//! one sequence ordered by event timestamp. It is the read side for
//! cross-stream projections: each source advances only when one of its
//! events is selected, so per-source order is always preserved.

use std::iter::Peekable;

use nonempty::NonEmpty;

use crate::{event::RecordedEvent, store::StreamName};

/// A recorded event paired with the stream it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedEvent {
    /// The source stream.
    pub stream: StreamName,
    /// The event.
    pub event: RecordedEvent,
}

/// Iterator interleaving multiple streams by `created_at`.
///
/// Selection rule, applied before every yield: among the non-exhausted
/// sources, pick the one whose next event has the smallest `created_at`;
/// ties go to the source given first at construction. Only the selected
/// source advances. When every source is internally ordered by timestamp
/// the merged output is globally non-decreasing; sources are consulted
/// as-is either way.
pub struct MergedStreamIterator<I: Iterator<Item = RecordedEvent>> {
    sources: Vec<(StreamName, Peekable<I>)>,
}

impl<I: Iterator<Item = RecordedEvent>> MergedStreamIterator<I> {
    /// Create a merged iterator over at least one source.
    #[must_use]
    pub fn new(sources: NonEmpty<(StreamName, I)>) -> Self {
        Self {
            sources: sources
                .into_iter()
                .map(|(name, iter)| (name, iter.peekable()))
                .collect(),
        }
    }
}

impl<I: Iterator<Item = RecordedEvent>> Iterator for MergedStreamIterator<I> {
    type Item = MergedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let mut selected: Option<(usize, chrono::DateTime<chrono::Utc>)> = None;
        for (index, (_, source)) in self.sources.iter_mut().enumerate() {
            let Some(event) = source.peek() else {
                continue;
            };
            // Strict comparison keeps ties with the earlier source.
            if selected.is_none_or(|(_, best)| event.created_at < best) {
                selected = Some((index, event.created_at));
            }
        }

        let (index, _) = selected?;
        let (name, source) = &mut self.sources[index];
        let event = source.next()?;
        Some(MergedEvent {
            stream: name.clone(),
            event,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.sources.iter().fold((0, Some(0)), |(lo, hi), (_, s)| {
            let (slo, shi) = s.size_hint();
            (lo + slo, hi.zip(shi).map(|(a, b)| a + b))
        })
    }
}

impl<I> ExactSizeIterator for MergedStreamIterator<I> where
    I: ExactSizeIterator + Iterator<Item = RecordedEvent>
{
}
