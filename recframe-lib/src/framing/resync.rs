use tracing::trace;

use crate::diagnostic::{CorruptionCause, CorruptionEvent, Span};

/// Turns the individual skips made while resynchronizing into corruption events.
///
/// Contiguous skips of bytes that cannot start a frame are reported once per run.
/// A rejected candidate opens a region covering the extent it claimed; further
/// rejections starting inside that region belong to the same event, and a frame
/// accepted inside it cuts the region short. Unrelated causes always get their own
/// events.
#[derive(Debug, Default)]
pub struct ResyncEngine {
    open: Option<CorruptionEvent>,
    skipped: u64,
}

impl ResyncEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes dropped so far.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Whether `offset` lies inside the extent claimed by an open rejected candidate, so
    /// a rejection starting there would be absorbed into it.
    #[must_use]
    pub fn covers(&self, offset: u64) -> bool {
        self.open
            .as_ref()
            .is_some_and(|open| !open.cause.is_run() && open.span.contains(offset))
    }

    /// Record that `span` was skipped for `cause`, returning any event this closes.
    pub fn skip(&mut self, span: Span, cause: CorruptionCause) -> Option<CorruptionEvent> {
        let Some(mut open) = self.open.take() else {
            self.skipped += span.len();
            self.open = Some(CorruptionEvent { span, cause });
            return None;
        };

        let is_run = open.cause.is_run();
        if is_run && open.cause.merges_with(&cause) && span.start == open.span.end {
            self.skipped += span.len();
            open.span.end = span.end;
            self.open = Some(open);
            return None;
        }
        if !is_run && open.span.contains(span.start) {
            if span.end <= open.span.end || !cause.is_run() {
                trace!(%span, region = %open.span, "absorbed by open region");
                self.open = Some(open);
                return None;
            }
            // a run escaping the region continues as its own event
            let rest = Span::new(open.span.end, span.end);
            self.skipped += rest.len();
            self.open = Some(CorruptionEvent { span: rest, cause });
            return Some(open);
        }

        self.skipped += span.len();
        self.open = Some(CorruptionEvent { span, cause });
        Some(open)
    }

    /// A frame was accepted at `offset`; close any open event, trimmed to end there.
    pub fn accept(&mut self, offset: u64) -> Option<CorruptionEvent> {
        let mut open = self.open.take()?;
        if open.span.end > offset {
            self.skipped -= open.span.end - offset.max(open.span.start);
            open.span.end = offset.max(open.span.start);
        }
        Some(open)
    }

    /// Close any open event as is.
    pub fn flush(&mut self) -> Option<CorruptionEvent> {
        self.open.take()
    }

    /// Close out at end of input. `tail` covers leftover bytes too few to frame.
    ///
    /// A run of unframeable bytes that reaches the tail or end of input is reported,
    /// together with the tail, as one [CorruptionCause::TrailingData] event.
    pub fn finish(&mut self, eof: u64, tail: Option<Span>) -> Vec<CorruptionEvent> {
        let mut events = Vec::with_capacity(2);
        let trailing = |span| CorruptionEvent {
            span,
            cause: CorruptionCause::TrailingData,
        };
        if let Some(tail) = tail {
            self.skipped += tail.len();
        }

        match (self.open.take(), tail) {
            (Some(open), tail) if open.cause.is_unframed() => {
                match tail {
                    Some(tail) if tail.start == open.span.end => {
                        events.push(trailing(Span::new(open.span.start, tail.end)));
                    }
                    Some(tail) => {
                        events.push(open);
                        events.push(trailing(tail));
                    }
                    None if open.span.end == eof => {
                        events.push(trailing(open.span));
                    }
                    None => events.push(open),
                }
            }
            (Some(open), Some(tail)) if open.span.contains(tail.start) && tail.end <= open.span.end => {
                self.skipped -= tail.len();
                events.push(open);
            }
            (Some(open), tail) => {
                events.push(open);
                events.extend(tail.map(trailing));
            }
            (None, tail) => events.extend(tail.map(trailing)),
        }
        events
    }
}
