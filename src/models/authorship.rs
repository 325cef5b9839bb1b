use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single text change expressed in character offsets of the document
/// before the change: `deleted` characters starting at `position` were
/// replaced by `inserted` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub position: usize,
    pub deleted: usize,
    pub inserted: usize,
}

impl TextEdit {
    /// Minimal edit turning `before` into `after`, or `None` when equal.
    pub fn between(before: &str, after: &str) -> Option<TextEdit> {
        let old: Vec<char> = before.chars().collect();
        let new: Vec<char> = after.chars().collect();

        let prefix = old
            .iter()
            .zip(new.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if prefix == old.len() && prefix == new.len() {
            return None;
        }

        let max_suffix = old.len().min(new.len()) - prefix;
        let suffix = old
            .iter()
            .rev()
            .zip(new.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();

        Some(TextEdit {
            position: prefix,
            deleted: old.len() - prefix - suffix,
            inserted: new.len() - prefix - suffix,
        })
    }
}

/// `[start, end)` character span attributed to an author.
/// `author == None` is the anonymous sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorshipRange {
    pub author: Option<String>,
    pub start: usize,
    pub end: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthorshipRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Ordered, non-overlapping ranges that partition `[0, document length)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorshipTracker {
    ranges: Vec<AuthorshipRange>,
}

impl AuthorshipTracker {
    /// Rebuild the partition from persisted ranges. Ranges are clipped to
    /// `doc_len`, overlaps resolved in favour of the earlier range, and gaps
    /// filled with anonymous ranges.
    pub fn from_persisted(mut persisted: Vec<AuthorshipRange>, doc_len: usize, now: DateTime<Utc>) -> Self {
        persisted.sort_by_key(|r| (r.start, r.end));

        let mut ranges: Vec<AuthorshipRange> = Vec::with_capacity(persisted.len() + 1);
        let mut cursor = 0;
        for mut range in persisted {
            range.end = range.end.min(doc_len);
            range.start = range.start.max(cursor);
            if range.is_empty() {
                continue;
            }
            if range.start > cursor {
                ranges.push(anonymous(cursor, range.start, now));
            }
            cursor = range.end;
            ranges.push(range);
        }
        if cursor < doc_len {
            ranges.push(anonymous(cursor, doc_len, now));
        }

        let mut tracker = Self { ranges };
        tracker.coalesce();
        tracker
    }

    pub fn ranges(&self) -> &[AuthorshipRange] {
        &self.ranges
    }

    /// Length of the text covered by the ranges.
    pub fn covered_len(&self) -> usize {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// Apply one edit made by `author` at `now`.
    ///
    /// Ranges after the edit point shift by the net delta, ranges straddling
    /// the edit are split, the inserted span is tagged with the author, and
    /// adjacent ranges of the same author are merged.
    pub fn apply(&mut self, edit: &TextEdit, author: Option<&str>, now: DateTime<Utc>) {
        let doc_len = self.covered_len();
        let position = edit.position.min(doc_len);
        let deleted = edit.deleted.min(doc_len - position);
        let inserted = edit.inserted;
        let delete_end = position + deleted;

        let mut left = Vec::with_capacity(self.ranges.len() + 2);
        let mut right = Vec::new();
        for range in self.ranges.drain(..) {
            if range.start < position {
                left.push(AuthorshipRange {
                    end: range.end.min(position),
                    ..range.clone()
                });
            }
            if range.end > delete_end {
                let start = range.start.max(delete_end);
                right.push(AuthorshipRange {
                    start: start - deleted + inserted,
                    end: range.end - deleted + inserted,
                    ..range
                });
            }
        }

        if inserted > 0 {
            left.push(AuthorshipRange {
                author: author.map(str::to_string),
                start: position,
                end: position + inserted,
                created_at: now,
                updated_at: now,
            });
        }
        left.extend(right);
        self.ranges = left;
        self.coalesce();
    }

    /// Distinct authenticated authors present in the ranges.
    pub fn authors(&self) -> Vec<&str> {
        let mut authors: Vec<&str> = self.ranges.iter().filter_map(|r| r.author.as_deref()).collect();
        authors.sort_unstable();
        authors.dedup();
        authors
    }

    fn coalesce(&mut self) {
        let mut merged: Vec<AuthorshipRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            if range.is_empty() {
                continue;
            }
            match merged.last_mut() {
                Some(prev) if prev.author == range.author && prev.end == range.start => {
                    prev.end = range.end;
                    prev.created_at = prev.created_at.min(range.created_at);
                    prev.updated_at = prev.updated_at.max(range.updated_at);
                }
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }
}

fn anonymous(start: usize, end: usize, now: DateTime<Utc>) -> AuthorshipRange {
    AuthorshipRange {
        author: None,
        start,
        end,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spans(tracker: &AuthorshipTracker) -> Vec<(Option<&str>, usize, usize)> {
        tracker
            .ranges()
            .iter()
            .map(|r| (r.author.as_deref(), r.start, r.end))
            .collect()
    }

    fn assert_partition(tracker: &AuthorshipTracker, len: usize) {
        let mut cursor = 0;
        for range in tracker.ranges() {
            assert_eq!(range.start, cursor, "gap or overlap in {:?}", tracker.ranges());
            assert!(range.end > range.start);
            cursor = range.end;
        }
        assert_eq!(cursor, len);
    }

    #[test]
    fn edit_between_strings() {
        assert_eq!(TextEdit::between("hello", "hello"), None);
        assert_eq!(
            TextEdit::between("", "abcde"),
            Some(TextEdit { position: 0, deleted: 0, inserted: 5 })
        );
        assert_eq!(
            TextEdit::between("abcde", "abXde"),
            Some(TextEdit { position: 2, deleted: 1, inserted: 1 })
        );
        assert_eq!(
            TextEdit::between("aaaa", "aaaaa"),
            Some(TextEdit { position: 4, deleted: 0, inserted: 1 })
        );
        assert_eq!(
            TextEdit::between("héllo wörld", "héllo"),
            Some(TextEdit { position: 5, deleted: 6, inserted: 0 })
        );
    }

    #[test]
    fn later_edit_splits_earlier_author() {
        let now = Utc::now();
        let mut tracker = AuthorshipTracker::default();
        tracker.apply(&TextEdit { position: 0, deleted: 0, inserted: 5 }, Some("a"), now);
        tracker.apply(&TextEdit { position: 2, deleted: 1, inserted: 1 }, Some("b"), now);

        assert_eq!(
            spans(&tracker),
            vec![(Some("a"), 0, 2), (Some("b"), 2, 3), (Some("a"), 3, 5)]
        );
        assert_partition(&tracker, 5);
    }

    #[test]
    fn insertion_shifts_following_ranges() {
        let now = Utc::now();
        let mut tracker = AuthorshipTracker::default();
        tracker.apply(&TextEdit { position: 0, deleted: 0, inserted: 5 }, Some("a"), now);
        tracker.apply(&TextEdit { position: 2, deleted: 0, inserted: 3 }, Some("b"), now);

        assert_eq!(
            spans(&tracker),
            vec![(Some("a"), 0, 2), (Some("b"), 2, 5), (Some("a"), 5, 8)]
        );
    }

    #[test]
    fn deletion_merges_neighbours_of_same_author() {
        let now = Utc::now();
        let mut tracker = AuthorshipTracker::default();
        tracker.apply(&TextEdit { position: 0, deleted: 0, inserted: 5 }, Some("a"), now);
        tracker.apply(&TextEdit { position: 2, deleted: 0, inserted: 2 }, None, now);
        tracker.apply(&TextEdit { position: 2, deleted: 2, inserted: 0 }, Some("b"), now);

        assert_eq!(spans(&tracker), vec![(Some("a"), 0, 5)]);
    }

    #[test]
    fn persisted_ranges_are_normalised() {
        let now = Utc::now();
        let persisted = vec![
            AuthorshipRange { author: Some("a".into()), start: 2, end: 4, created_at: now, updated_at: now },
            AuthorshipRange { author: Some("b".into()), start: 3, end: 20, created_at: now, updated_at: now },
        ];
        let tracker = AuthorshipTracker::from_persisted(persisted, 10, now);

        assert_eq!(
            spans(&tracker),
            vec![(None, 0, 2), (Some("a"), 2, 4), (Some("b"), 4, 10)]
        );
        assert_eq!(tracker.authors(), vec!["a", "b"]);
    }

    #[test]
    fn empty_document_has_no_ranges() {
        let tracker = AuthorshipTracker::from_persisted(Vec::new(), 0, Utc::now());
        assert!(tracker.ranges().is_empty());
        assert_eq!(tracker.covered_len(), 0);
    }

    proptest! {
        #[test]
        fn edits_keep_exact_partition(
            initial in 0usize..40,
            edits in prop::collection::vec((0usize..60, 0usize..10, 0usize..10, 0u8..3), 1..40)
        ) {
            let now = Utc::now();
            let mut tracker = AuthorshipTracker::from_persisted(Vec::new(), initial, now);
            let mut len = initial;
            for (pos, del, ins, who) in edits {
                let position = pos.min(len);
                let deleted = del.min(len - position);
                let author = match who { 0 => None, 1 => Some("a"), _ => Some("b") };
                tracker.apply(&TextEdit { position, deleted, inserted: ins }, author, now);
                len = len - deleted + ins;

                let mut cursor = 0;
                for pair in tracker.ranges().windows(2) {
                    prop_assert!(pair[0].author != pair[1].author);
                }
                for range in tracker.ranges() {
                    prop_assert_eq!(range.start, cursor);
                    prop_assert!(range.end > range.start);
                    cursor = range.end;
                }
                prop_assert_eq!(cursor, len);
            }
        }
    }
}
