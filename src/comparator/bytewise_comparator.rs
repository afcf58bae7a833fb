use bytes::Bytes;

use super::Comparator;

/// Lexicographic byte order. This is the comparator a memtable built on
/// top of the list would hand in for raw key bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    type Item = Bytes;

    fn compare(&self, a: &Self::Item, b: &Self::Item) -> std::cmp::Ordering {
        a[..].cmp(&b[..])
    }
}
