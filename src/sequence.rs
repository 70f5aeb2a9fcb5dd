//! IMAP sequence-set formatting

/// Compress message numbers into an IMAP sequence set.
///
/// Consecutive runs become `a:b` ranges. Input order and duplicates do
/// not matter.
///
/// ```
/// use mailwire::build_sequence_set;
///
/// assert_eq!(build_sequence_set(&[1, 2, 3, 5, 7, 8, 9]), "1:3,5,7:9");
/// ```
#[must_use]
pub fn build_sequence_set(numbers: &[u32]) -> String {
    let mut sorted = numbers.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };

    let (mut start, mut end) = (first, first);
    for n in iter {
        if end.checked_add(1) == Some(n) {
            end = n;
        } else {
            parts.push(range(start, end));
            start = n;
            end = n;
        }
    }
    parts.push(range(start, end));
    parts.join(",")
}

fn range(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}:{end}")
    }
}
