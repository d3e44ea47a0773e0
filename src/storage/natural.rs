use std::cmp::Ordering;

/// Compare two names the way a person would: digit runs compare by value,
/// everything else case-insensitively.
///
/// `"2.png" < "10.png"` and `"Chip_9" < "chip_10"`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks::new(a);
    let mut right = Chunks::new(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = compare_chunks(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Sort strings in place by [`natural_cmp`].
pub fn sort_natural<S: AsRef<str>>(items: &mut [S]) {
    items.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

fn compare_chunks(l: &str, r: &str) -> Ordering {
    let l_digit = l.as_bytes()[0].is_ascii_digit();
    let r_digit = r.as_bytes()[0].is_ascii_digit();
    match (l_digit, r_digit) {
        (true, true) => {
            // Compare by value without parsing, so arbitrarily long runs work
            let l_trim = l.trim_start_matches('0');
            let r_trim = r.trim_start_matches('0');
            l_trim
                .len()
                .cmp(&r_trim.len())
                .then_with(|| l_trim.cmp(r_trim))
        }
        // Numbers sort before text, as integers do before strings
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => l.to_lowercase().cmp(&r.to_lowercase()),
    }
}

/// Splits a string into alternating digit and non-digit runs.
struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Chunks<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let first = self.rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != digits)
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(chunk)
    }
}
