//! Generation and parsing of conflict copy names.
//!
//! A conflict copy of `dir/stem.ext` is named
//! `dir/stem_conflict[_<actor>]-<discriminator>.ext`. Parsing strips only the
//! rightmost marker, so a copy of a copy resolves one level at a time.

use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::util::file_name;

pub const CONFLICT_MARKER: &str = "_conflict";

fn tail_regex() -> &'static Regex {
    static TAIL: OnceLock<Regex> = OnceLock::new();
    // `_` before the digits is the legacy separator, still found on disk.
    TAIL.get_or_init(|| Regex::new(r"^_conflict(?:_[^/]*)?[-_][0-9]+$").expect("valid conflict tail regex"))
}

/// Splits at the final `.` of the last path component.
fn split_extension(path: &str) -> (&str, &str) {
    let name_start = path.len() - file_name(path).len();
    match path[name_start..].rfind('.') {
        Some(i) => path.split_at(name_start + i),
        None => (path, ""),
    }
}

/// Reduces an actor tag to alphanumerics and `-`.
pub fn sanitize_actor_tag(actor_tag: &str) -> String {
    actor_tag
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// The name of a conflict copy of `base_path`.
pub fn generate(base_path: &str, actor_tag: &str, discriminator: u64) -> String {
    let (stem, extension) = split_extension(base_path);
    let actor_tag = sanitize_actor_tag(actor_tag);
    let mut copy = String::with_capacity(base_path.len() + CONFLICT_MARKER.len() + actor_tag.len() + 22);
    copy.push_str(stem);
    copy.push_str(CONFLICT_MARKER);
    if !actor_tag.is_empty() {
        copy.push('_');
        copy.push_str(&actor_tag);
    }
    copy.push('-');
    copy.push_str(&discriminator.to_string());
    copy.push_str(extension);
    copy
}

/// The path that the conflict copy `name` stands in for, or `None` if `name`
/// is not a conflict copy.
pub fn parse_base(name: &str) -> Option<String> {
    let (stem, extension) = split_extension(name);
    let start = stem.rfind(CONFLICT_MARKER)?;
    if !tail_regex().is_match(&stem[start..]) {
        return None;
    }
    let mut base = String::with_capacity(start + extension.len());
    base.push_str(&stem[..start]);
    base.push_str(extension);
    Some(base)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictName {
    NotConflict,
    Copy { base: String },
    /// Carries the marker but not the shape of a conflict copy.
    Malformed,
}

pub fn classify_name(name: &str) -> ConflictName {
    match parse_base(name) {
        Some(base) => ConflictName::Copy { base },
        None => {
            let (stem, _) = split_extension(name);
            if file_name(stem).contains(CONFLICT_MARKER) {
                ConflictName::Malformed
            } else {
                ConflictName::NotConflict
            }
        }
    }
}

pub fn is_conflict_copy(name: &str) -> bool {
    parse_base(name).is_some()
}

/// A source of discriminators that never hands out the same value twice.
pub trait Discriminator {
    fn next(&self) -> u64;
}

/// Milliseconds since the epoch, bumped whenever two calls land in the same
/// millisecond.
#[derive(Debug, Default)]
pub struct MonotonicDiscriminator {
    last: AtomicU64,
}

impl MonotonicDiscriminator {
    pub fn new() -> Self {
        MonotonicDiscriminator { last: AtomicU64::new(0) }
    }
}

impl Discriminator for MonotonicDiscriminator {
    fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self.last.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Counts up from a fixed start.
#[derive(Debug)]
pub struct SequenceDiscriminator {
    next: AtomicU64,
}

impl SequenceDiscriminator {
    pub fn starting_at(first: u64) -> Self {
        SequenceDiscriminator { next: AtomicU64::new(first) }
    }
}

impl Discriminator for SequenceDiscriminator {
    fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_names() {
        let rows = [
            ("a/b/foo", None),
            ("a/b/foo.txt", None),
            ("a/b/foo_conflict", None),
            ("a/b/foo_conflict.txt", None),
            ("a/b/foo_conflict-123.txt", Some("a/b/foo.txt")),
            ("a/b/foo_conflict_123.txt", Some("a/b/foo.txt")),
            ("a/b/foo_conflict_foo-123.txt", Some("a/b/foo.txt")),
            ("a/b/foo_conflict-123", Some("a/b/foo")),
            ("a/b/foo_conflict_123", Some("a/b/foo")),
            ("a/b/foo_conflict_foo-123", Some("a/b/foo")),
            ("a/b/foo_conflict-123_conflict-456.txt", Some("a/b/foo_conflict-123.txt")),
            ("a/b/foo_conflict_123_conflict_456.txt", Some("a/b/foo_conflict_123.txt")),
            ("a/b/foo_conflict_foo-123_conflict_bar-456.txt", Some("a/b/foo_conflict_foo-123.txt")),
        ];
        for &(input, output) in rows.iter() {
            assert_eq!(parse_base(input).as_deref(), output, "parsing {:?}", input);
        }
    }

    #[test]
    fn malformed_rightmost_marker_does_not_fall_back() {
        assert_eq!(parse_base("foo_conflict-1_conflict.txt"), None);
        assert_eq!(parse_base("foo_conflict-12a"), None);
        assert_eq!(parse_base("foo_conflict-"), None);
        assert_eq!(classify_name("foo_conflict.txt"), ConflictName::Malformed);
        assert_eq!(classify_name("foo.txt"), ConflictName::NotConflict);
    }

    #[test]
    fn directories_are_not_extensions() {
        assert_eq!(generate("a.d/foo", "me", 7), "a.d/foo_conflict_me-7");
        assert_eq!(parse_base("a.d/foo_conflict_me-7").as_deref(), Some("a.d/foo"));
        assert_eq!(parse_base("x_conflict-1/foo"), None);
    }

    #[test]
    fn generated_names_parse_back() {
        assert_eq!(generate("A/a1", "me", 1234), "A/a1_conflict_me-1234");
        assert_eq!(generate("a/b/foo.tar.gz", "", 5), "a/b/foo.tar_conflict-5.gz");
        let copy = generate("notes_conflict.txt", "me", 9);
        assert_eq!(parse_base(&copy).as_deref(), Some("notes_conflict.txt"));
    }

    #[test]
    fn actor_tags_cannot_inject_markers() {
        let copy = generate("foo.txt", "my_conflict.box/x", 3);
        assert_eq!(copy, "foo_conflict_my-conflict-box-x-3.txt");
        assert_eq!(parse_base(&copy).as_deref(), Some("foo.txt"));
    }

    #[test]
    fn nested_copies_take_one_application_per_level() {
        let mut name = "foo.txt".to_owned();
        for level in 0..3 {
            name = generate(&name, "me", level);
        }
        let mut applications = 0;
        while let Some(base) = parse_base(&name) {
            name = base;
            applications += 1;
        }
        assert_eq!(applications, 3);
        assert_eq!(name, "foo.txt");
    }

    #[test]
    fn discriminators_never_repeat() {
        let source = MonotonicDiscriminator::new();
        let mut previous = source.next();
        for _ in 0..1000 {
            let next = source.next();
            assert!(next > previous);
            previous = next;
        }
    }
}
