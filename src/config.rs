use regex::Regex;

/// The configuration for a sync run.
#[derive(Debug)]
pub struct SyncInfo {
    /// Identifies this client in the names of the conflict copies it creates.
    pub actor_tag: String,
    pub ignore: Ignore,
    /// Pair a vanished file with an identical new file on the same replica
    /// and propagate a single move.
    pub detect_renames: bool,
    /// The number of threads used to classify paths.
    pub classify_threads: usize,
}

impl SyncInfo {
    pub fn new<S: Into<String>>(actor_tag: S) -> Self {
        SyncInfo {
            actor_tag: actor_tag.into(),
            ignore: Ignore::nothing(),
            detect_renames: true,
            classify_threads: 1,
        }
    }
}

#[derive(Debug)]
/// Determines which paths are left out of classification entirely.
pub struct Ignore {
    pub regexes: Vec<Regex>,
    pub paths: Vec<String>,
}

impl Ignore {
    /// An `Ignore` struct that ignores nothing
    pub fn nothing() -> Self {
        Ignore {
            regexes: Vec::new(),
            paths: Vec::new(),
        }
    }

    /// checks if the path is on the ignore list
    pub fn is_ignored(&self, path: &str) -> bool {
        for ignore in &self.paths {
            if crate::util::is_within(path, ignore) {
                return true;
            }
        }
        for ignore in &self.regexes {
            if ignore.is_match(path) {
                return true;
            }
        }
        false
    }
}

impl Default for Ignore {
    fn default() -> Self {
        Ignore::nothing()
    }
}
