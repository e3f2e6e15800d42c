//! Pairs a file that vanished from one replica with an identical file that
//! appeared on the same replica, so the move is propagated instead of a
//! removal and a fresh transfer.

use crate::archive::Baseline;
use crate::conflict::is_conflict_copy;
use crate::detect::Outcome;
use crate::state::EntryState;
use crate::util::{edit_distance, file_name, parent_path, FnvHashMap};
use crate::Side;

/// How far apart two paths are as rename candidates, smaller is closer.
///
/// Keeping the file name beats keeping the directory, which beats a small
/// edit distance; remaining ties go to the lexicographically smaller path.
pub fn rename_distance<'a>(from: &str, to: &'a str) -> (bool, bool, usize, &'a str) {
    (
        file_name(from) != file_name(to),
        parent_path(from) != parent_path(to),
        edit_distance(from, to),
        to,
    )
}

pub fn pair_renames(mut outcomes: Vec<Outcome>, baseline: &Baseline) -> Vec<Outcome> {
    for &side in [Side::Local, Side::Remote].iter() {
        let destination = side.other();

        let mut appeared: FnvHashMap<&EntryState, Vec<usize>> = FnvHashMap::default();
        let mut vanished = Vec::new();
        for (index, outcome) in outcomes.iter().enumerate() {
            let (target, state, previous) = match outcome.propagates_to() {
                Some(propagation) => propagation,
                None => continue,
            };
            if target != destination {
                continue;
            }
            let path = outcome.path();
            if state.is_file() && !previous.entry_exists() && !baseline.contains(path) && !is_conflict_copy(path) {
                appeared.entry(state).or_insert_with(Vec::new).push(index);
            } else if !state.entry_exists() && previous.is_file() && baseline.get(path) == Some(previous) {
                vanished.push(index);
            }
        }

        let mut pairs = Vec::new();
        for from_index in vanished {
            let from = outcomes[from_index].path();
            let previous = match outcomes[from_index].propagates_to() {
                Some((_, _, previous)) => previous,
                None => continue,
            };
            let candidates = match appeared.get_mut(previous) {
                Some(candidates) => candidates,
                None => continue,
            };
            let closest = candidates
                .iter()
                .enumerate()
                .min_by(|&(_, &a), &(_, &b)| {
                    rename_distance(from, outcomes[a].path()).cmp(&rename_distance(from, outcomes[b].path()))
                })
                .map(|(position, _)| position);
            if let Some(position) = closest {
                pairs.push((from_index, candidates.swap_remove(position)));
            }
        }

        if pairs.is_empty() {
            continue;
        }

        let mut removed = vec![false; outcomes.len()];
        for &(from_index, to_index) in &pairs {
            let from = outcomes[from_index].path().to_owned();
            let to = outcomes[to_index].path().to_owned();
            let state = match outcomes[to_index].propagates_to() {
                Some((_, state, _)) => state.clone(),
                None => continue,
            };
            info!("Detected rename on the {} replica: {:?} -> {:?}", side, from, to);
            outcomes[from_index] = Outcome::Renamed { side, from, to, state };
            removed[to_index] = true;
        }

        let mut index = 0;
        outcomes.retain(|_| {
            let keep = !removed[index];
            index += 1;
            keep
        });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_wins_over_edit_distance() {
        let near = rename_distance("A/report.txt", "A/report2.txt");
        let moved = rename_distance("A/report.txt", "Archive/2020/report.txt");
        assert!(moved < near);
    }

    #[test]
    fn same_directory_wins_over_other_directories() {
        let sibling = rename_distance("A/a1", "A/b1");
        let elsewhere = rename_distance("A/a1", "B/b1");
        assert!(sibling < elsewhere);
    }

    #[test]
    fn ties_break_lexicographically() {
        assert!(rename_distance("A/x", "A/b") < rename_distance("A/x", "A/c"));
    }
}
