use std::collections::{BTreeSet, HashSet, VecDeque};
use itertools::Itertools;
use tracing::debug;
use crate::contact_modes::ContactMode;
use crate::contact_modes::mode_sequence::ModeSequence;
use crate::mode_sequencer::{all_contact_modes, is_start_consistent_mode, ModeSequencer, SequenceLimits, SequencerOutput};
use crate::utils::utils_errors::PlanningError;

/// Bounded enumeration of mode sequences.
///
/// Levels are opened one at a time by switch count (0, 1, ... `max_mode_switches`).  Within
/// a level, candidates are ordered by start consistency, then summed mode-type rank, then by
/// how evenly the horizon is split.  A level is expanded one (consistency, rank) bucket at a
/// time, so only the bucket being handed out is ever materialized.  A seed sequence, if any,
/// is handed out first and never repeated.
pub struct EnumerationSequencer {
    modes: Vec<ContactMode>,
    mode_ranks: Vec<usize>,
    mode_consistent: Vec<bool>,
    limits: SequenceLimits,
    seed: Option<ModeSequence>,
    seed_pending: bool,
    next_level: usize,
    level: Option<LevelCursor>,
    queue: VecDeque<ModeSequence>,
    handed_out: HashSet<ModeSequence>
}

/// Remaining buckets of the level currently being handed out.
struct LevelCursor {
    num_segments: usize,
    /// Admissible step splits, grouped by unevenness in ascending order.
    split_groups: Vec<Vec<Vec<usize>>>,
    /// `(start inconsistent, summed rank)` keys still to expand, in order.
    buckets: VecDeque<(bool, usize)>
}

impl EnumerationSequencer {
    pub fn new(pair_idxs: &[usize], allow_sliding: bool, limits: SequenceLimits, separated_at_start: BTreeSet<usize>, seed: Option<ModeSequence>) -> Self {
        let seed_pending = seed.is_some();
        let modes = all_contact_modes(pair_idxs, allow_sliding);
        let mode_ranks = modes.iter().map(|m| m.rank()).collect();
        let mode_consistent = modes.iter().map(|m| is_start_consistent_mode(m, &separated_at_start)).collect();
        Self {
            modes,
            mode_ranks,
            mode_consistent,
            limits,
            seed,
            seed_pending,
            next_level: 0,
            level: None,
            queue: VecDeque::new(),
            handed_out: HashSet::new()
        }
    }
    fn open_level(&self, num_switches: usize) -> LevelCursor {
        let num_segments = num_switches + 1;
        let n = self.limits.horizon_steps;
        let mut split_groups: Vec<Vec<Vec<usize>>> = vec![];
        let mut buckets = VecDeque::new();
        if n < num_segments * self.limits.min_segment_steps.max(1) {
            return LevelCursor { num_segments, split_groups, buckets };
        }

        let mut splits: Vec<Vec<usize>> = (1..n).combinations(num_switches)
            .map(|cuts| {
                let mut bounds = vec![0];
                bounds.extend(cuts);
                bounds.push(n);
                bounds.windows(2).map(|w| w[1] - w[0]).collect::<Vec<usize>>()
            })
            .filter(|steps: &Vec<usize>| steps.iter().all(|s| *s >= self.limits.min_segment_steps))
            .collect();
        splits.sort_by_key(|steps| split_unevenness(steps));
        for steps in splits {
            match split_groups.last_mut() {
                Some(group) if split_unevenness(&group[0]) == split_unevenness(&steps) => { group.push(steps); }
                _ => { split_groups.push(vec![steps]); }
            }
        }

        let min_rank = self.mode_ranks.iter().min().cloned().unwrap_or(0);
        let max_rank = self.mode_ranks.iter().max().cloned().unwrap_or(0);
        for inconsistent in [false, true] {
            for rank in num_segments * min_rank..=num_segments * max_rank { buckets.push_back((inconsistent, rank)); }
        }
        debug!(num_switches, num_splits = split_groups.iter().map(|g| g.len()).sum::<usize>(), "opened enumeration level");
        LevelCursor { num_segments, split_groups, buckets }
    }
    /// Every sequence of the current level whose first mode has the given start consistency
    /// and whose modes sum to `rank`.
    fn expand_bucket(&self, inconsistent: bool, rank: usize) -> Vec<ModeSequence> {
        let level = match &self.level { Some(level) => level, None => { return vec![]; } };
        let mut tuples = vec![];
        let mut prefix = vec![];
        self.collect_mode_tuples(level.num_segments, inconsistent, rank, &mut prefix, &mut tuples);
        if tuples.is_empty() { return vec![]; }

        let mut out_vec = vec![];
        for group in &level.split_groups {
            for tuple in &tuples {
                for steps in group {
                    let segments = tuple.iter().map(|m| self.modes[*m].clone()).zip(steps.iter().cloned()).collect();
                    if let Ok(s) = ModeSequence::new(segments, self.limits.horizon_steps) { out_vec.push(s); }
                }
            }
        }
        out_vec
    }
    /// Depth-first over mode indices; adjacent modes differ and the remaining rank must stay
    /// reachable.
    fn collect_mode_tuples(&self, len: usize, inconsistent: bool, rank_left: usize, prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if prefix.len() == len {
            if rank_left == 0 { out.push(prefix.clone()); }
            return;
        }
        let slots_after = len - prefix.len() - 1;
        let min_rank = self.mode_ranks.iter().min().cloned().unwrap_or(0);
        let max_rank = self.mode_ranks.iter().max().cloned().unwrap_or(0);
        for (idx, r) in self.mode_ranks.iter().enumerate() {
            if *r > rank_left { continue; }
            let rest = rank_left - r;
            if rest < slots_after * min_rank || rest > slots_after * max_rank { continue; }
            match prefix.last() {
                Some(prev) => { if *prev == idx { continue; } }
                None => { if self.mode_consistent[idx] == inconsistent { continue; } }
            }
            prefix.push(idx);
            self.collect_mode_tuples(len, inconsistent, rest, prefix, out);
            prefix.pop();
        }
    }
}
impl ModeSequencer for EnumerationSequencer {
    fn next_candidate(&mut self) -> Result<SequencerOutput, PlanningError> {
        if self.seed_pending {
            self.seed_pending = false;
            if let Some(seed) = &self.seed {
                if self.limits.admits(seed) {
                    self.handed_out.insert(seed.clone());
                    return Ok(SequencerOutput::Candidate(seed.clone()));
                }
                debug!(seed = %seed, "seed sequence exceeds the search limits and is skipped");
            }
        }

        loop {
            while let Some(s) = self.queue.pop_front() {
                if self.handed_out.insert(s.clone()) { return Ok(SequencerOutput::Candidate(s)); }
            }
            let bucket = self.level.as_mut().and_then(|l| l.buckets.pop_front());
            match bucket {
                Some((inconsistent, rank)) => {
                    let batch = self.expand_bucket(inconsistent, rank);
                    self.queue.extend(batch);
                }
                None => {
                    if self.next_level > self.limits.max_mode_switches { return Ok(SequencerOutput::Exhausted); }
                    self.level = Some(self.open_level(self.next_level));
                    self.next_level += 1;
                }
            }
        }
    }
    fn restart(&mut self) {
        self.seed_pending = self.seed.is_some();
        self.next_level = 0;
        self.level = None;
        self.queue.clear();
        self.handed_out.clear();
    }
}

fn split_unevenness(steps: &[usize]) -> usize {
    let max = steps.iter().max().cloned().unwrap_or(0);
    let min = steps.iter().min().cloned().unwrap_or(0);
    max - min
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact_modes::PairMode;
    use crate::mode_sequencer::is_start_consistent;

    fn limits(horizon_steps: usize, max_mode_switches: usize, min_segment_steps: usize) -> SequenceLimits {
        SequenceLimits { horizon_steps, max_mode_switches, min_segment_steps }
    }

    fn drain(s: &mut EnumerationSequencer) -> Vec<ModeSequence> {
        let mut out = vec![];
        while let SequencerOutput::Candidate(c) = s.next_candidate().unwrap() { out.push(c); }
        out
    }

    #[test]
    fn counts_per_level() {
        // 1 pair, no sliding: 2 modes.  Level 0: 2.  Level 1: 2 orders x 3 splits of 4 steps.
        let mut s = EnumerationSequencer::new(&[0], false, limits(4, 1, 1), BTreeSet::new(), None);
        let all = drain(&mut s);
        assert_eq!(all.len(), 2 + 6);
        assert!(all[..2].iter().all(|c| c.num_switches() == 0));
        assert!(all.iter().all(|c| c.total_steps() == 4));
        assert_eq!(s.next_candidate().unwrap(), SequencerOutput::Exhausted);
    }

    #[test]
    fn min_segment_steps_prunes_splits() {
        let mut s = EnumerationSequencer::new(&[0], false, limits(4, 2, 2), BTreeSet::new(), None);
        let all = drain(&mut s);
        // level 1 only allows the 2 + 2 split; level 2 needs 6 steps
        assert_eq!(all.len(), 2 + 2);
        assert!(all.iter().all(|c| c.step_counts().iter().all(|n| *n >= 2)));
    }

    #[test]
    fn start_consistent_low_rank_even_splits_first() {
        let separated: BTreeSet<usize> = [0].into_iter().collect();
        let mut s = EnumerationSequencer::new(&[0], true, limits(4, 1, 1), separated.clone(), None);
        let all = drain(&mut s);
        assert_eq!(all[0], ModeSequence::new_single_mode(ContactMode::new_all_separated(&[0]), 4).unwrap());
        let level_one: Vec<&ModeSequence> = all.iter().filter(|c| c.num_switches() == 1).collect();
        let expected_first = ModeSequence::new(vec![(ContactMode::new_all_separated(&[0]), 2), (ContactMode::new_from_pairs(&[(0, PairMode::Sticking)]), 2)], 4).unwrap();
        assert_eq!(level_one[0], &expected_first);
        let first_inconsistent = level_one.iter().position(|c| !is_start_consistent(c, &separated)).unwrap();
        assert!(level_one[first_inconsistent..].iter().all(|c| !is_start_consistent(c, &separated)));
    }

    #[test]
    fn seed_first_then_skipped_and_restart_rewinds() {
        let seed = ModeSequence::new(vec![(ContactMode::new_all_separated(&[0]), 1), (ContactMode::new_from_pairs(&[(0, PairMode::Sticking)]), 3)], 4).unwrap();
        let mut s = EnumerationSequencer::new(&[0], false, limits(4, 1, 1), BTreeSet::new(), Some(seed.clone()));
        let all = drain(&mut s);
        assert_eq!(all[0], seed);
        assert_eq!(all.iter().filter(|c| **c == seed).count(), 1);
        assert_eq!(all.len(), 8);
        s.restart();
        assert_eq!(s.next_candidate().unwrap(), SequencerOutput::Candidate(seed));
    }

    #[test]
    fn first_candidates_of_a_large_search_arrive_quickly() {
        // 5 pairs with sliding: 1024 joint modes, so a full 1-switch level holds ~40M sequences.
        let separated: BTreeSet<usize> = [0, 1, 2].into_iter().collect();
        let start = std::time::Instant::now();
        let mut s = EnumerationSequencer::new(&[0, 1, 2, 3, 4], true, limits(40, 3, 1), separated.clone(), None);
        let mut pulled = vec![];
        for _ in 0..1100 {
            match s.next_candidate().unwrap() {
                SequencerOutput::Candidate(c) => { pulled.push(c); }
                SequencerOutput::Exhausted => { panic!("search ended early"); }
            }
        }
        assert!(start.elapsed() < std::time::Duration::from_secs(5), "took {:?}", start.elapsed());
        assert!(pulled[..1024].iter().all(|c| c.num_switches() == 0));
        let first_switching = &pulled[1024];
        assert_eq!(first_switching.num_switches(), 1);
        assert!(is_start_consistent(first_switching, &separated));
        assert_eq!(first_switching.rank(), 1);
        assert_eq!(first_switching.step_counts(), vec![20, 20]);
    }

    #[test]
    fn restart_forgets_what_was_handed_out() {
        let mut s = EnumerationSequencer::new(&[0], false, limits(4, 1, 1), BTreeSet::new(), None);
        let first_pass = drain(&mut s);
        s.restart();
        let second_pass = drain(&mut s);
        assert_eq!(first_pass, second_pass);
    }
}
