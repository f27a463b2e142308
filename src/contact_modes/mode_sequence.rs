use std::fmt;
use serde::{Deserialize, Serialize};
use crate::contact_modes::ContactMode;
use crate::utils::utils_errors::PlanningError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModeSegment {
    pub mode: ContactMode,
    pub num_steps: usize
}

/// Ordered contact modes, each held for a number of knot intervals.
///
/// A `ModeSequence` always covers the horizon exactly: step counts sum to the horizon step
/// count, every segment has at least one step, and consecutive segments have different
/// modes.  Step `k` is the interval between knots `k` and `k + 1`; knot `k + 1` belongs to
/// the segment of step `k` and knot 0 belongs to the first segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModeSequence {
    segments: Vec<ModeSegment>
}
impl ModeSequence {
    pub fn new(segments: Vec<(ContactMode, usize)>, horizon_steps: usize) -> Result<Self, PlanningError> {
        if segments.is_empty() {
            return Err(PlanningError::new_invalid_mode_sequence_error("a mode sequence needs at least one segment.", file!(), line!()));
        }
        let total: usize = segments.iter().map(|s| s.1).sum();
        if total != horizon_steps {
            return Err(PlanningError::new_invalid_mode_sequence_error(&format!("segment steps sum to {} but the horizon has {} steps.", total, horizon_steps), file!(), line!()));
        }
        let pair_idxs = segments[0].0.pair_idxs();
        for (i, (mode, num_steps)) in segments.iter().enumerate() {
            if *num_steps == 0 {
                return Err(PlanningError::new_invalid_mode_sequence_error(&format!("segment {} has zero steps.", i), file!(), line!()));
            }
            if mode.pair_idxs() != pair_idxs {
                return Err(PlanningError::new_invalid_mode_sequence_error(&format!("segment {} covers pairs {:?} but segment 0 covers {:?}.", i, mode.pair_idxs(), pair_idxs), file!(), line!()));
            }
            if i > 0 && segments[i - 1].0 == *mode {
                return Err(PlanningError::new_invalid_mode_sequence_error(&format!("segments {} and {} have the same mode {}.", i - 1, i, mode), file!(), line!()));
            }
        }

        Ok(Self { segments: segments.into_iter().map(|(mode, num_steps)| ModeSegment { mode, num_steps }).collect() })
    }
    pub fn new_single_mode(mode: ContactMode, horizon_steps: usize) -> Result<Self, PlanningError> {
        Self::new(vec![(mode, horizon_steps)], horizon_steps)
    }
    /// Compresses a per-step list of modes into segments.
    pub fn new_from_per_step_modes(per_step: &[ContactMode]) -> Result<Self, PlanningError> {
        let mut segments: Vec<(ContactMode, usize)> = vec![];
        for m in per_step {
            let continues_last = matches!(segments.last(), Some((last, _)) if last == m);
            if continues_last {
                if let Some(last) = segments.last_mut() { last.1 += 1; }
            } else {
                segments.push((m.clone(), 1));
            }
        }
        Self::new(segments, per_step.len())
    }
    pub fn segments(&self) -> &Vec<ModeSegment> {
        &self.segments
    }
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }
    pub fn num_switches(&self) -> usize {
        self.segments.len() - 1
    }
    pub fn total_steps(&self) -> usize {
        self.segments.iter().map(|s| s.num_steps).sum()
    }
    pub fn pair_idxs(&self) -> Vec<usize> {
        self.segments[0].mode.pair_idxs()
    }
    pub fn step_counts(&self) -> Vec<usize> {
        self.segments.iter().map(|s| s.num_steps).collect()
    }
    pub fn segment_start_step(&self, segment_idx: usize) -> Result<usize, PlanningError> {
        PlanningError::new_check_for_idx_out_of_bound_error(segment_idx, self.segments.len(), file!(), line!())?;
        Ok(self.segments[..segment_idx].iter().map(|s| s.num_steps).sum())
    }
    /// First and last knot (inclusive) spanned by a segment.  Boundary knots are shared.
    pub fn segment_knot_range(&self, segment_idx: usize) -> Result<(usize, usize), PlanningError> {
        let start = self.segment_start_step(segment_idx)?;
        Ok((start, start + self.segments[segment_idx].num_steps))
    }
    pub fn segment_of_step(&self, step: usize) -> Result<usize, PlanningError> {
        let mut acc = 0;
        for (i, s) in self.segments.iter().enumerate() {
            acc += s.num_steps;
            if step < acc { return Ok(i); }
        }
        Err(PlanningError::new_idx_out_of_bound_error(step, acc, file!(), line!()))
    }
    pub fn segment_of_knot(&self, knot: usize) -> Result<usize, PlanningError> {
        if knot == 0 { return Ok(0); }
        self.segment_of_step(knot - 1)
    }
    /// If `knot` ends segment `i` and starts segment `i + 1`, returns `i + 1`.
    pub fn next_segment_at_boundary(&self, knot: usize) -> Option<usize> {
        let mut acc = 0;
        for i in 0..self.segments.len() - 1 {
            acc += self.segments[i].num_steps;
            if acc == knot { return Some(i + 1); }
        }
        None
    }
    pub fn mode_of_step(&self, step: usize) -> Result<&ContactMode, PlanningError> {
        Ok(&self.segments[self.segment_of_step(step)?].mode)
    }
    pub fn mode_of_knot(&self, knot: usize) -> Result<&ContactMode, PlanningError> {
        Ok(&self.segments[self.segment_of_knot(knot)?].mode)
    }
    pub fn expand_per_step(&self) -> Vec<&ContactMode> {
        let mut out_vec = vec![];
        for s in &self.segments {
            for _ in 0..s.num_steps { out_vec.push(&s.mode); }
        }
        out_vec
    }
    /// Number of (step, pair) slots whose modes differ.
    pub fn per_step_distance(&self, other: &ModeSequence) -> usize {
        let a = self.expand_per_step();
        let b = other.expand_per_step();
        let mut out = a.len().max(b.len()) - a.len().min(b.len());
        for (m1, m2) in a.iter().zip(b.iter()) { out += m1.num_differing_pairs(m2); }
        out
    }
    /// True if the per-step expansions of both sequences differ in exactly one contiguous run
    /// of steps that carries a single mode in each sequence.
    pub fn differs_by_single_mode(&self, other: &ModeSequence) -> bool {
        let a = self.expand_per_step();
        let b = other.expand_per_step();
        if a.len() != b.len() { return false; }
        let differing: Vec<usize> = (0..a.len()).filter(|k| a[*k] != b[*k]).collect();
        let (first, last) = match (differing.first(), differing.last()) {
            (Some(f), Some(l)) => { (*f, *l) }
            _ => { return false; }
        };
        if last - first + 1 != differing.len() { return false; }
        (first..=last).all(|k| a[k] == a[first] && b[k] == b[first])
    }
    /// Spread between the longest and shortest segment.
    pub fn unevenness(&self) -> usize {
        let counts = self.step_counts();
        let max = counts.iter().max().cloned().unwrap_or(0);
        let min = counts.iter().min().cloned().unwrap_or(0);
        max - min
    }
    pub fn rank(&self) -> usize {
        self.segments.iter().map(|s| s.mode.rank()).sum()
    }
}
impl fmt::Display for ModeSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strings: Vec<String> = self.segments.iter().map(|s| format!("{} x{}", s.mode, s.num_steps)).collect();
        write!(f, "[{}]", strings.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact_modes::{PairMode, SlidingDirection};

    fn sep() -> ContactMode { ContactMode::new_from_pairs(&[(0, PairMode::Separated)]) }
    fn stick() -> ContactMode { ContactMode::new_from_pairs(&[(0, PairMode::Sticking)]) }
    fn slide() -> ContactMode { ContactMode::new_from_pairs(&[(0, PairMode::Sliding(SlidingDirection::Positive))]) }

    #[test]
    fn step_counts_must_sum_to_horizon() {
        assert!(ModeSequence::new(vec![(sep(), 2), (stick(), 3)], 5).is_ok());
        assert!(matches!(ModeSequence::new(vec![(sep(), 2), (stick(), 3)], 6), Err(PlanningError::InvalidModeSequence(_))));
        assert!(matches!(ModeSequence::new(vec![(sep(), 2), (stick(), 3)], 4), Err(PlanningError::InvalidModeSequence(_))));
        assert!(ModeSequence::new(vec![(sep(), 0), (stick(), 5)], 5).is_err());
        assert!(ModeSequence::new(vec![(sep(), 2), (sep(), 3)], 5).is_err());
        assert!(ModeSequence::new(vec![], 0).is_err());
    }

    #[test]
    fn knots_and_segments() {
        let s = ModeSequence::new(vec![(sep(), 2), (stick(), 3)], 5).unwrap();
        assert_eq!(s.segment_of_knot(0).unwrap(), 0);
        assert_eq!(s.segment_of_knot(2).unwrap(), 0);
        assert_eq!(s.segment_of_knot(3).unwrap(), 1);
        assert_eq!(s.segment_of_knot(5).unwrap(), 1);
        assert!(s.segment_of_knot(6).is_err());
        assert_eq!(s.segment_knot_range(1).unwrap(), (2, 5));
        assert_eq!(s.next_segment_at_boundary(2), Some(1));
        assert_eq!(s.next_segment_at_boundary(5), None);
        assert_eq!(s.num_switches(), 1);
        assert_eq!(format!("{}", s), "[{0: separated} x2, {0: sticking} x3]");
    }

    #[test]
    fn single_mode_difference() {
        let a = ModeSequence::new(vec![(sep(), 2), (stick(), 3)], 5).unwrap();
        let b = ModeSequence::new(vec![(sep(), 3), (stick(), 2)], 5).unwrap();
        let c = ModeSequence::new(vec![(sep(), 2), (slide(), 3)], 5).unwrap();
        let d = ModeSequence::new(vec![(stick(), 2), (slide(), 3)], 5).unwrap();
        assert!(a.differs_by_single_mode(&b));
        assert!(a.differs_by_single_mode(&c));
        assert!(!a.differs_by_single_mode(&a));
        assert!(!a.differs_by_single_mode(&d));
        assert_eq!(a.per_step_distance(&d), 5);
    }

    #[test]
    fn compress_per_step_modes() {
        let s = ModeSequence::new_from_per_step_modes(&[sep(), sep(), stick(), stick(), stick()]).unwrap();
        assert_eq!(s.step_counts(), vec![2, 3]);
        assert_eq!(s.unevenness(), 1);
    }
}
