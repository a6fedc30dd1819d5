use crate::gate::ProgressGate;
use crate::index::{IndexRec, RawIndex};

/// Comparison sort for a leaf run.
pub fn sort_run(recs: &mut [IndexRec]) {
    recs.sort_unstable_by_key(|r| r.key);
}

/// Merges the two adjacent sorted runs recs[..mid] and recs[mid..] so the
/// whole slice ends up sorted. Scratch-copies the left run; right-run
/// leftovers are already in position when the left run drains first.
pub fn merge_adjacent(recs: &mut [IndexRec], mid: usize) {
    if mid == 0 || mid == recs.len() {
        return;
    }
    if recs[mid - 1].key <= recs[mid].key {
        return;
    }
    let left = recs[..mid].to_vec();
    let mut i = 0;
    let mut j = mid;
    let mut k = 0;
    while i < left.len() && j < recs.len() {
        // Left wins ties, so equal keys keep their run order.
        if recs[j].key < left[i].key {
            recs[k] = recs[j];
            j += 1;
        } else {
            recs[k] = left[i];
            i += 1;
        }
        k += 1;
    }
    while i < left.len() {
        recs[k] = left[i];
        i += 1;
        k += 1;
    }
}

/// Task-parallel mergesort with a granularity cutoff: ranges at or below
/// the cutoff sort by comparison, larger ranges fork and merge. Call from
/// inside the rank's rayon pool.
pub fn merge_sort(recs: &mut [IndexRec], cutoff: usize) {
    let cutoff = cutoff.max(1);
    if recs.len() <= cutoff {
        sort_run(recs);
        return;
    }
    let mid = recs.len() / 2;
    let (lo, hi) = recs.split_at_mut(mid);
    rayon::join(|| merge_sort(lo, cutoff), || merge_sort(hi, cutoff));
    merge_adjacent(recs, mid);
}

/// Overlapped variant: each leaf blocks on the gate until the index
/// builder has filled its range, so the build and the sort proceed
/// together. Internal merges need no gating, their subranges were
/// already waited on.
pub fn merge_sort_overlapped(raw: RawIndex, cutoff: usize, gate: &ProgressGate) {
    sort_task(raw, 0, raw.len(), cutoff.max(1), gate);
}

fn sort_task(raw: RawIndex, lo: usize, hi: usize, cutoff: usize, gate: &ProgressGate) {
    let n = hi - lo;
    if n <= cutoff {
        gate.wait_until(hi);
        debug_assert!(gate.filled() >= hi);
        let run = unsafe { raw.range_mut(lo, hi) };
        sort_run(run);
        return;
    }
    let mid = lo + n / 2;
    rayon::join(
        || sort_task(raw, lo, mid, cutoff, gate),
        || sort_task(raw, mid, hi, cutoff, gate),
    );
    // Both children are complete here; the join hands their writes to
    // the merging task.
    let range = unsafe { raw.range_mut(lo, hi) };
    merge_adjacent(range, mid - lo);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn rec(key: u64) -> IndexRec {
        IndexRec { key, offset: key * 100, len: key as u32 }
    }

    fn keys(recs: &[IndexRec]) -> Vec<u64> {
        recs.iter().map(|r| r.key).collect()
    }

    fn is_sorted(recs: &[IndexRec]) -> bool {
        recs.windows(2).all(|w| w[0].key <= w[1].key)
    }

    #[test]
    fn merge_adjacent_interleaves_runs() {
        let mut recs: Vec<IndexRec> = [1, 4, 9, 2, 3, 10].iter().map(|&k| rec(k)).collect();
        merge_adjacent(&mut recs, 3);
        assert_eq!(keys(&recs), vec![1, 2, 3, 4, 9, 10]);
    }

    #[test]
    fn merge_adjacent_handles_degenerate_splits() {
        let mut recs: Vec<IndexRec> = [3, 7].iter().map(|&k| rec(k)).collect();
        merge_adjacent(&mut recs, 0);
        assert_eq!(keys(&recs), vec![3, 7]);
        merge_adjacent(&mut recs, 2);
        assert_eq!(keys(&recs), vec![3, 7]);

        let mut empty: Vec<IndexRec> = Vec::new();
        merge_adjacent(&mut empty, 0);
    }

    #[test]
    fn merge_sort_sorts_for_all_cutoffs() {
        let input: Vec<IndexRec> = (0..257u64).rev().map(rec).collect();
        for cutoff in [1usize, 2, 16, 300] {
            let mut recs = input.clone();
            merge_sort(&mut recs, cutoff);
            assert!(is_sorted(&recs), "cutoff {}", cutoff);
            assert_eq!(recs.len(), input.len());
        }
    }

    #[test]
    fn merge_sort_keeps_duplicates() {
        let mut recs: Vec<IndexRec> =
            [5u64, 1, 5, 5, 0, 1].iter().map(|&k| rec(k)).collect();
        merge_sort(&mut recs, 2);
        assert_eq!(keys(&recs), vec![0, 1, 1, 5, 5, 5]);
    }

    // The builder publishes progressively while leaves sort behind the
    // gate; the sort must end fully ordered and the gate must have
    // reached the full count before the last leaf ran.
    #[test]
    fn overlapped_sort_waits_for_the_builder() {
        let n = 1000usize;
        let cutoff = 128usize;
        let gate = ProgressGate::new();
        let mut recs: Vec<IndexRec> = vec![IndexRec::default(); n];

        let raw = RawIndex::new(&mut recs);
        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..n {
                    unsafe { raw_write(raw, i, rec((n - i) as u64)) };
                    if (i + 1) % cutoff == 0 {
                        gate.publish(i + 1);
                        thread::sleep(Duration::from_millis(1));
                    }
                }
                gate.publish(n);
            });
            merge_sort_overlapped(raw, cutoff, &gate);
        });

        assert_eq!(gate.filled(), n);
        assert!(is_sorted(&recs));
        assert_eq!(keys(&recs), (1..=n as u64).collect::<Vec<_>>());
    }

    // Test-only writer mirroring the index builder's fill pattern.
    unsafe fn raw_write(raw: RawIndex, i: usize, value: IndexRec) {
        raw.range_mut(i, i + 1)[0] = value;
    }
}
