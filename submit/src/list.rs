//! Descending target array.

/// Inserts `t` into the descending array `a`, shifting worse members down
/// and dropping the last. Returns the insertion index, or `None` when `t`
/// is worse than every member — the array never grows.
pub fn insert_target(t: u64, a: &mut [u64]) -> Option<usize> {
    let index = a.partition_point(|x| *x >= t);
    if index == a.len() {
        return None;
    }
    a[index..].rotate_right(1);
    a[index] = t;
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_insert_keeps_descending_order() {
        let mut a = vec![0u64; 4];
        assert_eq!(insert_target(10, &mut a), Some(0));
        assert_eq!(insert_target(30, &mut a), Some(0));
        assert_eq!(insert_target(20, &mut a), Some(1));
        assert_eq!(a, vec![30, 20, 10, 0]);

        assert_eq!(insert_target(5, &mut a), Some(3));
        assert_eq!(a, vec![30, 20, 10, 5]);

        // Worse than everything: rejected, array untouched
        assert_eq!(insert_target(1, &mut a), None);
        assert_eq!(a, vec![30, 20, 10, 5]);
    }

    #[test]
    fn test_duplicate_values_insert_after_equal() {
        let mut a = vec![30u64, 20, 10, 5];
        assert_eq!(insert_target(20, &mut a), Some(2));
        assert_eq!(a, vec![30, 20, 20, 10]);
    }

    #[test]
    fn test_ring_accepts_exactly_the_top_n() {
        let mut rng = rand::thread_rng();
        let mut ring = vec![0u64; 50];
        let mut accepted = Vec::new();
        let mut all = Vec::new();

        for _ in 0..5000 {
            // Avoid 0, the empty-slot sentinel
            let t = rng.gen_range(1..u64::MAX);
            all.push(t);
            if insert_target(t, &mut ring).is_some() {
                accepted.push(t);
            }
        }

        // The final ring is exactly the 50 best of the stream
        all.sort_unstable_by(|a, b| b.cmp(a));
        all.truncate(50);
        let mut survivors = ring.clone();
        survivors.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(survivors, all);

        // Every member of the final ring was accepted at some point
        assert!(ring.iter().all(|t| accepted.contains(t)));
    }
}
