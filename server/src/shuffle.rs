use rand::seq::SliceRandom;

/// Returns a uniformly random permutation of `items` without disturbing the
/// caller's ordering. `SliceRandom::shuffle` is a Fisher-Yates shuffle.
pub fn permutation<T: Clone>(items: &[T]) -> Vec<T> {
    let mut shuffled = items.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());
    shuffled
}
