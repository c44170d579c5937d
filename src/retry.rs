/// Run `attempt` up to `limit` times, returning the first outcome `accept`
/// approves. The attempt closure receives the zero-based attempt number so
/// callers can log which try produced a result.
///
/// Returns `None` when every attempt was rejected (or `limit` is zero); the
/// last rejected outcome is discarded, matching hardware-retry semantics
/// where a stale partial result must never be acted on.
pub fn retry_with_limit<T, F, P>(limit: u8, mut attempt: F, accept: P) -> Option<T>
where
    F: FnMut(u8) -> T,
    P: Fn(&T) -> bool,
{
    for n in 0..limit {
        let outcome = attempt(n);
        if accept(&outcome) {
            return Some(outcome);
        }
    }
    None
}
