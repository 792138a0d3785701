use std::hint::black_box;

/// Compare a presented bridge secret against the configured one.
///
/// Every byte of the longer input is visited and differences are folded into
/// one accumulator, so neither a length mismatch nor the position of the first
/// differing byte changes the amount of work done. An empty expected secret
/// never matches.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let a = provided.as_bytes();
    let b = expected.as_bytes();
    let len = a.len().max(b.len());

    let mut diff = a.len() ^ b.len();
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    black_box(diff) == 0
}
