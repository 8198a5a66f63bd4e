//! Short random identifiers.

const POPULATION: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of the uid embedded in revision filenames.
pub const REVISION_UID_LEN: usize = 8;

/// Generates a random string of length `n` over lowercase ASCII letters and
/// the digits 0-9.
#[must_use]
pub fn short_uid(n: usize) -> String {
    use rand::RngExt;
    let mut rng = rand::rng();
    (0..n)
        .map(|_| char::from(POPULATION[rng.random_range(0..POPULATION.len())]))
        .collect()
}
