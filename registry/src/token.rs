use crate::error::{RegistryError, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;

pub const TOKEN_LENGTH: usize = 64;
pub const MAX_ATTEMPTS: usize = 100;

/// Draw a fresh random token that `is_taken` does not already know about
pub fn allocate<F>(is_taken: F) -> Result<String>
where
    F: Fn(&str) -> bool,
{
    allocate_with(&mut rand::thread_rng(), TOKEN_LENGTH, MAX_ATTEMPTS, is_taken)
}

pub fn allocate_with<R, F>(rng: &mut R, length: usize, attempts: usize, is_taken: F) -> Result<String>
where
    R: Rng,
    F: Fn(&str) -> bool,
{
    for _ in 0..attempts {
        let token: String = (0..length)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect();

        if !is_taken(&token) {
            return Ok(token);
        }
    }

    Err(RegistryError::ExhaustedKeyspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;
    use std::collections::HashSet;

    #[test]
    fn test_token_shape() {
        let token = allocate(|_| false).unwrap();

        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_tokens_are_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let token = allocate(|t| seen.contains(t)).unwrap();
            assert!(seen.insert(token));
        }
    }

    #[test]
    fn test_retries_past_collisions() {
        let calls = Cell::new(0);
        let mut rng = StdRng::seed_from_u64(7);

        let token = allocate_with(&mut rng, 8, 10, |_| {
            calls.set(calls.get() + 1);
            calls.get() < 4
        })
        .unwrap();

        assert_eq!(token.len(), 8);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_exhausted_keyspace() {
        let mut rng = StdRng::seed_from_u64(7);
        let result = allocate_with(&mut rng, 1, MAX_ATTEMPTS, |_| true);

        assert_eq!(result, Err(RegistryError::ExhaustedKeyspace));
    }
}
