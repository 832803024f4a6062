//! Secure scopes: scoped acquisition of sensitive bytes with guaranteed
//! zero-fill on every exit path.
//!
//! `zeroize` performs the clearing with volatile writes and a compiler
//! fence, so the fill cannot be elided by the optimizer.

use std::panic::{self, AssertUnwindSafe};

use zeroize::Zeroize;

/// Acquire a secret from `provider`, lend it to `body`, and zero it before
/// release: on normal return, on error, and on panic (the panic resumes
/// after the fill).
pub fn with_secure<S, T, E, P, B>(provider: P, body: B) -> Result<T, E>
where
    S: Zeroize,
    P: FnOnce() -> Result<S, E>,
    B: FnOnce(&S) -> Result<T, E>,
{
    let mut secret = provider()?;
    let result = panic::catch_unwind(AssertUnwindSafe(|| body(&secret)));
    secret.zeroize();
    drop(secret);
    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// In-place variant over a caller-owned buffer. The buffer is zero-filled
/// on every exit path but not released, so callers can observe the fill.
pub fn with_secure_in_place<T, E, B>(buf: &mut [u8], body: B) -> Result<T, E>
where
    B: FnOnce(&[u8]) -> Result<T, E>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| body(buf)));
    buf.zeroize();
    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}
