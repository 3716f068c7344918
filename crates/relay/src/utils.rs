//! Utility macros and functions for the relay crate.
//!
//! This module provides helper macros and functions that are used internally
//! by the parsers and stream adapters.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, ReadBuf};

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// It's useful for validation checks where you want to return early with an error
/// if some condition is not satisfied.
///
/// # Arguments
///
/// * `$predicate` - A boolean expression that should evaluate to true
/// * `$error` - The error value to return if the predicate is false
///
/// # Example
///
/// ```ignore
/// ensure!(headers.len() < MAX_HEADERS, ParseError::TooManyHeaders);
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Polls `reader` for at most `limit` bytes, appending them to `buf`.
///
/// Returns the number of bytes that were read; `0` means the reader reached end-of-stream
/// (or `limit`/the free space of `buf` was zero).
pub(crate) fn poll_read_limited<R>(
    reader: Pin<&mut R>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
    limit: usize,
) -> Poll<io::Result<usize>>
where
    R: AsyncRead + ?Sized,
{
    let max = limit.min(buf.remaining());
    if max == 0 {
        return Poll::Ready(Ok(0));
    }

    let dst = buf.initialize_unfilled_to(max);
    let mut limited = ReadBuf::new(dst);
    ready!(reader.poll_read(cx, &mut limited))?;

    let n = limited.filled().len();
    buf.advance(n);
    Poll::Ready(Ok(n))
}
