use std::future::Future;

/// Bounded retry count for a single logical operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub const fn once() -> Self {
        Self::new(1)
    }
}

/// Runs `attempt` until it succeeds, the error fails `should_retry`, or the
/// retry budget is spent. `before_retry` runs between attempts.
pub async fn retry_with<T, E, A, AF, P, H, HF>(
    policy: RetryPolicy,
    mut attempt: A,
    should_retry: P,
    mut before_retry: H,
) -> Result<T, E>
where
    A: FnMut(u32) -> AF,
    AF: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    H: FnMut(&E) -> HF,
    HF: Future<Output = ()>,
{
    let mut retries = 0;
    loop {
        match attempt(retries).await {
            Ok(value) => return Ok(value),
            Err(error) if retries < policy.max_retries && should_retry(&error) => {
                before_retry(&error).await;
                retries += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
