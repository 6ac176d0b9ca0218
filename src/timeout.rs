use std::future::Future;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::ProbeError;

/// Race an operation against a deadline.
///
/// `op` receives a `CancellationToken` that is cancelled when the deadline
/// fires; operations that honour it can release resources early. The timer is
/// owned by the race and dropped with it, whatever the outcome.
pub async fn with_timeout<T, F, Fut>(op: F, deadline: Duration) -> Result<T, ProbeError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    let token = CancellationToken::new();
    let fut = op(token.clone());
    match time::timeout(deadline, fut).await {
        Ok(res) => res,
        Err(_) => {
            token.cancel();
            Err(ProbeError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn returns_value_before_deadline() {
        let v = with_timeout(|_| async { Ok::<_, ProbeError>(7) }, Duration::from_millis(200)).await;
        assert_eq!(v, Ok(7));
    }

    #[tokio::test]
    async fn passes_through_underlying_failure() {
        let v: Result<(), _> = with_timeout(
            |_| async { Err(ProbeError::ConnectionRejected("refused".into())) },
            Duration::from_millis(200),
        )
        .await;
        assert_eq!(v, Err(ProbeError::ConnectionRejected("refused".into())));
    }

    #[tokio::test]
    async fn times_out_and_signals_cancel() {
        let slot = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let v: Result<(), _> = with_timeout(
            move |token| {
                *inner.lock().unwrap() = Some(token);
                std::future::pending()
            },
            Duration::from_millis(20),
        )
        .await;
        assert_eq!(v, Err(ProbeError::Timeout));
        let token = slot.lock().unwrap().take().unwrap();
        assert!(token.is_cancelled());
    }
}
