//! Async test helpers
//!
//! Bounded waits on channels so a missing broadcast or event fails the test
//! instead of hanging it.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvTimeoutError {
    #[error("receive operation timed out")]
    Timeout,
    #[error("channel closed")]
    Closed,
}

/// Helper for receiving from a channel with a timeout
pub async fn recv_timeout<T>(rx: &mut mpsc::Receiver<T>, duration: Duration) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Receive the next event from a broadcast channel, skipping lag notices
pub async fn recv_event_timeout<T: Clone>(
    rx: &mut broadcast::Receiver<T>,
    duration: Duration,
) -> Result<T, RecvTimeoutError> {
    timeout(duration, async {
        loop {
            match rx.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(RecvTimeoutError::Closed),
            }
        }
    })
    .await
    .map_err(|_| RecvTimeoutError::Timeout)?
}

/// Drain everything currently queued without waiting
pub fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_timeout_success() {
        let (tx, mut rx) = mpsc::channel(10);
        tx.send(42).await.unwrap();

        assert_eq!(recv_timeout(&mut rx, Duration::from_millis(100)).await, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeout_timeout() {
        let (_tx, mut rx) = mpsc::channel::<i32>(10);

        assert_eq!(
            recv_timeout(&mut rx, Duration::from_millis(10)).await,
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_recv_timeout_closed() {
        let (tx, mut rx) = mpsc::channel::<i32>(10);
        drop(tx);

        assert_eq!(
            recv_timeout(&mut rx, Duration::from_millis(100)).await,
            Err(RecvTimeoutError::Closed)
        );
    }

    #[tokio::test]
    async fn test_recv_event_and_drain() {
        let (tx, mut rx) = broadcast::channel(4);
        tx.send("added").unwrap();
        assert_eq!(recv_event_timeout(&mut rx, Duration::from_millis(100)).await, Ok("added"));

        let (tx, mut rx) = mpsc::channel(4);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert_eq!(drain(&mut rx), vec![1, 2]);
    }
}
