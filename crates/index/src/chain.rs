//! Per-kind merge ordering.
//!
//! Chunk `n` may only run its similarity lookup after chunk `n - 1` has made
//! its merge decision and that decision's persist task has finished. Each
//! chunk holds a [`MergeTurn`]: a receiver for its predecessor's persist handle
//! and a sender for its own. The first turn is handed `None`.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::PipelineError;

pub type PersistHandle = JoinHandle<Result<(), PipelineError>>;

type Slot = Option<PersistHandle>;

pub struct MergeChain;

impl MergeChain {
    /// `len` ordered turns plus the tail that sees the last persist handle.
    pub fn new(len: usize) -> (Vec<MergeTurn>, ChainTail) {
        let (first_tx, mut prev_rx) = oneshot::channel::<Slot>();
        // The receiver is alive, so the send cannot fail.
        let _ = first_tx.send(None);

        let mut turns = Vec::with_capacity(len);
        for _ in 0..len {
            let (tx, rx) = oneshot::channel();
            turns.push(MergeTurn { rx: prev_rx, tx });
            prev_rx = rx;
        }

        (turns, ChainTail { rx: prev_rx })
    }
}

async fn await_predecessor(rx: oneshot::Receiver<Slot>) -> Result<(), PipelineError> {
    match rx.await.map_err(|_| PipelineError::ChainBroken)? {
        Some(handle) => handle.await?,
        None => Ok(()),
    }
}

pub struct MergeTurn {
    rx: oneshot::Receiver<Slot>,
    tx: oneshot::Sender<Slot>,
}

impl MergeTurn {
    /// Wait until every earlier chunk's merge for this kind has been persisted.
    pub async fn acquire(self) -> Result<HeldTurn, PipelineError> {
        await_predecessor(self.rx).await?;
        Ok(HeldTurn { tx: self.tx })
    }

    /// Give up this turn without merging, passing the predecessor's pending
    /// persist on unchanged.
    pub async fn forward(self) -> Result<(), PipelineError> {
        let slot = self.rx.await.map_err(|_| PipelineError::ChainBroken)?;
        let _ = self.tx.send(slot);
        Ok(())
    }
}

/// Exclusive right to merge. Dropping it without [`HeldTurn::release`] breaks the chain.
pub struct HeldTurn {
    tx: oneshot::Sender<Slot>,
}

impl HeldTurn {
    pub fn release(self, persist: Option<PersistHandle>) {
        // A closed receiver means the successor was aborted.
        let _ = self.tx.send(persist);
    }
}

pub struct ChainTail {
    rx: oneshot::Receiver<Slot>,
}

impl ChainTail {
    /// Final barrier: the last persist of the run has completed.
    pub async fn finish(self) -> Result<(), PipelineError> {
        await_predecessor(self.rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_turns_run_in_chain_order() {
        let (turns, tail) = MergeChain::new(3);
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        // Spawn in reverse with shrinking delays so later turns are ready first.
        for (i, turn) in turns.into_iter().enumerate().rev() {
            let log = log.clone();
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5 * i as u64)).await;
                let held = turn.acquire().await?;
                log.lock().unwrap().push(format!("decide {}", i));
                let log = log.clone();
                let persist = tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    log.lock().unwrap().push(format!("persist {}", i));
                    Ok(())
                });
                held.release(Some(persist));
                Ok::<(), PipelineError>(())
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        tail.finish().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["decide 0", "persist 0", "decide 1", "persist 1", "decide 2", "persist 2"]
        );
    }

    #[tokio::test]
    async fn test_forward_passes_handle_through() {
        let (mut turns, tail) = MergeChain::new(2);
        let second = turns.pop().unwrap();
        let first = turns.pop().unwrap();

        let held = first.acquire().await.unwrap();
        held.release(Some(tokio::spawn(async {
            Err(PipelineError::ChainBroken)
        })));
        second.forward().await.unwrap();

        // the first turn's failure reaches the tail through the forwarded turn
        assert!(matches!(tail.finish().await, Err(PipelineError::ChainBroken)));
    }

    #[tokio::test]
    async fn test_dropped_turn_breaks_chain() {
        let (mut turns, _tail) = MergeChain::new(2);
        let second = turns.pop().unwrap();
        let first = turns.pop().unwrap();

        let held = first.acquire().await.unwrap();
        drop(held);

        assert!(matches!(second.acquire().await, Err(PipelineError::ChainBroken)));
    }

    #[tokio::test]
    async fn test_empty_chain_finishes() {
        let (turns, tail) = MergeChain::new(0);
        assert!(turns.is_empty());
        tail.finish().await.unwrap();
    }
}
