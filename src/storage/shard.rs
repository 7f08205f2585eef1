//! A single-threaded work lane.
//!
//! Each shard runs one OS thread draining an mpsc queue. Every message
//! for a user owned by this shard executes against a store borrowed from
//! the shard's [`Pool`], one at a time and in submission order, which is
//! what lets the [`Store`] go without internal locking.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::pool::Pool;
use super::store::Store;
use super::timestamp::Timestamp;
use super::{Result, StorageError};

/// A unit of work executed on the shard thread. The closure receives the
/// borrow result so pool failures reach the caller through the same
/// reply path as operation results.
pub(crate) type Work = Box<dyn FnOnce(Result<&mut Store>) + Send>;

pub(crate) enum Message {
    Execute { uid: String, work: Work },
    Purge { now: Timestamp, reply: oneshot::Sender<Result<usize>> },
    Shutdown { done: oneshot::Sender<()> },
}

/// One work lane: a queue, a worker thread, and the pool it owns.
#[derive(Debug)]
pub(crate) struct Shard {
    send: mpsc::Sender<Message>,
}

impl Shard {
    /// Spawns the shard's worker thread.
    pub(crate) fn spawn(index: usize, pool: Pool) -> Self {
        let (send, recv) = mpsc::channel(1024);
        let builder = std::thread::Builder::new().name(format!("sync-shard-{index}"));
        builder
            .spawn(move || run(pool, recv))
            .expect("failed to spawn shard thread");
        Self { send }
    }

    /// Enqueues a message, failing with `PoolClosed` once the shard has
    /// shut down.
    pub(crate) async fn submit(&self, msg: Message) -> Result<()> {
        self.send
            .send(msg)
            .await
            .map_err(|_| StorageError::PoolClosed)
    }

    /// Asks the shard to stop and waits until its pool has closed.
    pub(crate) async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.submit(Message::Shutdown { done }).await.is_ok() {
            wait.await.ok();
        }
    }
}

fn run(pool: Pool, mut recv: mpsc::Receiver<Message>) {
    while let Some(msg) = recv.blocking_recv() {
        match msg {
            Message::Execute { uid, work } => match pool.borrow(&uid) {
                Ok(handle) => {
                    let mut store = handle.store();
                    work(Ok(&mut store));
                }
                Err(err) => {
                    if !matches!(err, StorageError::PoolClosed) {
                        error!(%uid, %err, "failed to open user store");
                    }
                    work(Err(err));
                }
            },
            Message::Purge { now, reply } => {
                reply.send(pool.purge_resident(now)).ok();
            }
            Message::Shutdown { done } => {
                recv.close();
                pool.shutdown();
                done.send(()).ok();
                break;
            }
        }
    }
    // queue dropped without an explicit shutdown: still close the pool
    pool.shutdown();
    debug!(thread = ?std::thread::current().name(), "shard stopped");
}
