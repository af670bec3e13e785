//! Work deferred to the next transaction boundary.

use tracing::debug;

use crate::{
  Result,
  blob::{BlobKey, BlobStore},
};

/// An action run in enqueue order on commit, or undone on rollback.
#[derive(Debug, Clone, PartialEq)]
pub enum Deferred {
  /// Apply a staged payload or removal to permanent storage.
  PromoteBlob(BlobKey),
}

#[derive(Debug, Default)]
pub struct Transaction {
  queue: Vec<Deferred>,
}

impl Transaction {
  pub fn new() -> Self { Transaction::default() }

  pub fn defer(&mut self, action: Deferred) { self.queue.push(action); }

  pub fn len(&self) -> usize { self.queue.len() }

  pub fn is_empty(&self) -> bool { self.queue.is_empty() }

  /// Run every queued action in order. The queue is cleared even when an
  /// action fails; the first failure is returned after the rest have run.
  pub fn run(&mut self, blobs: &mut BlobStore) -> Result<()> {
    let mut first_err = None;
    for action in self.queue.drain(..) {
      debug!(?action, "running deferred action");
      let outcome = match &action {
        Deferred::PromoteBlob(key) => blobs.promote(key),
      };
      if let Err(e) = outcome
        && first_err.is_none()
      {
        first_err = Some(e);
      }
    }
    blobs.begin();
    first_err.map_or(Ok(()), Err)
  }

  /// Undo staged work and clear the queue.
  pub fn undo(&mut self, blobs: &mut BlobStore) -> Result<()> {
    self.queue.clear();
    blobs.rollback()
  }
}
