use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::file;

/// A scope-bound background writer. Writes staged during the scope complete
/// on a worker thread; closing the scope joins the worker and fails if any
/// staged write failed.
pub struct Writer {
    tx: mpsc::Sender<(PathBuf, Vec<u8>)>,
}

impl Writer {
    pub fn stage(&self, path: PathBuf, bytes: Vec<u8>) {
        // The worker only disappears after the scope closes, so this send
        // cannot fail while a Writer handle exists.
        let _ = self.tx.send((path, bytes));
    }

    /// Stage a value in the versioned binary envelope.
    pub fn stage_binary<T: Serialize>(&self, path: PathBuf, value: &T) -> Result<()> {
        let bytes = loam_domain::binary::encode(value)
            .with_context(|| format!("failed to encode {}", path.display()))?;
        self.stage(path, bytes);
        Ok(())
    }
}

pub fn scope<R>(work: impl FnOnce(&Writer) -> Result<R>) -> Result<R> {
    let (tx, rx) = mpsc::channel::<(PathBuf, Vec<u8>)>();
    let worker = thread::spawn(move || -> Result<()> {
        let mut first_err = None;
        for (path, bytes) in rx {
            if let Err(err) = file::write_atomic(&path, &bytes) {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    });

    let out = work(&Writer { tx });
    let flushed = worker
        .join()
        .map_err(|_| anyhow!("the background writer panicked"))?;
    flushed?;
    out
}
