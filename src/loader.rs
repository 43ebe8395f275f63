//! Sources of compiled-module bytes.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::FunctionId;

pub type LoadFuture = Pin<Box<dyn Future<Output = Option<Vec<u8>>>>>;

/// Supplies the compiled module for a function id, or `None` if there is none.
pub trait FunctionLoader {
    fn load(&self, fn_id: FunctionId) -> LoadFuture;
}

impl<F, Fut> FunctionLoader for F
where
    F: Fn(FunctionId) -> Fut,
    Fut: Future<Output = Option<Vec<u8>>> + 'static,
{
    fn load(&self, fn_id: FunctionId) -> LoadFuture {
        Box::pin(self(fn_id))
    }
}

/// Reads `<dir>/<fn_id>.wasm`.
#[derive(Clone, Debug)]
pub struct DirLoader {
    dir: PathBuf,
}

impl DirLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_of(&self, fn_id: FunctionId) -> PathBuf {
        self.dir.join(format!("{fn_id}.wasm"))
    }
}

impl FunctionLoader for DirLoader {
    fn load(&self, fn_id: FunctionId) -> LoadFuture {
        let path = self.path_of(fn_id);
        Box::pin(async move {
            match tokio::fs::read(&path).await {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    log::warn!("cannot read {}: {err}", path.display());
                    None
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn closures_are_loaders() {
        let loader = |fn_id: FunctionId| async move { (fn_id == 1).then(|| vec![1, 2, 3]) };
        assert_eq!(loader.load(1).await, Some(vec![1, 2, 3]));
        assert_eq!(loader.load(2).await, None);
    }

    #[tokio::test]
    async fn dir_loader_reads_by_function_id() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("3.wasm"), b"\0asm").unwrap();

        let loader = DirLoader::new(dir.path());
        assert_eq!(loader.path_of(3), dir.path().join("3.wasm"));
        assert_eq!(loader.load(3).await.as_deref(), Some(&b"\0asm"[..]));
        assert_eq!(loader.load(4).await, None);
    }
}
