//! Raw byte ranges in the executor's linear memory.
//!
//! Allocation goes through the engine's own `hexagon_glue_alloc`/`hexagon_glue_free`
//! so the executor can take ownership of what the host writes. Every successful
//! [`Arena::allocate`] must be matched by exactly one [`Arena::free`].

use anyhow::Context as _;
use wasmtime::{AsContext, AsContextMut, Instance, Memory, TypedFunc};

use crate::error::{HostError, Result};

#[derive(Clone)]
pub struct Arena {
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
}

impl Arena {
    pub(crate) fn bind(mut store: impl AsContextMut, instance: &Instance) -> anyhow::Result<Self> {
        let memory = instance
            .get_memory(&mut store, "memory")
            .context("engine does not export `memory`")?;
        let alloc = instance
            .get_typed_func(&mut store, "hexagon_glue_alloc")
            .context("hexagon_glue_alloc")?;
        let free = instance
            .get_typed_func(&mut store, "hexagon_glue_free")
            .context("hexagon_glue_free")?;
        Ok(Self {
            memory,
            alloc,
            free,
        })
    }

    pub fn allocate(&self, store: impl AsContextMut, len: usize) -> Result<u32> {
        let size = i32::try_from(len).map_err(|_| HostError::OutOfMemory { len })?;
        let addr = self.alloc.call(store, size).map_err(HostError::from_trap)?;
        if addr == 0 {
            return Err(HostError::OutOfMemory { len });
        }
        Ok(addr as u32)
    }

    pub fn free(&self, store: impl AsContextMut, addr: u32) -> Result<()> {
        self.free
            .call(store, addr as i32)
            .map_err(HostError::from_trap)
    }

    pub fn write(&self, store: impl AsContextMut, addr: u32, bytes: &[u8]) -> Result<()> {
        self.memory
            .write(store, addr as usize, bytes)
            .with_context(|| format!("write of {} bytes at {addr:#x}", bytes.len()))?;
        Ok(())
    }

    pub fn write_byte(&self, store: impl AsContextMut, addr: u32, value: u8) -> Result<()> {
        self.write(store, addr, &[value])
    }

    pub fn read(&self, store: impl AsContext, addr: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.memory
            .read(store, addr as usize, &mut buf)
            .with_context(|| format!("read of {len} bytes at {addr:#x}"))?;
        Ok(buf)
    }
}
