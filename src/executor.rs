//! Typed view of the engine module's exports.

use anyhow::Context as _;
use wasmtime::{AsContextMut, Instance, TypedFunc};

use crate::arena::Arena;
use crate::error::{HostError, Result};
use crate::GlobalId;

pub(crate) const INVOKE_CALLBACK: &str = "hexagon_external_global_invoke_callback";
pub(crate) const FMOD: &str = "fmod";

/// Handles granted by the engine are plain linear-memory addresses.
pub type Handle = u32;

#[derive(Clone)]
pub(crate) struct Executor {
    pub handle: Handle,
    pub arena: Arena,
    exports: Exports,
}

#[derive(Clone)]
struct Exports {
    destroy: TypedFunc<i32, ()>,
    load_program: TypedFunc<(i32, i32, i32, i32, i32), i32>,
    context_destroy: TypedFunc<i32, ()>,
    context_run: TypedFunc<i32, ()>,
    context_get_global: TypedFunc<(i32, i32), f64>,
    context_set_global: TypedFunc<(i32, i32, f64), ()>,
}

macro_rules! export {
    ($store:expr, $instance:expr, $name:literal) => {
        $instance
            .get_typed_func(&mut $store, $name)
            .context($name)?
    };
}

impl Executor {
    /// Binds every export and creates the executor instance.
    pub fn create(mut store: impl AsContextMut, instance: &Instance) -> anyhow::Result<Self> {
        let create: TypedFunc<(), i32> = export!(store, instance, "hexagon_executor_create");
        let exports = Exports {
            destroy: export!(store, instance, "hexagon_executor_destroy"),
            load_program: export!(store, instance, "hexagon_executor_load_program"),
            context_destroy: export!(store, instance, "hexagon_context_destroy"),
            context_run: export!(store, instance, "hexagon_context_run"),
            context_get_global: export!(store, instance, "hexagon_context_get_global"),
            context_set_global: export!(store, instance, "hexagon_context_set_global"),
        };
        let arena = Arena::bind(&mut store, instance)?;

        let handle = create.call(&mut store, ())?;
        if handle == 0 {
            anyhow::bail!("hexagon_executor_create returned a null executor");
        }

        Ok(Self {
            handle: handle as Handle,
            arena,
            exports,
        })
    }

    pub fn destroy(&self, store: impl AsContextMut) -> Result<()> {
        self.exports
            .destroy
            .call(store, self.handle as i32)
            .map_err(HostError::from_trap)
    }

    /// Returns the new context, or `None` if the engine rejected the code.
    pub fn load_program(
        &self,
        store: impl AsContextMut,
        code: u32,
        len: usize,
        user_data: u32,
    ) -> Result<Option<Handle>> {
        let ctx = self
            .exports
            .load_program
            .call(
                store,
                (self.handle as i32, code as i32, len as i32, user_data as i32, 0),
            )
            .map_err(HostError::from_trap)?;
        Ok((ctx != 0).then_some(ctx as Handle))
    }

    pub fn context_destroy(&self, store: impl AsContextMut, ctx: Handle) -> Result<()> {
        self.exports
            .context_destroy
            .call(store, ctx as i32)
            .map_err(HostError::from_trap)
    }

    pub fn context_run(&self, store: impl AsContextMut, ctx: Handle) -> Result<()> {
        self.exports
            .context_run
            .call(store, ctx as i32)
            .map_err(HostError::from_trap)
    }

    pub fn get_global(&self, store: impl AsContextMut, ctx: Handle, id: GlobalId) -> Result<f64> {
        self.exports
            .context_get_global
            .call(store, (ctx as i32, id as i32))
            .map_err(HostError::from_trap)
    }

    pub fn set_global(
        &self,
        store: impl AsContextMut,
        ctx: Handle,
        id: GlobalId,
        value: f64,
    ) -> Result<()> {
        self.exports
            .context_set_global
            .call(store, (ctx as i32, id as i32, value))
            .map_err(HostError::from_trap)
    }
}
