//! Template JIT backend for `rv64-core`: translates guest basic blocks to
//! AArch64 machine code in a `mmap`'d, write-then-execute code arena and
//! runs them through a register-pinned trampoline.
//!
//! [`JitContext`] is the only public surface; everything else here is
//! implementation detail `rv64-runner` never touches directly — it just
//! builds a `JitContext` and hands it to `Vm::enable_jit`.

pub mod arena;
pub mod codepatch;
pub mod context;
pub mod emit;
pub mod translate;

pub use context::JitContext;
