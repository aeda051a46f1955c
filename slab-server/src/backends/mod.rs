//! Concrete [`slab_core::Backend`] implementations.
//!
//! SPEC_FULL.md §1 treats the actual inference engines (llama.cpp, vLLM,
//! MLX, SGLang, diffusers) as external collaborators that slab-core never
//! implements. [`process::ProcessBackend`] is the thin subprocess-launching
//! adapter that makes any of them pluggable: it spawns a configured
//! executable on the runner's bind target and otherwise defers entirely to
//! the child process. It carries no engine-specific logic.

pub mod process;

pub use process::ProcessBackend;
