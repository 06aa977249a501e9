//! The rewrite framework: guarded replacement registration, scoped patching
//! of the symbol table, and the context replacements run under.

pub mod context;
pub mod guard;
pub mod registry;
pub mod scope;

pub use context::RewriteContext;
pub use guard::Guard;
pub use registry::{with_default_registry, RewriteEntry, RewriteRegistry};
pub use scope::PatchScope;
