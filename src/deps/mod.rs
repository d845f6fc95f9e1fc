//! Dependency resolution for configure failures
//!
//! Missing names are pulled out of configure/build output, looked up in a
//! persisted mapping cache, resolved through the LLM when unknown, and
//! installed inside the sandbox with apt or vcpkg.

mod cache;
mod missing;
mod resolver;

pub use cache::{DependencyCache, DependencyMapping, InstallMethod, MethodFlags, PackageNames};
pub use missing::find_missing;
pub use resolver::{parse_mappings, DependencyResolver};
