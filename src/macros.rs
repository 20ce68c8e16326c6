//! Small helper macros shared across the crate.

/// Declares a `cfg`-selected implementation submodule and re-exports its items.
///
/// Several modules (the comb filter, in particular) ship a portable fallback plus
/// architecture-specific kernels behind the same set of free functions. Each call site
/// already picked the right module name via `cfg`; this macro just saves repeating
/// `mod x; pub(crate) use x::*;` at each of them.
macro_rules! submodule {
    (pub $name:ident) => {
        mod $name;
        pub(crate) use $name::*;
    };
}
