//! C3: kernel-object life-cycle. `abi` and `traits` are always
//! compiled; `mock` backs the test suite (in-crate unit tests and,
//! via the `testing` feature, external integration tests in `tests/`);
//! `aya_backed` is the real loader/pinner built on the `aya` crate and
//! is only meaningful on Linux, where `/sys/fs/bpf` and network
//! namespaces exist.

pub mod abi;
#[cfg(target_os = "linux")]
pub mod aya_backed;
pub mod layout;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod traits;

pub use layout::{StateDirLayout, DEFAULT_SOCKET_CAPACITY};
