// The filesystem cannot use unwraps.
#![deny(clippy::unwrap_used)]

// Asserts need to have a reason.
#![deny(clippy::missing_assert_message)]

// Gotta use all the results.
#![deny(unused_results)]
// And nothing in here gets to lean on deprecated APIs.
#![deny(deprecated)]

// The public surface: the filesystem API, the media it mounts, and the
// on-disk layout (tools and tests parse raw blocks with it).
pub mod fs;
pub mod device;
pub mod layout;
pub mod error_types;

// The demo binary dumps blocks with this.
pub use helpers::hex_view::hex_view;

// Within the crate, we can use:
mod helpers;
mod alloc;
mod cache;
mod journal;
mod inode;
mod txn;
