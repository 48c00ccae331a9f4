//! # tk2k — `.tk2k` self-describing archive format reference implementation
//!
//! Format guarantees:
//! - Byte 0 of every archive is a reserved `0x00`; the root folder starts
//!   at offset 1
//! - Every node (folder or file) is reached by following absolute byte
//!   offsets stored in its parent/sibling, never by scanning
//! - All multi-byte integers are little-endian
//! - A node's `lookup_id` is stable for the lifetime of the in-memory
//!   tree; its on-disk offset is not, since adds/removes relocate nodes
//! - The block codec pipeline (BWT, MTF, RLE-v2, order-0/order-1 AC,
//!   rANS) applies in one fixed order selected by a file's flag bits

pub mod archive;
pub mod bitio;
pub mod block;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod hashing;
pub mod tree;

pub use archive::Archive;
pub use block::Progress;
pub use error::{ArchiveError, Result};
pub use hashing::ChecksumKind;
pub use tree::{disambiguate_name, File, Folder, LookupMap};
