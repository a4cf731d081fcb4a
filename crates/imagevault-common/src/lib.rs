//! Imagevault-Common: Shared types, IDs, and errors.
//!
//! This crate provides common functionality used across imagevault:
//!
//! - **Typed IDs**: A type-safe UUID wrapper for image records
//! - **Core Types**: Enums for record status and disk/container formats
//! - **Error Handling**: The error taxonomy and result alias shared by
//!   every layer of the registry
//!
//! # Examples
//!
//! ```
//! use imagevault_common::{ImageId, ImageStatus, DiskFormat, Error, Result};
//!
//! // Create a typed ID
//! let id = ImageId::new();
//!
//! // Work with record statuses
//! let status = ImageStatus::Queued;
//! assert!(!status.is_terminal());
//!
//! // Parse a format
//! let format: DiskFormat = "qcow2".parse().unwrap();
//!
//! // Use common error types
//! fn example() -> Result<()> {
//!     Err(Error::not_found("image"))
//! }
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
