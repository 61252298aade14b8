//! Binary-safe text replacement inside the macro payload of ZIP-based Office
//! containers (`.xlsm`, `.docm`, `.pptm`, ...).
//!
//! The crate treats the embedded `vbaProject.bin` as an opaque byte sequence. It
//! provides:
//!
//! - **Archive transcoding** ([`archive`]): extract a container to a temporary
//!   staging directory and deterministically repack it with deflate.
//! - **Blob patching** ([`patcher`]): literal, non-overlapping byte replacement.
//! - **Transactions** ([`transaction`]): backup, extract, patch, repack, swap and
//!   verify, restoring the original from its backup on any failure.
//!
//! # Example
//!
//! ```no_run
//! use vba_sanitize_core::{Patch, SanitizeOptions, Transaction};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let patch = Patch::new(*b"QBIS", *b"ERPSystem")?;
//! let report = Transaction::new("book.xlsm", SanitizeOptions::new(patch))
//!     .with_progress(|progress| println!("{:?}", progress.state))
//!     .run()?;
//!
//! println!("replaced {} occurrence(s)", report.replaced);
//! # Ok(())
//! # }
//! ```
//!
//! The blob is never reinterpreted, so changing its length (search and
//! replacement of different sizes) can leave a macro project that Office refuses
//! to load. [`PatchReport::size_delta`] reports the change.

pub mod archive;
pub mod error;
pub mod patcher;
pub mod transaction;

/// Location of the macro project inside an OOXML container.
pub const DEFAULT_TARGET_ENTRY: &str = "xl/vbaProject.bin";

pub use archive::{ContainerCodec, EntrySummary, StagingArea, ZipCodec};
pub use error::{Error, Result};
pub use patcher::{count_occurrences, replace_all, Patch, PatchedBlob, TextEncoding};
pub use transaction::{
    backup_path_for, restore_from_backup, verify, PatchProgress, PatchReport, RestoreOutcome,
    SanitizeOptions, Stage, Transaction, TransactionState, Verification, BACKUP_SUFFIX,
};
