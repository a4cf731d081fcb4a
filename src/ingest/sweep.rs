//! Startup reconciliation of interrupted uploads.
//!
//! A record in `saving` belongs to an in-process transfer; no transfer
//! survives a restart, so any `saving` record found at boot is orphaned.
//! The sweep marks them `killed` before the server accepts traffic, so
//! callers see a terminal status instead of a transfer that never ends.

use std::collections::HashMap;

use imagevault_common::{ImageStatus, Result};
use imagevault_db::{ImageChanges, ListQuery, MetadataStore};

/// Mark every `saving` record as `killed`, returning how many were swept.
pub fn kill_orphaned_uploads(store: &dyn MetadataStore) -> Result<usize> {
    let query = ListQuery {
        filters: HashMap::from([("status".to_string(), "saving".to_string())]),
        ..Default::default()
    };
    let orphans = store.list(&query)?;

    let mut swept = 0;
    for record in orphans {
        match store.transition(
            record.id,
            &[ImageStatus::Saving],
            ImageChanges::status(ImageStatus::Killed),
        ) {
            Ok(_) => {
                tracing::warn!(
                    "Killed orphaned upload for image {} left over from a previous run",
                    record.id
                );
                swept += 1;
            }
            Err(e) => {
                tracing::error!("Unable to kill orphaned image {}: {e}", record.id);
            }
        }
    }
    Ok(swept)
}
