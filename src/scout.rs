//! One-shot peer discovery.
//!
//! Fire-and-collect: probe the overlay segment for a bounded interval and
//! report the peers heard from. Purely informational: session
//! establishment neither needs nor waits for scouting, and a backend that
//! cannot scout is not an error worth failing startup over.

use std::time::Duration;

use crate::domain::{OverlayPtr, PeerId};
use crate::resolver::LinkParams;
use crate::{log_debug, log_info, Result};

/// Default collection window.
pub const SCOUT_WAIT: Duration = Duration::from_secs(3);

/// Run a one-shot scout and log what was found.
///
/// Returns the discovered peer identifiers. Errors (including
/// [`Error::ScoutUnsupported`](crate::Error::ScoutUnsupported)) are
/// returned to the caller, who decides whether they matter.
pub async fn scout(overlay: &OverlayPtr, params: &LinkParams, wait: Duration) -> Result<Vec<PeerId>> {
    // ---
    log_debug!("scouting via {}", params.locator);

    let peers = overlay.scout(params, wait).await?;

    for peer in &peers {
        log_info!("scout found peer '{peer}'");
    }
    log_info!("scout found {} overlay instances", peers.len());

    Ok(peers)
}
