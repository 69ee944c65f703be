//! Session establishment.
//!
//! The retry loop behind `Idle → Connecting → Connected`: resolve fresh
//! link parameters, attempt to open, classify and log the failure, wait
//! the fixed delay, try again. There is no maximum attempt count and no
//! backoff growth: a persistently unreachable endpoint retries forever
//! until the background task is stopped.

use crate::config::{SessionConfig, SessionMode};
use crate::domain::{OverlayPtr, SessionPtr};
use crate::{log_debug, log_error, log_info, netinfo, resolver};

/// Run the connect loop until a session opens.
///
/// Each attempt starts from scratch: a fresh interface lookup and a
/// freshly resolved parameter record, never reusing state from a prior
/// attempt. Open failures arrive pre-classified as
/// [`OpenError`](crate::OpenError) and are logged with their class.
pub(crate) async fn establish(overlay: &OverlayPtr, config: &SessionConfig) -> SessionPtr {
    // ---
    log_debug!("entering connect loop");

    loop {
        let net = netinfo::active_network_interface();

        let params = match resolver::resolve(config, &net) {
            Ok(params) => params,
            Err(err) => {
                // Validation at construction keeps this path unreachable
                // for role/mode/transport mismatches; only environment
                // drift lands here. Same policy either way: log, wait,
                // retry.
                log_error!("could not resolve link parameters: {err}");
                tokio::time::sleep(config.retry_delay).await;
                continue;
            }
        };

        match params.mode {
            SessionMode::ListenAsPeer => {
                log_info!("peer listens on: {}", params.locator)
            }
            SessionMode::ConnectToPeer => {
                log_debug!("connecting via {}", params.locator)
            }
        }

        match overlay.open(&params).await {
            Ok(session) => {
                log_info!("session opened successfully");
                return session;
            }
            Err(err) => {
                log_error!(
                    "failed to open session ({err}); retrying in {:?}",
                    config.retry_delay
                );
                tokio::time::sleep(config.retry_delay).await;
            }
        }
    }
}
