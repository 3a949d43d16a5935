//! Listener setup

use crate::error::ServerError;
use crate::routes::{routes, LeavesApi};
use std::future::Future;
use std::net::SocketAddr;

/// Bind the leaves API and return the bound address and the server future
///
/// The server runs until `shutdown` resolves, then finishes in-flight
/// requests. Binding to port 0 picks a free port.
///
/// # Errors
/// `ServerError::Bind` when the address cannot be bound
pub fn bind(
    api: LeavesApi,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()> + Send), ServerError> {
    let (bound, server) = warp::serve(routes(api))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|source| ServerError::Bind { addr, source })?;
    tracing::info!(addr = %bound, "Leaves server listening");
    Ok((bound, server))
}
