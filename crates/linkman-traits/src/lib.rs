//! Common traits for linkman services.

use std::sync::Arc;

/// Background state monitoring for a service
pub trait ServiceMonitoring {
    /// Error type for monitoring operations
    type Error;

    /// Starts monitoring for state changes.
    ///
    /// Implementations should set up necessary watchers or listeners
    /// to detect and propagate state changes.
    ///
    /// # Errors
    /// Returns error if monitoring setup fails.
    #[allow(async_fn_in_trait)]
    async fn start_monitoring(&self) -> Result<(), Self::Error>;
}

/// Background state monitoring for a model
pub trait ModelMonitoring {
    /// Error type for monitoring operations
    type Error;

    /// Starts monitoring for state changes with shared ownership.
    ///
    /// Similar to service monitoring but for Arc-wrapped models,
    /// allowing the model to be shared across multiple owners.
    ///
    /// # Errors
    /// Returns error if monitoring setup fails.
    #[allow(async_fn_in_trait)]
    async fn start_monitoring(self: Arc<Self>) -> Result<(), Self::Error>;
}
