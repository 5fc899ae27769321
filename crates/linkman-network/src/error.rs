/// Network service errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Control socket could not be opened for an interface.
    #[error("cannot open control socket for {iface}")]
    SocketUnavailable {
        /// Interface the socket was requested for.
        iface: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// An ioctl against the interface failed.
    #[error("cannot {operation} on {iface}")]
    Ioctl {
        /// The kernel operation that failed.
        operation: &'static str,
        /// Interface the operation targeted.
        iface: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Service initialization failed (used for top-level service startup).
    #[error("cannot initialize network service: {0}")]
    ServiceInitializationFailed(String),

    /// No device is registered under the given interface name.
    #[error("no such device: {0}")]
    DeviceNotFound(String),

    /// The operation requires a wireless device.
    #[error("device {0} is not a wireless device")]
    NotWireless(String),

    /// A forced activation named a network that is neither in the scan list
    /// nor accompanied by security information.
    #[error("network '{essid}' is unknown and no security information was provided")]
    MissingSecurity {
        /// The network name the operator asked for.
        essid: String,
    },

    /// Network operation failed.
    #[error("cannot {operation}")]
    OperationFailed {
        /// The operation that failed.
        operation: &'static str,
        /// Underlying error that caused the failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The main scheduling context is gone; the service is shutting down.
    #[error("service is shutting down")]
    ShuttingDown,
}
