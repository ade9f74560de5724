/// Persisted configuration could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    NotFound,
    Corrupt,
    StorageUnavailable,
    WriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    AssociationFailed,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    HandshakeFailed,
    PublishFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    InitFailed,
    ReadFailed,
}

/// Why the node asks for a full restart, the universal recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// Nobody submitted the provisioning form in time
    PortalTimeout,
    /// The freshly submitted configuration could not be written
    ConfigCommitFailed(ConfigError),
    /// The first association with freshly provisioned credentials failed
    ProvisioningNetworkFailed(NetworkError),
    /// Station association failed `MAX_ASSOCIATION_ATTEMPTS` times in a row
    NetworkUnavailable(NetworkError),
}
