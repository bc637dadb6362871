//! Mapping client failures onto driver errors

use migrate_client::ClientError;
use migrate_core::DriverError;

/// Attach an operation name and a driver error kind to client failures.
///
/// Transport failures always become [`DriverError::Connection`] and a shut
/// down client becomes [`DriverError::Closed`], whatever the component.
pub(crate) trait ClientResultExt<T> {
    fn or_connection(self, operation: &'static str) -> Result<T, DriverError>;

    fn or_state(self, operation: &'static str) -> Result<T, DriverError>;

    fn or_lock(self, operation: &'static str) -> Result<T, DriverError>;
}

impl<T> ClientResultExt<T> for Result<T, ClientError> {
    fn or_connection(self, operation: &'static str) -> Result<T, DriverError> {
        self.map_err(|e| map_client_error(e, operation, |op, msg| DriverError::connection(op, msg)))
    }

    fn or_state(self, operation: &'static str) -> Result<T, DriverError> {
        self.map_err(|e| map_client_error(e, operation, |op, msg| DriverError::state(op, msg)))
    }

    fn or_lock(self, operation: &'static str) -> Result<T, DriverError> {
        self.map_err(|e| map_client_error(e, operation, |op, msg| DriverError::lock(op, msg)))
    }
}

pub(crate) fn map_client_error(
    err: ClientError,
    operation: &'static str,
    otherwise: fn(&'static str, String) -> DriverError,
) -> DriverError {
    match err {
        ClientError::Closed => DriverError::Closed,
        err if err.is_network() => DriverError::connection(operation, err),
        err if matches!(err.status(), Some(401) | Some(403)) => DriverError::connection(operation, err),
        err => otherwise(operation, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrate_core::ErrorKind;

    #[test]
    fn test_server_errors_keep_component_kind() {
        let result: Result<(), ClientError> = Err(ClientError::server(500, 4, "internal"));
        let err = result.or_state("version").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(err.to_string().starts_with("version: "));
    }

    #[test]
    fn test_auth_failures_are_connection_errors() {
        let result: Result<(), ClientError> = Err(ClientError::server(401, 11, "not authorized"));
        let err = result.or_lock("lock").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_closed_client() {
        let result: Result<(), ClientError> = Err(ClientError::Closed);
        assert!(matches!(result.or_state("set_version"), Err(DriverError::Closed)));
    }
}
