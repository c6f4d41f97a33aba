//! SQLSTATE classification into the failure taxonomy.
//!
//! PostgreSQL reports errors with a five-character SQLSTATE. The first two
//! characters identify the class; a handful of individual codes need their
//! own treatment. Anything unrecognized is treated as permanent: retrying
//! an unknown error against tens of thousands of targets amplifies damage.

use crate::outcome::ErrorKind;

/// Serialization failure: the transaction should simply be retried.
const SERIALIZATION_FAILURE: &str = "40001";
/// Deadlock detected; one of the parties is rolled back.
const DEADLOCK_DETECTED: &str = "40P01";
/// `lock_timeout` elapsed while waiting for a lock.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// Connection terminated by an administrator.
const ADMIN_SHUTDOWN: &str = "57P01";
/// Server crashed and is restarting.
const CRASH_SHUTDOWN: &str = "57P02";
/// Server is starting up and not yet accepting connections.
const CANNOT_CONNECT_NOW: &str = "57P03";

/// Map a PostgreSQL SQLSTATE to a failure kind.
pub fn classify_sqlstate(code: &str) -> ErrorKind {
    match code {
        SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE => {
            ErrorKind::ExecuteTransient
        }
        ADMIN_SHUTDOWN | CRASH_SHUTDOWN | CANNOT_CONNECT_NOW => ErrorKind::ExecuteTransient,
        _ => match code.get(..2) {
            // Class 53: insufficient resources (too many connections,
            // out of memory, disk full).
            Some("53") => ErrorKind::ResourceExhausted,
            // Class 08: connection exceptions.
            Some("08") => ErrorKind::Connect,
            // Class 28: invalid authorization.
            Some("28") => ErrorKind::Connect,
            // Class 3D: the database itself does not exist.
            Some("3D") => ErrorKind::Connect,
            // Class 42: syntax errors, undefined objects, denied access.
            Some("42") => ErrorKind::ExecutePermanent,
            // Class 23: integrity constraint violations.
            Some("23") => ErrorKind::ExecutePermanent,
            // Class 22: data exceptions (bad casts, overflow).
            Some("22") => ErrorKind::ExecutePermanent,
            _ => ErrorKind::ExecutePermanent,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_and_deadlock_are_transient() {
        assert_eq!(classify_sqlstate("40001"), ErrorKind::ExecuteTransient);
        assert_eq!(classify_sqlstate("40P01"), ErrorKind::ExecuteTransient);
        assert_eq!(classify_sqlstate("55P03"), ErrorKind::ExecuteTransient);
    }

    #[test]
    fn server_lifecycle_codes_are_transient() {
        for code in ["57P01", "57P02", "57P03"] {
            assert_eq!(classify_sqlstate(code), ErrorKind::ExecuteTransient);
        }
    }

    #[test]
    fn capacity_class_is_resource_exhausted() {
        // 53300 is too_many_connections, the PgBouncer saturation signal.
        assert_eq!(classify_sqlstate("53300"), ErrorKind::ResourceExhausted);
        assert_eq!(classify_sqlstate("53200"), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn connection_and_auth_classes_map_to_connect() {
        assert_eq!(classify_sqlstate("08006"), ErrorKind::Connect);
        assert_eq!(classify_sqlstate("28P01"), ErrorKind::Connect);
        assert_eq!(classify_sqlstate("3D000"), ErrorKind::Connect);
    }

    #[test]
    fn script_errors_are_permanent() {
        // Syntax error, undefined table, permission denied, unique violation.
        for code in ["42601", "42P01", "42501", "23505"] {
            assert_eq!(classify_sqlstate(code), ErrorKind::ExecutePermanent);
        }
    }

    #[test]
    fn unknown_codes_default_to_permanent() {
        assert_eq!(classify_sqlstate("XX000"), ErrorKind::ExecutePermanent);
        assert_eq!(classify_sqlstate(""), ErrorKind::ExecutePermanent);
    }
}
