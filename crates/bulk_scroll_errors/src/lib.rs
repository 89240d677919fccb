//! Error classification shared across the bulk-by-scroll engine.
//!
//! `ErrorMetadata` is attached to an `anyhow::Error` context chain via
//! `.context(e)`. Call sites that need to decide whether to retry, count
//! a version conflict, or treat a failure as fatal should go through
//! [`ErrorMetadataAnyhowExt`] rather than downcasting by hand.

use std::borrow::Cow;

#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Request failed validation before any I/O was attempted.
    BadRequest,
    /// The backend rejected a bulk dispatch under transient backpressure.
    /// Retried by the bulk retry executor.
    Overloaded,
    /// Optimistic-concurrency failure on a single document.
    Occ,
    /// The cluster has not been upgraded to the minimum supported version.
    ClusterVersionUnsupported,
    /// Unclassified failure in the control loop. Always fatal.
    OperationalInternalServerError,
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// CapitalCamelCase tag, stable across copy changes. Usable in tests.
    pub short_msg: Cow<'static, str>,
    /// Human readable, developer facing message.
    pub msg: Cow<'static, str>,
}

impl ErrorMetadata {
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn overloaded(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Overloaded,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn system_occ() -> Self {
        Self {
            code: ErrorCode::Occ,
            short_msg: OCC_ERROR.into(),
            msg: OCC_ERROR_MSG.into(),
        }
    }

    pub fn cluster_version_unsupported(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::ClusterVersionUnsupported,
            short_msg: CLUSTER_VERSION_UNSUPPORTED.into(),
            msg: msg.into(),
        }
    }

    pub fn operational_internal_server_error() -> Self {
        Self {
            code: ErrorCode::OperationalInternalServerError,
            short_msg: INTERNAL_SERVER_ERROR.into(),
            msg: INTERNAL_SERVER_ERROR_MSG.into(),
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.code == ErrorCode::BadRequest
    }

    pub fn is_overloaded(&self) -> bool {
        self.code == ErrorCode::Overloaded
    }

    pub fn is_occ(&self) -> bool {
        self.code == ErrorCode::Occ
    }

    pub fn is_cluster_version_unsupported(&self) -> bool {
        self.code == ErrorCode::ClusterVersionUnsupported
    }
}

pub trait ErrorMetadataAnyhowExt {
    fn is_bad_request(&self) -> bool;
    fn is_overloaded(&self) -> bool;
    fn is_occ(&self) -> bool;
    fn is_cluster_version_unsupported(&self) -> bool;
    fn short_msg(&self) -> &str;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn is_bad_request(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(ErrorMetadata::is_bad_request)
    }

    fn is_overloaded(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(ErrorMetadata::is_overloaded)
    }

    fn is_occ(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(ErrorMetadata::is_occ)
    }

    fn is_cluster_version_unsupported(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(ErrorMetadata::is_cluster_version_unsupported)
    }

    fn short_msg(&self) -> &str {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => &e.short_msg,
            None => INTERNAL_SERVER_ERROR,
        }
    }
}

pub const INTERNAL_SERVER_ERROR_MSG: &str = "Your request couldn't be completed. Try again later.";
pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
pub const OCC_ERROR_MSG: &str =
    "Document version changed while this request was executing, and on every retry.";
pub const OCC_ERROR: &str = "OptimisticConcurrencyControlFailure";
const CLUSTER_VERSION_UNSUPPORTED: &str = "ClusterVersionUnsupported";

#[cfg(any(test, feature = "testing"))]
mod proptest_impl {
    use proptest::prelude::*;

    use super::{
        ErrorCode,
        ErrorMetadata,
    };

    impl Arbitrary for ErrorMetadata {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            any::<ErrorCode>()
                .prop_map(|ec| match ec {
                    ErrorCode::BadRequest => ErrorMetadata::bad_request("bad", "request"),
                    ErrorCode::Overloaded => ErrorMetadata::overloaded("over", "loaded"),
                    ErrorCode::Occ => ErrorMetadata::system_occ(),
                    ErrorCode::ClusterVersionUnsupported => {
                        ErrorMetadata::cluster_version_unsupported("too old")
                    },
                    ErrorCode::OperationalInternalServerError => {
                        ErrorMetadata::operational_internal_server_error()
                    },
                })
                .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_round_trips_through_anyhow_context() {
        let err = anyhow::anyhow!("backend said no").context(ErrorMetadata::overloaded(
            "TooManyRequests",
            "backend rejected the bulk request",
        ));
        assert!(err.is_overloaded());
        assert!(!err.is_occ());
        assert_eq!(err.short_msg(), "TooManyRequests");
    }

    #[test]
    fn unclassified_anyhow_errors_are_not_any_known_code() {
        let err = anyhow::anyhow!("totally generic");
        assert!(!err.is_overloaded());
        assert!(!err.is_occ());
        assert!(!err.is_bad_request());
        assert_eq!(err.short_msg(), INTERNAL_SERVER_ERROR);
    }
}
