use std::fmt;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::flows::FlowTransitionError;
use crate::platform::PlatformError;

/// Failure classified by the collaborator that produced it. The server and the
/// CLI both report through this type.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error("platform failure: {0}")]
    Platform(String),
    #[error("classifier failure: {0}")]
    Classifier(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Stable label for log fields.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Flow(_) => "flow_transition",
            Self::Platform(_) => "platform",
            Self::Classifier(_) => "classifier",
            Self::Configuration(_) => "configuration",
        }
    }

    /// A later attempt can succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Platform(_) | Self::Classifier(_))
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let exposure = if self.is_transient() { Exposure::Unavailable } else { Exposure::Internal };
        InterfaceError { exposure, message: self.to_string(), correlation_id: correlation_id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exposure {
    /// Retrying later is expected to help.
    Unavailable,
    Internal,
}

impl Exposure {
    fn label(self) -> &'static str {
        match self {
            Self::Unavailable => "service unavailable",
            Self::Internal => "internal error",
        }
    }
}

/// What an operator-facing surface prints for a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceError {
    pub exposure: Exposure,
    pub message: String,
    pub correlation_id: String,
}

impl fmt::Display for InterfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exposure.label(), self.message)
    }
}

impl std::error::Error for InterfaceError {}

impl From<PlatformError> for ApplicationError {
    fn from(value: PlatformError) -> Self {
        Self::Platform(value.to_string())
    }
}

impl From<CatalogError> for ApplicationError {
    fn from(value: CatalogError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl From<ConfigError> for ApplicationError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::CatalogError;
    use crate::errors::{ApplicationError, Exposure};
    use crate::flows::{DialogPhase, FlowEvent, FlowTransitionError};
    use crate::platform::PlatformError;

    #[test]
    fn platform_outage_is_transient_and_keeps_correlation() {
        let error = ApplicationError::from(PlatformError::Status { status: 503, body: String::new() });
        assert!(error.is_transient());
        assert_eq!(error.class(), "platform");

        let interface = error.into_interface("corr-7");

        assert_eq!(interface.exposure, Exposure::Unavailable);
        assert_eq!(interface.correlation_id, "corr-7");
        assert!(interface.to_string().starts_with("service unavailable: platform failure:"));
    }

    #[test]
    fn broken_catalog_is_an_internal_error() {
        let error = ApplicationError::from(CatalogError::DuplicateIntent("support_billing".to_owned()));

        assert!(!error.is_transient());
        assert_eq!(error.class(), "configuration");
        assert!(error.into_interface("cli-catalog").to_string().starts_with("internal error:"));
    }

    #[test]
    fn flow_violations_are_not_retried() {
        let error = ApplicationError::from(FlowTransitionError::InvalidTransition {
            phase: DialogPhase::Resolved,
            event: FlowEvent::ClassifiedInsufficientData,
        });

        assert!(!error.is_transient());
        assert_eq!(error.class(), "flow_transition");
        assert_eq!(error.into_interface("corr-8").exposure, Exposure::Internal);
    }
}
