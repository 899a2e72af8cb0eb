//! AWS provider error types

use stratus_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("aws CLI not found. Please install: https://aws.amazon.com/cli/")]
    CliNotFound,

    #[error("aws authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("aws request throttled: {0}")]
    Throttled(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("aws {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Unexpected aws response: {0}")]
    UnexpectedResponse(String),

    #[error("Resource cannot be changed in place: {0}")]
    ReplacementRequired(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] CloudError),
}

impl AwsError {
    /// Classify a failed command by the error code in its stderr
    pub fn from_stderr(command: &str, stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        const THROTTLING: [&str; 4] = [
            "Throttling",
            "RequestLimitExceeded",
            "TooManyRequestsException",
            "Rate exceeded",
        ];
        const AUTH: [&str; 4] = [
            "ExpiredToken",
            "InvalidClientTokenId",
            "Unable to locate credentials",
            "UnrecognizedClientException",
        ];
        const NOT_FOUND: [&str; 3] = ["NotFound", "NoSuchHostedZone", "does not exist"];
        const EXISTS: [&str; 3] = ["AlreadyExists", "Duplicate", "already exists"];

        if THROTTLING.iter().any(|code| message.contains(code)) {
            AwsError::Throttled(message)
        } else if AUTH.iter().any(|code| message.contains(code)) {
            AwsError::AuthenticationFailed(message)
        } else if NOT_FOUND.iter().any(|code| message.contains(code)) {
            AwsError::NotFound(message)
        } else if EXISTS.iter().any(|code| message.contains(code)) {
            AwsError::AlreadyExists(message)
        } else {
            AwsError::CommandFailed {
                command: command.to_string(),
                message,
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound(_))
    }
}

impl From<AwsError> for CloudError {
    fn from(error: AwsError) -> Self {
        match error {
            AwsError::CliNotFound => CloudError::CommandFailed(AwsError::CliNotFound.to_string()),
            AwsError::AuthenticationFailed(m) => CloudError::AuthenticationFailed(m),
            AwsError::Throttled(m) => CloudError::Throttled(m),
            AwsError::NotFound(m) => CloudError::ResourceNotFound(m),
            AwsError::ReplacementRequired(m) => CloudError::InvalidConfig(format!(
                "{} must be replaced; destroy and re-apply it",
                m
            )),
            AwsError::IoError(e) => CloudError::Io(e),
            AwsError::JsonError(e) => CloudError::Json(e),
            AwsError::CloudError(e) => e,
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_stderr() {
        let throttled = AwsError::from_stderr(
            "rds describe-db-instances",
            "An error occurred (Throttling) when calling the DescribeDBInstances operation: Rate exceeded",
        );
        assert!(matches!(throttled, AwsError::Throttled(_)));

        let missing = AwsError::from_stderr(
            "rds describe-db-instances",
            "An error occurred (DBInstanceNotFound) when calling the DescribeDBInstances operation",
        );
        assert!(missing.is_not_found());

        let duplicate = AwsError::from_stderr(
            "ec2 create-security-group",
            "An error occurred (InvalidGroup.Duplicate) when calling the CreateSecurityGroup operation",
        );
        assert!(matches!(duplicate, AwsError::AlreadyExists(_)));

        let other = AwsError::from_stderr("ecs create-service", "  InvalidParameterException  \n");
        match other {
            AwsError::CommandFailed { command, message } => {
                assert_eq!(command, "ecs create-service");
                assert_eq!(message, "InvalidParameterException");
            }
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn test_conversion_keeps_retryability() {
        let throttled: CloudError = AwsError::Throttled("slow down".to_string()).into();
        assert!(throttled.is_transient());

        let failed: CloudError = AwsError::CommandFailed {
            command: "ec2 create-vpc".to_string(),
            message: "VpcLimitExceeded".to_string(),
        }
        .into();
        assert!(!failed.is_transient());

        let missing: CloudError = AwsError::NotFound("gone".to_string()).into();
        assert!(matches!(missing, CloudError::ResourceNotFound(_)));
    }
}
