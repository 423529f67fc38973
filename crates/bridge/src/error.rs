use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BridgeError {
    #[snafu(display("backend rejected `{command}`: {message}"))]
    Rejected {
        stage: &'static str,
        command: &'static str,
        message: String,
        details: Option<String>,
    },
    #[snafu(display("failed to decode `{command}` payload on `{stage}`: {source}"))]
    Decode {
        stage: &'static str,
        command: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("{entity} '{id}' was not found"))]
    NotFound {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
    #[snafu(display("provider '{provider}' is not configured"))]
    UnknownProvider {
        stage: &'static str,
        provider: String,
    },
}

impl BridgeError {
    /// Builds a rejection for a backend command, the shape every bridge error
    /// takes when it crosses the process boundary.
    pub fn rejected(
        command: &'static str,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self::Rejected {
            stage: "backend-reject",
            command,
            message: message.into(),
            details,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::Rejected { stage, .. }
            | Self::Decode { stage, .. }
            | Self::NotFound { stage, .. }
            | Self::UnknownProvider { stage, .. } => stage,
        }
    }

    /// Secondary text for error banners. Only rejections carry explicit details;
    /// decode failures expose the serde message.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Rejected { details, .. } => details.clone(),
            Self::Decode { source, .. } => Some(source.to_string()),
            Self::NotFound { .. } | Self::UnknownProvider { .. } => None,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
